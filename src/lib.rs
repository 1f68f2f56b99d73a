//! Voice Jukebox: a Discord bot that plays YouTube audio into voice
//! channels, one queue-driven player per channel.

pub mod audio;
pub mod bot;
pub mod config;
pub mod sources;
pub mod ui;
pub mod voice;

#[cfg(test)]
mod testing;
