//! # Audio Module
//!
//! Queue-driven playback for voice channels.
//!
//! ## Architecture
//!
//! ### [`manager`] - Player Registry
//! - One [`player::ChannelPlayer`] per voice channel, created on demand
//! - Players remove themselves once their voice connection is disposed
//!
//! ### [`player`] - Channel Player
//! - Queueing, play/pause/skip and end-of-song transitions
//! - Keeps the "now playing" message in sync with the progress
//!
//! ### [`queue`] / [`playback`] - State
//! - FIFO of requested songs
//! - Progress of the active song, derived from the frames sent
//!
//! ### [`encoder`] - Audio Pipeline
//! - Decodes downloaded audio and produces 20ms Opus frames
//!
//! ## Audio Quality
//!
//! - **Sample Rate**: 48kHz (Discord standard)
//! - **Channels**: Stereo (2 channels)
//! - **Encoding**: Opus at 96kbps (configurable)

pub mod encoder;
pub mod manager;
pub mod playback;
pub mod player;
pub mod queue;

pub use manager::ChannelPlayerManager;
pub use player::{ChannelPlayer, PlayerDeps, PlayerError, PlayerSettings};
