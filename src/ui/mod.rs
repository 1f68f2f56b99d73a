//! # UI Module
//!
//! Everything the player shows in the text chat of a voice channel: the
//! "now playing" message with its controls, queue listings and the text
//! catalogue used for replies. The bot's "listening to" status follows the
//! song being played.

pub mod buttons;
pub mod embeds;
pub mod messages;
pub mod now_playing;
pub mod presence;
pub mod sink;

pub use now_playing::{Controls, NowPlayingView, SongMessage};
pub use presence::{PresenceSink, ShardPresence};
pub use sink::{HttpMessageSink, MessageError, MessageSink};
