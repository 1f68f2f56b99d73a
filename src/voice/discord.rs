//! Songbird-backed voice transport.
//!
//! Frames reach songbird as a live DCA stream: `set_speaking(true)` opens a
//! bounded pipe and starts a track reading from it, every `send_frame` pushes
//! one length-prefixed Opus packet, and `set_speaking(false)` closes the pipe.
//! The bounded pipe gives real-time back-pressure since songbird only drains
//! it as fast as it plays.

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use serenity::model::id::{ChannelId, GuildId};
use songbird::{
    input::{AudioStream, Input, LiveInput},
    tracks::TrackHandle,
    Call, Event, EventContext, EventHandler as VoiceEventHandler, Songbird,
};
use std::{
    io::Read,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use symphonia::core::{io::ReadOnlySource, probe::Hint};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use super::{VoiceConnection, VoiceError, VoiceResult, VoiceStateChange, VoiceTransport};

/// Frames en vuelo antes de bloquear al emisor (~1s)
const PIPE_CAPACITY: usize = 50;

const DCA_MAGIC: &[u8] = b"DCA1";

pub struct SongbirdTransport {
    songbird: Arc<Songbird>,
    updates: broadcast::Sender<VoiceStateChange>,
}

impl SongbirdTransport {
    pub fn new(songbird: Arc<Songbird>) -> Self {
        let (updates, _) = broadcast::channel(64);
        Self { songbird, updates }
    }

    /// Reenvía un cambio de estado de voz del propio bot
    pub fn publish(&self, change: VoiceStateChange) {
        debug!(
            "🔁 Estado de voz en guild {}: {:?} -> {:?}",
            change.guild_id, change.previous_channel, change.channel
        );
        let _ = self.updates.send(change);
    }
}

#[async_trait]
impl VoiceTransport for SongbirdTransport {
    async fn join(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> VoiceResult<Arc<dyn VoiceConnection>> {
        let call = self
            .songbird
            .join(guild_id, channel_id)
            .await
            .map_err(|e| VoiceError::Connection {
                channel_id,
                reason: e.to_string(),
            })?;

        let ready = Arc::new(AtomicBool::new(true));
        {
            let mut handler = call.lock().await;
            for event in [
                songbird::CoreEvent::DriverConnect,
                songbird::CoreEvent::DriverReconnect,
                songbird::CoreEvent::DriverDisconnect,
            ] {
                handler.add_global_event(
                    Event::Core(event),
                    DriverStateHandler {
                        guild_id,
                        ready: ready.clone(),
                    },
                );
            }
        }

        Ok(Arc::new(SongbirdConnection {
            songbird: self.songbird.clone(),
            guild_id,
            call,
            ready,
            output: Mutex::new(None),
        }))
    }

    fn voice_state_updates(&self) -> broadcast::Receiver<VoiceStateChange> {
        self.updates.subscribe()
    }
}

struct DriverStateHandler {
    guild_id: GuildId,
    ready: Arc<AtomicBool>,
}

#[async_trait]
impl VoiceEventHandler for DriverStateHandler {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        match ctx {
            EventContext::DriverConnect(_) | EventContext::DriverReconnect(_) => {
                info!("🔌 Driver de voz conectado en guild {}", self.guild_id);
                self.ready.store(true, Ordering::SeqCst);
            }
            EventContext::DriverDisconnect(_) => {
                warn!("🔌 Driver de voz desconectado en guild {}", self.guild_id);
                self.ready.store(false, Ordering::SeqCst);
            }
            _ => {}
        }
        None
    }
}

struct Output {
    frames: flume::Sender<Bytes>,
    track: TrackHandle,
}

pub struct SongbirdConnection {
    songbird: Arc<Songbird>,
    guild_id: GuildId,
    call: Arc<Mutex<Call>>,
    ready: Arc<AtomicBool>,
    output: Mutex<Option<Output>>,
}

impl SongbirdConnection {
    async fn open_output(&self) -> VoiceResult<Output> {
        let (frames, rx) = flume::bounded(PIPE_CAPACITY);
        frames
            .send_async(dca_header())
            .await
            .map_err(|e| VoiceError::Transport(e.to_string()))?;

        let mut hint = Hint::new();
        hint.with_extension("dca");
        let stream = AudioStream {
            input: Box::new(ReadOnlySource::new(FramePipe::new(rx))) as _,
            hint: Some(hint),
        };

        let track = self
            .call
            .lock()
            .await
            .play_only_input(Input::Live(LiveInput::Raw(stream), None));
        Ok(Output { frames, track })
    }
}

#[async_trait]
impl VoiceConnection for SongbirdConnection {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn set_speaking(&self, speaking: bool) -> VoiceResult<()> {
        let mut output = self.output.lock().await;
        if speaking {
            if output.is_none() {
                *output = Some(self.open_output().await?);
            }
            return Ok(());
        }

        if let Some(Output { frames, track }) = output.take() {
            drop(frames);
            if let Err(e) = track.stop() {
                debug!("La pista ya había terminado: {}", e);
            }
        }
        Ok(())
    }

    async fn send_frame(&self, frame: Bytes) -> VoiceResult<()> {
        let frames = self
            .output
            .lock()
            .await
            .as_ref()
            .map(|output| output.frames.clone())
            .ok_or_else(|| VoiceError::Transport("not speaking".to_string()))?;

        frames
            .send_async(dca_frame(&frame))
            .await
            .map_err(|_| VoiceError::Transport("audio pipe closed".to_string()))
    }

    async fn disconnect(&self) -> VoiceResult<()> {
        self.output.lock().await.take();
        self.ready.store(false, Ordering::SeqCst);
        self.songbird
            .remove(self.guild_id)
            .await
            .map_err(|e| VoiceError::Transport(e.to_string()))
    }
}

/// `Read` sobre los frames del canal; EOF cuando se cierra el emisor
struct FramePipe {
    frames: flume::Receiver<Bytes>,
    current: Bytes,
}

impl FramePipe {
    fn new(frames: flume::Receiver<Bytes>) -> Self {
        Self {
            frames,
            current: Bytes::new(),
        }
    }
}

impl Read for FramePipe {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        while self.current.is_empty() {
            match self.frames.recv() {
                Ok(chunk) => self.current = chunk,
                Err(_) => return Ok(0),
            }
        }
        let n = buf.len().min(self.current.len());
        buf[..n].copy_from_slice(&self.current.split_to(n));
        Ok(n)
    }
}

fn dca_header() -> Bytes {
    let metadata = serde_json::json!({
        "dca": {
            "version": 1,
            "tool": { "name": env!("CARGO_PKG_NAME"), "version": env!("CARGO_PKG_VERSION") }
        },
        "opus": {
            "mode": "music",
            "sample_rate": 48_000,
            "frame_size": 960,
            "vbr": true,
            "channels": 2
        }
    })
    .to_string();

    let mut header = BytesMut::with_capacity(DCA_MAGIC.len() + 4 + metadata.len());
    header.put_slice(DCA_MAGIC);
    header.put_i32_le(metadata.len() as i32);
    header.put_slice(metadata.as_bytes());
    header.freeze()
}

/// Un paquete Opus con su longitud (i16 LE) delante
fn dca_frame(packet: &[u8]) -> Bytes {
    let mut frame = BytesMut::with_capacity(2 + packet.len());
    frame.put_i16_le(packet.len() as i16);
    frame.put_slice(packet);
    frame.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn frame_is_length_prefixed() {
        let frame = dca_frame(&[0xF8, 0xFF, 0xFE]);
        assert_eq!(frame.as_ref(), &[3, 0, 0xF8, 0xFF, 0xFE]);
    }

    #[test]
    fn header_carries_magic_and_metadata() {
        let header = dca_header();
        assert_eq!(&header[..4], DCA_MAGIC);

        let len = i32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;
        assert_eq!(header.len(), 8 + len);

        let metadata: serde_json::Value = serde_json::from_slice(&header[8..]).unwrap();
        assert_eq!(metadata["opus"]["sample_rate"], 48_000);
        assert_eq!(metadata["opus"]["channels"], 2);
    }

    #[test]
    fn pipe_reads_across_chunks_until_closed() {
        let (tx, rx) = flume::unbounded();
        tx.send(Bytes::from_static(b"abc")).unwrap();
        tx.send(Bytes::from_static(b"de")).unwrap();
        drop(tx);

        let mut out = Vec::new();
        FramePipe::new(rx).read_to_end(&mut out).unwrap();
        assert_eq!(out, b"abcde");
    }
}
