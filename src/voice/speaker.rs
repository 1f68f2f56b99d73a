use async_trait::async_trait;
use bytes::Bytes;
use std::{sync::Arc, time::Duration};
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{SpeakOutcome, Speaker, VoiceConnection, VoiceResult};
use crate::audio::encoder::EncodeSession;

/// Espera cuando la conexión existe pero aún no está lista
const NOT_READY_BACKOFF: Duration = Duration::from_millis(100);

struct FrameStream {
    session: Box<dyn EncodeSession>,
    /// Frame interrumpido por una cancelación, se reenvía al reanudar
    pending: Option<Bytes>,
    frames_sent: u64,
}

/// Speaker over an encode session.
///
/// The session and the frames-sent counter live as long as the speaker, so a
/// stream that was cancelled (paused) resumes from the next frame when it is
/// spoken again. Every sent frame publishes the new count on a `watch`
/// channel; readers only ever see the latest value.
#[derive(Clone)]
pub struct FrameSpeaker {
    stream: Arc<Mutex<FrameStream>>,
    frames: Arc<watch::Sender<u64>>,
    frame_duration: Duration,
}

impl FrameSpeaker {
    pub fn new(session: Box<dyn EncodeSession>) -> Self {
        let frame_duration = session.frame_duration();
        let (frames, _) = watch::channel(0);
        Self {
            stream: Arc::new(Mutex::new(FrameStream {
                session,
                pending: None,
                frames_sent: 0,
            })),
            frames: Arc::new(frames),
            frame_duration,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.frames.subscribe()
    }

    pub fn frames_sent(&self) -> u64 {
        *self.frames.borrow()
    }

    pub fn frame_duration(&self) -> Duration {
        self.frame_duration
    }

    pub fn same_stream(&self, other: &FrameSpeaker) -> bool {
        Arc::ptr_eq(&self.stream, &other.stream)
    }
}

#[async_trait]
impl Speaker for FrameSpeaker {
    async fn speak(
        &self,
        cancel: &CancellationToken,
        connection: Arc<dyn VoiceConnection>,
    ) -> VoiceResult<SpeakOutcome> {
        let mut stream = self.stream.lock().await;
        connection.set_speaking(true).await?;

        let result = loop {
            if cancel.is_cancelled() {
                break Ok(SpeakOutcome::Cancelled);
            }

            if !connection.is_ready() {
                tokio::select! {
                    _ = cancel.cancelled() => break Ok(SpeakOutcome::Cancelled),
                    _ = tokio::time::sleep(NOT_READY_BACKOFF) => continue,
                }
            }

            let frame = match stream.pending.take() {
                Some(frame) => frame,
                None => match stream.session.next_frame() {
                    Ok(Some(frame)) => frame,
                    Ok(None) => break Ok(SpeakOutcome::Finished),
                    Err(e) => break Err(e.into()),
                },
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    stream.pending = Some(frame);
                    break Ok(SpeakOutcome::Cancelled);
                }
                sent = connection.send_frame(frame.clone()) => {
                    if let Err(e) = sent {
                        break Err(e);
                    }
                }
            }

            stream.frames_sent += 1;
            self.frames.send_replace(stream.frames_sent);
        };

        debug!("Transmisión detenida tras {} frames: {:?}", stream.frames_sent, result);
        if let Err(e) = connection.set_speaking(false).await {
            warn!("⚠️ No se pudo desactivar el estado de habla: {}", e);
        }

        result
    }
}
