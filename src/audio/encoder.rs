use audiopus::{coder::Encoder as OpusCoder, Application, Bitrate, Channels, SampleRate};
use bytes::Bytes;
use rubato::{FftFixedIn, Resampler};
use std::{collections::VecDeque, io::Cursor, time::Duration};
use symphonia::core::{
    audio::SampleBuffer,
    codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL},
    errors::Error as SymphoniaError,
    formats::{FormatOptions, FormatReader},
    io::MediaSourceStream,
    meta::MetadataOptions,
    probe::Hint,
};
use tracing::{debug, warn};

/// Duración de cada frame Opus entregado a la conexión de voz
pub const FRAME_DURATION: Duration = Duration::from_millis(20);

const OUTPUT_RATE: u32 = 48_000;
const CHANNELS: usize = 2;
const FRAME_SAMPLES: usize = 960; // 20ms @ 48kHz, por canal
const MAX_PACKET_SIZE: usize = 4_000;
const RESAMPLE_CHUNK: usize = 1_024;

#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("no playable audio track found")]
    NoAudioTrack,
    #[error("audio decoding failed: {0}")]
    Decode(#[from] SymphoniaError),
    #[error("resampling failed: {0}")]
    Resample(String),
    #[error("opus encoding failed: {0}")]
    Opus(#[from] audiopus::Error),
}

/// A source of encoded audio frames for one song.
///
/// `Ok(None)` marks the end of the stream and is distinct from a failure.
pub trait EncodeSession: Send {
    fn next_frame(&mut self) -> Result<Option<Bytes>, EncodeError>;

    fn frame_duration(&self) -> Duration;
}

/// Turns a downloaded audio file into an [`EncodeSession`].
pub trait Encoder: Send + Sync {
    fn encode(&self, audio: Bytes) -> Result<Box<dyn EncodeSession>, EncodeError>;
}

/// Codificador Opus: symphonia para decodificar, rubato para llevar a 48kHz
/// y audiopus para producir frames de 20ms en estéreo.
#[derive(Debug, Clone)]
pub struct OpusFrameEncoder {
    bitrate: u32,
}

impl OpusFrameEncoder {
    pub fn new(bitrate: u32) -> Self {
        Self { bitrate }
    }
}

impl Encoder for OpusFrameEncoder {
    fn encode(&self, audio: Bytes) -> Result<Box<dyn EncodeSession>, EncodeError> {
        let source = MediaSourceStream::new(Box::new(Cursor::new(audio)), Default::default());
        let probed = symphonia::default::get_probe().format(
            &Hint::new(),
            source,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )?;
        let format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or(EncodeError::NoAudioTrack)?;
        let track_id = track.id;
        let input_rate = track.codec_params.sample_rate.unwrap_or(OUTPUT_RATE);
        let decoder =
            symphonia::default::get_codecs().make(&track.codec_params, &DecoderOptions::default())?;

        let resampler = if input_rate != OUTPUT_RATE {
            debug!("🔄 Remuestreando {}Hz -> {}Hz", input_rate, OUTPUT_RATE);
            Some(StereoResampler::new(input_rate)?)
        } else {
            None
        };

        let mut opus = OpusCoder::new(SampleRate::Hz48000, Channels::Stereo, Application::Audio)?;
        opus.set_bitrate(Bitrate::BitsPerSecond(self.bitrate as i32))?;

        Ok(Box::new(OpusSession {
            format,
            decoder,
            track_id,
            resampler,
            pending: VecDeque::with_capacity(FRAME_SAMPLES * CHANNELS * 4),
            opus,
            exhausted: false,
        }))
    }
}

struct StereoResampler {
    inner: FftFixedIn<f32>,
    input: [Vec<f32>; CHANNELS],
}

impl StereoResampler {
    fn new(input_rate: u32) -> Result<Self, EncodeError> {
        let inner = FftFixedIn::<f32>::new(
            input_rate as usize,
            OUTPUT_RATE as usize,
            RESAMPLE_CHUNK,
            2,
            CHANNELS,
        )
        .map_err(|e| EncodeError::Resample(e.to_string()))?;

        Ok(Self {
            inner,
            input: [Vec::new(), Vec::new()],
        })
    }

    fn push(&mut self, left: f32, right: f32) {
        self.input[0].push(left);
        self.input[1].push(right);
    }

    /// Procesa todos los bloques completos disponibles
    fn drain_into(&mut self, pending: &mut VecDeque<f32>) -> Result<(), EncodeError> {
        loop {
            let needed = self.inner.input_frames_next();
            if self.input[0].len() < needed {
                return Ok(());
            }
            let chunk: Vec<Vec<f32>> = self
                .input
                .iter_mut()
                .map(|channel| channel.drain(..needed).collect())
                .collect();
            let output = self
                .inner
                .process(&chunk, None)
                .map_err(|e| EncodeError::Resample(e.to_string()))?;
            interleave(&output, pending);
        }
    }

    fn flush_into(&mut self, pending: &mut VecDeque<f32>) -> Result<(), EncodeError> {
        if self.input[0].is_empty() {
            return Ok(());
        }
        let rest: Vec<Vec<f32>> = self.input.iter_mut().map(std::mem::take).collect();
        let output = self
            .inner
            .process_partial(Some(rest.as_slice()), None)
            .map_err(|e| EncodeError::Resample(e.to_string()))?;
        interleave(&output, pending);
        Ok(())
    }
}

fn interleave(planar: &[Vec<f32>], pending: &mut VecDeque<f32>) {
    if planar.len() < CHANNELS {
        return;
    }
    for (left, right) in planar[0].iter().zip(planar[1].iter()) {
        pending.push_back(*left);
        pending.push_back(*right);
    }
}

struct OpusSession {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    resampler: Option<StereoResampler>,
    /// PCM estéreo intercalado a 48kHz pendiente de codificar
    pending: VecDeque<f32>,
    opus: OpusCoder,
    exhausted: bool,
}

impl OpusSession {
    /// Decodifica el siguiente paquete. `false` al llegar al final.
    fn decode_packet(&mut self) -> Result<bool, EncodeError> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    return Ok(false)
                }
                Err(SymphoniaError::ResetRequired) => return Ok(false),
                Err(e) => return Err(e.into()),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(msg)) => {
                    warn!("⚠️ Paquete de audio corrupto, se omite: {}", msg);
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let spec = *decoded.spec();
            let channels = spec.channels.count().max(1);
            let mut samples = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
            samples.copy_interleaved_ref(decoded);

            for frame in samples.samples().chunks_exact(channels) {
                let left = frame[0];
                let right = if channels > 1 { frame[1] } else { frame[0] };
                match self.resampler.as_mut() {
                    Some(resampler) => resampler.push(left, right),
                    None => {
                        self.pending.push_back(left);
                        self.pending.push_back(right);
                    }
                }
            }

            if let Some(resampler) = self.resampler.as_mut() {
                resampler.drain_into(&mut self.pending)?;
            }
            return Ok(true);
        }
    }
}

impl EncodeSession for OpusSession {
    fn next_frame(&mut self) -> Result<Option<Bytes>, EncodeError> {
        let frame_len = FRAME_SAMPLES * CHANNELS;

        while self.pending.len() < frame_len && !self.exhausted {
            if !self.decode_packet()? {
                self.exhausted = true;
                if let Some(resampler) = self.resampler.as_mut() {
                    resampler.flush_into(&mut self.pending)?;
                }
            }
        }

        if self.pending.is_empty() {
            return Ok(None);
        }

        // El último frame se completa con silencio
        let take = frame_len.min(self.pending.len());
        let mut pcm: Vec<f32> = self.pending.drain(..take).collect();
        pcm.resize(frame_len, 0.0);

        let mut packet = [0u8; MAX_PACKET_SIZE];
        let written = self.opus.encode_float(&pcm, &mut packet)?;
        Ok(Some(Bytes::copy_from_slice(&packet[..written])))
    }

    fn frame_duration(&self) -> Duration {
        FRAME_DURATION
    }
}
