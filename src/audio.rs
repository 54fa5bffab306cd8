//! Upload validation and normalization.
//!
//! The speech service only accepts PCM WAV for short-audio recognition, so
//! every upload is decoded, downmixed to mono, resampled to 16 kHz and
//! re-encoded as 16-bit WAV before it leaves the process.

use std::io::{Cursor, ErrorKind};

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::default::{get_codecs, get_probe};

use crate::error::AppError;

/// Sample rate sent to the recognition service.
pub const TARGET_SAMPLE_RATE: u32 = 16_000;

/// File extensions accepted by upload validation.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["wav", "mp3", "m4a", "flac", "ogg", "webm"];

/// Upload converted to the service's wire format.
#[derive(Debug, Clone)]
pub struct NormalizedAudio {
    /// 16 kHz mono PCM16 WAV file bytes.
    pub wav: Vec<u8>,
    /// Audio length in seconds.
    pub duration_secs: f64,
}

/// Returns the lowercased extension of an uploaded filename.
///
/// Uploads without a filename are treated as WAV, matching what segment
/// recorders send.
pub fn validate_extension(filename: Option<&str>) -> Result<String, AppError> {
    let Some(filename) = filename.map(str::trim).filter(|name| !name.is_empty()) else {
        return Ok("wav".to_string());
    };

    let extension = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.trim().to_ascii_lowercase())
        .ok_or_else(|| {
            AppError::unsupported_media_type(format!(
                "file must include an extension; accepted extensions: {}",
                accepted_list()
            ))
        })?;

    if !SUPPORTED_EXTENSIONS.contains(&extension.as_str()) {
        return Err(AppError::unsupported_media_type(format!(
            "unsupported file extension .{extension}; accepted extensions: {}",
            accepted_list()
        )));
    }

    Ok(extension)
}

fn accepted_list() -> String {
    SUPPORTED_EXTENSIONS
        .iter()
        .map(|ext| format!(".{ext}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Decodes an upload and re-encodes it as 16 kHz mono PCM16 WAV.
pub fn normalize_upload(bytes: &[u8], extension_hint: &str) -> Result<NormalizedAudio, AppError> {
    let (samples, sample_rate) = decode_mono(bytes, extension_hint)?;
    let samples = resample_linear(&samples, sample_rate, TARGET_SAMPLE_RATE);
    let duration_secs = samples.len() as f64 / f64::from(TARGET_SAMPLE_RATE);
    let wav = encode_wav_pcm16(&samples)?;
    Ok(NormalizedAudio { wav, duration_secs })
}

/// A WAV clip of silence, used to check credentials.
pub fn silent_wav(duration_ms: u32) -> Result<Vec<u8>, AppError> {
    let len = (TARGET_SAMPLE_RATE / 1000 * duration_ms) as usize;
    encode_wav_pcm16(&vec![0.0; len])
}

fn decode_mono(bytes: &[u8], extension_hint: &str) -> Result<(Vec<f32>, u32), AppError> {
    let source = MediaSourceStream::new(Box::new(Cursor::new(bytes.to_vec())), Default::default());
    let mut hint = Hint::new();
    hint.with_extension(extension_hint);

    let mut format = get_probe()
        .format(
            &hint,
            source,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|err| AppError::unsupported_media_type(format!("failed to open audio: {err}")))?
        .format;

    let track = format
        .default_track()
        .ok_or_else(|| AppError::unsupported_media_type("no audio track found in uploaded file"))?;
    if track.codec_params.codec == CODEC_TYPE_NULL {
        return Err(AppError::unsupported_media_type(
            "unsupported codec: missing codec information",
        ));
    }
    let track_id = track.id;
    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(TARGET_SAMPLE_RATE);
    let mut decoder = get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|err| AppError::unsupported_media_type(format!("unsupported codec: {err}")))?;

    let mut mono = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(err)) if err.kind() == ErrorKind::UnexpectedEof => break,
            Err(err) => {
                return Err(AppError::unsupported_media_type(format!(
                    "failed while reading audio stream: {err}"
                )));
            }
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(_)) => continue,
            Err(err) => {
                return Err(AppError::unsupported_media_type(format!(
                    "failed to decode audio packet: {err}"
                )));
            }
        };

        let spec = *decoded.spec();
        sample_rate = spec.rate;
        let channels = spec.channels.count().max(1);
        let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        buffer.copy_interleaved_ref(decoded);

        mono.extend(
            buffer
                .samples()
                .chunks(channels)
                .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32),
        );
    }

    if mono.is_empty() {
        return Err(AppError::unsupported_media_type("uploaded audio is empty"));
    }
    Ok((mono, sample_rate))
}

fn resample_linear(input: &[f32], src_rate: u32, dst_rate: u32) -> Vec<f32> {
    if src_rate == dst_rate || src_rate == 0 || input.len() < 2 {
        return input.to_vec();
    }

    let step = f64::from(src_rate) / f64::from(dst_rate);
    let out_len = ((input.len() as f64) / step).round().max(1.0) as usize;
    let last = input.len() - 1;

    (0..out_len)
        .map(|i| {
            let pos = i as f64 * step;
            let idx = (pos.floor() as usize).min(last);
            let frac = (pos - idx as f64) as f32;
            let a = input[idx];
            let b = input[(idx + 1).min(last)];
            a + (b - a) * frac
        })
        .collect()
}

fn encode_wav_pcm16(samples: &[f32]) -> Result<Vec<u8>, AppError> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: TARGET_SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::with_capacity(44 + samples.len() * 2));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|err| AppError::internal(format!("failed to start wav encoding: {err}")))?;
        for sample in samples {
            let value = (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16;
            writer
                .write_sample(value)
                .map_err(|err| AppError::internal(format!("failed to encode wav: {err}")))?;
        }
        writer
            .finalize()
            .map_err(|err| AppError::internal(format!("failed to finish wav encoding: {err}")))?;
    }
    Ok(cursor.into_inner())
}
