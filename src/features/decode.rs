//! Audio decoding to mono PCM
//!
//! Any container/codec symphonia knows (MP3, FLAC, WAV, OGG/Vorbis, AAC/MP4).
//! Channels are averaged to mono; the native sample rate is kept, since MFCC
//! extraction adapts its filterbank to whatever rate it is given.

use crate::error::{Result, SimilarityError};
use std::fs::File;
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::debug;

/// Decode a file to mono samples in `[-1, 1]` and its sample rate.
///
/// `max_seconds` stops decoding early for long recordings.
pub fn decode_file(path: &Path, max_seconds: Option<f64>) -> Result<(Vec<f64>, u32)> {
    let file = File::open(path)
        .map_err(|e| SimilarityError::Decode(format!("{}: {}", path.display(), e)))?;

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    decode_source(Box::new(file), hint, max_seconds).map_err(|e| e.context(&path.display().to_string()))
}

/// Decode an in-memory file, letting symphonia detect the format.
pub fn decode_bytes(data: &[u8], max_seconds: Option<f64>) -> Result<(Vec<f64>, u32)> {
    let cursor = std::io::Cursor::new(data.to_vec());
    decode_source(Box::new(cursor), Hint::new(), max_seconds)
}

fn decode_source(
    source: Box<dyn MediaSource>,
    hint: Hint,
    max_seconds: Option<f64>,
) -> Result<(Vec<f64>, u32)> {
    let mss = MediaSourceStream::new(source, Default::default());

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| SimilarityError::Decode(format!("unrecognised format: {}", e)))?;

    let mut format = probed.format;
    let track = format
        .default_track()
        .ok_or_else(|| SimilarityError::Decode("no audio track".into()))?;
    let track_id = track.id;
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| SimilarityError::Decode("unknown sample rate".into()))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| SimilarityError::Decode(format!("unsupported codec: {}", e)))?;

    let max_samples = max_seconds
        .filter(|s| *s > 0.0)
        .map(|s| (s * sample_rate as f64) as usize);

    let mut samples = Vec::new();
    let mut sample_buf: Option<SampleBuffer<f32>> = None;

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(_)) => break,
            Err(e) => {
                debug!(error = %e, "stopping at unreadable packet");
                break;
            }
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(SymphoniaError::DecodeError(e)) => {
                debug!(error = %e, "skipping corrupt packet");
                continue;
            }
            Err(e) => return Err(SimilarityError::Decode(e.to_string())),
        };

        let spec = *decoded.spec();
        let channel_count = spec.channels.count().max(1);
        let needed = decoded.capacity() * channel_count;
        if sample_buf.as_ref().map_or(true, |b| b.capacity() < needed) {
            sample_buf = Some(SampleBuffer::new(decoded.capacity() as u64, spec));
        }

        if let Some(ref mut buf) = sample_buf {
            buf.copy_interleaved_ref(decoded);
            for chunk in buf.samples().chunks(channel_count) {
                let mono: f64 = chunk.iter().map(|&s| s as f64).sum::<f64>() / channel_count as f64;
                samples.push(mono);
            }
        }

        if let Some(max) = max_samples {
            if samples.len() >= max {
                samples.truncate(max);
                break;
            }
        }
    }

    if samples.is_empty() {
        return Err(SimilarityError::Decode("no audio samples decoded".into()));
    }

    debug!(samples = samples.len(), sample_rate, "decoded audio");
    Ok((samples, sample_rate))
}
