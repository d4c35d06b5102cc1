use std::{fs::File, path::Path};

use acapella_core::conversion::SAMPLE_RATE;
use anyhow::{anyhow, bail, Context, Result};
use ndarray::{Array1, ArrayView1};
use rubato::{FftFixedInOut, Resampler};
use symphonia::core::{
  audio::SampleBuffer, codecs::CODEC_TYPE_NULL, errors::Error as SymphoniaError,
  io::MediaSourceStream, probe::Hint,
};

const RESAMPLE_CHUNK: usize = 1024;

fn to_mono(samples: &[f32], channels: usize) -> Vec<f32> {
  if channels <= 1 {
    return samples.to_vec();
  }

  samples
    .chunks(channels)
    .map(|frame| frame.iter().sum::<f32>() / channels as f32)
    .collect()
}

#[tracing::instrument(skip_all)]
fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
  if from_rate == to_rate || samples.is_empty() {
    return Ok(samples.to_vec());
  }

  let mut resampler =
    FftFixedInOut::<f32>::new(from_rate as usize, to_rate as usize, RESAMPLE_CHUNK, 1)?;

  let input_frames = resampler.input_frames_next();
  let ratio = to_rate as f64 / from_rate as f64;
  let expected = (samples.len() as f64 * ratio).round() as usize;

  let mut output = Vec::with_capacity(expected + resampler.output_frames_next());
  for chunk in samples.chunks(input_frames) {
    let mut chunk = chunk.to_vec();
    chunk.resize(input_frames, 0.0);

    let resampled = resampler.process(&[chunk], None)?;
    output.extend_from_slice(&resampled[0]);
  }

  // drop what the zero padding of the last chunk produced
  output.truncate(expected);
  Ok(output)
}

/// Decodes `path` into a mono signal at the network's sample rate.
#[tracing::instrument(skip_all, fields(path = %path.as_ref().display()))]
pub fn read_audio(path: impl AsRef<Path>) -> Result<Array1<f32>> {
  let path = path.as_ref();
  let src = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
  let mss = MediaSourceStream::new(Box::new(src), Default::default());

  let mut hint = Hint::new();
  if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
    hint.with_extension(ext);
  }

  let probed = symphonia::default::get_probe().format(
    &hint,
    mss,
    &Default::default(),
    &Default::default(),
  )?;

  let mut format = probed.format;
  let track = format
    .tracks()
    .iter()
    .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
    .ok_or_else(|| anyhow!("No supported audio tracks"))?;

  let mut decoder =
    symphonia::default::get_codecs().make(&track.codec_params, &Default::default())?;

  let mut sample_rate = track.codec_params.sample_rate;
  let track_id = track.id;

  let mut samples: Vec<f32> = Vec::new();

  tracing::debug!("Start decoding...");

  loop {
    let packet = match format.next_packet() {
      Ok(packet) => packet,
      Err(SymphoniaError::IoError(err)) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
        break;
      }
      Err(err) => {
        bail!(err);
      }
    };

    if packet.track_id() != track_id {
      tracing::warn!(
        timestamp = packet.ts,
        "The packet does not belong to the selected track, skip..."
      );
      continue;
    }

    match decoder.decode(&packet) {
      Ok(decoded) => {
        let spec = *decoded.spec();
        if sample_rate.is_none() {
          sample_rate = Some(spec.rate);
        }

        let mut buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        buf.copy_interleaved_ref(decoded);
        samples.extend(to_mono(buf.samples(), spec.channels.count()));
      }
      Err(SymphoniaError::IoError(_)) => {
        tracing::error!(
          timestamp = packet.ts,
          "The packet failed to decode due to an IO error, skip..."
        );
        continue;
      }
      Err(SymphoniaError::DecodeError(_)) => {
        tracing::warn!(
          timestamp = packet.ts,
          "The packet failed to decode due to invalid data, skip..."
        );
        continue;
      }
      Err(err) => {
        bail!(err);
      }
    }
  }

  let sample_rate = sample_rate.ok_or_else(|| anyhow!("Can not get sample rate"))?;
  tracing::debug!(samples = samples.len(), sample_rate, "Audio decoded");

  if sample_rate != SAMPLE_RATE {
    tracing::info!(sample_rate, "Start resampling...");
    samples = resample(&samples, sample_rate, SAMPLE_RATE)?;
  }

  Ok(Array1::from_vec(samples))
}

/// Writes a mono 32-bit float WAV at the network's sample rate.
pub fn write_audio(path: impl AsRef<Path>, samples: ArrayView1<f32>) -> Result<()> {
  let path = path.as_ref();
  let spec = hound::WavSpec {
    channels: 1,
    sample_rate: SAMPLE_RATE,
    bits_per_sample: 32,
    sample_format: hound::SampleFormat::Float,
  };

  let mut writer = hound::WavWriter::create(path, spec)
    .with_context(|| format!("Failed to create {}", path.display()))?;
  for &sample in samples {
    writer.write_sample(sample)?;
  }
  writer.finalize()?;

  Ok(())
}
