mod stft;

use std::{f32::consts::PI, path::Path};

use anyhow::{bail, Context};
use image::{GrayImage, Luma};
use ndarray::{s, Array1, Array2, ArrayView1, ArrayView2, Zip};
use rand::Rng;
use realfft::num_complex::Complex32;

pub use stft::Stft;

use crate::{config::MIN_FFT, Error, Result};

pub const SAMPLE_RATE: u32 = 44100;

fn transform(fft: usize) -> Result<Stft> {
  if fft < MIN_FFT {
    return Err(Error::Config(format!("fft must be at least {MIN_FFT}, got {fft}")));
  }

  // the Nyquist bin is dropped so the height stays a multiple of the downscale factor
  Ok(Stft::new(fft, fft / 4, fft / 2))
}

fn polar(amplitude: ArrayView2<f32>, phase: ArrayView2<f32>) -> Array2<Complex32> {
  Zip::from(amplitude)
    .and(phase)
    .map_collect(|&r, &theta| Complex32::from_polar(r, theta))
}

/// Log-magnitude spectrogram `ln(1 + |X|)` and phase of a mono signal, both
/// `(fft / 2, samples / (fft / 4) + 1)`.
pub fn audio_to_spectrogram(samples: ArrayView1<f32>, fft: usize) -> Result<(Array2<f32>, Array2<f32>)> {
  let bins = transform(fft)?.apply(samples)?;
  let spectrogram = bins.mapv(|c| c.norm().ln_1p());
  let phase = bins.mapv(|c| c.arg());
  Ok((spectrogram, phase))
}

/// Griffin-Lim: starts from random phase and refines it `phase_iterations`
/// times against the given magnitudes.
pub fn spectrogram_to_audio<R: Rng + ?Sized>(
  spectrogram: ArrayView2<f32>,
  fft: usize,
  phase_iterations: usize,
  rng: &mut R,
) -> Result<Array1<f32>> {
  let stft = transform(fft)?;

  // residual spectrograms may dip below zero
  let amplitude = spectrogram.mapv(|v| v.exp_m1().max(0.0));
  let mut phase = Array2::from_shape_simple_fn(amplitude.dim(), || rng.gen_range(-PI..PI));

  let mut audio = stft.inverse(polar(amplitude.view(), phase.view()).view())?;
  for _ in 0..phase_iterations {
    phase = stft.apply(audio.view())?.mapv(|c| c.arg());
    audio = stft.inverse(polar(amplitude.view(), phase.view()).view())?;
  }

  Ok(audio)
}

/// Zero-pads both axes up to the next multiple of `grid`.
pub fn expand_to_grid(slice: ArrayView2<f32>, grid: usize) -> Array2<f32> {
  let grid = grid.max(1);
  let (rows, cols) = slice.dim();
  let mut expanded = Array2::zeros((rows.next_multiple_of(grid), cols.next_multiple_of(grid)));
  expanded.slice_mut(s![..rows, ..cols]).assign(&slice);
  expanded
}

/// Writes a grayscale PNG, low frequencies at the bottom.
pub fn save_spectrogram(spectrogram: ArrayView2<f32>, path: impl AsRef<Path>) -> anyhow::Result<()> {
  let path = path.as_ref();
  let (rows, cols) = spectrogram.dim();
  if rows == 0 || cols == 0 {
    bail!("Cannot render an empty spectrogram to {}", path.display());
  }

  let (min, max) = spectrogram.fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
    (lo.min(v), hi.max(v))
  });
  let range = if max > min { max - min } else { 1.0 };

  let image = GrayImage::from_fn(cols as u32, rows as u32, |x, y| {
    let v = spectrogram[[rows - 1 - y as usize, x as usize]];
    Luma([((v - min) / range * 255.0) as u8])
  });

  image
    .save(path)
    .with_context(|| format!("Failed to write spectrogram image {}", path.display()))
}
