use std::path::{Path, PathBuf};

use acapella_core::{
  config::Stem,
  conversion::{audio_to_spectrogram, save_spectrogram, spectrogram_to_audio},
  model::{self, weights_file, BurnLearner, Learner, Predict},
  reconstruct::Reconstructor,
  Config,
};
use anyhow::{bail, Result};
use ndarray::ArrayView2;
use rand::Rng;

use crate::{train::seeded_rng, util};

/// `<dir>/<stem><suffix>.<ext>` next to the input file.
fn sibling(path: &Path, suffix: &str, ext: &str) -> PathBuf {
  let stem = path
    .file_stem()
    .map(|s| s.to_string_lossy().into_owned())
    .unwrap_or_default();
  path.with_file_name(format!("{stem}{suffix}.{ext}"))
}

pub fn branch_paths(path: &Path, stem: Stem) -> (PathBuf, PathBuf) {
  (
    sibling(path, stem.suffix(), "wav"),
    sibling(path, stem.suffix(), "png"),
  )
}

fn save_branch<R: Rng + ?Sized>(
  config: &Config,
  spectrogram: ArrayView2<f32>,
  path: &Path,
  stem: Stem,
  rng: &mut R,
) -> Result<()> {
  let audio = spectrogram_to_audio(spectrogram, config.fft, config.phase_iterations, rng)?;
  let (wav, png) = branch_paths(path, stem);

  tracing::info!(output = %wav.display(), "Converted {stem} to audio");
  util::write_audio(&wav, audio.view())?;
  save_spectrogram(spectrogram, &png)
}

pub fn isolate<P: Predict + ?Sized, R: Rng + ?Sized>(
  config: &Config,
  model: &P,
  path: &Path,
  rng: &mut R,
) -> Result<()> {
  tracing::info!(path = %path.display(), "Attempting to isolate vocals");

  let audio = util::read_audio(path)?;
  let (spectrogram, _) = audio_to_spectrogram(audio.view(), config.fft)?;
  tracing::info!(shape = ?spectrogram.dim(), "Retrieved spectrogram, processing...");

  let separation = Reconstructor::new(config).separate(model, spectrogram.view())?;
  tracing::info!("Processed spectrogram, reconverting to audio");

  save_spectrogram(spectrogram.view(), sibling(path, "", "png"))?;

  let stem = config.predicted_stem();
  save_branch(config, separation.target.view(), path, stem, rng)?;
  save_branch(
    config,
    separation.residual.view(),
    path,
    stem.complement(),
    rng,
  )?;

  tracing::info!("Vocal isolation complete");
  Ok(())
}

pub fn run(config: &Config, files: &[PathBuf]) -> Result<()> {
  let weights = weights_file(&config.weights);
  if !weights.is_file() {
    bail!("Weights file {} not found", weights.display());
  }

  tracing::info!("Loading Weights");
  let mut learner = BurnLearner::new(config, model::adam());
  learner.load(&config.weights)?;

  let mut rng = seeded_rng(config);
  for file in files {
    isolate(config, &learner, file, &mut rng)?;
  }

  Ok(())
}

#[cfg(test)]
mod tests {
  use acapella_core::conversion::SAMPLE_RATE;
  use ndarray::{Array1, Array4, ArrayView4};
  use rand::{rngs::StdRng, SeedableRng};
  use tempfile::TempDir;

  use super::*;

  struct Halve;

  impl Predict for Halve {
    fn predict(&self, features: ArrayView4<f32>) -> Result<Array4<f32>> {
      Ok(features.mapv(|v| v * 0.5))
    }
  }

  #[test]
  fn outputs_sit_next_to_input() {
    let (wav, png) = branch_paths(Path::new("/music/song.mp3"), Stem::Vocal);
    assert_eq!(wav, PathBuf::from("/music/song_vocal.wav"));
    assert_eq!(png, PathBuf::from("/music/song_vocal.png"));
    assert_eq!(
      sibling(Path::new("a/b.c.flac"), "", "png"),
      PathBuf::from("a/b.c.png")
    );
  }

  #[test]
  fn isolation_writes_every_artifact() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("song.wav");
    let tone = Array1::from_shape_fn(SAMPLE_RATE as usize / 4, |i| (i as f32 * 0.05).sin() * 0.3);
    util::write_audio(&input, tone.view()).unwrap();

    let config = Config {
      fft: 256,
      phase_iterations: 2,
      instrumental: true,
      ..Config::default()
    };
    isolate(&config, &Halve, &input, &mut StdRng::seed_from_u64(0)).unwrap();

    for name in [
      "song.png",
      "song_instrumental.wav",
      "song_instrumental.png",
      "song_vocal.wav",
      "song_vocal.png",
    ] {
      assert!(dir.path().join(name).is_file(), "{name} missing");
    }
  }

  #[test]
  fn missing_weights_fail_before_processing() {
    let dir = TempDir::new().unwrap();
    let config = Config {
      weights: dir.path().join("absent.mpk"),
      ..Config::default()
    };
    let file = dir.path().join("song.wav");
    assert!(run(&config, &[file]).is_err());
    assert!(!dir.path().join("song.png").exists());
  }
}
