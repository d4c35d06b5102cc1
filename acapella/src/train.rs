use std::io::{self, BufRead, Write};

use acapella_core::{
  batch::Batches,
  chopper::Chopper,
  conversion::audio_to_spectrogram,
  data::{find_pairs, split_tracks, Track, TrackPair, ValidationSet},
  model::{self, weights_file, BurnLearner, Learner},
  normalizer::Normalizer,
  trainer::Trainer,
  Config,
};
use anyhow::{bail, Context, Result};
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::{
  prompt::{ask_more_epochs, ask_save, random_weights_path},
  util::read_audio,
};

pub fn seeded_rng(config: &Config) -> StdRng {
  match config.seed {
    Some(seed) => StdRng::seed_from_u64(seed),
    None => StdRng::from_entropy(),
  }
}

fn load_track(pair: &TrackPair, fft: usize) -> Result<Track> {
  let (input, _) = audio_to_spectrogram(read_audio(&pair.mix)?.view(), fft)?;
  let (target, _) = audio_to_spectrogram(read_audio(&pair.acapella)?.view(), fft)?;
  Ok(Track::aligned(pair.name.clone(), input, target)?)
}

fn load_tracks(config: &Config, pairs: &[TrackPair]) -> Vec<Track> {
  pairs
    .iter()
    .filter_map(|pair| match load_track(pair, config.fft) {
      Ok(track) => {
        tracing::info!(track = %track.name, frames = track.frames(), "Loaded track");
        Some(track)
      }
      Err(err) => {
        tracing::warn!(track = %pair.name, "Failed to load track, skip... {err:#}");
        None
      }
    })
    .collect()
}

/// Trains for the configured epochs, then keeps asking for more until zero
/// is entered or `quit` is set. Returns the epoch training stopped at.
pub fn train_interactively<L, R, W, G>(
  config: &Config,
  learner: &mut L,
  batches: &mut Batches,
  validation: &ValidationSet,
  input: &mut R,
  output: &mut W,
  rng: &mut G,
) -> Result<usize>
where
  L: Learner + ?Sized,
  R: BufRead,
  W: Write,
  G: Rng + ?Sized,
{
  let mut trainer = Trainer::new(config);
  let mut start_epoch = config.start_epoch;
  let mut epochs = config.epochs;

  while epochs > 0 {
    trainer.fit(learner, batches, validation, start_epoch, epochs)?;
    tracing::info!(batch = config.batch_size, "{epochs} epochs complete!");

    start_epoch += epochs;
    if config.quit {
      break;
    }

    epochs = ask_more_epochs(input, output)?;
    if epochs > 0 && ask_save(input, output)? {
      let path = random_weights_path(&config.weights, rng);
      tracing::info!(path = %path.display(), "Saving intermediate weights");
      learner.save(&path)?;
    }
  }

  Ok(start_epoch)
}

pub fn run(config: &Config) -> Result<()> {
  let Some(data) = &config.data else {
    bail!("No data directory to train on");
  };

  let mut rng = seeded_rng(config);
  let mut learner = BurnLearner::new(config, model::adam());
  tracing::info!(params = learner.num_params(), "Model ready");

  if config.load {
    tracing::info!("Loading Weights");
    let weights = weights_file(&config.weights);
    if !weights.is_file() {
      bail!("Weights file {} not found", weights.display());
    }
    learner.load(&config.weights)?;
  }

  tracing::info!("Loading Data");
  let pairs = find_pairs(data)?;
  let tracks = load_tracks(config, &pairs);
  if tracks.is_empty() {
    bail!("No usable song/acapella pairs in {}", data.display());
  }

  let (train, valid) = split_tracks(tracks, config.split, &mut rng);
  if train.is_empty() {
    bail!("Split {} leaves no tracks to train on", config.split);
  }

  let validation = ValidationSet::from_tracks(
    &valid,
    &Chopper::from_config(config),
    &Normalizer::new(config.normalizer),
    config.tile.dim(),
    &mut rng,
  )?;
  let mut batches = Batches::new(config, &train, StdRng::from_rng(&mut rng)?)?;

  tracing::info!("Training Model");
  let stdin = io::stdin();
  let end_epoch = train_interactively(
    config,
    &mut learner,
    &mut batches,
    &validation,
    &mut stdin.lock(),
    &mut io::stdout(),
    &mut rng,
  )?;

  learner
    .save(&config.weights)
    .context("Failed to save final weights")?;
  tracing::info!(
    epoch = end_epoch,
    path = %weights_file(&config.weights).display(),
    "Weights saved"
  );

  Ok(())
}
