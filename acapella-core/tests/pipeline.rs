use acapella_core::{
  batch::Batches,
  chopper::Chopper,
  config::{BatchStrategy, ChopStrategy, NormalizeStrategy, TileShape},
  conversion::{audio_to_spectrogram, spectrogram_to_audio},
  data::{split_tracks, Track, ValidationSet},
  model::Predict,
  normalizer::Normalizer,
  reconstruct::Reconstructor,
  Config,
};
use anyhow::Result;
use ndarray::{Array1, Array2, Array4, ArrayView4};
use rand::{rngs::StdRng, Rng, SeedableRng};

struct Identity;

impl Predict for Identity {
  fn predict(&self, features: ArrayView4<f32>) -> Result<Array4<f32>> {
    Ok(features.to_owned())
  }
}

fn noise_track(name: &str, rows: usize, frames: usize, rng: &mut StdRng) -> Track {
  let input = Array2::from_shape_simple_fn((rows, frames), || rng.gen_range(0.0..4.0f32));
  let target = input.mapv(|v| v * 0.3);
  Track::aligned(name, input, target).unwrap()
}

#[test]
fn batches_keep_their_shape_indefinitely() {
  let mut rng = StdRng::seed_from_u64(11);
  let tracks: Vec<_> = [300, 520, 129, 1000]
    .into_iter()
    .enumerate()
    .map(|(i, frames)| noise_track(&i.to_string(), 512, frames, &mut rng))
    .collect();

  let strategies = [
    (BatchStrategy::Default, ChopStrategy::Tile),
    (BatchStrategy::Tracks, ChopStrategy::Random { slices: 3 }),
    (BatchStrategy::Random, ChopStrategy::RandomFull { slices: 1 }),
  ];

  for (batch, chop) in strategies {
    let config = Config {
      tile: TileShape::new(512, 128),
      batch,
      chop,
      batch_size: 8,
      ..Config::default()
    };

    let batches = Batches::new(&config, &tracks, StdRng::seed_from_u64(0)).unwrap();
    for batch in batches.take(25) {
      let batch = batch.unwrap();
      assert_eq!(batch.features.dim(), (8, 512, 128, 1));
      assert_eq!(batch.labels.dim(), (8, 512, 128, 1));
      assert!(batch.features.iter().all(|v| v.abs() <= 1.0 + 1e-6));
    }
  }
}

#[test]
fn loader_batches_cover_each_pass() {
  let mut rng = StdRng::seed_from_u64(11);
  let tracks: Vec<_> = [300, 520, 129, 1000]
    .into_iter()
    .enumerate()
    .map(|(i, frames)| noise_track(&i.to_string(), 512, frames, &mut rng))
    .collect();

  let config = Config {
    tile: TileShape::new(512, 128),
    batch: BatchStrategy::Loader,
    batch_size: 8,
    ..Config::default()
  };

  let batches = Batches::new(&config, &tracks, StdRng::seed_from_u64(0)).unwrap();
  assert_eq!(batches.slices(), 14);
  assert_eq!(batches.steps_per_epoch(), 2);

  let sizes: Vec<usize> = batches
    .take(6)
    .map(|batch| {
      let batch = batch.unwrap();
      assert_eq!(batch.features.dim(), (batch.len(), 512, 128, 1));
      assert_eq!(batch.labels.dim(), batch.features.dim());
      batch.len()
    })
    .collect();
  assert_eq!(sizes, vec![8, 6, 8, 6, 8, 6]);
}

#[test]
fn training_inputs_come_from_one_split() {
  let mut rng = StdRng::seed_from_u64(5);
  let tracks: Vec<_> = (0..10)
    .map(|i| noise_track(&i.to_string(), 16, 64, &mut rng))
    .collect();

  let config = Config {
    tile: TileShape::new(16, 16),
    normalizer: NormalizeStrategy::Max,
    ..Config::default()
  };
  let (train, valid) = split_tracks(tracks, config.split, &mut rng);
  assert_eq!((train.len(), valid.len()), (9, 1));

  let validation = ValidationSet::from_tracks(
    &valid,
    &Chopper::from_config(&config),
    &Normalizer::new(config.normalizer),
    config.tile.dim(),
    &mut rng,
  )
  .unwrap();
  assert_eq!(validation.features.dim(), (4, 16, 16, 1));

  let batches = Batches::new(&config, &train, StdRng::seed_from_u64(0)).unwrap();
  assert_eq!(batches.slices(), 36);
  assert_eq!(batches.steps_per_epoch(), 5);
}

#[test]
fn audio_round_trips_through_reconstruction() {
  let config = Config {
    fft: 256,
    phase_iterations: 4,
    ..Config::default()
  };

  let samples = Array1::from_shape_fn(20000, |i| {
    let t = i as f32 / 44100.0;
    (t * 2.0 * std::f32::consts::PI * 330.0).sin() * 0.4
  });
  let (spectrogram, _) = audio_to_spectrogram(samples.view(), config.fft).unwrap();
  assert_eq!(spectrogram.dim(), (128, 20000 / 64 + 1));

  let separation = Reconstructor::new(&config)
    .separate(&Identity, spectrogram.view())
    .unwrap();
  assert_eq!(separation.target.dim(), spectrogram.dim());
  assert!(separation.residual.iter().all(|v| v.abs() < 1e-4));

  let mut rng = StdRng::seed_from_u64(0);
  let audio = spectrogram_to_audio(separation.target.view(), config.fft, config.phase_iterations, &mut rng).unwrap();
  assert_eq!(audio.len(), 20000 / 64 * 64);
}
