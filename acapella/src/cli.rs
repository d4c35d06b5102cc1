use std::path::PathBuf;

use acapella_core::{
  config::{BatchStrategy, Checkpoint, ChopStrategy, NormalizeStrategy, TileShape},
  Config,
};
use clap::{Parser, ValueEnum};

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum ChopArg {
  Tile,
  Infere,
  Random,
  RandomFull,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum BatchArg {
  Default,
  Tracks,
  Random,
  Loader,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum NormalizerArg {
  Identity,
  Max,
  Standard,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum CheckpointArg {
  Weights,
  ErrorVisualization,
}

#[derive(Parser)]
#[command(version, author)]
#[command(about = "Isolate vocals from songs with a convolutional network", long_about = None)]
pub struct Cli {
  #[arg(help = "Audio files to isolate vocals from")]
  #[arg(value_name = "FILES")]
  pub files: Vec<PathBuf>,

  #[arg(long, help = "Directory of song/acapella pairs to train on")]
  #[arg(value_name = "DIR")]
  pub data: Option<PathBuf>,

  #[arg(long, help = "Training batch size")]
  #[arg(value_name = "SIZE", default_value_t = 8)]
  pub batch: usize,

  #[arg(long, help = "Weights file to load for inference or save after training")]
  #[arg(value_name = "PATH", default_value = "weights.mpk")]
  pub weights: PathBuf,

  #[arg(long, help = "Number of epochs to train for")]
  #[arg(default_value_t = 10)]
  pub epochs: usize,

  #[arg(long, help = "Epoch to start counting from")]
  #[arg(default_value_t = 0)]
  pub start_epoch: usize,

  #[arg(long, help = "Load the weights file before training")]
  pub load: bool,

  #[arg(long, help = "Stop after the requested epochs without asking for more")]
  pub quit: bool,

  #[arg(long, help = "Train and predict the instrumental instead of the vocal")]
  pub instrumental: bool,

  #[arg(long, help = "FFT window size")]
  #[arg(default_value_t = 1536)]
  pub fft: usize,

  #[arg(long, help = "Phase reconstruction iterations")]
  #[arg(default_value_t = 10)]
  pub phase: usize,

  #[arg(long, help = "How training spectrograms are cut into slices")]
  #[arg(value_enum, default_value_t = ChopArg::Tile)]
  pub chop: ChopArg,

  #[arg(long, help = "Slices per track for the random chop strategies")]
  #[arg(default_value_t = 1)]
  pub chop_slices: usize,

  #[arg(long, help = "Tile width multiplier for the infere chop strategy")]
  #[arg(default_value_t = 32)]
  pub chop_scale: usize,

  #[arg(long, help = "How training batches are drawn")]
  #[arg(value_enum, default_value_t = BatchArg::Default)]
  pub batch_generator: BatchArg,

  #[arg(long, help = "How slices are scaled before entering the network")]
  #[arg(value_enum, default_value_t = NormalizerArg::Max)]
  pub normalizer: NormalizerArg,

  #[arg(long, help = "Slice height in frequency bins")]
  #[arg(default_value_t = 768)]
  pub tile_height: usize,

  #[arg(long, help = "Slice width in frames")]
  #[arg(default_value_t = 128)]
  pub tile_width: usize,

  #[arg(long, help = "Inference slice width, in multiples of the downscale factor")]
  #[arg(default_value_t = 32)]
  pub inference_slice: usize,

  #[arg(long, help = "Fraction of tracks used for training, the rest validates")]
  #[arg(default_value_t = 0.9)]
  pub split: f64,

  #[arg(long, help = "Optimizer learning rate")]
  #[arg(default_value_t = 1e-3)]
  pub learning_rate: f64,

  #[arg(long, help = "Directory for training logs and checkpoints")]
  #[arg(value_name = "DIR", default_value = "logs")]
  pub logs: PathBuf,

  #[arg(long, help = "Checkpoints fired after every epoch")]
  #[arg(value_enum, value_delimiter = ',')]
  pub checkpoints: Vec<CheckpointArg>,

  #[arg(long, help = "Seed for every random choice, for reproducible runs")]
  pub seed: Option<u64>,
}

impl Cli {
  pub fn config(&self) -> Config {
    let chop = match self.chop {
      ChopArg::Tile => ChopStrategy::Tile,
      ChopArg::Infere => ChopStrategy::Infere {
        scale: self.chop_scale,
      },
      ChopArg::Random => ChopStrategy::Random {
        slices: self.chop_slices,
      },
      ChopArg::RandomFull => ChopStrategy::RandomFull {
        slices: self.chop_slices,
      },
    };

    let batch = match self.batch_generator {
      BatchArg::Default => BatchStrategy::Default,
      BatchArg::Tracks => BatchStrategy::Tracks,
      BatchArg::Random => BatchStrategy::Random,
      BatchArg::Loader => BatchStrategy::Loader,
    };

    let normalizer = match self.normalizer {
      NormalizerArg::Identity => NormalizeStrategy::Identity,
      NormalizerArg::Max => NormalizeStrategy::Max,
      NormalizerArg::Standard => NormalizeStrategy::Standard,
    };

    let checkpoints = self
      .checkpoints
      .iter()
      .map(|c| match c {
        CheckpointArg::Weights => Checkpoint::Weights,
        CheckpointArg::ErrorVisualization => Checkpoint::ErrorVisualization,
      })
      .collect();

    Config {
      fft: self.fft,
      phase_iterations: self.phase,
      tile: TileShape::new(self.tile_height, self.tile_width),
      inference_scale: self.inference_slice,
      chop,
      batch,
      normalizer,
      batch_size: self.batch,
      epochs: self.epochs,
      start_epoch: self.start_epoch,
      split: self.split,
      learning_rate: self.learning_rate,
      instrumental: self.instrumental,
      quit: self.quit,
      load: self.load,
      weights: self.weights.clone(),
      data: self.data.clone(),
      logs: self.logs.clone(),
      checkpoints,
      seed: self.seed,
      ..Config::default()
    }
  }
}
