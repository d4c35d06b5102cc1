use std::{fmt, path::PathBuf};

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::{Error, Result};

/// Smallest FFT window that still gives a non-zero hop.
pub const MIN_FFT: usize = 4;

/// Nominal shape of a training slice, in spectrogram rows and frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileShape {
  pub height: usize,
  pub width: usize,
}

impl TileShape {
  pub const fn new(height: usize, width: usize) -> Self {
    Self { height, width }
  }

  pub fn dim(&self) -> (usize, usize) {
    (self.height, self.width)
  }
}

/// How a spectrogram is cut into tiles.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum ChopStrategy {
  /// Non-overlapping full tiles, left to right and bottom to top. A remainder
  /// narrower than the tile is not used.
  Tile,
  /// Full-height tiles `scale × peak_downscale_factor` frames wide covering
  /// every frame exactly once. The last tile keeps whatever width is left.
  Infere { scale: usize },
  /// `slices` tiles at uniformly random frequency and time offsets.
  Random { slices: usize },
  /// `slices` full-height tiles at uniformly random time offsets.
  RandomFull { slices: usize },
}

impl ChopStrategy {
  pub fn is_full(&self) -> bool {
    matches!(self, Self::Infere { .. } | Self::RandomFull { .. })
  }

  /// The single-slice random strategy matching this one's height policy.
  pub fn single_random(&self) -> Self {
    if self.is_full() {
      Self::RandomFull { slices: 1 }
    } else {
      Self::Random { slices: 1 }
    }
  }
}

impl Default for ChopStrategy {
  fn default() -> Self {
    Self::Tile
  }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStrategy {
  /// Every pre-chopped slice once per epoch, reshuffled between epochs.
  #[default]
  Default,
  /// A random pre-chopped slice of a random track per batch slot.
  Tracks,
  /// A freshly cut random slice of a random track per batch slot.
  Random,
  /// Every pre-chopped slice once per pass through burn's shuffling data
  /// loader. The last batch of a pass may be short.
  Loader,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormalizeStrategy {
  Identity,
  #[default]
  Max,
  Standard,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Checkpoint {
  Weights,
  ErrorVisualization,
}

/// Which part of the mix a spectrogram branch represents.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stem {
  Vocal,
  Instrumental,
}

impl fmt::Display for Stem {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Stem::Vocal => write!(f, "Vocal"),
      Stem::Instrumental => write!(f, "Instrumental"),
    }
  }
}

impl Stem {
  pub fn suffix(&self) -> &'static str {
    match self {
      Stem::Vocal => "_vocal",
      Stem::Instrumental => "_instrumental",
    }
  }

  pub fn complement(&self) -> Self {
    match self {
      Stem::Vocal => Stem::Instrumental,
      Stem::Instrumental => Stem::Vocal,
    }
  }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
  pub fft: usize,
  pub phase_iterations: usize,
  pub tile: TileShape,
  pub peak_downscale_factor: usize,
  pub inference_scale: usize,
  pub chop: ChopStrategy,
  pub batch: BatchStrategy,
  pub normalizer: NormalizeStrategy,
  pub batch_size: usize,
  pub epochs: usize,
  pub start_epoch: usize,
  pub split: f64,
  pub learning_rate: f64,
  pub instrumental: bool,
  pub quit: bool,
  pub load: bool,
  pub weights: PathBuf,
  pub data: Option<PathBuf>,
  pub logs: PathBuf,
  pub checkpoints: SmallVec<[Checkpoint; 2]>,
  pub seed: Option<u64>,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      fft: 1536,
      phase_iterations: 10,
      tile: TileShape::new(768, 128),
      peak_downscale_factor: 4,
      inference_scale: 32,
      chop: ChopStrategy::default(),
      batch: BatchStrategy::default(),
      normalizer: NormalizeStrategy::default(),
      batch_size: 8,
      epochs: 10,
      start_epoch: 0,
      split: 0.9,
      learning_rate: 1e-3,
      instrumental: false,
      quit: false,
      load: false,
      weights: PathBuf::from("weights.mpk"),
      data: None,
      logs: PathBuf::from("logs"),
      checkpoints: SmallVec::new(),
      seed: None,
    }
  }
}

impl Config {
  /// The branch the network is trained to predict.
  pub fn predicted_stem(&self) -> Stem {
    if self.instrumental {
      Stem::Instrumental
    } else {
      Stem::Vocal
    }
  }

  pub fn inference_width(&self) -> usize {
    self.inference_scale * self.peak_downscale_factor
  }

  /// Rejects settings the pipeline cannot run with.
  pub fn validate(&self) -> Result<()> {
    let invalid = |msg: String| Err(Error::Config(msg));

    if self.fft < MIN_FFT {
      return invalid(format!("fft must be at least {MIN_FFT}, got {}", self.fft));
    }

    for (name, value) in [
      ("tile height", self.tile.height),
      ("tile width", self.tile.width),
      ("peak downscale factor", self.peak_downscale_factor),
      ("inference scale", self.inference_scale),
      ("batch size", self.batch_size),
    ] {
      if value == 0 {
        return invalid(format!("{name} must be positive"));
      }
    }

    match self.chop {
      ChopStrategy::Infere { scale: 0 } => return invalid("chop scale must be positive".into()),
      ChopStrategy::Random { slices: 0 } | ChopStrategy::RandomFull { slices: 0 } => {
        return invalid("chop slices must be positive".into())
      }
      _ => {}
    }

    if !(self.split > 0.0 && self.split <= 1.0) {
      return invalid(format!("split must be in (0, 1], got {}", self.split));
    }

    if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
      return invalid(format!(
        "learning rate must be positive, got {}",
        self.learning_rate
      ));
    }

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn chop_strategy_serializes_as_tagged_record() {
    let json = serde_json::to_string(&ChopStrategy::RandomFull { slices: 3 }).unwrap();
    assert_eq!(json, r#"{"name":"random_full","slices":3}"#);

    let back: ChopStrategy = serde_json::from_str(r#"{"name":"infere","scale":16}"#).unwrap();
    assert_eq!(back, ChopStrategy::Infere { scale: 16 });
  }

  #[test]
  fn single_random_keeps_height_policy() {
    assert_eq!(
      ChopStrategy::RandomFull { slices: 9 }.single_random(),
      ChopStrategy::RandomFull { slices: 1 }
    );
    assert_eq!(
      ChopStrategy::Tile.single_random(),
      ChopStrategy::Random { slices: 1 }
    );
  }

  #[test]
  fn stems_follow_instrumental_flag() {
    let mut config = Config::default();
    assert_eq!(config.predicted_stem(), Stem::Vocal);
    config.instrumental = true;
    assert_eq!(config.predicted_stem(), Stem::Instrumental);
    assert_eq!(config.predicted_stem().complement().suffix(), "_vocal");
  }

  #[test]
  fn config_round_trips_through_json() {
    let mut config = Config::default();
    config.checkpoints.push(Checkpoint::Weights);
    let json = serde_json::to_string_pretty(&config).unwrap();
    let back: Config = serde_json::from_str(&json).unwrap();
    assert_eq!(back.tile, config.tile);
    assert_eq!(back.checkpoints.as_slice(), &[Checkpoint::Weights]);
    assert_eq!(config.inference_width(), 128);
  }

  #[test]
  fn defaults_are_valid() {
    Config::default().validate().unwrap();
  }

  #[test]
  fn degenerate_settings_are_rejected() {
    let cases: [fn(&mut Config); 9] = [
      |c| c.fft = 2,
      |c| c.tile.width = 0,
      |c| c.tile.height = 0,
      |c| c.inference_scale = 0,
      |c| c.batch_size = 0,
      |c| c.chop = ChopStrategy::Infere { scale: 0 },
      |c| c.chop = ChopStrategy::RandomFull { slices: 0 },
      |c| c.split = 0.0,
      |c| c.learning_rate = f64::NAN,
    ];

    for (i, break_config) in cases.into_iter().enumerate() {
      let mut config = Config::default();
      break_config(&mut config);
      assert!(
        matches!(config.validate(), Err(Error::Config(_))),
        "case {i} passed validation"
      );
    }

    let config = Config {
      fft: MIN_FFT,
      split: 1.0,
      ..Config::default()
    };
    config.validate().unwrap();
  }
}
