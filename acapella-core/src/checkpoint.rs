use std::{
  fs,
  path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use image::{Rgb, RgbImage};
use ndarray::{s, Array2, Axis};
use smallvec::SmallVec;

use crate::{
  config::{Checkpoint, Config},
  data::ValidationSet,
  model::{Learner, Predict},
};

const BEST_WEIGHTS: &str = "best_weights.mpk";
const VIS_CHUNK: usize = 100;

// dark to bright, roughly the magma colormap
const GRADIENT: [[f32; 3]; 5] = [
  [0.0, 0.0, 4.0],
  [81.0, 18.0, 124.0],
  [183.0, 55.0, 121.0],
  [252.0, 137.0, 97.0],
  [252.0, 253.0, 191.0],
];

/// Where best-by-validation weights land: next to `weights`, under `logs`
/// when that location is relative.
pub fn best_weights_path(config: &Config) -> PathBuf {
  let dir = config.weights.parent().unwrap_or(Path::new(""));
  let path = dir.join(BEST_WEIGHTS);
  if path.is_absolute() {
    path
  } else {
    config.logs.join(path)
  }
}

fn color(v: f32) -> Rgb<u8> {
  let v = if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 };
  let pos = v * (GRADIENT.len() - 1) as f32;
  let i = (pos as usize).min(GRADIENT.len() - 2);
  let t = pos - i as f32;

  let (a, b) = (GRADIENT[i], GRADIENT[i + 1]);
  Rgb([0, 1, 2].map(|c| (a[c] + (b[c] - a[c]) * t).round() as u8))
}

/// Per-pixel mean squared error of the predictions over the validation set.
pub fn error_map<P: Predict + ?Sized>(model: &P, validation: &ValidationSet) -> Result<Array2<f32>> {
  let (total, h, w, _) = validation.features.dim();
  let mut error = Array2::<f32>::zeros((h, w));

  for start in (0..total).step_by(VIS_CHUNK) {
    let end = (start + VIS_CHUNK).min(total);
    let predicted = model.predict(validation.features.slice(s![start..end, .., .., ..]))?;
    let diff = predicted - validation.labels.slice(s![start..end, .., .., ..]);
    error += &diff.mapv(|v| v * v).sum_axis(Axis(0)).index_axis(Axis(2), 0);
  }

  if total > 0 {
    error /= total as f32;
  }
  Ok(error)
}

/// Renders `error` scaled to its maximum, returning the file written.
pub fn save_error_image(error: &Array2<f32>, dir: &Path, epoch: usize) -> Result<PathBuf> {
  let top = error.fold(0.0f32, |acc, &v| acc.max(v));
  let scale = if top > 0.0 { top } else { 1.0 };

  let (h, w) = error.dim();
  let image = RgbImage::from_fn(w as u32, h as u32, |x, y| color(error[[y as usize, x as usize]] / scale));

  fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
  let path = dir.join(format!("error{epoch:03}-{top:.6}.png"));
  image
    .save(&path)
    .with_context(|| format!("Failed to write {}", path.display()))?;
  Ok(path)
}

/// Epoch-end hooks selected by `Config::checkpoints`.
pub struct Checkpoints {
  kinds: SmallVec<[Checkpoint; 2]>,
  best_weights: PathBuf,
  images: PathBuf,
  best_loss: Option<f64>,
}

impl Checkpoints {
  pub fn new(config: &Config) -> Self {
    Self {
      kinds: config.checkpoints.clone(),
      best_weights: best_weights_path(config),
      images: config.logs.join("images"),
      best_loss: None,
    }
  }

  pub fn best_loss(&self) -> Option<f64> {
    self.best_loss
  }

  pub fn on_epoch_end<L: Learner + ?Sized>(
    &mut self,
    learner: &L,
    epoch: usize,
    val_loss: Option<f64>,
    validation: &ValidationSet,
  ) -> Result<()> {
    for kind in &self.kinds {
      match kind {
        Checkpoint::Weights => {
          let Some(loss) = val_loss else {
            continue;
          };
          if self.best_loss.is_some_and(|best| best <= loss) {
            continue;
          }

          tracing::info!(
            epoch,
            loss,
            path = %self.best_weights.display(),
            "Validation loss improved, saving weights"
          );
          learner.save(&self.best_weights)?;
          self.best_loss = Some(loss);
        }
        Checkpoint::ErrorVisualization => {
          if validation.is_empty() {
            tracing::warn!("No validation slices, skip error visualization...");
            continue;
          }

          let error = error_map(learner, validation)?;
          let path = save_error_image(&error, &self.images, epoch)?;
          tracing::debug!(path = %path.display(), "Saved error visualization");
        }
      }
    }

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use ndarray::{Array4, ArrayView4};
  use tempfile::TempDir;

  use super::*;
  use crate::batch::Batch;

  struct Scaled {
    factor: f32,
    saved: std::cell::RefCell<Vec<PathBuf>>,
  }

  impl Predict for Scaled {
    fn predict(&self, features: ArrayView4<f32>) -> Result<Array4<f32>> {
      Ok(features.mapv(|v| v * self.factor))
    }
  }

  impl Learner for Scaled {
    fn train_step(&mut self, _: &Batch) -> Result<f64> {
      Ok(0.0)
    }

    fn evaluate(&self, _: ArrayView4<f32>, _: ArrayView4<f32>) -> Result<f64> {
      Ok(0.0)
    }

    fn save(&self, path: &Path) -> Result<()> {
      self.saved.borrow_mut().push(path.to_path_buf());
      Ok(())
    }

    fn load(&mut self, _: &Path) -> Result<()> {
      Ok(())
    }

    fn num_params(&self) -> usize {
      0
    }
  }

  fn validation() -> ValidationSet {
    let features = Array4::from_shape_fn((3, 4, 6, 1), |(n, h, _, _)| (n + h) as f32);
    ValidationSet {
      labels: features.clone(),
      features,
    }
  }

  #[test]
  fn best_weights_follow_weights_dir() {
    let mut config = Config::default();
    assert_eq!(best_weights_path(&config), PathBuf::from("logs/best_weights.mpk"));

    config.weights = PathBuf::from("/models/run/w.mpk");
    assert_eq!(best_weights_path(&config), PathBuf::from("/models/run/best_weights.mpk"));

    config.weights = PathBuf::from("run/w.mpk");
    assert_eq!(best_weights_path(&config), PathBuf::from("logs/run/best_weights.mpk"));
  }

  #[test]
  fn weights_saved_only_on_improvement() {
    let mut config = Config::default();
    config.checkpoints.push(Checkpoint::Weights);
    let mut checkpoints = Checkpoints::new(&config);
    let learner = Scaled {
      factor: 1.0,
      saved: Default::default(),
    };

    for (epoch, loss) in [0.5, 0.7, 0.4, 0.4].into_iter().enumerate() {
      checkpoints
        .on_epoch_end(&learner, epoch, Some(loss), &validation())
        .unwrap();
    }

    assert_eq!(learner.saved.borrow().len(), 2);
    assert_eq!(checkpoints.best_loss(), Some(0.4));
  }

  #[test]
  fn error_image_is_written_per_epoch() {
    let dir = TempDir::new().unwrap();
    let mut config = Config {
      logs: dir.path().to_path_buf(),
      ..Config::default()
    };
    config.checkpoints.push(Checkpoint::ErrorVisualization);

    let learner = Scaled {
      factor: 0.0,
      saved: Default::default(),
    };
    let valid = validation();

    let error = error_map(&learner, &valid).unwrap();
    assert_eq!(error.dim(), (4, 6));
    // squared labels averaged over the three slices: ((n + h)^2 summed over n) / 3
    assert_eq!(error[[0, 0]], (0.0 + 1.0 + 4.0) / 3.0);

    let mut checkpoints = Checkpoints::new(&config);
    checkpoints.on_epoch_end(&learner, 7, None, &valid).unwrap();

    let images: Vec<_> = fs::read_dir(dir.path().join("images"))
      .unwrap()
      .map(|e| e.unwrap().file_name().into_string().unwrap())
      .collect();
    assert_eq!(images.len(), 1);
    assert!(images[0].starts_with("error007-"));
    assert!(learner.saved.borrow().is_empty());
  }

  #[test]
  fn gradient_spans_dark_to_bright() {
    assert_eq!(color(0.0), Rgb([0, 0, 4]));
    assert_eq!(color(1.0), Rgb([252, 253, 191]));
    assert_eq!(color(f32::NAN), Rgb([0, 0, 4]));
  }
}
