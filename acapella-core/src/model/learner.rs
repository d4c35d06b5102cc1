use std::{
  fs,
  path::{Path, PathBuf},
};

use anyhow::{anyhow, bail, Context, Result};
use burn::{
  backend::{ndarray::NdArrayDevice, Autodiff, NdArray},
  module::{AutodiffModule, Module},
  nn::loss::{MseLoss, Reduction},
  optim::{AdamConfig, GradientsParams, Optimizer},
  record::{FullPrecisionSettings, NamedMpkFileRecorder},
  tensor::{backend::Backend, ElementConversion, Tensor, TensorData},
};
use ndarray::{s, Array4, ArrayView4, Axis};

use super::{AcapellaNet, AcapellaNetConfig};
use crate::batch::Batch;

pub type Train = Autodiff<NdArray>;
type Infer = NdArray;

const EVAL_CHUNK: usize = 100;

/// Something that maps `(n, h, w, 1)` normalized tiles to predicted tiles of
/// the same shape.
pub trait Predict {
  fn predict(&self, features: ArrayView4<f32>) -> Result<Array4<f32>>;
}

pub trait Learner: Predict {
  /// One optimizer step on `batch`, returning the training loss.
  fn train_step(&mut self, batch: &Batch) -> Result<f64>;

  /// Mean squared error over `features`, without updating weights.
  fn evaluate(&self, features: ArrayView4<f32>, labels: ArrayView4<f32>) -> Result<f64>;

  fn save(&self, path: &Path) -> Result<()>;

  fn load(&mut self, path: &Path) -> Result<()>;

  fn num_params(&self) -> usize;
}

/// The file burn actually reads and writes for `path`.
pub fn weights_file(path: impl AsRef<Path>) -> PathBuf {
  path.as_ref().with_extension("mpk")
}

pub fn adam() -> impl Optimizer<AcapellaNet<Train>, Train> {
  AdamConfig::new().init::<Train, AcapellaNet<Train>>()
}

fn to_tensor<B: Backend>(x: ArrayView4<f32>, device: &B::Device) -> Result<Tensor<B, 4>> {
  let (n, h, w, c) = x.dim();
  if c != 1 {
    bail!("Expected a single channel, got {c}");
  }

  let data = TensorData::new(x.iter().copied().collect::<Vec<f32>>(), [n, 1, h, w]);
  Ok(Tensor::from_data(data, device))
}

fn from_tensor<B: Backend>(x: Tensor<B, 4>) -> Result<Array4<f32>> {
  let [n, _, h, w] = x.dims();
  let values = x
    .into_data()
    .to_vec::<f32>()
    .map_err(|err| anyhow!("Failed to read network output: {err:?}"))?;
  Ok(Array4::from_shape_vec((n, h, w, 1), values)?)
}

fn recorder() -> NamedMpkFileRecorder<FullPrecisionSettings> {
  NamedMpkFileRecorder::<FullPrecisionSettings>::new()
}

pub struct BurnLearner<O> {
  model: AcapellaNet<Train>,
  optim: O,
  device: NdArrayDevice,
  learning_rate: f64,
}

impl<O: Optimizer<AcapellaNet<Train>, Train>> BurnLearner<O> {
  pub fn new(config: &crate::Config, optim: O) -> Self {
    if let Some(seed) = config.seed {
      <Train as Backend>::seed(seed);
    }

    let device = NdArrayDevice::default();
    let model = AcapellaNetConfig::new().init(&device);

    Self {
      model,
      optim,
      device,
      learning_rate: config.learning_rate,
    }
  }

  fn mse<B: Backend>(model: &AcapellaNet<B>, features: Tensor<B, 4>, labels: Tensor<B, 4>) -> Tensor<B, 1> {
    MseLoss::new().forward(model.forward(features), labels, Reduction::Mean)
  }
}

impl<O: Optimizer<AcapellaNet<Train>, Train>> Predict for BurnLearner<O> {
  fn predict(&self, features: ArrayView4<f32>) -> Result<Array4<f32>> {
    let model = self.model.valid();
    let x = to_tensor::<Infer>(features, &self.device)?;
    from_tensor(model.forward(x))
  }
}

impl<O: Optimizer<AcapellaNet<Train>, Train>> Learner for BurnLearner<O> {
  fn train_step(&mut self, batch: &Batch) -> Result<f64> {
    let x = to_tensor::<Train>(batch.features.view(), &self.device)?;
    let y = to_tensor::<Train>(batch.labels.view(), &self.device)?;

    let loss = Self::mse(&self.model, x, y);
    let value = loss.clone().into_scalar().elem::<f64>();

    let grads = GradientsParams::from_grads(loss.backward(), &self.model);
    self.model = self
      .optim
      .step(self.learning_rate, self.model.clone(), grads);

    Ok(value)
  }

  fn evaluate(&self, features: ArrayView4<f32>, labels: ArrayView4<f32>) -> Result<f64> {
    let total = features.len_of(Axis(0));
    if total == 0 {
      bail!("Cannot evaluate on an empty set");
    }

    let model = self.model.valid();
    let mut sum = 0.0;

    for start in (0..total).step_by(EVAL_CHUNK) {
      let end = (start + EVAL_CHUNK).min(total);
      let x = to_tensor::<Infer>(features.slice(s![start..end, .., .., ..]), &self.device)?;
      let y = to_tensor::<Infer>(labels.slice(s![start..end, .., .., ..]), &self.device)?;
      let loss = Self::mse(&model, x, y).into_scalar().elem::<f64>();
      sum += loss * (end - start) as f64;
    }

    Ok(sum / total as f64)
  }

  fn save(&self, path: &Path) -> Result<()> {
    if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
      fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    }

    self
      .model
      .clone()
      .save_file(path, &recorder())
      .map_err(|err| anyhow!("Failed to save weights to {}: {err:?}", path.display()))
  }

  fn load(&mut self, path: &Path) -> Result<()> {
    self.model = self
      .model
      .clone()
      .load_file(path, &recorder(), &self.device)
      .map_err(|err| anyhow!("Failed to load weights from {}: {err:?}", path.display()))?;
    Ok(())
  }

  fn num_params(&self) -> usize {
    self.model.num_params()
  }
}

#[cfg(test)]
mod tests {
  use tempfile::TempDir;

  use super::*;

  fn config() -> crate::Config {
    crate::Config {
      seed: Some(3),
      ..crate::Config::default()
    }
  }

  fn batch() -> Batch {
    let features = Array4::from_shape_fn((2, 8, 8, 1), |(n, h, w, _)| ((n + h * w) % 7) as f32 / 7.0);
    Batch {
      labels: features.mapv(|v| v * 0.5),
      features,
    }
  }

  #[test]
  fn predictions_keep_tile_shape() {
    let learner = BurnLearner::new(&config(), adam());
    let out = learner.predict(batch().features.view()).unwrap();
    assert_eq!(out.dim(), (2, 8, 8, 1));
    assert!(out.iter().all(|&v| v >= 0.0));
  }

  #[test]
  fn training_reports_finite_loss() {
    let mut learner = BurnLearner::new(&config(), adam());
    let batch = batch();
    for _ in 0..3 {
      assert!(learner.train_step(&batch).unwrap().is_finite());
    }
    let loss = learner
      .evaluate(batch.features.view(), batch.labels.view())
      .unwrap();
    assert!(loss.is_finite());
    assert!(learner.num_params() > 0);
  }

  #[test]
  fn weights_survive_save_and_load() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("weights.mpk");
    let features = batch().features;

    let mut trained = BurnLearner::new(&config(), adam());
    trained.train_step(&batch()).unwrap();
    trained.save(&path).unwrap();
    assert!(weights_file(&path).exists());

    let mut fresh = BurnLearner::new(&crate::Config::default(), adam());
    fresh.load(&path).unwrap();

    let a = trained.predict(features.view()).unwrap();
    let b = fresh.predict(features.view()).unwrap();
    for (x, y) in a.iter().zip(&b) {
      approx::assert_abs_diff_eq!(*x, *y, epsilon = 1e-6);
    }
  }
}
