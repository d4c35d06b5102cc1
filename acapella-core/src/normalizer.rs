use ndarray::{Array2, ArrayView2};

use crate::config::NormalizeStrategy;

/// Parameters of one forward scaling, needed to bring network output back
/// to the magnitude range of the slice it was computed from.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NormRecord {
  pub offset: f32,
  pub scale: f32,
}

impl NormRecord {
  pub const IDENTITY: NormRecord = NormRecord {
    offset: 0.0,
    scale: 1.0,
  };

  fn apply(&self, x: ArrayView2<f32>) -> Array2<f32> {
    x.mapv(|v| (v - self.offset) / self.scale)
  }

  fn invert(&self, x: ArrayView2<f32>) -> Array2<f32> {
    x.mapv(|v| v * self.scale + self.offset)
  }
}

pub struct NormalizedPair {
  pub input: Array2<f32>,
  pub target: Array2<f32>,
  pub record: NormRecord,
}

#[derive(Clone, Copy, Debug)]
pub struct Normalizer {
  strategy: NormalizeStrategy,
}

impl Normalizer {
  pub fn new(strategy: NormalizeStrategy) -> Self {
    Self { strategy }
  }

  fn record(&self, x: ArrayView2<f32>) -> NormRecord {
    match self.strategy {
      NormalizeStrategy::Identity => NormRecord::IDENTITY,
      NormalizeStrategy::Max => {
        let peak = x.fold(0.0f32, |acc, &v| acc.max(v.abs()));
        NormRecord {
          offset: 0.0,
          scale: nonzero(peak),
        }
      }
      NormalizeStrategy::Standard => {
        let Some(mean) = x.mean() else {
          return NormRecord::IDENTITY;
        };
        let var = x.fold(0.0f32, |acc, &v| acc + (v - mean) * (v - mean)) / x.len() as f32;
        NormRecord {
          offset: mean,
          scale: nonzero(var.sqrt()),
        }
      }
    }
  }

  pub fn normalize(&self, x: ArrayView2<f32>) -> (Array2<f32>, NormRecord) {
    let record = self.record(x);
    (record.apply(x), record)
  }

  /// Scales input and target with statistics taken from the input alone, so
  /// the network learns the target relative to the mix it came from.
  pub fn normalize_pair(&self, input: ArrayView2<f32>, target: ArrayView2<f32>) -> NormalizedPair {
    let record = self.record(input);
    NormalizedPair {
      input: record.apply(input),
      target: record.apply(target),
      record,
    }
  }

  pub fn denormalize(&self, x: ArrayView2<f32>, record: &NormRecord) -> Array2<f32> {
    record.invert(x)
  }
}

// Silent slices would otherwise divide by zero.
fn nonzero(scale: f32) -> f32 {
  if scale > f32::EPSILON {
    scale
  } else {
    1.0
  }
}
