use anyhow::Result;
use ndarray::{s, Array2, ArrayView2, Axis};

use crate::{
  chopper::Chopper, conversion::expand_to_grid, model::Predict, normalizer::Normalizer, Config,
  Error,
};

/// The predicted branch of a mix and what is left of the mix without it.
pub struct Separation {
  pub target: Array2<f32>,
  pub residual: Array2<f32>,
}

/// Runs a model over a whole spectrogram tile by tile and stitches the
/// predictions back together in chop order.
pub struct Reconstructor {
  chopper: Chopper,
  normalizer: Normalizer,
  grid: usize,
  width: usize,
}

impl Reconstructor {
  pub fn new(config: &Config) -> Self {
    Self {
      chopper: Chopper::inference(config),
      normalizer: Normalizer::new(config.normalizer),
      grid: config.peak_downscale_factor,
      width: config.inference_width(),
    }
  }

  pub fn reconstruct<P: Predict + ?Sized>(&self, model: &P, spectrogram: ArrayView2<f32>) -> Result<Array2<f32>> {
    if self.width == 0 {
      return Err(Error::Config("inference tiles must be at least one frame wide".into()).into());
    }

    let mut output = Array2::zeros((spectrogram.nrows(), 0));

    // sequential chopping never draws from the rng
    for tile in self.chopper.chop(spectrogram, &mut rand::thread_rng())? {
      let (window, slice) = tile?;

      let (slice, record) = self.normalizer.normalize(slice);
      let expanded = expand_to_grid(slice.view(), self.grid)
        .insert_axis(Axis(0))
        .insert_axis(Axis(3));

      let predicted = model.predict(expanded.view())?;
      let (_, height, width, _) = predicted.dim();
      if height < window.height || width < window.width {
        let (_, rows, cols, _) = expanded.dim();
        return Err(
          Error::ShapeMismatch {
            expected: (rows, cols),
            actual: (height, width),
          }
          .into(),
        );
      }

      let local = predicted.slice(s![0, ..window.height, ..window.width, 0]);
      let local = self.normalizer.denormalize(local, &record);
      output.append(Axis(1), local.view())?;
    }

    Ok(output)
  }

  pub fn separate<P: Predict + ?Sized>(&self, model: &P, spectrogram: ArrayView2<f32>) -> Result<Separation> {
    let target = self.reconstruct(model, spectrogram)?;
    let residual = &spectrogram - &target;
    Ok(Separation { target, residual })
  }
}
