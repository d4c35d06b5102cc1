use anyhow::{Context, Result};

use crate::{
  batch::Batches,
  checkpoint::Checkpoints,
  data::ValidationSet,
  model::Learner,
  Config,
};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EpochReport {
  pub epoch: usize,
  pub loss: f64,
  pub val_loss: Option<f64>,
}

/// Runs epochs against a batch stream. Checkpoint state such as the best
/// validation loss seen so far carries over between `fit` calls.
pub struct Trainer {
  checkpoints: Checkpoints,
}

impl Trainer {
  pub fn new(config: &Config) -> Self {
    Self {
      checkpoints: Checkpoints::new(config),
    }
  }

  pub fn fit<L: Learner + ?Sized>(
    &mut self,
    learner: &mut L,
    batches: &mut Batches,
    validation: &ValidationSet,
    start_epoch: usize,
    epochs: usize,
  ) -> Result<Vec<EpochReport>> {
    let steps = batches.steps_per_epoch();
    let end_epoch = start_epoch + epochs;

    tracing::info!(
      epochs,
      slices = batches.slices(),
      steps,
      "Training for {epochs} epochs"
    );

    let mut reports = Vec::with_capacity(epochs);

    for epoch in start_epoch..end_epoch {
      let mut total = 0.0;
      for _ in 0..steps {
        let batch = batches
          .next()
          .context("Batch stream ended unexpectedly")??;
        total += learner.train_step(&batch)?;
      }
      let loss = total / steps as f64;

      let val_loss = if validation.is_empty() {
        None
      } else {
        Some(learner.evaluate(validation.features.view(), validation.labels.view())?)
      };

      match val_loss {
        Some(val_loss) => tracing::info!("Epoch {}/{end_epoch} | loss={loss:.6} | val_loss={val_loss:.6}", epoch + 1),
        None => tracing::info!("Epoch {}/{end_epoch} | loss={loss:.6}", epoch + 1),
      }

      self
        .checkpoints
        .on_epoch_end(learner, epoch, val_loss, validation)?;

      reports.push(EpochReport {
        epoch,
        loss,
        val_loss,
      });
    }

    Ok(reports)
  }
}
