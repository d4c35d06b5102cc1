use std::sync::Arc;

use burn::data::{
  dataloader::{batcher::Batcher, DataLoader, DataLoaderBuilder},
  dataset::Dataset,
};
use ndarray::{s, Array2, Array4, ArrayView2, Axis};
use rand::{rngs::StdRng, seq::SliceRandom, Rng};

use crate::{
  chopper::{pick_tracked, Chopper, Window},
  config::{BatchStrategy, Config},
  data::{Corpus, Track},
  normalizer::{NormalizedPair, Normalizer},
  Error, Result,
};

/// Features and labels for one training step, each `(batch, height, width, 1)`.
#[derive(Clone, Debug)]
pub struct Batch {
  pub features: Array4<f32>,
  pub labels: Array4<f32>,
}

impl Batch {
  fn zeros(batch_size: usize, tile: (usize, usize)) -> Self {
    let shape = (batch_size, tile.0, tile.1, 1);
    Self {
      features: Array4::zeros(shape),
      labels: Array4::zeros(shape),
    }
  }

  pub fn len(&self) -> usize {
    self.features.len_of(Axis(0))
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  fn insert(&mut self, i: usize, feature: ArrayView2<f32>, label: ArrayView2<f32>) -> Result<()> {
    let (_, h, w, _) = self.features.dim();
    for actual in [feature.dim(), label.dim()] {
      if actual != (h, w) {
        return Err(Error::ShapeMismatch {
          expected: (h, w),
          actual,
        });
      }
    }

    self.features.slice_mut(s![i, .., .., 0]).assign(&feature);
    self.labels.slice_mut(s![i, .., .., 0]).assign(&label);
    Ok(())
  }
}

/// The training corpus cut once into slices, remembered per track.
pub struct SlicePool {
  corpus: Corpus,
  tracks: Vec<Vec<Window>>,
  normalizer: Normalizer,
}

impl SlicePool {
  pub fn build<R: Rng + ?Sized>(
    tracks: &[Track],
    chopper: &Chopper,
    normalizer: Normalizer,
    tile: (usize, usize),
    rng: &mut R,
  ) -> Result<Self> {
    let corpus = Corpus::concatenate(tracks)?;
    let tracks = corpus.chop(chopper, tile, rng)?;

    let pool = Self {
      corpus,
      tracks,
      normalizer,
    };

    if pool.len() == 0 {
      return Err(Error::EmptyCorpus);
    }

    tracing::info!(
      tracks = pool.tracks.len(),
      slices = pool.len(),
      "Chopped training data"
    );
    Ok(pool)
  }

  pub fn len(&self) -> usize {
    self.tracks.iter().map(Vec::len).sum()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn windows(&self) -> impl Iterator<Item = Window> + '_ {
    self.tracks.iter().flatten().copied()
  }

  fn draw(&self, window: Window) -> Result<NormalizedPair> {
    let input = window.cut(self.corpus.input.view())?;
    let target = window.cut(self.corpus.target.view())?;
    Ok(self.normalizer.normalize_pair(input, target))
  }
}

/// Every slice exactly once per epoch in shuffled order. When the pool runs
/// out mid-batch it is reshuffled and the batch is completed from the new
/// order.
pub struct Shuffled {
  pool: SlicePool,
  order: Vec<Window>,
  cursor: usize,
  batch_size: usize,
  tile: (usize, usize),
  rng: StdRng,
}

impl Shuffled {
  pub fn new(pool: SlicePool, batch_size: usize, tile: (usize, usize), mut rng: StdRng) -> Self {
    let mut order: Vec<_> = pool.windows().collect();
    order.shuffle(&mut rng);
    Self {
      pool,
      order,
      cursor: 0,
      batch_size,
      tile,
      rng,
    }
  }

  fn fill(&mut self) -> Result<Batch> {
    let mut batch = Batch::zeros(self.batch_size, self.tile);

    for i in 0..self.batch_size {
      if self.cursor == self.order.len() {
        self.order.shuffle(&mut self.rng);
        self.cursor = 0;
      }

      let window = self.order[self.cursor];
      self.cursor += 1;

      let pair = self.pool.draw(window)?;
      batch.insert(i, pair.input.view(), pair.target.view())?;
    }

    Ok(batch)
  }
}

/// A random track, then a random slice of it, for every batch slot.
pub struct Tracked {
  pool: SlicePool,
  batch_size: usize,
  tile: (usize, usize),
  rng: StdRng,
}

impl Tracked {
  pub fn new(pool: SlicePool, batch_size: usize, tile: (usize, usize), rng: StdRng) -> Self {
    Self {
      pool,
      batch_size,
      tile,
      rng,
    }
  }

  fn fill(&mut self) -> Result<Batch> {
    let mut batch = Batch::zeros(self.batch_size, self.tile);

    for i in 0..self.batch_size {
      let (_, window) = pick_tracked(&self.pool.tracks, &mut self.rng).ok_or(Error::EmptyCorpus)?;
      let pair = self.pool.draw(window)?;
      batch.insert(i, pair.input.view(), pair.target.view())?;
    }

    Ok(batch)
  }
}

/// A random track, then a freshly cut random slice of it, for every batch
/// slot.
pub struct Sampled {
  corpus: Corpus,
  usable: Vec<usize>,
  chopper: Chopper,
  normalizer: Normalizer,
  batch_size: usize,
  tile: (usize, usize),
  rng: StdRng,
}

impl Sampled {
  pub fn new(
    tracks: &[Track],
    chopper: Chopper,
    normalizer: Normalizer,
    batch_size: usize,
    tile: (usize, usize),
    rng: StdRng,
  ) -> Result<Self> {
    let corpus = Corpus::concatenate(tracks)?;
    let chopper = chopper.with_strategy(chopper.strategy().single_random());

    let rows = corpus.input.nrows();
    let tall_enough = chopper.strategy().is_full() || rows >= tile.0;
    let usable: Vec<usize> = corpus
      .boundaries
      .ranges()
      .iter()
      .enumerate()
      .filter(|(_, r)| tall_enough && r.len() >= tile.1)
      .map(|(i, _)| i)
      .collect();

    if usable.is_empty() {
      return Err(Error::EmptyCorpus);
    }

    Ok(Self {
      corpus,
      usable,
      chopper,
      normalizer,
      batch_size,
      tile,
      rng,
    })
  }

  fn fill(&mut self) -> Result<Batch> {
    let mut batch = Batch::zeros(self.batch_size, self.tile);

    for i in 0..self.batch_size {
      let track = self.usable[self.rng.gen_range(0..self.usable.len())];
      let (input, target) = self.corpus.track(track);

      let pairs = self.chopper.chop_pair(input, target, &mut self.rng)?;
      let Some(&(x, y)) = pairs.first() else {
        return Err(Error::EmptyCorpus);
      };

      let pair = self.normalizer.normalize_pair(x, y);
      batch.insert(i, pair.input.view(), pair.target.view())?;
    }

    Ok(batch)
  }

  fn slices(&self) -> usize {
    self
      .usable
      .iter()
      .map(|&t| self.corpus.boundaries.ranges()[t].len() / self.tile.1)
      .sum()
  }
}

/// One normalized input/target slice pair.
#[derive(Clone, Debug)]
pub struct SlicePair {
  pub input: Array2<f32>,
  pub target: Array2<f32>,
}

/// Every pre-chopped slice, normalized up front.
pub struct SliceDataset {
  items: Vec<SlicePair>,
}

impl SliceDataset {
  pub fn new(pool: &SlicePool, tile: (usize, usize)) -> Result<Self> {
    let items = pool
      .windows()
      .map(|window| {
        let pair = pool.draw(window)?;
        for actual in [pair.input.dim(), pair.target.dim()] {
          if actual != tile {
            return Err(Error::ShapeMismatch {
              expected: tile,
              actual,
            });
          }
        }

        Ok(SlicePair {
          input: pair.input,
          target: pair.target,
        })
      })
      .collect::<Result<Vec<_>>>()?;

    Ok(Self { items })
  }
}

impl Dataset<SlicePair> for SliceDataset {
  fn get(&self, index: usize) -> Option<SlicePair> {
    self.items.get(index).cloned()
  }

  fn len(&self) -> usize {
    self.items.len()
  }
}

/// Stacks slice pairs into a `(n, h, w, 1)` batch.
#[derive(Clone, Debug)]
pub struct SliceBatcher {
  tile: (usize, usize),
}

impl Batcher<SlicePair, Batch> for SliceBatcher {
  fn batch(&self, items: Vec<SlicePair>) -> Batch {
    let mut batch = Batch::zeros(items.len(), self.tile);
    for (i, item) in items.iter().enumerate() {
      batch.features.slice_mut(s![i, .., .., 0]).assign(&item.input);
      batch.labels.slice_mut(s![i, .., .., 0]).assign(&item.target);
    }
    batch
  }
}

/// Pre-chopped slices served by burn's data loader, reshuffled on every pass.
/// The last batch of a pass holds whatever slices remain.
pub struct Loaded {
  loader: Arc<dyn DataLoader<Batch>>,
  pending: std::vec::IntoIter<Batch>,
  slices: usize,
  batch_size: usize,
}

impl Loaded {
  pub fn new(pool: &SlicePool, batch_size: usize, tile: (usize, usize), rng: &mut StdRng) -> Result<Self> {
    let dataset = SliceDataset::new(pool, tile)?;
    let slices = dataset.len();

    let loader = DataLoaderBuilder::new(SliceBatcher { tile })
      .batch_size(batch_size)
      .shuffle(rng.gen())
      .build(dataset);

    Ok(Self {
      loader,
      pending: Vec::new().into_iter(),
      slices,
      batch_size,
    })
  }

  fn fill(&mut self) -> Result<Batch> {
    if self.pending.as_slice().is_empty() {
      self.pending = self.loader.iter().collect::<Vec<_>>().into_iter();
    }
    self.pending.next().ok_or(Error::EmptyCorpus)
  }
}

/// Endless stream of training batches, one variant per batch strategy.
pub enum Batches {
  Default(Shuffled),
  Tracks(Tracked),
  Random(Sampled),
  Loader(Loaded),
}

impl Batches {
  pub fn new(config: &Config, tracks: &[Track], mut rng: StdRng) -> Result<Self> {
    let chopper = Chopper::from_config(config);
    let normalizer = Normalizer::new(config.normalizer);
    let tile = config.tile.dim();

    let batches = match config.batch {
      BatchStrategy::Default => {
        let pool = SlicePool::build(tracks, &chopper, normalizer, tile, &mut rng)?;
        Batches::Default(Shuffled::new(pool, config.batch_size, tile, rng))
      }
      BatchStrategy::Tracks => {
        let pool = SlicePool::build(tracks, &chopper, normalizer, tile, &mut rng)?;
        Batches::Tracks(Tracked::new(pool, config.batch_size, tile, rng))
      }
      BatchStrategy::Random => Batches::Random(Sampled::new(
        tracks,
        chopper,
        normalizer,
        config.batch_size,
        tile,
        rng,
      )?),
      BatchStrategy::Loader => {
        let pool = SlicePool::build(tracks, &chopper, normalizer, tile, &mut rng)?;
        Batches::Loader(Loaded::new(&pool, config.batch_size, tile, &mut rng)?)
      }
    };

    Ok(batches)
  }

  /// Distinct slices the stream draws from, used to size an epoch.
  pub fn slices(&self) -> usize {
    match self {
      Batches::Default(it) => it.pool.len(),
      Batches::Tracks(it) => it.pool.len(),
      Batches::Random(it) => it.slices(),
      Batches::Loader(it) => it.slices,
    }
  }

  fn batch_size(&self) -> usize {
    match self {
      Batches::Default(it) => it.batch_size,
      Batches::Tracks(it) => it.batch_size,
      Batches::Random(it) => it.batch_size,
      Batches::Loader(it) => it.batch_size,
    }
  }

  pub fn steps_per_epoch(&self) -> usize {
    self.slices().div_ceil(self.batch_size().max(1)).max(1)
  }
}

impl Iterator for Batches {
  type Item = Result<Batch>;

  fn next(&mut self) -> Option<Self::Item> {
    Some(match self {
      Batches::Default(it) => it.fill(),
      Batches::Tracks(it) => it.fill(),
      Batches::Random(it) => it.fill(),
      Batches::Loader(it) => it.fill(),
    })
  }
}
