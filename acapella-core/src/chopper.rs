use std::vec;

use ndarray::{s, ArrayView2};
use rand::Rng;

use crate::{
  config::{ChopStrategy, Config, TileShape},
  Error, Result,
};

/// Origin and extent of one tile inside a spectrogram.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Window {
  pub freq: usize,
  pub time: usize,
  pub height: usize,
  pub width: usize,
}

impl Window {
  pub fn dim(&self) -> (usize, usize) {
    (self.height, self.width)
  }

  pub fn time_end(&self) -> usize {
    self.time + self.width
  }

  pub fn shifted(self, time: usize) -> Self {
    Self {
      time: self.time + time,
      ..self
    }
  }

  pub fn cut<'a>(&self, spectrogram: ArrayView2<'a, f32>) -> Result<ArrayView2<'a, f32>> {
    let bounds = spectrogram.dim();
    if self.freq + self.height > bounds.0 || self.time_end() > bounds.1 {
      return Err(Error::OutOfBounds {
        freq: self.freq,
        time: self.time,
        height: self.height,
        width: self.width,
        bounds,
      });
    }

    Ok(spectrogram.slice_move(s![
      self.freq..self.freq + self.height,
      self.time..self.time_end()
    ]))
  }
}

/// Left-to-right walk over a spectrogram, stacking tiles bottom to top at
/// each time offset.
#[derive(Clone, Debug)]
pub struct Sequential {
  bounds: (usize, usize),
  height: usize,
  width: usize,
  partial: bool,
  freq: usize,
  time: usize,
}

impl Iterator for Sequential {
  type Item = Window;

  fn next(&mut self) -> Option<Window> {
    let (rows, cols) = self.bounds;

    if self.height == 0 || self.width == 0 || self.time >= cols {
      return None;
    }

    if self.freq + self.height > rows {
      return None;
    }

    let width = if self.time + self.width <= cols {
      self.width
    } else if self.partial {
      cols - self.time
    } else {
      return None;
    };

    let window = Window {
      freq: self.freq,
      time: self.time,
      height: self.height,
      width,
    };

    self.freq += self.height;
    if self.freq + self.height > rows {
      self.freq = 0;
      self.time += self.width;
    }

    Some(window)
  }
}

#[derive(Clone, Debug)]
pub enum Windows {
  Sequential(Sequential),
  Random(vec::IntoIter<Window>),
}

impl Iterator for Windows {
  type Item = Window;

  fn next(&mut self) -> Option<Window> {
    match self {
      Windows::Sequential(it) => it.next(),
      Windows::Random(it) => it.next(),
    }
  }
}

/// Tiles of one spectrogram, in chop order.
#[derive(Clone)]
pub struct Tiles<'a> {
  spectrogram: ArrayView2<'a, f32>,
  windows: Windows,
}

impl<'a> Iterator for Tiles<'a> {
  type Item = Result<(Window, ArrayView2<'a, f32>)>;

  fn next(&mut self) -> Option<Self::Item> {
    let window = self.windows.next()?;
    Some(window.cut(self.spectrogram).map(|tile| (window, tile)))
  }
}

#[derive(Clone, Copy, Debug)]
pub struct Chopper {
  strategy: ChopStrategy,
  tile: TileShape,
  grid: usize,
}

impl Chopper {
  pub fn new(strategy: ChopStrategy, tile: TileShape, grid: usize) -> Self {
    Self {
      strategy,
      tile,
      grid,
    }
  }

  pub fn from_config(config: &Config) -> Self {
    Self::new(config.chop, config.tile, config.peak_downscale_factor)
  }

  /// Full-coverage chopper used when separating a whole song.
  pub fn inference(config: &Config) -> Self {
    Self::new(
      ChopStrategy::Infere {
        scale: config.inference_scale,
      },
      config.tile,
      config.peak_downscale_factor,
    )
  }

  pub fn with_strategy(self, strategy: ChopStrategy) -> Self {
    Self { strategy, ..self }
  }

  pub fn strategy(&self) -> ChopStrategy {
    self.strategy
  }

  pub fn windows<R: Rng + ?Sized>(&self, bounds: (usize, usize), rng: &mut R) -> Result<Windows> {
    let (rows, cols) = bounds;

    let windows = match self.strategy {
      ChopStrategy::Tile => Windows::Sequential(Sequential {
        bounds,
        height: self.tile.height,
        width: self.tile.width,
        partial: false,
        freq: 0,
        time: 0,
      }),
      ChopStrategy::Infere { scale } => Windows::Sequential(Sequential {
        bounds,
        height: rows,
        width: scale * self.grid,
        partial: true,
        freq: 0,
        time: 0,
      }),
      ChopStrategy::Random { slices } => {
        self.ensure_fits(bounds, self.tile.height)?;
        let windows = (0..slices)
          .map(|_| Window {
            freq: rng.gen_range(0..=rows - self.tile.height),
            time: rng.gen_range(0..=cols - self.tile.width),
            height: self.tile.height,
            width: self.tile.width,
          })
          .collect::<Vec<_>>();
        Windows::Random(windows.into_iter())
      }
      ChopStrategy::RandomFull { slices } => {
        self.ensure_fits(bounds, rows)?;
        let windows = (0..slices)
          .map(|_| Window {
            freq: 0,
            time: rng.gen_range(0..=cols - self.tile.width),
            height: rows,
            width: self.tile.width,
          })
          .collect::<Vec<_>>();
        Windows::Random(windows.into_iter())
      }
    };

    Ok(windows)
  }

  pub fn chop<'a, R: Rng + ?Sized>(
    &self,
    spectrogram: ArrayView2<'a, f32>,
    rng: &mut R,
  ) -> Result<Tiles<'a>> {
    let windows = self.windows(spectrogram.dim(), rng)?;
    Ok(Tiles {
      spectrogram,
      windows,
    })
  }

  /// Cuts input and target at identical offsets so the pairs stay aligned.
  pub fn chop_pair<'a, R: Rng + ?Sized>(
    &self,
    input: ArrayView2<'a, f32>,
    target: ArrayView2<'a, f32>,
    rng: &mut R,
  ) -> Result<Vec<(ArrayView2<'a, f32>, ArrayView2<'a, f32>)>> {
    if input.dim() != target.dim() {
      return Err(Error::PairMismatch(input.dim(), target.dim()));
    }

    self
      .windows(input.dim(), rng)?
      .map(|window| Ok((window.cut(input)?, window.cut(target)?)))
      .collect()
  }

  fn ensure_fits(&self, bounds: (usize, usize), height: usize) -> Result<()> {
    if bounds.0 < height || bounds.1 < self.tile.width {
      return Err(Error::TooSmall {
        shape: bounds,
        tile: (height, self.tile.width),
      });
    }
    Ok(())
  }
}

/// Picks a pre-cut tile: a track uniformly at random, then one of that
/// track's tiles. Tracks without tiles are never chosen.
pub fn pick_tracked<R: Rng + ?Sized>(tracks: &[Vec<Window>], rng: &mut R) -> Option<(usize, Window)> {
  let candidates: Vec<usize> = (0..tracks.len())
    .filter(|&t| !tracks[t].is_empty())
    .collect();

  if candidates.is_empty() {
    return None;
  }

  let track = candidates[rng.gen_range(0..candidates.len())];
  let tiles = &tracks[track];
  Some((track, tiles[rng.gen_range(0..tiles.len())]))
}
