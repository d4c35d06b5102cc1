use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("slice of shape {actual:?} does not match the tile shape {expected:?}")]
  ShapeMismatch {
    expected: (usize, usize),
    actual: (usize, usize),
  },
  #[error("tile {height}x{width} at ({freq}, {time}) exceeds spectrogram bounds {bounds:?}")]
  OutOfBounds {
    freq: usize,
    time: usize,
    height: usize,
    width: usize,
    bounds: (usize, usize),
  },
  #[error("spectrogram of shape {shape:?} is smaller than the tile shape {tile:?}")]
  TooSmall {
    shape: (usize, usize),
    tile: (usize, usize),
  },
  #[error("input and target spectrograms differ in shape: {0:?} vs {1:?}")]
  PairMismatch((usize, usize), (usize, usize)),
  #[error("no slices could be cut from the training tracks")]
  EmptyCorpus,
  #[error("invalid configuration: {0}")]
  Config(String),
  #[error("ndarray shape error")]
  Shape(#[from] ndarray::ShapeError),
  #[error("FFT failed")]
  Fft(#[from] realfft::FftError),
}

pub type Result<T> = ::std::result::Result<T, Error>;
