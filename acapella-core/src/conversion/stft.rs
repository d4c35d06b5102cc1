use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use realfft::{num_complex::Complex32, RealFftPlanner};

use crate::Result;

pub(crate) fn hann_window_periodic(window_length: usize) -> Array1<f32> {
  if window_length == 0 {
    return Array1::zeros(0);
  }

  if window_length == 1 {
    return Array1::ones(1);
  }

  let half_length = window_length / 2 + 1;
  let scaling = (std::f32::consts::PI * 2.0) / window_length as f32;

  let mut res = Array1::zeros(window_length);

  for i in 1..half_length {
    let cur = 0.5 - 0.5 * (scaling * i as f32).cos();
    res[i] = cur;
    res[window_length - i] = cur;
  }

  res
}

// mirror without repeating the edge sample, folding as often as needed
fn reflect(pos: isize, length: usize) -> Option<usize> {
  if length < 2 {
    return (pos == 0 && length == 1).then_some(0);
  }

  let period = 2 * (length as isize - 1);
  let pos = pos.rem_euclid(period);
  let pos = if pos >= length as isize { period - pos } else { pos };
  Some(pos as usize)
}

// window = hann_window
// center = True
// pad_mode = 'reflect'
// onesided = True
fn stft(input: ArrayView1<f32>, n_fft: usize, hop_length: usize) -> Result<Array2<Complex32>> {
  let length = input.len();
  let freq_num = n_fft / 2 + 1;
  let frame_num = length / hop_length + 1;

  let window = hann_window_periodic(n_fft);

  let mut planner = RealFftPlanner::<f32>::new();
  let fft = planner.plan_fft_forward(n_fft);
  let mut scratch = fft.make_scratch_vec();

  let left_num = (n_fft / 2) as isize;
  let right_num = n_fft as isize - left_num;

  let at = |pos: isize| reflect(pos, length).map_or(0.0, |pos| input[pos]);

  let mut res = Array2::zeros((freq_num, frame_num));

  for (frame_id, frame_center) in (0..=length).step_by(hop_length).enumerate() {
    let frame_center = frame_center as isize;

    let mut frame: Vec<f32> = ((frame_center - left_num)..(frame_center + right_num))
      .map(at)
      .zip(&window)
      .map(|(a, b)| a * b)
      .collect();

    let mut cur = fft.make_output_vec();
    fft.process_with_scratch(&mut frame, &mut cur, &mut scratch)?;

    for (i, bin) in cur.into_iter().enumerate() {
      res[[i, frame_id]] = bin;
    }
  }

  Ok(res)
}

fn istft(input: ArrayView2<Complex32>, n_fft: usize, hop_length: usize) -> Result<Array1<f32>> {
  let (freq_num, frame_num) = input.dim();

  // this may be shorter than the original signal
  let length = frame_num.saturating_sub(1) * hop_length;

  let window = hann_window_periodic(n_fft);

  let mut planner = RealFftPlanner::<f32>::new();
  let fft = planner.plan_fft_inverse(n_fft);
  let mut scratch = fft.make_scratch_vec();

  let left_num = n_fft / 2;

  let mut res = Array1::<f32>::zeros(length);
  let mut divider = Array1::<f32>::zeros(length);

  for frame_id in 0..frame_num {
    let mut cur = input.column(frame_id).to_vec();

    // a real signal has no imaginary part at DC and Nyquist
    cur[0].im = 0.0;
    cur[freq_num - 1].im = 0.0;

    let mut frame = fft.make_output_vec();
    fft.process_with_scratch(&mut cur, &mut frame, &mut scratch)?;

    let frame_center = frame_id * hop_length;
    let left = left_num.saturating_sub(frame_center);
    let right = n_fft.min(length + left_num - frame_center);

    for i in left..right {
      let pos = frame_center + i - left_num;
      res[pos] += frame[i] * window[i] / n_fft as f32;
      divider[pos] += window[i] * window[i];
    }
  }

  res.zip_mut_with(&divider, |x, &d| {
    if d > f32::EPSILON {
      *x /= d;
    }
  });

  Ok(res)
}

/// Short-time Fourier transform of a mono signal, keeping the lowest `dim_f`
/// bins. Bins above `dim_f` are zero on the way back.
pub struct Stft {
  n_fft: usize,
  hop_length: usize,
  dim_f: usize,
}

impl Stft {
  pub fn new(n_fft: usize, hop_length: usize, dim_f: usize) -> Self {
    Self {
      n_fft,
      hop_length,
      dim_f,
    }
  }

  /// `(dim_f, frames)` complex bins, one frame per hop.
  pub fn apply(&self, samples: ArrayView1<f32>) -> Result<Array2<Complex32>> {
    let mut x = stft(samples, self.n_fft, self.hop_length)?;
    if x.nrows() > self.dim_f {
      x = x.slice_move(ndarray::s![..self.dim_f, ..]);
    }
    Ok(x)
  }

  pub fn inverse(&self, x: ArrayView2<Complex32>) -> Result<Array1<f32>> {
    let (f, t) = x.dim();
    let n = self.n_fft / 2 + 1;

    let mut full = Array2::<Complex32>::zeros((n, t));
    let kept = f.min(n);
    full
      .slice_mut(ndarray::s![..kept, ..])
      .assign(&x.slice(ndarray::s![..kept, ..]));

    istft(full.view(), self.n_fft, self.hop_length)
  }
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;

  use super::*;

  #[test]
  fn window_is_periodic_hann() {
    let w = hann_window_periodic(8);
    assert_eq!(w[0], 0.0);
    assert_abs_diff_eq!(w[4], 1.0, epsilon = 1e-6);
    assert_abs_diff_eq!(w[2], w[6], epsilon = 1e-6);
  }

  #[test]
  fn reflect_folds_around_edges() {
    let idx: Vec<_> = (-5..9).map(|p| reflect(p, 4).unwrap()).collect();
    assert_eq!(idx, vec![1, 2, 3, 2, 1, 0, 1, 2, 3, 2, 1, 0, 1, 2]);
    assert_eq!(reflect(3, 0), None);
  }

  #[test]
  fn inverse_reconstructs_signal() {
    let n_fft = 64;
    let signal = Array1::from_shape_fn(640, |i| ((i as f32) * 0.07).sin() + 0.3 * ((i as f32) * 0.31).cos());
    let stft = Stft::new(n_fft, n_fft / 4, n_fft / 2 + 1);

    let bins = stft.apply(signal.view()).unwrap();
    assert_eq!(bins.dim(), (33, 640 / 16 + 1));

    let back = stft.inverse(bins.view()).unwrap();
    assert_eq!(back.len(), 640);
    for (a, b) in back.iter().zip(&signal) {
      assert_abs_diff_eq!(*a, *b, epsilon = 1e-3);
    }
  }

  #[test]
  fn truncated_bins_pad_back_with_zeros() {
    let stft = Stft::new(32, 8, 16);
    let signal = Array1::from_shape_fn(100, |i| (i as f32 * 0.2).sin());
    let bins = stft.apply(signal.view()).unwrap();
    assert_eq!(bins.nrows(), 16);
    assert_eq!(stft.inverse(bins.view()).unwrap().len(), 96);
  }
}
