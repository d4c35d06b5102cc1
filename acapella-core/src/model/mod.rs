mod learner;

use burn::{
  config::Config,
  module::Module,
  nn::{
    conv::{Conv2d, Conv2dConfig},
    pool::{MaxPool2d, MaxPool2dConfig},
    PaddingConfig2d,
  },
  tensor::{
    activation::relu,
    backend::Backend,
    module::interpolate,
    ops::{InterpolateMode, InterpolateOptions},
    Tensor,
  },
};

pub use learner::{adam, weights_file, BurnLearner, Learner, Predict, Train};

/// How much the network shrinks its input at the bottleneck. Inputs must be
/// a multiple of this on both axes.
pub const PEAK_DOWNSCALE_FACTOR: usize = 4;

#[derive(Debug, Module)]
pub struct ConvBlock<B: Backend> {
  conv1: Conv2d<B>,
  conv2: Conv2d<B>,
}

impl<B: Backend> ConvBlock<B> {
  pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
    let x = relu(self.conv1.forward(x));
    relu(self.conv2.forward(x))
  }
}

#[derive(Config)]
pub struct ConvBlockConfig {
  nin: usize,
  nout: usize,
  #[config(default = 3)]
  ksize: usize,
}

impl ConvBlockConfig {
  pub fn init<B: Backend>(&self, device: &B::Device) -> ConvBlock<B> {
    ConvBlock {
      conv1: Conv2dConfig::new([self.nin, self.nout], [self.ksize, self.ksize])
        .with_padding(PaddingConfig2d::Same)
        .init(device),
      conv2: Conv2dConfig::new([self.nout, self.nout], [self.ksize, self.ksize])
        .with_padding(PaddingConfig2d::Same)
        .init(device),
    }
  }
}

fn upsample<B: Backend>(x: Tensor<B, 4>) -> Tensor<B, 4> {
  let [_, _, h, w] = x.dims();
  interpolate(
    x,
    [h * 2, w * 2],
    InterpolateOptions::new(InterpolateMode::Nearest),
  )
}

/// Encoder/decoder over a single-channel spectrogram tile, `[n, 1, h, w]` in
/// and out.
#[derive(Debug, Module)]
pub struct AcapellaNet<B: Backend> {
  enc1: ConvBlock<B>,
  enc2: ConvBlock<B>,
  bottleneck: ConvBlock<B>,
  dec2: ConvBlock<B>,
  dec1: ConvBlock<B>,
  pool: MaxPool2d,
  out: Conv2d<B>,
}

impl<B: Backend> AcapellaNet<B> {
  pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
    let e1 = self.enc1.forward(x);
    let e2 = self.enc2.forward(self.pool.forward(e1.clone()));
    let h = self.bottleneck.forward(self.pool.forward(e2.clone()));

    let h = self.dec2.forward(Tensor::cat(vec![upsample(h), e2], 1));
    let h = self.dec1.forward(Tensor::cat(vec![upsample(h), e1], 1));

    relu(self.out.forward(h))
  }
}

#[derive(Config)]
pub struct AcapellaNetConfig {
  #[config(default = 16)]
  ch: usize,
}

impl AcapellaNetConfig {
  pub fn init<B: Backend>(&self, device: &B::Device) -> AcapellaNet<B> {
    let ch = self.ch;

    AcapellaNet {
      enc1: ConvBlockConfig::new(1, ch).init(device),
      enc2: ConvBlockConfig::new(ch, ch * 2).init(device),
      bottleneck: ConvBlockConfig::new(ch * 2, ch * 4).init(device),
      dec2: ConvBlockConfig::new(ch * (4 + 2), ch * 2).init(device),
      dec1: ConvBlockConfig::new(ch * (2 + 1), ch).init(device),
      pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
      out: Conv2dConfig::new([ch, 1], [1, 1]).init(device),
    }
  }
}
