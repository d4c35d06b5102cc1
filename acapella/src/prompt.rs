use std::{
  io::{BufRead, Write},
  path::{Path, PathBuf},
};

use anyhow::Result;
use rand::Rng;

fn ask<R: BufRead, W: Write>(input: &mut R, output: &mut W, question: &str) -> Result<Option<String>> {
  write!(output, "{question} ")?;
  output.flush()?;

  let mut line = String::new();
  if input.read_line(&mut line)? == 0 {
    return Ok(None);
  }
  Ok(Some(line.trim().to_owned()))
}

/// Asks until a non-negative integer is entered. End of input counts as zero.
pub fn ask_more_epochs<R: BufRead, W: Write>(input: &mut R, output: &mut W) -> Result<usize> {
  loop {
    let Some(answer) = ask(input, output, "How many more epochs should we train for?")? else {
      return Ok(0);
    };

    match answer.parse() {
      Ok(epochs) => return Ok(epochs),
      Err(_) => tracing::warn!(input = %answer, "Oops, number parse failed. Try again, I guess?"),
    }
  }
}

/// Anything but an answer starting with `n` means yes.
pub fn ask_save<R: BufRead, W: Write>(input: &mut R, output: &mut W) -> Result<bool> {
  let answer = ask(input, output, "Should we save intermediate weights [y/n]?")?.unwrap_or_default();
  Ok(!answer.to_lowercase().starts_with('n'))
}

/// A fresh 16-digit file name with the extension of `weights`, never equal
/// to `weights` itself.
pub fn random_weights_path<R: Rng + ?Sized>(weights: &Path, rng: &mut R) -> PathBuf {
  let ext = weights.extension().and_then(|e| e.to_str()).unwrap_or("mpk");
  loop {
    let name: String = (0..16)
      .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
      .collect();
    let path = PathBuf::from(format!("{name}.{ext}"));
    if path != weights {
      return path;
    }
  }
}
