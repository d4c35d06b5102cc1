use std::{
  collections::BTreeMap,
  ops::Range,
  path::{Path, PathBuf},
};

use anyhow::{bail, Result};
use ndarray::{concatenate, s, Array2, Array4, ArrayView2, Axis};
use rand::{seq::SliceRandom, Rng};
use walkdir::WalkDir;

use crate::{
  chopper::{Chopper, Window},
  config::ChopStrategy,
  normalizer::Normalizer,
  Error,
};

const AUDIO_EXTENSIONS: [&str; 3] = ["wav", "flac", "mp3"];
const TARGET_MARKER: &str = "acapella";

/// A mixed song and its isolated acapella, both as spectrograms of the same
/// shape.
#[derive(Clone, Debug)]
pub struct Track {
  pub name: String,
  pub input: Array2<f32>,
  pub target: Array2<f32>,
}

impl Track {
  /// Trims both spectrograms to the shorter of the two, since decoded song
  /// and acapella files rarely end on the same frame.
  pub fn aligned(name: impl Into<String>, input: Array2<f32>, target: Array2<f32>) -> crate::Result<Self> {
    let name = name.into();
    let (rows, cols) = input.dim();
    let (target_rows, target_cols) = target.dim();

    if rows != target_rows {
      return Err(Error::PairMismatch(input.dim(), target.dim()));
    }

    let frames = cols.min(target_cols);
    if cols != target_cols {
      tracing::warn!(
        track = %name,
        song = cols,
        acapella = target_cols,
        "Song and acapella differ in length, trimming to the shorter one"
      );
    }

    Ok(Self {
      name,
      input: input.slice_move(s![.., ..frames]),
      target: target.slice_move(s![.., ..frames]),
    })
  }

  pub fn frames(&self) -> usize {
    self.input.ncols()
  }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrackPair {
  pub name: String,
  pub mix: PathBuf,
  pub acapella: PathBuf,
}

fn pairing_key(stem: &str) -> String {
  let lower = stem.to_lowercase();
  lower
    .replace(TARGET_MARKER, " ")
    .split(|c: char| c.is_whitespace() || "-_()[]".contains(c))
    .filter(|part| !part.is_empty())
    .collect::<Vec<_>>()
    .join(" ")
}

/// Finds song/acapella pairs in `dir`. A file is an acapella when its stem
/// contains the word `acapella`; its song is the file whose stem matches once
/// that word and the separators around it are removed. When several files
/// share a pairing name the last one by file name wins.
pub fn find_pairs(dir: impl AsRef<Path>) -> Result<Vec<TrackPair>> {
  let dir = dir.as_ref();
  if !dir.is_dir() {
    bail!("Data path {} is not a directory", dir.display());
  }

  let mut mixes = BTreeMap::new();
  let mut acapellas = BTreeMap::new();

  for entry in WalkDir::new(dir).max_depth(1).sort_by_file_name() {
    let entry = match entry {
      Ok(entry) => entry,
      Err(err) => {
        tracing::warn!(%err, "Failed to read data directory entry, skip...");
        continue;
      }
    };

    let path = entry.path();
    if !path.is_file() {
      continue;
    }

    let supported = path
      .extension()
      .and_then(|e| e.to_str())
      .is_some_and(|e| AUDIO_EXTENSIONS.contains(&e.to_lowercase().as_str()));
    if !supported {
      continue;
    }

    let Some(stem) = path.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
      continue;
    };

    let key = pairing_key(&stem);
    if stem.to_lowercase().contains(TARGET_MARKER) {
      if let Some(replaced) = acapellas.insert(key, path.to_path_buf()) {
        tracing::warn!(?replaced, kept = ?path, "Acapellas share a pairing name, skip...");
      }
    } else if let Some((_, replaced)) = mixes.insert(key, (stem, path.to_path_buf())) {
      tracing::warn!(?replaced, kept = ?path, "Songs share a pairing name, skip...");
    }
  }

  let mut pairs = Vec::with_capacity(acapellas.len());
  for (key, acapella) in acapellas {
    match mixes.remove(&key) {
      Some((name, mix)) => pairs.push(TrackPair {
        name,
        mix,
        acapella,
      }),
      None => tracing::warn!(?acapella, "No song found for acapella, skip..."),
    }
  }

  for (_, (_, mix)) in mixes {
    tracing::warn!(?mix, "No acapella found for song, skip...");
  }

  tracing::info!("Found {} song/acapella pairs", pairs.len());
  Ok(pairs)
}

/// Shuffles tracks and splits them into `(train, validation)` with
/// `train_fraction` of the tracks used for training.
pub fn split_tracks<R: Rng + ?Sized>(
  mut tracks: Vec<Track>,
  train_fraction: f64,
  rng: &mut R,
) -> (Vec<Track>, Vec<Track>) {
  tracks.shuffle(rng);

  let total = tracks.len();
  let split_at = ((total as f64) * train_fraction).round() as usize;
  let valid = tracks.split_off(split_at.min(total));

  tracing::info!(
    train = tracks.len(),
    validation = valid.len(),
    "Split tracks"
  );

  (tracks, valid)
}

/// Frame ranges that each track occupies once all tracks are laid end to end.
#[derive(Clone, Debug)]
pub struct TrackBoundaries {
  ranges: Vec<Range<usize>>,
}

impl TrackBoundaries {
  pub fn new(lengths: impl IntoIterator<Item = usize>) -> Self {
    let mut start = 0;
    let ranges = lengths
      .into_iter()
      .map(|len| {
        let range = start..start + len;
        start += len;
        range
      })
      .collect();
    Self { ranges }
  }

  pub fn ranges(&self) -> &[Range<usize>] {
    &self.ranges
  }

  pub fn total(&self) -> usize {
    self.ranges.last().map_or(0, |r| r.end)
  }

  pub fn track_of(&self, frame: usize) -> Option<usize> {
    self.ranges.iter().position(|r| r.contains(&frame))
  }

  /// Whether the frames `span` all come from a single track.
  pub fn contains(&self, span: &Range<usize>) -> bool {
    span.is_empty()
      || self
        .ranges
        .iter()
        .any(|r| r.start <= span.start && span.end <= r.end)
  }

  /// Contiguous windows of `width` frames advancing by `step`, restarted at
  /// every track so that no window mixes frames of two recordings. Frames
  /// near a junction that cannot fill a window are dropped.
  pub fn spans(&self, width: usize, step: usize) -> Vec<Range<usize>> {
    if width == 0 || step == 0 {
      return Vec::new();
    }

    self
      .ranges
      .iter()
      .flat_map(|r| {
        (r.start..r.end)
          .step_by(step)
          .take_while(move |&t| t + width <= r.end)
          .map(move |t| t..t + width)
      })
      .collect()
  }
}

/// All training tracks concatenated along time, with the junctions kept.
#[derive(Clone, Debug)]
pub struct Corpus {
  pub input: Array2<f32>,
  pub target: Array2<f32>,
  pub boundaries: TrackBoundaries,
}

impl Corpus {
  pub fn concatenate(tracks: &[Track]) -> crate::Result<Self> {
    let Some(first) = tracks.first() else {
      return Err(Error::EmptyCorpus);
    };

    let rows = first.input.nrows();
    if let Some(other) = tracks.iter().find(|t| t.input.nrows() != rows) {
      return Err(Error::ShapeMismatch {
        expected: (rows, other.frames()),
        actual: other.input.dim(),
      });
    }

    let inputs: Vec<_> = tracks.iter().map(|t| t.input.view()).collect();
    let targets: Vec<_> = tracks.iter().map(|t| t.target.view()).collect();

    Ok(Self {
      input: concatenate(Axis(1), &inputs)?,
      target: concatenate(Axis(1), &targets)?,
      boundaries: TrackBoundaries::new(tracks.iter().map(Track::frames)),
    })
  }

  pub fn len(&self) -> usize {
    self.boundaries.ranges().len()
  }

  pub fn is_empty(&self) -> bool {
    self.boundaries.ranges().is_empty()
  }

  pub fn track(&self, index: usize) -> (ArrayView2<f32>, ArrayView2<f32>) {
    let range = self.boundaries.ranges()[index].clone();
    (
      self.input.slice(s![.., range.clone()]),
      self.target.slice(s![.., range]),
    )
  }

  /// Cuts every track with `chopper` and returns the windows per track, in
  /// corpus coordinates. A window with a shape other than `tile` is an error.
  pub fn chop<R: Rng + ?Sized>(
    &self,
    chopper: &Chopper,
    tile: (usize, usize),
    rng: &mut R,
  ) -> crate::Result<Vec<Vec<Window>>> {
    let rows = self.input.nrows();
    let mut per_track = Vec::with_capacity(self.len());

    for range in self.boundaries.ranges() {
      let windows = match chopper.windows((rows, range.len()), rng) {
        Ok(windows) => windows,
        Err(Error::TooSmall { shape, .. }) => {
          tracing::warn!(?shape, "Track is shorter than one slice, skip...");
          per_track.push(Vec::new());
          continue;
        }
        Err(err) => return Err(err),
      };

      let mut track = Vec::new();
      for window in windows {
        if window.dim() != tile {
          return Err(Error::ShapeMismatch {
            expected: tile,
            actual: window.dim(),
          });
        }

        let window = window.shifted(range.start);
        debug_assert!(self.boundaries.contains(&(window.time..window.time_end())));
        track.push(window);
      }
      per_track.push(track);
    }

    Ok(per_track)
  }
}

/// Held-out slices fixed once at the start of training, shaped
/// `(n, height, width, 1)`.
pub struct ValidationSet {
  pub features: Array4<f32>,
  pub labels: Array4<f32>,
}

impl ValidationSet {
  pub fn from_tracks<R: Rng + ?Sized>(
    tracks: &[Track],
    chopper: &Chopper,
    normalizer: &Normalizer,
    tile: (usize, usize),
    rng: &mut R,
  ) -> crate::Result<Self> {
    let chopper = chopper.with_strategy(ChopStrategy::Tile);

    let mut pairs = Vec::new();
    for track in tracks {
      for (x, y) in chopper.chop_pair(track.input.view(), track.target.view(), rng)? {
        if x.dim() != tile {
          return Err(Error::ShapeMismatch {
            expected: tile,
            actual: x.dim(),
          });
        }
        let pair = normalizer.normalize_pair(x, y);
        pairs.push((pair.input, pair.target));
      }
    }

    let (height, width) = tile;
    let mut features = Array4::zeros((pairs.len(), height, width, 1));
    let mut labels = Array4::zeros((pairs.len(), height, width, 1));
    for (i, (x, y)) in pairs.iter().enumerate() {
      features.slice_mut(s![i, .., .., 0]).assign(x);
      labels.slice_mut(s![i, .., .., 0]).assign(y);
    }

    tracing::info!(slices = pairs.len(), "Prepared validation data");
    Ok(Self { features, labels })
  }

  pub fn len(&self) -> usize {
    self.features.len_of(Axis(0))
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

#[cfg(test)]
mod tests {
  use std::fs;

  use rand::{rngs::StdRng, SeedableRng};
  use tempfile::TempDir;

  use super::*;
  use crate::config::{NormalizeStrategy, TileShape};

  fn track(name: &str, value: f32, frames: usize) -> Track {
    let input = Array2::from_elem((4, frames), value);
    Track::aligned(name, input.clone(), input * 0.5).unwrap()
  }

  #[test]
  fn aligned_trims_to_shorter_side() {
    let track = Track::aligned("a", Array2::zeros((4, 10)), Array2::zeros((4, 7))).unwrap();
    assert_eq!(track.input.dim(), (4, 7));
    assert_eq!(track.target.dim(), (4, 7));

    let err = Track::aligned("b", Array2::zeros((4, 10)), Array2::zeros((3, 10))).unwrap_err();
    assert!(matches!(err, Error::PairMismatch(..)));
  }

  #[test]
  fn spans_never_straddle_tracks() {
    for (a, b) in [(10, 10), (7, 13), (16, 4), (3, 30), (0, 9)] {
      let boundaries = TrackBoundaries::new([a, b]);
      for width in 1..=8 {
        for step in 1..=4 {
          for span in boundaries.spans(width, step) {
            let first = boundaries.track_of(span.start);
            let last = boundaries.track_of(span.end - 1);
            assert_eq!(first, last, "span {span:?} crosses the junction at {a}");
            assert!(boundaries.contains(&span));
          }
        }
      }
    }
  }

  #[test]
  fn spans_drop_frames_at_junction() {
    let boundaries = TrackBoundaries::new([10, 10]);
    assert_eq!(boundaries.spans(4, 4), vec![0..4, 4..8, 10..14, 14..18]);
    assert!(!boundaries.contains(&(8..12)));
  }

  #[test]
  fn corpus_windows_stay_inside_their_track() {
    let tracks = vec![track("a", 1.0, 37), track("b", 2.0, 5), track("c", 3.0, 20)];
    let corpus = Corpus::concatenate(&tracks).unwrap();
    assert_eq!(corpus.input.dim(), (4, 62));

    let chopper = Chopper::new(ChopStrategy::Tile, TileShape::new(4, 8), 4);
    let mut rng = StdRng::seed_from_u64(0);
    let windows = corpus.chop(&chopper, (4, 8), &mut rng).unwrap();

    assert_eq!(windows.iter().map(Vec::len).collect::<Vec<_>>(), vec![4, 0, 2]);
    for (t, track_windows) in windows.iter().enumerate() {
      for w in track_windows {
        let tile = w.cut(corpus.input.view()).unwrap();
        assert!(tile.iter().all(|&v| v == tracks[t].input[[0, 0]]));
      }
    }
  }

  #[test]
  fn corpus_rejects_mismatched_tiles() {
    let corpus = Corpus::concatenate(&[track("a", 1.0, 40)]).unwrap();
    let chopper = Chopper::new(ChopStrategy::RandomFull { slices: 2 }, TileShape::new(2, 8), 4);
    let mut rng = StdRng::seed_from_u64(0);
    let err = corpus.chop(&chopper, (2, 8), &mut rng).unwrap_err();
    assert!(matches!(err, Error::ShapeMismatch { .. }));
  }

  #[test]
  fn split_keeps_every_track() {
    let tracks: Vec<_> = (0..10).map(|i| track(&i.to_string(), i as f32, 8)).collect();
    let mut rng = StdRng::seed_from_u64(9);
    let (train, valid) = split_tracks(tracks, 0.8, &mut rng);
    assert_eq!(train.len(), 8);
    assert_eq!(valid.len(), 2);
  }

  #[test]
  fn validation_set_is_normalized_and_stacked() {
    let tracks = vec![track("a", 4.0, 17)];
    let chopper = Chopper::new(ChopStrategy::Random { slices: 5 }, TileShape::new(4, 8), 4);
    let normalizer = Normalizer::new(NormalizeStrategy::Max);
    let mut rng = StdRng::seed_from_u64(0);
    let valid = ValidationSet::from_tracks(&tracks, &chopper, &normalizer, (4, 8), &mut rng).unwrap();

    assert_eq!(valid.features.dim(), (2, 4, 8, 1));
    assert!(valid.features.iter().all(|&v| v == 1.0));
    assert!(valid.labels.iter().all(|&v| v == 0.5));
  }

  #[test]
  fn pairs_are_matched_by_name() {
    let dir = TempDir::new().unwrap();
    for name in [
      "Artist - Song.wav",
      "Artist - Song (Acapella).wav",
      "other_acapella.flac",
      "other.mp3",
      "lonely.wav",
      "notes.txt",
    ] {
      fs::write(dir.path().join(name), b"").unwrap();
    }

    let pairs = find_pairs(dir.path()).unwrap();
    assert_eq!(pairs.len(), 2);
    assert_eq!(pairs[0].name, "Artist - Song");
    assert!(pairs[0].acapella.ends_with("Artist - Song (Acapella).wav"));
    assert_eq!(pairs[1].name, "other");
    assert!(pairs[1].mix.ends_with("other.mp3"));
  }

  #[test]
  fn colliding_song_names_keep_one_pair() {
    let dir = TempDir::new().unwrap();
    for name in ["A - B.wav", "A_B.wav", "A_B acapella.wav"] {
      fs::write(dir.path().join(name), b"").unwrap();
    }

    let pairs = find_pairs(dir.path()).unwrap();
    assert_eq!(pairs.len(), 1);
    assert!(pairs[0].mix.ends_with("A_B.wav"));
    assert!(pairs[0].acapella.ends_with("A_B acapella.wav"));
  }
}
