//! Discovery of recognition episodes under a data root and the per-class
//! train/validation split.

use std::fs;
use std::path::{Path, PathBuf};

use log::{info, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use super::RecordError;

pub const RAW_DIR: &str = "原始回波";
pub const POINT_DIR: &str = "点迹";
pub const TRACK_DIR: &str = "航迹";

/// File set of one recognition episode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchFile {
    /// Track batch number.
    pub batch_num: u32,
    /// Target class as stored on disk (1-based).
    pub label: u32,
    pub raw_file: PathBuf,
    pub point_file: PathBuf,
    pub track_file: PathBuf,
}

impl BatchFile {
    /// Zero-based class index used for training, `None` for label 0.
    pub fn class_index(&self) -> Option<usize> {
        (self.label as usize).checked_sub(1)
    }
}

/// Parses `<batch>_Label_<label>.dat`.
pub fn parse_raw_name(name: &str) -> Option<(u32, u32)> {
    let stem = name.strip_suffix(".dat")?;
    let (batch, label) = stem.split_once("_Label_")?;
    let all_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    if !all_digits(batch) || !all_digits(label) {
        return None;
    }
    Some((batch.parse().ok()?, label.parse().ok()?))
}

fn sorted_names(dir: &Path) -> Result<Vec<String>, RecordError> {
    let entries = fs::read_dir(dir).map_err(|source| RecordError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    let mut names: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .collect();
    names.sort();
    Ok(names)
}

fn find_companion(names: &[String], prefix: &str) -> Option<String> {
    names
        .iter()
        .find(|name| name.starts_with(prefix) && name.ends_with(".txt"))
        .cloned()
}

/// Lists every episode under `root` that has a raw, point and track file.
pub fn discover_batch_files<P: AsRef<Path>>(root: P) -> Result<Vec<BatchFile>, RecordError> {
    let root = root.as_ref();
    let raw_dir = root.join(RAW_DIR);
    let point_dir = root.join(POINT_DIR);
    let track_dir = root.join(TRACK_DIR);
    if ![&raw_dir, &point_dir, &track_dir].iter().all(|d| d.is_dir()) {
        return Err(RecordError::MissingDirectories(root.to_path_buf()));
    }

    let point_names = sorted_names(&point_dir)?;
    let track_names = sorted_names(&track_dir)?;

    let mut batch_files = Vec::new();
    for raw_name in sorted_names(&raw_dir)? {
        let Some((batch_num, label)) = parse_raw_name(&raw_name) else {
            continue;
        };
        let point = find_companion(&point_names, &format!("PointTracks_{}_{}_", batch_num, label));
        let track = find_companion(&track_names, &format!("Tracks_{}_{}_", batch_num, label));
        match (point, track) {
            (Some(point), Some(track)) => batch_files.push(BatchFile {
                batch_num,
                label,
                raw_file: raw_dir.join(&raw_name),
                point_file: point_dir.join(point),
                track_file: track_dir.join(track),
            }),
            (point, track) => {
                let missing = match (point.is_none(), track.is_none()) {
                    (true, true) => "point and track files",
                    (true, false) => "point file",
                    _ => "track file",
                };
                warn!(
                    "batch {} label {}: {} not found, skipped",
                    batch_num, label, missing
                );
            }
        }
    }

    if batch_files.is_empty() {
        return Err(RecordError::NoBatchFiles(root.to_path_buf()));
    }
    info!("discovered {} episodes under {}", batch_files.len(), root.display());
    Ok(batch_files)
}

/// Splits episodes per class: `floor(n * (1 - val_ratio))` of each class go to
/// training, the remainder to validation. Labels outside `1..=num_classes` are dropped.
pub fn split_train_val(
    batch_files: Vec<BatchFile>,
    num_classes: usize,
    val_ratio: f64,
    shuffle: bool,
    seed: Option<u64>,
) -> (Vec<BatchFile>, Vec<BatchFile>) {
    let mut by_class: Vec<Vec<BatchFile>> = vec![Vec::new(); num_classes];
    for batch_file in batch_files {
        match batch_file.class_index() {
            Some(cls) if cls < num_classes => by_class[cls].push(batch_file),
            _ => {}
        }
    }

    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let mut train = Vec::new();
    let mut val = Vec::new();
    for mut files in by_class {
        if shuffle {
            files.shuffle(&mut rng);
        }
        let train_count = (files.len() as f64 * (1.0 - val_ratio)) as usize;
        let rest = files.split_off(train_count);
        train.extend(files);
        val.extend(rest);
    }
    (train, val)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(path: PathBuf) {
        fs::write(path, b"").unwrap();
    }

    fn layout() -> TempDir {
        let root = TempDir::new().unwrap();
        for dir in [RAW_DIR, POINT_DIR, TRACK_DIR] {
            fs::create_dir(root.path().join(dir)).unwrap();
        }
        root
    }

    #[test]
    fn raw_names_parse_only_canonical_form() {
        assert_eq!(parse_raw_name("12_Label_3.dat"), Some((12, 3)));
        assert_eq!(parse_raw_name("12_Label_3.txt"), None);
        assert_eq!(parse_raw_name("x12_Label_3.dat"), None);
        assert_eq!(parse_raw_name("12_Label_.dat"), None);
    }

    #[test]
    fn discovery_pairs_files_and_skips_incomplete_batches() {
        let root = layout();
        let p = root.path();
        touch(p.join(RAW_DIR).join("5_Label_2.dat"));
        touch(p.join(RAW_DIR).join("6_Label_1.dat"));
        touch(p.join(RAW_DIR).join("notes.txt"));
        touch(p.join(POINT_DIR).join("PointTracks_5_2_300.txt"));
        touch(p.join(TRACK_DIR).join("Tracks_5_2_300.txt"));
        touch(p.join(POINT_DIR).join("PointTracks_6_1_10.txt"));

        let files = discover_batch_files(p).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].batch_num, 5);
        assert_eq!(files[0].class_index(), Some(1));
        assert!(files[0].track_file.ends_with("Tracks_5_2_300.txt"));
    }

    #[test]
    fn discovery_requires_three_directories() {
        let root = TempDir::new().unwrap();
        fs::create_dir(root.path().join(RAW_DIR)).unwrap();
        assert!(matches!(
            discover_batch_files(root.path()),
            Err(RecordError::MissingDirectories(_))
        ));
    }

    #[test]
    fn empty_layout_is_an_error() {
        let root = layout();
        assert!(matches!(
            discover_batch_files(root.path()),
            Err(RecordError::NoBatchFiles(_))
        ));
    }

    #[test]
    fn split_is_stratified_and_drops_unknown_labels() {
        let make = |batch_num, label| BatchFile {
            batch_num,
            label,
            raw_file: PathBuf::new(),
            point_file: PathBuf::new(),
            track_file: PathBuf::new(),
        };
        let mut files = Vec::new();
        for i in 0..10 {
            files.push(make(i, 1));
        }
        for i in 10..15 {
            files.push(make(i, 2));
        }
        files.push(make(99, 7));
        files.push(make(98, 0));

        let (train, val) = split_train_val(files, 2, 0.2, true, Some(3));
        assert_eq!(train.len(), 8 + 4);
        assert_eq!(val.len(), 2 + 1);
        assert!(train.iter().chain(&val).all(|f| f.label == 1 || f.label == 2));
    }
}
