use anyhow::Context;
use ndarray::Array2;
use num_complex::Complex32;
use rand::{rngs::StdRng, Rng, SeedableRng};
use rtrcore::records::batch::{POINT_DIR, RAW_DIR, TRACK_DIR};
use rtrcore::records::plots::{POINT_HEADER, TRACK_HEADER};
use rtrcore::records::raw::RANGE_BINS;
use rtrcore::records::{encode_frame, FrameParameters, PointRecord, TrackRecord};
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;
use std::fs;
use std::path::Path;

/// Configuration for generating a synthetic data root.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticProfile {
    pub num_classes: usize,
    pub episodes_per_class: usize,
    /// Raw frames per episode.
    pub frames: usize,
    /// Point/track rows per episode.
    pub steps: usize,
    pub prt_num: usize,
    pub noise: f32,
    pub seed: u64,
}

impl Default for SyntheticProfile {
    fn default() -> Self {
        Self {
            num_classes: 6,
            episodes_per_class: 4,
            frames: 12,
            steps: 20,
            prt_num: 32,
            noise: 0.05,
            seed: 0,
        }
    }
}

const CARRIER_HZ: f64 = 9.5e9;
const PRT_S: f64 = 1e-4;
const TARGET_BIN: usize = 15;

impl SyntheticProfile {
    /// Unshifted Doppler bin of a class; clears the zero-velocity notch and
    /// stays inside the kept velocity band.
    fn class_tone(&self, class: usize) -> usize {
        let half = self.prt_num / 2;
        3 + class % half.saturating_sub(7).max(1)
    }
}

fn build_frame(
    profile: &SyntheticProfile,
    tone: usize,
    cpi_count: u32,
    rng: &mut StdRng,
) -> (FrameParameters, Array2<Complex32>) {
    let prt_num = profile.prt_num;
    let samples = Array2::from_shape_fn((RANGE_BINS, prt_num), |(r, p)| {
        let phase = 2.0 * PI * tone as f32 * p as f32 / prt_num as f32;
        let amp = if r == TARGET_BIN { 10.0 } else { 0.0 };
        let jitter = Complex32::new(
            rng.gen_range(-profile.noise..=profile.noise),
            rng.gen_range(-profile.noise..=profile.noise),
        );
        Complex32::new(amp * phase.cos(), amp * phase.sin()) + jitter
    });
    let params = FrameParameters {
        e_scan_az: 0.0,
        track_info: vec![1, 0, 400, (tone + 1) as u32],
        freq: CARRIER_HZ,
        cpi_count,
        prt_num,
        prt: PRT_S,
        data_length: RANGE_BINS as u32,
    };
    (params, samples)
}

fn write_episode(
    profile: &SyntheticProfile,
    root: &Path,
    batch_num: u32,
    class: usize,
    rng: &mut StdRng,
) -> anyhow::Result<()> {
    let label = class as u32 + 1;
    let tone = profile.class_tone(class);

    let mut raw = Vec::new();
    for frame in 0..profile.frames {
        let (params, samples) = build_frame(profile, tone, frame as u32, rng);
        raw.extend(encode_frame(&params, &samples));
    }
    let raw_path = root
        .join(RAW_DIR)
        .join(format!("{}_Label_{}.dat", batch_num, label));
    fs::write(&raw_path, raw).with_context(|| format!("writing {}", raw_path.display()))?;

    let speed = 5.0 + 8.0 * class as f64;
    let heading = 30.0 * class as f64;
    let start_range = rng.gen_range(1_000.0..5_000.0);
    let mut points = vec![POINT_HEADER.join(",")];
    let mut tracks = vec![TRACK_HEADER.join(",")];
    for step in 0..profile.steps {
        let time = step as f64;
        let range = start_range + speed * time;
        let jitter: f64 = rng.gen_range(-1.0..1.0);
        points.push(
            PointRecord {
                time,
                batch: batch_num,
                range: range + jitter,
                azimuth: 10.0 + 0.1 * class as f64,
                elevation: 2.0,
                doppler: -speed,
                amplitude: 500.0 + 50.0 * class as f64,
                snr: 12.0 + jitter,
                point_count: 1.0 + (class % 3) as f64,
            }
            .to_line(),
        );
        tracks.push(
            TrackRecord {
                time,
                batch: batch_num,
                range,
                azimuth: 10.0 + 0.1 * class as f64,
                elevation: 2.0,
                speed,
                vx: speed * heading.to_radians().cos(),
                vy: speed * heading.to_radians().sin(),
                vz: 0.0,
                heading,
            }
            .to_line(),
        );
    }

    let point_path = root.join(POINT_DIR).join(format!(
        "PointTracks_{}_{}_{}.txt",
        batch_num, label, profile.steps
    ));
    let track_path = root.join(TRACK_DIR).join(format!(
        "Tracks_{}_{}_{}.txt",
        batch_num, label, profile.steps
    ));
    fs::write(&point_path, points.join("\n"))
        .with_context(|| format!("writing {}", point_path.display()))?;
    fs::write(&track_path, tracks.join("\n"))
        .with_context(|| format!("writing {}", track_path.display()))?;
    Ok(())
}

/// Writes a complete data root and returns the number of episodes written.
pub fn write_data_root(profile: &SyntheticProfile, root: &Path) -> anyhow::Result<usize> {
    for dir in [RAW_DIR, POINT_DIR, TRACK_DIR] {
        let path = root.join(dir);
        fs::create_dir_all(&path).with_context(|| format!("creating {}", path.display()))?;
    }

    let mut rng = StdRng::seed_from_u64(profile.seed);
    let mut batch_num = 1;
    for class in 0..profile.num_classes {
        for _ in 0..profile.episodes_per_class {
            write_episode(profile, root, batch_num, class, &mut rng)?;
            batch_num += 1;
        }
    }
    Ok(profile.num_classes * profile.episodes_per_class)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rtrcore::records::{discover_batch_files, read_tracks, RawFrameReader};
    use tempfile::TempDir;

    #[test]
    fn generator_writes_discoverable_episodes() {
        let root = TempDir::new().unwrap();
        let profile = SyntheticProfile {
            num_classes: 3,
            episodes_per_class: 2,
            frames: 4,
            steps: 6,
            ..SyntheticProfile::default()
        };
        assert_eq!(write_data_root(&profile, root.path()).unwrap(), 6);

        let files = discover_batch_files(root.path()).unwrap();
        assert_eq!(files.len(), 6);
        let labels: Vec<u32> = files.iter().map(|f| f.label).collect();
        assert_eq!(labels.iter().filter(|&&l| l == 3).count(), 2);

        let frames: Vec<_> = RawFrameReader::open(&files[0].raw_file)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(frames.len(), 4);
        assert_eq!(frames[0].params.prt_num, 32);
        assert_eq!(read_tracks(&files[0].track_file).unwrap().len(), 6);
    }

    #[test]
    fn classes_get_distinct_tones() {
        let profile = SyntheticProfile::default();
        let tones: Vec<usize> = (0..profile.num_classes).map(|c| profile.class_tone(c)).collect();
        let mut unique = tones.clone();
        unique.dedup();
        assert_eq!(unique.len(), tones.len());
        assert!(tones.iter().all(|&t| t < profile.prt_num / 2));
    }

    #[test]
    fn same_seed_reproduces_files() {
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        let profile = SyntheticProfile {
            num_classes: 1,
            episodes_per_class: 1,
            frames: 2,
            steps: 3,
            ..SyntheticProfile::default()
        };
        write_data_root(&profile, a.path()).unwrap();
        write_data_root(&profile, b.path()).unwrap();
        let name = format!("{}/1_Label_1.dat", RAW_DIR);
        assert_eq!(
            fs::read(a.path().join(&name)).unwrap(),
            fs::read(b.path().join(&name)).unwrap()
        );
    }
}
