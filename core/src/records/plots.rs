//! Point (plot) and track text files.
//!
//! Both are delimited tables with an optional header row. Separators may be
//! commas, tabs or runs of spaces.

use std::fs;
use std::path::Path;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use super::RecordError;

pub const POINT_HEADER: [&str; 9] = [
    "点时间", "批号", "距离", "方位", "俯仰", "多普勒速度", "和幅度", "信噪比", "原始点数量",
];
pub const TRACK_HEADER: [&str; 10] = [
    "点时间", "批号", "滤波距离", "滤波方位", "滤波俯仰", "全速度", "X向速度", "Y向速度",
    "Z向速度", "航向",
];

pub const POINT_FEATURES: usize = 7;
pub const TRACK_FEATURES: usize = 8;
/// Width of the per-timestep vector fed to the track encoder.
pub const TIMESTEP_FEATURES: usize = POINT_FEATURES + TRACK_FEATURES;

/// One detection from a point file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointRecord {
    pub time: f64,
    pub batch: u32,
    pub range: f64,
    pub azimuth: f64,
    pub elevation: f64,
    pub doppler: f64,
    pub amplitude: f64,
    pub snr: f64,
    pub point_count: f64,
}

impl PointRecord {
    fn from_fields(fields: &[f64]) -> Self {
        Self {
            time: fields[0],
            batch: fields[1] as u32,
            range: fields[2],
            azimuth: fields[3],
            elevation: fields[4],
            doppler: fields[5],
            amplitude: fields[6],
            snr: fields[7],
            point_count: fields[8],
        }
    }

    pub fn features(&self) -> [f32; POINT_FEATURES] {
        [
            self.range,
            self.azimuth,
            self.elevation,
            self.doppler,
            self.amplitude,
            self.snr,
            self.point_count,
        ]
        .map(|v| v as f32)
    }

    pub fn to_line(&self) -> String {
        format!(
            "{},{},{},{},{},{},{},{},{}",
            self.time,
            self.batch,
            self.range,
            self.azimuth,
            self.elevation,
            self.doppler,
            self.amplitude,
            self.snr,
            self.point_count
        )
    }
}

/// One filtered state from a track file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackRecord {
    pub time: f64,
    pub batch: u32,
    pub range: f64,
    pub azimuth: f64,
    pub elevation: f64,
    pub speed: f64,
    pub vx: f64,
    pub vy: f64,
    pub vz: f64,
    pub heading: f64,
}

impl TrackRecord {
    fn from_fields(fields: &[f64]) -> Self {
        Self {
            time: fields[0],
            batch: fields[1] as u32,
            range: fields[2],
            azimuth: fields[3],
            elevation: fields[4],
            speed: fields[5],
            vx: fields[6],
            vy: fields[7],
            vz: fields[8],
            heading: fields[9],
        }
    }

    pub fn features(&self) -> [f32; TRACK_FEATURES] {
        [
            self.range,
            self.azimuth,
            self.elevation,
            self.speed,
            self.vx,
            self.vy,
            self.vz,
            self.heading,
        ]
        .map(|v| v as f32)
    }

    pub fn to_line(&self) -> String {
        format!(
            "{},{},{},{},{},{},{},{},{},{}",
            self.time,
            self.batch,
            self.range,
            self.azimuth,
            self.elevation,
            self.speed,
            self.vx,
            self.vy,
            self.vz,
            self.heading
        )
    }
}

fn parse_table(path: &Path, columns: usize) -> Result<Vec<Vec<f64>>, RecordError> {
    let text = fs::read_to_string(path).map_err(|source| RecordError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let mut rows = Vec::new();
    let mut seen_content = false;
    for (line_no, line) in text.lines().enumerate() {
        let fields: Vec<&str> = line
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|f| !f.is_empty())
            .collect();
        if fields.is_empty() {
            continue;
        }
        let parsed: Result<Vec<f64>, _> = fields.iter().map(|f| f.parse::<f64>()).collect();
        let is_first = !seen_content;
        seen_content = true;
        let values = match parsed {
            Ok(values) => values,
            // the first row may be a header
            Err(_) if is_first => continue,
            Err(err) => {
                return Err(RecordError::MalformedLine {
                    path: path.to_path_buf(),
                    line: line_no + 1,
                    reason: err.to_string(),
                })
            }
        };
        if values.len() < columns {
            return Err(RecordError::MalformedLine {
                path: path.to_path_buf(),
                line: line_no + 1,
                reason: format!("expected {} columns, found {}", columns, values.len()),
            });
        }
        rows.push(values);
    }
    Ok(rows)
}

pub fn read_points<P: AsRef<Path>>(path: P) -> Result<Vec<PointRecord>, RecordError> {
    let rows = parse_table(path.as_ref(), POINT_HEADER.len())?;
    Ok(rows.iter().map(|row| PointRecord::from_fields(row)).collect())
}

pub fn read_tracks<P: AsRef<Path>>(path: P) -> Result<Vec<TrackRecord>, RecordError> {
    let rows = parse_table(path.as_ref(), TRACK_HEADER.len())?;
    Ok(rows.iter().map(|row| TrackRecord::from_fields(row)).collect())
}

/// Pairs point and track rows by position into a `[len, TIMESTEP_FEATURES]` matrix,
/// where `len` is the shorter of the two.
pub fn timestep_features(points: &[PointRecord], tracks: &[TrackRecord]) -> Array2<f32> {
    let len = points.len().min(tracks.len());
    let mut out = Array2::zeros((len, TIMESTEP_FEATURES));
    for (i, (point, track)) in points.iter().zip(tracks).enumerate() {
        let mut row = out.row_mut(i);
        for (j, v) in point.features().into_iter().chain(track.features()).enumerate() {
            row[j] = v;
        }
    }
    out
}
