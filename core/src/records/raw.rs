//! Codec for raw echo files: a stream of little-endian frames, each carrying
//! scan parameters, per-target track info and a `31 x prt_num` block of I/Q.

use std::fs;
use std::path::Path;

use log::warn;
use ndarray::Array2;
use num_complex::Complex32;
use serde::{Deserialize, Serialize};

use super::RecordError;

pub const FRAME_HEAD: u32 = 0xFA55_FA55;
pub const FRAME_END: u32 = 0x55FA_55FA;
/// Range cells per frame; the target sits in the middle one.
pub const RANGE_BINS: usize = 31;

const MAX_FRAME_BYTES: usize = 1_000_000;
const MAX_POINTS: usize = 1000;
const MAX_PRT_NUM: usize = 10_000;
const PRT_UNIT_S: f64 = 0.0125e-6;

/// Scan parameters decoded from a frame header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameParameters {
    /// Electronic scan azimuth in degrees.
    pub e_scan_az: f64,
    /// Four words per associated point: id, spare, global range bin, doppler unit.
    pub track_info: Vec<u32>,
    /// Carrier frequency in Hz.
    pub freq: f64,
    pub cpi_count: u32,
    /// Pulses per CPI.
    pub prt_num: usize,
    /// Pulse repetition time in seconds.
    pub prt: f64,
    pub data_length: u32,
}

impl FrameParameters {
    /// Global range bin of the first associated point.
    pub fn range_bin(&self) -> Option<u32> {
        self.track_info.get(2).copied()
    }

    /// Doppler unit (1-based, unshifted) of the first associated point.
    pub fn doppler_unit(&self) -> Option<u32> {
        self.track_info.get(3).copied()
    }

    pub fn has_track(&self) -> bool {
        self.track_info.len() >= 4
    }
}

/// One decoded frame; `samples` is laid out `[RANGE_BINS, prt_num]`.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub offset: usize,
    pub params: FrameParameters,
    pub samples: Array2<Complex32>,
}

/// Iterates over the frames of an in-memory raw echo file.
///
/// Bytes between frames are skipped by scanning for the next head whose tail
/// marker lines up. A frame with consistent markers but unusable content is
/// yielded as an error and reading resumes after it.
pub struct RawFrameReader {
    data: Vec<u8>,
    cursor: usize,
}

impl RawFrameReader {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data, cursor: 0 }
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, RecordError> {
        let path = path.as_ref();
        let data = fs::read(path).map_err(|source| RecordError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::new(data))
    }

    fn word(&self, offset: usize) -> Option<u32> {
        let bytes = self.data.get(offset..offset + 4)?;
        Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Locates the next well-framed frame, returning `(offset, byte_len)`.
    fn sync(&mut self) -> Option<(usize, usize)> {
        while self.cursor + 8 <= self.data.len() {
            let offset = self.cursor;
            if self.word(offset) != Some(FRAME_HEAD) {
                self.cursor += 1;
                continue;
            }
            let byte_len = self.word(offset + 4)? as usize * 4;
            let tail_ok = byte_len >= 12
                && byte_len <= MAX_FRAME_BYTES
                && self.word(offset + byte_len - 4) == Some(FRAME_END);
            if tail_ok {
                self.cursor = offset + byte_len;
                return Some((offset, byte_len));
            }
            self.cursor += 1;
        }
        None
    }

    fn decode(&self, offset: usize, byte_len: usize) -> Result<RawFrame, RecordError> {
        let invalid = |reason: String| RecordError::InvalidFrame { offset, reason };
        let end = offset + byte_len - 4;
        let mut words = WordCursor {
            reader: self,
            pos: offset + 8,
            end,
        };

        let e_scan_az = words.next().ok_or_else(|| invalid("missing azimuth".into()))? as f64 * 0.01;
        let point_num = words
            .next()
            .ok_or_else(|| invalid("missing point count".into()))? as usize;
        if point_num > MAX_POINTS {
            return Err(invalid(format!("point count {} out of range", point_num)));
        }

        let mut track_info = Vec::with_capacity(point_num * 4);
        for _ in 0..point_num * 4 {
            track_info.push(words.next().ok_or_else(|| invalid("truncated track info".into()))?);
        }
        let mut param = || words.next().ok_or_else(|| invalid("truncated parameters".into()));
        let freq = param()? as f64 * 1e6;
        let cpi_count = param()?;
        let prt_num = param()? as usize;
        let prt = param()? as f64 * PRT_UNIT_S;
        let data_length = param()?;

        if prt_num == 0 || prt_num > MAX_PRT_NUM {
            return Err(invalid(format!("prt_num {} out of range", prt_num)));
        }
        if prt <= 0.0 || prt > 1.0 {
            return Err(invalid(format!("prt {} out of range", prt)));
        }
        if freq <= 0.0 || freq > 1e12 {
            return Err(invalid(format!("frequency {} out of range", freq)));
        }

        let iq_words = prt_num * RANGE_BINS * 2;
        let available = (end - words.pos) / 4;
        if available < iq_words {
            return Err(invalid(format!(
                "expected {} I/Q words, found {}",
                iq_words, available
            )));
        }

        let mut values = Vec::with_capacity(prt_num * RANGE_BINS);
        for _ in 0..prt_num * RANGE_BINS {
            let re = f32::from_bits(words.next().unwrap_or_default());
            let im = f32::from_bits(words.next().unwrap_or_default());
            values.push(Complex32::new(re, im));
        }
        let samples = Array2::from_shape_vec((RANGE_BINS, prt_num), values)
            .map_err(|err| invalid(err.to_string()))?;

        Ok(RawFrame {
            offset,
            params: FrameParameters {
                e_scan_az,
                track_info,
                freq,
                cpi_count,
                prt_num,
                prt,
                data_length,
            },
            samples,
        })
    }
}

impl Iterator for RawFrameReader {
    type Item = Result<RawFrame, RecordError>;

    fn next(&mut self) -> Option<Self::Item> {
        let (offset, byte_len) = self.sync()?;
        let frame = self.decode(offset, byte_len);
        if let Err(err) = &frame {
            warn!("skipping raw frame: {}", err);
        }
        Some(frame)
    }
}

struct WordCursor<'a> {
    reader: &'a RawFrameReader,
    pos: usize,
    end: usize,
}

impl WordCursor<'_> {
    fn next(&mut self) -> Option<u32> {
        if self.pos + 4 > self.end {
            return None;
        }
        let value = self.reader.word(self.pos);
        self.pos += 4;
        value
    }
}

/// Serialises one frame in the on-disk layout read by [`RawFrameReader`].
pub fn encode_frame(params: &FrameParameters, samples: &Array2<Complex32>) -> Vec<u8> {
    let point_num = params.track_info.len() / 4;
    let iq = samples.len() * 2;
    let total_words = 4 + point_num * 4 + 5 + iq + 1;

    let mut words: Vec<u32> = Vec::with_capacity(total_words);
    words.push(FRAME_HEAD);
    words.push(total_words as u32);
    words.push((params.e_scan_az * 100.0).round() as u32);
    words.push(point_num as u32);
    words.extend_from_slice(&params.track_info[..point_num * 4]);
    words.push((params.freq / 1e6).round() as u32);
    words.push(params.cpi_count);
    words.push(params.prt_num as u32);
    words.push((params.prt / PRT_UNIT_S).round() as u32);
    words.push(params.data_length);
    for value in samples.iter() {
        words.push(value.re.to_bits());
        words.push(value.im.to_bits());
    }
    words.push(FRAME_END);

    words.iter().flat_map(|w| w.to_le_bytes()).collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn sample_params(prt_num: usize) -> FrameParameters {
        FrameParameters {
            e_scan_az: 1250.0 * 0.01,
            track_info: vec![7, 0, 400, 3],
            freq: 9_500.0 * 1e6,
            cpi_count: 42,
            prt_num,
            prt: 8000.0 * PRT_UNIT_S,
            data_length: 31,
        }
    }

    fn ramp(prt_num: usize) -> Array2<Complex32> {
        Array2::from_shape_fn((RANGE_BINS, prt_num), |(r, p)| {
            Complex32::new(r as f32, p as f32 * 0.5)
        })
    }

    #[test]
    fn encoded_frame_decodes_back() {
        let params = sample_params(8);
        let samples = ramp(8);
        let bytes = encode_frame(&params, &samples);

        let frames: Vec<_> = RawFrameReader::new(bytes).collect();
        assert_eq!(frames.len(), 1);
        let frame = frames[0].as_ref().unwrap();
        assert_eq!(frame.params, params);
        assert_eq!(frame.samples, samples);
    }

    #[test]
    fn reader_resynchronises_after_junk() {
        let params = sample_params(4);
        let mut bytes = vec![0x13, 0x55, 0xFA, 0x55, 0xFA, 0x00, 0x01];
        bytes.extend(encode_frame(&params, &ramp(4)));
        bytes.extend([0xAA; 5]);
        bytes.extend(encode_frame(&params, &ramp(4)));

        let frames: Vec<_> = RawFrameReader::new(bytes).collect();
        assert_eq!(frames.len(), 2);
        assert!(frames.iter().all(|f| f.is_ok()));
        assert_eq!(frames[0].as_ref().unwrap().offset, 7);
    }

    #[test]
    fn out_of_range_parameters_are_reported_and_skipped() {
        let mut bad = sample_params(4);
        bad.prt = 0.0;
        let mut bytes = encode_frame(&bad, &ramp(4));
        bytes.extend(encode_frame(&sample_params(4), &ramp(4)));

        let frames: Vec<_> = RawFrameReader::new(bytes).collect();
        assert_eq!(frames.len(), 2);
        assert!(matches!(
            frames[0],
            Err(RecordError::InvalidFrame { offset: 0, .. })
        ));
        assert!(frames[1].is_ok());
    }

    #[test]
    fn truncated_file_yields_no_frames() {
        let mut bytes = encode_frame(&sample_params(4), &ramp(4));
        bytes.truncate(bytes.len() - 10);
        assert_eq!(RawFrameReader::new(bytes).count(), 0);
    }
}
