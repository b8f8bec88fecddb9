//! Binary packet published for every processed frame that carries markers.
//!
//! Layout, in host byte order:
//!
//! | offset        | size | field                                         |
//! |---------------|------|-----------------------------------------------|
//! | 0             | 8    | `count` (i64)                                 |
//! | 8 + 32*i      | 32   | marker `i`: id (i64), position, orientation   |
//! | 8 + 32*count  | 8    | `time_elapsed` (f64, seconds)                 |
//! | 16 + 32*count | 8    | `timestamp` (f64, seconds)                    |
//!
//! Position and orientation are three `f32` each.
//!
//! A packet is therefore `24 + 32*count` bytes: 24 for an empty frame, 56 for
//! a single marker. There is no version field and no framing beyond the
//! leading count; one packet occupies one datagram. The encoder and the decoder must run on
//! hosts with the same native byte order.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Size of the leading marker count.
pub const COUNT_LEN: usize = 8;
/// Size of a single encoded [`MarkerPacket`].
pub const MARKER_LEN: usize = 32;
/// Size of the trailing `time_elapsed` + `timestamp` pair.
pub const TRAILER_LEN: usize = 16;

/// Pose of one marker as it travels on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MarkerPacket {
    pub id: i64,
    /// Camera-relative position in meters.
    pub position: [f32; 3],
    /// Rotation exactly as reported by the detector.
    pub orientation: [f32; 3],
}

/// One frame worth of marker poses.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Packet {
    pub arucos: Vec<MarkerPacket>,
    /// Seconds spent producing the poses.
    pub time_elapsed: f64,
    /// Presentation timestamp of the source frame; consumers order packets by it.
    pub timestamp: f64,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("packet truncated: {actual} byte(s) cannot hold the 8-byte marker count")]
    Truncated { actual: usize },
    #[error("packet declares a negative marker count ({count})")]
    NegativeCount { count: i64 },
    #[error("packet declares {count} marker(s), which does not fit in memory")]
    CountTooLarge { count: i64 },
    #[error("packet with {count} marker(s) must be {expected} bytes, got {actual}")]
    LengthMismatch {
        count: i64,
        expected: usize,
        actual: usize,
    },
}

/// Number of bytes an encoded packet with `count` markers occupies.
///
/// Returns `None` when the size overflows `usize`.
pub fn encoded_len(count: usize) -> Option<usize> {
    count
        .checked_mul(MARKER_LEN)
        .and_then(|body| body.checked_add(COUNT_LEN + TRAILER_LEN))
}

impl Packet {
    pub fn new(arucos: Vec<MarkerPacket>, time_elapsed: f64, timestamp: f64) -> Self {
        Self {
            arucos,
            time_elapsed,
            timestamp,
        }
    }

    /// Size of [`Packet::encode`] output.
    pub fn encoded_len(&self) -> usize {
        COUNT_LEN + TRAILER_LEN + MARKER_LEN * self.arucos.len()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.encoded_len());
        bytes.extend_from_slice(&(self.arucos.len() as i64).to_ne_bytes());
        for marker in &self.arucos {
            marker.write_to(&mut bytes);
        }
        bytes.extend_from_slice(&self.time_elapsed.to_ne_bytes());
        bytes.extend_from_slice(&self.timestamp.to_ne_bytes());
        bytes
    }

    /// Inverse of [`Packet::encode`]. The buffer length must match the
    /// declared marker count exactly.
    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        let mut reader = Reader::new(buf);
        let count = reader
            .i64()
            .map_err(|_| WireError::Truncated { actual: buf.len() })?;
        if count < 0 {
            return Err(WireError::NegativeCount { count });
        }
        let expected = usize::try_from(count)
            .ok()
            .and_then(encoded_len)
            .ok_or(WireError::CountTooLarge { count })?;
        if buf.len() != expected {
            return Err(WireError::LengthMismatch {
                count,
                expected,
                actual: buf.len(),
            });
        }

        let mut arucos = Vec::with_capacity(count as usize);
        for _ in 0..count {
            arucos.push(MarkerPacket {
                id: reader.i64()?,
                position: reader.f32x3()?,
                orientation: reader.f32x3()?,
            });
        }
        let time_elapsed = reader.f64()?;
        let timestamp = reader.f64()?;

        Ok(Self {
            arucos,
            time_elapsed,
            timestamp,
        })
    }
}

impl MarkerPacket {
    fn write_to(&self, bytes: &mut Vec<u8>) {
        bytes.extend_from_slice(&self.id.to_ne_bytes());
        for value in self.position.iter().chain(self.orientation.iter()) {
            bytes.extend_from_slice(&value.to_ne_bytes());
        }
    }
}

/// Forward-only cursor over a length-checked buffer.
struct Reader<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, offset: 0 }
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N], WireError> {
        let end = self.offset + N;
        let chunk = self
            .buf
            .get(self.offset..end)
            .and_then(|slice| <[u8; N]>::try_from(slice).ok())
            .ok_or(WireError::Truncated {
                actual: self.buf.len(),
            })?;
        self.offset = end;
        Ok(chunk)
    }

    fn i64(&mut self) -> Result<i64, WireError> {
        self.take::<8>().map(i64::from_ne_bytes)
    }

    fn f64(&mut self) -> Result<f64, WireError> {
        self.take::<8>().map(f64::from_ne_bytes)
    }

    fn f32x3(&mut self) -> Result<[f32; 3], WireError> {
        Ok([
            f32::from_ne_bytes(self.take::<4>()?),
            f32::from_ne_bytes(self.take::<4>()?),
            f32::from_ne_bytes(self.take::<4>()?),
        ])
    }
}
