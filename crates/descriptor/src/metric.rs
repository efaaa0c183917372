//! Row distance kernels.
//!
//! Descriptor rows are raw bytes. Binary families compare them bit by bit;
//! floating-point (and everything else) families decode the elements and take
//! the L2 norm of the difference. The element type is derived from the
//! element size, so a kernel is resolved once per matrix pair and then applied
//! to every row pair without further checks.

use bytemuck::{pod_read_unaligned, Pod};
use serde::{Deserialize, Serialize};

use crate::error::DescriptorError;

/// Distance family used to compare two descriptor rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    /// Popcount of the XOR of the row bytes.
    Hamming,
    /// L2 norm over decoded elements.
    Euclidean,
}

/// Distance between two rows of equal byte length.
pub type RowKernel = fn(&[u8], &[u8]) -> f64;

impl DistanceMetric {
    /// Resolve the row kernel for rows made of `element_size`-byte elements.
    ///
    /// Hamming accepts any non-zero element size. Euclidean decodes
    /// 1 → `u8`, 2 → `u16`, 4 → `f32`, 8 → `f64`, all little endian.
    pub fn kernel(self, element_size: usize) -> Result<RowKernel, DescriptorError> {
        match (self, element_size) {
            (_, 0) => Err(DescriptorError::ElementSize(0)),
            (DistanceMetric::Hamming, _) => Ok(hamming),
            (DistanceMetric::Euclidean, 1) => Ok(euclidean_u8),
            (DistanceMetric::Euclidean, 2) => Ok(euclidean_pod::<u16>),
            (DistanceMetric::Euclidean, 4) => Ok(euclidean_pod::<f32>),
            (DistanceMetric::Euclidean, 8) => Ok(euclidean_pod::<f64>),
            (DistanceMetric::Euclidean, other) => Err(DescriptorError::ElementSize(other)),
        }
    }

    /// One-off distance between two rows. Prefer [`DistanceMetric::kernel`] in loops.
    pub fn distance(self, a: &[u8], b: &[u8], element_size: usize) -> Result<f64, DescriptorError> {
        let kernel = self.kernel(element_size)?;
        Ok(kernel(a, b))
    }
}

/// Number of differing bits between two byte rows.
pub fn hamming_bits(a: &[u8], b: &[u8]) -> u32 {
    let mut chunks_a = a.chunks_exact(8);
    let mut chunks_b = b.chunks_exact(8);
    let mut bits = 0u32;
    for (x, y) in chunks_a.by_ref().zip(chunks_b.by_ref()) {
        let x = u64::from_le_bytes([x[0], x[1], x[2], x[3], x[4], x[5], x[6], x[7]]);
        let y = u64::from_le_bytes([y[0], y[1], y[2], y[3], y[4], y[5], y[6], y[7]]);
        bits += (x ^ y).count_ones();
    }
    for (x, y) in chunks_a.remainder().iter().zip(chunks_b.remainder()) {
        bits += (x ^ y).count_ones();
    }
    bits
}

fn hamming(a: &[u8], b: &[u8]) -> f64 {
    f64::from(hamming_bits(a, b))
}

fn euclidean_u8(a: &[u8], b: &[u8]) -> f64 {
    let sum: u64 = a
        .iter()
        .zip(b)
        .map(|(&x, &y)| {
            let d = u64::from(x.abs_diff(y));
            d * d
        })
        .sum();
    (sum as f64).sqrt()
}

/// Elements that can be widened to `f64` for the L2 kernel.
trait Element: Pod {
    fn widen(self) -> f64;
}

impl Element for u16 {
    fn widen(self) -> f64 {
        f64::from(self)
    }
}

impl Element for f32 {
    fn widen(self) -> f64 {
        f64::from(self)
    }
}

impl Element for f64 {
    fn widen(self) -> f64 {
        self
    }
}

fn euclidean_pod<T: Element>(a: &[u8], b: &[u8]) -> f64 {
    let size = std::mem::size_of::<T>();
    a.chunks_exact(size)
        .zip(b.chunks_exact(size))
        .map(|(x, y)| {
            let d = pod_read_unaligned::<T>(x).widen() - pod_read_unaligned::<T>(y).widen();
            d * d
        })
        .sum::<f64>()
        .sqrt()
}
