//! Image hash families, the hex codec and the comparison contract.
//!
//! Hashes are persisted as upper-case hex strings (two characters per byte,
//! no separators). Decoding reconstructs a single-row [`MatrixDescriptor`]
//! whose element size is fixed by the [`HashKind`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DescriptorError;
use crate::matrix::MatrixDescriptor;
use crate::metric::hamming_bits;

/// Hash families computed for every image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashKind {
    /// Perceptual hash: one row of bytes.
    Perceptual,
    /// Color-moment hash: one row of `f64` moments.
    ColorMoment,
}

impl HashKind {
    pub const ALL: [HashKind; 2] = [HashKind::Perceptual, HashKind::ColorMoment];

    /// Bytes per hash element.
    pub const fn element_size(self) -> usize {
        match self {
            HashKind::Perceptual => 1,
            HashKind::ColorMoment => 8,
        }
    }

    /// Label used in relevance annotations.
    pub const fn label(self) -> &'static str {
        match self {
            HashKind::Perceptual => "Perceptual",
            HashKind::ColorMoment => "Color Moment",
        }
    }
}

impl fmt::Display for HashKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for HashKind {
    type Err = DescriptorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "perceptual" | "phash" => Ok(HashKind::Perceptual),
            "color_moment" | "colormoment" | "cmhash" => Ok(HashKind::ColorMoment),
            _ => Err(DescriptorError::UnknownHashKind(s.to_string())),
        }
    }
}

/// Encode bytes as upper-case hex.
pub fn to_hex(bytes: &[u8]) -> String {
    hex::encode_upper(bytes)
}

/// Decode hex back into raw bytes.
pub fn hex_bytes(hex_str: &str) -> Result<Vec<u8>, DescriptorError> {
    hex::decode(hex_str).map_err(|err| DescriptorError::from_hex(err, hex_str.len()))
}

/// Decode hex into a one-row matrix of `element_size`-byte elements.
pub fn from_hex(hex_str: &str, element_size: usize) -> Result<MatrixDescriptor, DescriptorError> {
    if element_size == 0 {
        return Err(DescriptorError::ElementSize(0));
    }
    let bytes = hex_bytes(hex_str)?;
    if bytes.len() % element_size != 0 {
        return Err(DescriptorError::PartialElement {
            len: bytes.len(),
            element_size,
        });
    }
    let cols = bytes.len() / element_size;
    MatrixDescriptor::new(1, cols, element_size, bytes)
}

/// Perceptual and color-moment hashes of one image, hex encoded.
///
/// Hashes are not identities: distinct images may share either value, so
/// nothing keyed on a `HashPair` may assume uniqueness.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HashPair {
    pub perceptual: String,
    pub color_moment: String,
}

impl HashPair {
    /// Build from raw hash bytes, validating the color-moment element size.
    pub fn from_bytes(perceptual: &[u8], color_moment: &[u8]) -> Result<Self, DescriptorError> {
        let element_size = HashKind::ColorMoment.element_size();
        if color_moment.len() % element_size != 0 {
            return Err(DescriptorError::PartialElement {
                len: color_moment.len(),
                element_size,
            });
        }
        Ok(Self {
            perceptual: to_hex(perceptual),
            color_moment: to_hex(color_moment),
        })
    }

    pub fn get(&self, kind: HashKind) -> &str {
        match kind {
            HashKind::Perceptual => &self.perceptual,
            HashKind::ColorMoment => &self.color_moment,
        }
    }

    /// Decode one hash into its matrix form.
    pub fn decode(&self, kind: HashKind) -> Result<MatrixDescriptor, DescriptorError> {
        from_hex(self.get(kind), kind.element_size())
    }

    /// Exact string equality on either family.
    pub fn shares_any(&self, other: &HashPair) -> bool {
        self.perceptual == other.perceptual || self.color_moment == other.color_moment
    }
}

/// Hash comparison collaborator.
///
/// Implementations must return a non-negative dissimilarity and
/// `compare(kind, h, h) == 0`. No other metric axiom is assumed.
pub trait HashComparator: Send + Sync {
    fn compare(
        &self,
        kind: HashKind,
        a: &MatrixDescriptor,
        b: &MatrixDescriptor,
    ) -> Result<f64, DescriptorError>;

    /// Distances for both families, `(perceptual, color_moment)`.
    fn compare_pair(&self, a: &HashPair, b: &HashPair) -> Result<(f64, f64), DescriptorError> {
        let p = self.compare(
            HashKind::Perceptual,
            &a.decode(HashKind::Perceptual)?,
            &b.decode(HashKind::Perceptual)?,
        )?;
        let cm = self.compare(
            HashKind::ColorMoment,
            &a.decode(HashKind::ColorMoment)?,
            &b.decode(HashKind::ColorMoment)?,
        )?;
        Ok((p, cm))
    }
}

/// Reference comparator: differing bits for perceptual hashes, L2 over the
/// `f64` moments for color-moment hashes.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardHashComparator;

impl HashComparator for StandardHashComparator {
    fn compare(
        &self,
        kind: HashKind,
        a: &MatrixDescriptor,
        b: &MatrixDescriptor,
    ) -> Result<f64, DescriptorError> {
        if a.data().len() != b.data().len() || !a.same_row_layout(b) {
            return Err(DescriptorError::ShapeMismatch {
                model_cols: a.cols(),
                model_element_size: a.element_size(),
                query_cols: b.cols(),
                query_element_size: b.element_size(),
            });
        }
        match kind {
            HashKind::Perceptual => Ok(f64::from(hamming_bits(a.data(), b.data()))),
            HashKind::ColorMoment => {
                crate::metric::DistanceMetric::Euclidean.distance(a.data(), b.data(), a.element_size())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_is_upper_case_two_chars_per_byte() {
        assert_eq!(to_hex(&[0x00, 0x0a, 0xff, 0x5C]), "000AFF5C");
        assert_eq!(to_hex(&[]), "");
    }

    #[test]
    fn hex_roundtrip_over_many_lengths() {
        for len in 0..64usize {
            let bytes: Vec<u8> = (0..len).map(|i| (i * 37 % 256) as u8).collect();
            let decoded = from_hex(&to_hex(&bytes), 1).expect("valid hex");
            assert_eq!(decoded.data(), bytes.as_slice());
            assert_eq!(decoded.rows(), 1);
            assert_eq!(decoded.cols(), len);
        }
    }

    #[test]
    fn from_hex_reconstructs_shape() {
        let moments = [1.5f64, -2.0, 0.25];
        let bytes: Vec<u8> = moments.iter().flat_map(|m| m.to_le_bytes()).collect();
        let decoded = from_hex(&to_hex(&bytes), 8).unwrap();
        assert_eq!((decoded.rows(), decoded.cols(), decoded.element_size()), (1, 3, 8));
        // lower case input is accepted
        assert_eq!(from_hex("0a0B", 1).unwrap().data(), &[0x0a, 0x0b]);
    }

    #[test]
    fn malformed_hex_is_a_format_error() {
        assert_eq!(
            from_hex("ABC", 1).unwrap_err(),
            DescriptorError::OddHexLength { len: 3 }
        );
        assert!(matches!(
            from_hex("ZZ", 1).unwrap_err(),
            DescriptorError::InvalidHex { character: 'Z', offset: 0 }
        ));
        assert_eq!(
            from_hex("AABBCC", 2).unwrap_err(),
            DescriptorError::PartialElement {
                len: 3,
                element_size: 2
            }
        );
    }

    #[test]
    fn standard_comparator_contract() {
        let cmp = StandardHashComparator;
        let a = HashPair::from_bytes(&[0xFF, 0x00], &1.0f64.to_le_bytes()).unwrap();
        let b = HashPair::from_bytes(&[0x0F, 0x00], &4.0f64.to_le_bytes()).unwrap();
        assert_eq!(cmp.compare_pair(&a, &a).unwrap(), (0.0, 0.0));
        let (p, cm) = cmp.compare_pair(&a, &b).unwrap();
        assert_eq!(p, 4.0);
        assert!((cm - 3.0).abs() < 1e-12);
        assert!(a.shares_any(&HashPair {
            perceptual: a.perceptual.clone(),
            color_moment: String::new(),
        }));
    }

    #[test]
    fn hash_kind_parsing() {
        assert_eq!("color moment".parse::<HashKind>(), Ok(HashKind::ColorMoment));
        assert_eq!("Perceptual".parse::<HashKind>(), Ok(HashKind::Perceptual));
        assert!("md5".parse::<HashKind>().is_err());
        assert_eq!(HashKind::ColorMoment.to_string(), "Color Moment");
    }
}
