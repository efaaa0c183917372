//! Matrix descriptors and per-image descriptor sets.

use std::collections::BTreeMap;

use bytemuck::Pod;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::detector::DetectorType;
use crate::error::DescriptorError;

/// A `rows x cols` matrix of fixed-size elements stored as raw bytes.
///
/// Each row is one descriptor vector (one keypoint). The buffer is shared and
/// immutable, so clones are cheap and can cross threads freely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "DescriptorShape", into = "DescriptorShape")]
pub struct MatrixDescriptor {
    rows: usize,
    cols: usize,
    element_size: usize,
    data: Bytes,
}

impl MatrixDescriptor {
    /// Build a descriptor, checking `data.len() == rows * cols * element_size`.
    pub fn new(
        rows: usize,
        cols: usize,
        element_size: usize,
        data: impl Into<Bytes>,
    ) -> Result<Self, DescriptorError> {
        let data = data.into();
        if element_size == 0 {
            return Err(DescriptorError::ElementSize(0));
        }
        let expected = rows
            .checked_mul(cols)
            .and_then(|n| n.checked_mul(element_size));
        match expected {
            Some(expected) if expected == data.len() => Ok(Self {
                rows,
                cols,
                element_size,
                data,
            }),
            _ => Err(DescriptorError::LengthMismatch {
                rows,
                cols,
                element_size,
                expected: expected.unwrap_or(usize::MAX),
                actual: data.len(),
            }),
        }
    }

    /// Build from typed elements laid out row-major.
    pub fn from_elements<T: Pod>(rows: usize, cols: usize, elements: &[T]) -> Result<Self, DescriptorError> {
        let bytes: &[u8] = bytemuck::cast_slice(elements);
        Self::new(rows, cols, std::mem::size_of::<T>(), Bytes::copy_from_slice(bytes))
    }

    /// Build from equally sized typed rows.
    pub fn from_rows<T: Pod>(rows: &[Vec<T>]) -> Result<Self, DescriptorError> {
        let cols = rows.first().map_or(0, Vec::len);
        let mut data = Vec::with_capacity(rows.len() * cols * std::mem::size_of::<T>());
        for row in rows {
            if row.len() != cols {
                return Err(DescriptorError::LengthMismatch {
                    rows: rows.len(),
                    cols,
                    element_size: std::mem::size_of::<T>(),
                    expected: cols,
                    actual: row.len(),
                });
            }
            data.extend_from_slice(bytemuck::cast_slice(row));
        }
        Self::new(rows.len(), cols, std::mem::size_of::<T>(), data)
    }

    /// A descriptor with no rows, as produced for images without keypoints.
    pub fn empty(cols: usize, element_size: usize) -> Self {
        Self {
            rows: 0,
            cols,
            element_size: element_size.max(1),
            data: Bytes::new(),
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn element_size(&self) -> usize {
        self.element_size
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Shared handle on the underlying buffer.
    pub fn bytes(&self) -> Bytes {
        self.data.clone()
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    /// Bytes per row.
    pub fn row_len(&self) -> usize {
        self.cols * self.element_size
    }

    pub fn row(&self, index: usize) -> Option<&[u8]> {
        if index >= self.rows {
            return None;
        }
        let len = self.row_len();
        self.data.get(index * len..(index + 1) * len)
    }

    /// Iterate rows in order.
    pub fn row_iter(&self) -> impl ExactSizeIterator<Item = &[u8]> + '_ {
        let len = self.row_len();
        (0..self.rows).map(move |i| &self.data[i * len..(i + 1) * len])
    }

    /// Whether rows of `self` and `other` can be compared element-wise.
    pub fn same_row_layout(&self, other: &MatrixDescriptor) -> bool {
        self.cols == other.cols && self.element_size == other.element_size
    }
}

/// Serialized shape of a matrix, validated on the way back in.
#[derive(Serialize, Deserialize)]
struct DescriptorShape {
    rows: usize,
    cols: usize,
    element_size: usize,
    data: Bytes,
}

impl TryFrom<DescriptorShape> for MatrixDescriptor {
    type Error = DescriptorError;

    fn try_from(shape: DescriptorShape) -> Result<Self, Self::Error> {
        MatrixDescriptor::new(shape.rows, shape.cols, shape.element_size, shape.data)
    }
}

impl From<MatrixDescriptor> for DescriptorShape {
    fn from(m: MatrixDescriptor) -> Self {
        DescriptorShape {
            rows: m.rows,
            cols: m.cols,
            element_size: m.element_size,
            data: m.data,
        }
    }
}

/// Storage form of a descriptor: `{ type, rows, cols, elementSize, data }`.
///
/// Dimensions are `i32` on the wire; [`DescriptorRecord::into_descriptor`]
/// re-checks every invariant when reading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptorRecord {
    pub detector: i32,
    pub rows: i32,
    pub cols: i32,
    pub element_size: i32,
    pub data: Vec<u8>,
}

impl DescriptorRecord {
    pub fn from_descriptor(
        detector: DetectorType,
        descriptor: &MatrixDescriptor,
    ) -> Result<Self, DescriptorError> {
        Ok(Self {
            detector: detector.code(),
            rows: fits_record("rows", descriptor.rows)?,
            cols: fits_record("cols", descriptor.cols)?,
            element_size: fits_record("element_size", descriptor.element_size)?,
            data: descriptor.data.to_vec(),
        })
    }

    pub fn into_descriptor(self) -> Result<(DetectorType, MatrixDescriptor), DescriptorError> {
        let detector = DetectorType::from_code(self.detector)?;
        let rows = non_negative("rows", self.rows)?;
        let cols = non_negative("cols", self.cols)?;
        let element_size = non_negative("element_size", self.element_size)?;
        let descriptor = MatrixDescriptor::new(rows, cols, element_size, self.data)?;
        Ok((detector, descriptor))
    }
}

fn fits_record(field: &'static str, value: usize) -> Result<i32, DescriptorError> {
    i32::try_from(value).map_err(|_| DescriptorError::DimensionOverflow { field, value })
}

fn non_negative(field: &'static str, value: i32) -> Result<usize, DescriptorError> {
    usize::try_from(value).map_err(|_| DescriptorError::NegativeDimension { field, value })
}

/// At most one descriptor per detector family, fixed once built.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptorSet {
    entries: BTreeMap<DetectorType, MatrixDescriptor>,
}

impl DescriptorSet {
    /// Build a set, rejecting duplicate detector types.
    pub fn new(
        entries: impl IntoIterator<Item = (DetectorType, MatrixDescriptor)>,
    ) -> Result<Self, DescriptorError> {
        let mut map = BTreeMap::new();
        for (detector, descriptor) in entries {
            if map.insert(detector, descriptor).is_some() {
                return Err(DescriptorError::DuplicateDetector(detector));
            }
        }
        Ok(Self { entries: map })
    }

    /// Look up the descriptor computed for `detector`.
    pub fn get(&self, detector: DetectorType) -> Result<&MatrixDescriptor, DescriptorError> {
        self.entries
            .get(&detector)
            .ok_or(DescriptorError::NotFound(detector))
    }

    pub fn contains(&self, detector: DetectorType) -> bool {
        self.entries.contains_key(&detector)
    }

    pub fn detectors(&self) -> impl Iterator<Item = DetectorType> + '_ {
        self.entries.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (DetectorType, &MatrixDescriptor)> {
        self.entries.iter().map(|(d, m)| (*d, m))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_records(&self) -> Result<Vec<DescriptorRecord>, DescriptorError> {
        self.iter()
            .map(|(detector, m)| DescriptorRecord::from_descriptor(detector, m))
            .collect()
    }

    pub fn from_records(records: impl IntoIterator<Item = DescriptorRecord>) -> Result<Self, DescriptorError> {
        let decoded = records
            .into_iter()
            .map(DescriptorRecord::into_descriptor)
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(decoded)
    }
}
