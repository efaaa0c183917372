//! Detector families and their dispatch table.
//!
//! Every [`DetectorType`] maps to a static [`DetectorProfile`] naming the
//! metric its descriptors are compared with. Callers look up the tag instead
//! of inspecting detector objects at runtime.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DescriptorError;
use crate::metric::DistanceMetric;

/// Closed set of keypoint / descriptor detector families.
///
/// The integer codes are part of the storage format and must never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorType {
    Default,
    Brisk,
    Orb,
    Sift,
    Brief,
    Latch,
    Lucid,
    Freak,
    Fast,
    SimpleBlob,
}

/// Static dispatch entry for one detector family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectorProfile {
    pub detector: DetectorType,
    /// Metric used whenever two descriptor sets of this detector are compared.
    pub metric: DistanceMetric,
}

const fn profile(detector: DetectorType, metric: DistanceMetric) -> DetectorProfile {
    DetectorProfile { detector, metric }
}

use DistanceMetric::{Euclidean, Hamming};

const PROFILES: [DetectorProfile; 10] = [
    profile(DetectorType::Default, Euclidean),
    profile(DetectorType::Brisk, Hamming),
    profile(DetectorType::Orb, Hamming),
    profile(DetectorType::Sift, Euclidean),
    profile(DetectorType::Brief, Euclidean),
    profile(DetectorType::Latch, Euclidean),
    profile(DetectorType::Lucid, Euclidean),
    profile(DetectorType::Freak, Euclidean),
    profile(DetectorType::Fast, Euclidean),
    profile(DetectorType::SimpleBlob, Euclidean),
];

impl DetectorType {
    /// All detector families in storage-code order.
    pub const ALL: [DetectorType; 10] = [
        DetectorType::Default,
        DetectorType::Brisk,
        DetectorType::Orb,
        DetectorType::Sift,
        DetectorType::Brief,
        DetectorType::Latch,
        DetectorType::Lucid,
        DetectorType::Freak,
        DetectorType::Fast,
        DetectorType::SimpleBlob,
    ];

    /// Stable storage code.
    pub const fn code(self) -> i32 {
        match self {
            DetectorType::Default => -1,
            DetectorType::Brisk => 0,
            DetectorType::Orb => 1,
            DetectorType::Sift => 2,
            DetectorType::Brief => 3,
            DetectorType::Latch => 4,
            DetectorType::Lucid => 5,
            DetectorType::Freak => 6,
            DetectorType::Fast => 7,
            DetectorType::SimpleBlob => 8,
        }
    }

    /// Inverse of [`DetectorType::code`].
    pub fn from_code(code: i32) -> Result<Self, DescriptorError> {
        Self::ALL
            .into_iter()
            .find(|d| d.code() == code)
            .ok_or_else(|| DescriptorError::UnknownDetector(code.to_string()))
    }

    pub const fn name(self) -> &'static str {
        match self {
            DetectorType::Default => "default",
            DetectorType::Brisk => "brisk",
            DetectorType::Orb => "orb",
            DetectorType::Sift => "sift",
            DetectorType::Brief => "brief",
            DetectorType::Latch => "latch",
            DetectorType::Lucid => "lucid",
            DetectorType::Freak => "freak",
            DetectorType::Fast => "fast",
            DetectorType::SimpleBlob => "simple_blob",
        }
    }

    /// Dispatch-table entry for this detector.
    pub fn profile(self) -> &'static DetectorProfile {
        // PROFILES is laid out in ALL order, so the offset is code + 1.
        &PROFILES[(self.code() + 1) as usize]
    }

    /// Metric used to compare two descriptor sets of this detector.
    pub fn metric(self) -> DistanceMetric {
        self.profile().metric
    }
}

/// Free-function form of the selector, kept for call sites that read better
/// without a method receiver.
pub fn metric_for(detector: DetectorType) -> DistanceMetric {
    detector.metric()
}

impl fmt::Display for DetectorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DetectorType {
    type Err = DescriptorError;

    /// Case-insensitive; `-` and spaces are accepted in place of `_`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        let normalized = match normalized.as_str() {
            "simpleblob" => "simple_blob",
            other => other,
        };
        Self::ALL
            .into_iter()
            .find(|d| d.name() == normalized)
            .ok_or_else(|| DescriptorError::UnknownDetector(s.to_string()))
    }
}

impl TryFrom<i32> for DetectorType {
    type Error = DescriptorError;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        Self::from_code(code)
    }
}
