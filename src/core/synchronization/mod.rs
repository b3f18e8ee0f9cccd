// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright © 2026 Gyrosync contributors

use nalgebra::Vector3;

use crate::gyro_source::AngularVelocity;
use crate::SyncError;

pub mod correlation;
pub mod subframe;
pub mod clock_drift;
pub mod estimate_pose;

pub use correlation::correlate;
pub use subframe::{ refine, SubframeOffset, SubframeSearch };
pub use clock_drift::{ estimate_clock_drift, ClockDrift };

/// Consecutive samples of the video-derived series that are matched against the measured one.
#[derive(Clone, Copy, Debug)]
pub struct Segment<'a> {
    pub data: &'a [Vector3<f64>],
    pub confidence: &'a [f64],
    pub frequency: f64,
}

impl<'a> Segment<'a> {
    pub fn new(series: &'a AngularVelocity, begin: usize, length: usize) -> Result<Self, SyncError> {
        let (data, confidence) = series.segment(begin, length)?;
        Ok(Self { data, confidence, frequency: series.frequency() })
    }

    pub fn whole(series: &'a AngularVelocity) -> Self {
        Self { data: series.data(), confidence: series.confidence(), frequency: series.frequency() }
    }

    pub fn len(&self) -> usize { self.data.len() }
    pub fn is_empty(&self) -> bool { self.data.is_empty() }
    pub fn interval(&self) -> f64 { 1.0 / self.frequency }

    /// Confidence weighted mean absolute difference, summed over the axes.
    /// `f64::MAX` when no sample of the segment can be trusted.
    pub fn difference(&self, other: &[Vector3<f64>]) -> f64 {
        let weight: f64 = self.confidence.iter().sum();
        if weight <= 0.0 {
            return f64::MAX;
        }
        let sum: f64 = self.data.iter()
            .zip(other)
            .zip(self.confidence)
            .filter(|(_, c)| **c != 0.0)
            .map(|((a, b), c)| (b - a).abs().sum() * c)
            .sum();
        sum / weight
    }
}
