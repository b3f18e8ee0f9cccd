// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright © 2026 Gyrosync contributors

use itertools::Itertools;
use rayon::iter::{ ParallelIterator, IntoParallelIterator };
use serde::Serialize;

use super::Segment;
use crate::gyro_source::{ AngularVelocity, ResamplerParameter };
use crate::SyncError;

#[derive(Clone, Copy, Debug)]
pub struct SubframeSearch {
    pub video_frequency: f64,
    /// Half width of the searched interval around the best integer offset, in frames.
    pub range: f64,
    pub step: f64,
}

impl SubframeSearch {
    pub fn new(video_frequency: f64) -> Self {
        Self { video_frequency, range: 2.0, step: 0.001 }
    }

    /// Rejects a step that is not finite and positive, or a negative range.
    pub fn validate(self) -> Result<Self, SyncError> {
        if !(self.step > 0.0) || !self.step.is_finite() || !(self.range >= 0.0) || !self.range.is_finite() {
            return Err(SyncError::InvalidSubframeSearch { range: self.range, step: self.step });
        }
        if !(self.video_frequency > 0.0) || !self.video_frequency.is_finite() {
            return Err(SyncError::InvalidFrequency(self.video_frequency));
        }
        Ok(self)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct SubframeOffset {
    /// Fractional offset in video frames.
    pub frame: f64,
    /// Start of the reference segment on the measured clock, in seconds.
    pub time_offset: f64,
    pub cost: f64,
}

/// Refines the best integer offset of `coefficients` to a fraction of a frame.
///
/// A minimum at index 0 or at `len - 2` is returned as is.
pub fn refine(coefficients: &[f64], reference: &Segment, measured: &AngularVelocity, search: &SubframeSearch) -> Result<SubframeOffset, SyncError> {
    search.validate()?;
    let candidate = coefficients.iter()
        .position_min_by(|a, b| a.total_cmp(b))
        .ok_or(SyncError::EmptySeries)?;
    let cost = coefficients[candidate];

    let to_offset = |frame: f64, cost: f64| SubframeOffset {
        frame,
        time_offset: frame / search.video_frequency - (reference.interval() - measured.interval()) * 0.5,
        cost
    };

    if candidate == 0 || Some(candidate) == coefficients.len().checked_sub(2) {
        log::debug!("Best offset {} is on the edge of the search range, not refining", candidate);
        return Ok(to_offset(candidate as f64, cost));
    }

    let steps = (2.0 * search.range / search.step).round() as usize;
    let length = reference.len() as f64 / reference.frequency;

    // Earliest fraction wins a tie
    let find_min = |a: (usize, f64), b: (usize, f64)| -> (usize, f64) {
        if b.1 < a.1 || (b.1 == a.1 && b.0 < a.0) { b } else { a }
    };

    let lowest = (0..=steps)
        .into_par_iter()
        .filter_map(|i| {
            let fraction = -search.range + i as f64 * search.step;
            let start = (fraction + candidate as f64) / search.video_frequency;
            if start < 0.0 {
                return None;
            }
            let param = ResamplerParameter::new(reference.frequency, start, length);
            let resampled = measured.resample(&param).ok()?;
            Some((i, reference.difference(&resampled)))
        })
        .reduce_with(find_min);

    match lowest {
        Some((i, cost)) => {
            let fraction = -search.range + i as f64 * search.step;
            let frame = candidate as f64 + fraction;
            log::debug!("Sub-frame offset: {:.3} frames (candidate {}, cost {:.6})", frame, candidate, cost);
            Ok(to_offset(frame, cost))
        },
        None => {
            log::warn!("No sub-frame window fits the measured data around frame {}", candidate);
            Ok(to_offset(candidate as f64, cost))
        }
    }
}
