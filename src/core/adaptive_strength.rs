// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright © 2026 Gyrosync contributors

use std::sync::atomic::{ AtomicUsize, Ordering::SeqCst };

use rayon::iter::{ ParallelIterator, IntoParallelIterator };

use crate::stabilization::WarpMapper;
use crate::stabilization_params::SyncParams;
use crate::SyncError;

// Upper bound of bisection steps, reached only with a zero tolerance
const MAX_BISECTION_STEPS: usize = 64;

/// Picks, for every frame, the strongest smoothing that doesn't reveal the area outside of the recorded frame.
///
/// Strength is the shape parameter of the smoothing kernel, so `strongest` and `weakest` may be ordered either way.
#[derive(Clone, Debug)]
pub struct FilterStrengthSelector {
    pub strongest: f64,
    pub weakest: f64,
    pub tolerance: f64,
    pub maximum_gradient: f64,
    pub points_per_side: usize,
}

impl FilterStrengthSelector {
    pub fn from_params(params: &SyncParams) -> Self {
        Self {
            strongest: params.strongest_strength,
            weakest: params.weakest_strength,
            tolerance: params.strength_tolerance,
            maximum_gradient: params.maximum_gradient,
            points_per_side: params.border_points_per_side,
        }
    }

    /// Strength for a single frame given its black space predicate.
    pub fn select_frame<F>(&self, mut has_black_space: F) -> Result<f64, SyncError>
        where F: FnMut(f64) -> Result<bool, SyncError>
    {
        if has_black_space(self.weakest)? {
            return Ok(self.weakest);
        }
        if !has_black_space(self.strongest)? {
            return Ok(self.strongest);
        }
        // `weak` never shows black, `strong` always does
        let (mut strong, mut weak) = (self.strongest, self.weakest);
        for _ in 0..MAX_BISECTION_STEPS {
            if (weak - strong).abs() <= self.tolerance {
                break;
            }
            let mid = (strong + weak) * 0.5;
            if has_black_space(mid)? {
                strong = mid;
            } else {
                weak = mid;
            }
        }
        Ok(weak)
    }

    /// Per-frame strengths for `frame_count` frames, rate limited afterwards.
    /// `has_black_space(frame, strength)` is evaluated from many threads.
    pub fn select_with<F, P>(&self, frame_count: usize, has_black_space: F, progress: P) -> Result<Vec<f64>, SyncError>
        where F: Fn(usize, f64) -> Result<bool, SyncError> + Sync,
              P: Fn(usize, usize) + Sync
    {
        if frame_count == 0 {
            return Err(SyncError::EmptyVideo);
        }
        let done = AtomicUsize::new(0);
        let mut strengths = (0..frame_count).into_par_iter().map(|frame| {
            let strength = self.select_frame(|s| has_black_space(frame, s));
            progress(done.fetch_add(1, SeqCst) + 1, frame_count);
            strength
        }).collect::<Result<Vec<f64>, SyncError>>()?;

        gradient_limit(&mut strengths, self.maximum_gradient, self.weakest >= self.strongest);
        Ok(strengths)
    }

    pub fn select<P>(&self, mapper: &WarpMapper, frame_count: usize, video_frequency: f64, progress: P) -> Result<Vec<f64>, SyncError>
        where P: Fn(usize, usize) + Sync
    {
        let border = mapper.border(self.points_per_side);
        let strengths = self.select_with(frame_count, |frame, strength| {
            mapper.has_black_space(frame as f64 / video_frequency, strength, &border)
        }, progress)?;

        let limited = strengths.iter().filter(|s| **s == self.weakest).count();
        if limited > 0 {
            log::warn!("{} of {} frames show black borders even at the weakest smoothing", limited, frame_count);
        }
        Ok(strengths)
    }
}

/// Limits the change between consecutive frames to `maximum_gradient`. Values only move towards
/// the weaker side, so no frame ends up smoothed more than what was selected for it.
pub fn gradient_limit(strengths: &mut [f64], maximum_gradient: f64, weaker_is_larger: bool) {
    let sign = if weaker_is_larger { 1.0 } else { -1.0 };
    let g = maximum_gradient.abs();
    for i in 1..strengths.len() {
        let bound = sign * strengths[i - 1] - g;
        if sign * strengths[i] < bound { strengths[i] = sign * bound; }
    }
    for i in (0..strengths.len().saturating_sub(1)).rev() {
        let bound = sign * strengths[i + 1] - g;
        if sign * strengths[i] < bound { strengths[i] = sign * bound; }
    }
}
