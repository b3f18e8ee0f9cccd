// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright © 2026 Gyrosync contributors

use nalgebra::{ Rotation3, UnitQuaternion, Vector3 };
use serde::{ Serialize, Deserialize };

use crate::SyncError;

pub type Quat64 = UnitQuaternion<f64>;

// Query positions are allowed to overshoot the recorded span by this many samples
// to absorb accumulated floating point error of `start + i / frequency`.
const POSITION_EPSILON: f64 = 1e-6;

/// Virtual window into an angular velocity series: where to start, how long, at what rate.
///
/// `length == 0.0` means "until the end of the recorded span".
/// `drift` is the relative clock rate error between the video clock and the clock of the series,
/// a video time `t` is found at `start + t * (1 + drift)` in the series.
#[derive(Default, Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResamplerParameter {
    pub frequency: f64,
    pub start: f64,
    pub length: f64,
    pub drift: f64,
}

impl ResamplerParameter {
    pub fn new(frequency: f64, start: f64, length: f64) -> Self {
        Self { frequency, start, length, drift: 0.0 }
    }

    /// Stretches the window so that the same number of rows covers the drifted clock.
    pub fn with_clock_drift(self, ratio: f64) -> Self {
        Self {
            frequency: self.frequency / (1.0 + ratio),
            length: self.length * (1.0 + ratio),
            drift: ratio,
            ..self
        }
    }

    pub fn interval(&self) -> f64 { 1.0 / self.frequency }

    pub fn source_time(&self, video_time: f64) -> f64 {
        self.start + video_time * (1.0 + self.drift)
    }

    pub fn rows(&self, series: &AngularVelocity) -> Result<usize, SyncError> {
        if !(self.frequency > 0.0) || !self.frequency.is_finite() {
            return Err(SyncError::InvalidFrequency(self.frequency));
        }
        if self.length > 0.0 {
            return Ok((self.length * self.frequency).round() as usize);
        }
        let remaining = series.last_timestamp() - self.start;
        if remaining < -POSITION_EPSILON * series.interval() {
            return Err(SyncError::OutOfRange { time: self.start, start: 0.0, end: series.last_timestamp() });
        }
        Ok((remaining.max(0.0) * self.frequency + POSITION_EPSILON).floor() as usize + 1)
    }
}

/// Angular velocity samples (rad/s) at a fixed sampling frequency, with a per-sample confidence.
///
/// Sample `i` is located at `i / frequency` seconds.
#[derive(Clone, Debug)]
pub struct AngularVelocity {
    frequency: f64,
    data: Vec<Vector3<f64>>,
    confidence: Vec<f64>,
}

impl AngularVelocity {
    /// Measured data, every sample fully trusted.
    pub fn new(frequency: f64, data: Vec<Vector3<f64>>) -> Result<Self, SyncError> {
        let confidence = vec![1.0; data.len()];
        Self::with_confidence(frequency, data, confidence)
    }

    pub fn with_confidence(frequency: f64, data: Vec<Vector3<f64>>, confidence: Vec<f64>) -> Result<Self, SyncError> {
        if !(frequency > 0.0) || !frequency.is_finite() {
            return Err(SyncError::InvalidFrequency(frequency));
        }
        if data.is_empty() {
            return Err(SyncError::EmptySeries);
        }
        if data.len() != confidence.len() {
            return Err(SyncError::LengthMismatch { expected: data.len(), actual: confidence.len() });
        }
        Ok(Self { frequency, data, confidence })
    }

    /// Rotates every sample from the sensor frame into the camera frame. Consumes the series,
    /// so the rotation can only be applied while loading.
    pub fn with_mounting_rotation(mut self, rotation: &Rotation3<f64>) -> Self {
        for v in self.data.iter_mut() {
            *v = rotation * *v;
        }
        self
    }

    pub fn frequency(&self) -> f64 { self.frequency }
    pub fn interval(&self) -> f64 { 1.0 / self.frequency }
    pub fn len(&self) -> usize { self.data.len() }
    pub fn is_empty(&self) -> bool { self.data.is_empty() }
    pub fn data(&self) -> &[Vector3<f64>] { &self.data }
    pub fn confidence(&self) -> &[f64] { &self.confidence }

    pub fn length_in_seconds(&self) -> f64 { self.data.len() as f64 / self.frequency }
    pub fn last_timestamp(&self) -> f64 { (self.data.len() - 1) as f64 / self.frequency }

    /// `length` consecutive samples starting at `begin`, with their confidence.
    pub fn segment(&self, begin: usize, length: usize) -> Result<(&[Vector3<f64>], &[f64]), SyncError> {
        let end = begin + length;
        if end > self.data.len() {
            return Err(SyncError::LengthMismatch { expected: end, actual: self.data.len() });
        }
        Ok((&self.data[begin..end], &self.confidence[begin..end]))
    }

    // -> (index of the left bracketing sample, fraction towards the right one)
    fn position(&self, time: f64) -> Result<(usize, f64), SyncError> {
        self.position_within(time, POSITION_EPSILON)
    }

    // `slack` is in samples
    fn position_within(&self, time: f64, slack: f64) -> Result<(usize, f64), SyncError> {
        let last = (self.data.len() - 1) as f64;
        let pos = time * self.frequency;
        if !pos.is_finite() || pos < -slack || pos > last + slack {
            return Err(SyncError::OutOfRange { time, start: 0.0, end: self.last_timestamp() });
        }
        let pos = pos.max(0.0).min(last);
        let index = (pos.floor() as usize).min(self.data.len().saturating_sub(2));
        Ok((index, pos - index as f64))
    }

    pub fn value_at(&self, time: f64) -> Result<Vector3<f64>, SyncError> {
        let (i, fract) = self.position(time)?;
        match self.data.get(i + 1) {
            Some(next) => Ok(self.data[i].lerp(next, fract)),
            None => Ok(self.data[i])
        }
    }

    /// Confidence of the sample nearest to `time`.
    pub fn confidence_at(&self, time: f64) -> Result<f64, SyncError> {
        let (i, fract) = self.position(time)?;
        let nearest = if fract >= 0.5 { (i + 1).min(self.data.len() - 1) } else { i };
        Ok(self.confidence[nearest])
    }

    pub fn resample(&self, param: &ResamplerParameter) -> Result<Vec<Vector3<f64>>, SyncError> {
        let rows = param.rows(self)?;
        let interval = param.interval();
        (0..rows).map(|i| self.value_at(param.start + i as f64 * interval)).collect()
    }

    /// Same as [`Self::resample`], but query times up to `band` seconds outside of the recorded
    /// span are held at its first or last sample.
    pub fn resample_within(&self, param: &ResamplerParameter, band: f64) -> Result<Vec<Vector3<f64>>, SyncError> {
        let rows = param.rows(self)?;
        let interval = param.interval();
        let slack = band.max(0.0) * self.frequency + POSITION_EPSILON;
        (0..rows).map(|i| {
            let (i, fract) = self.position_within(param.start + i as f64 * interval, slack)?;
            Ok(match self.data.get(i + 1) {
                Some(next) => self.data[i].lerp(next, fract),
                None => self.data[i]
            })
        }).collect()
    }

    pub fn resample_confidence(&self, param: &ResamplerParameter) -> Result<Vec<f64>, SyncError> {
        let rows = param.rows(self)?;
        let interval = param.interval();
        (0..rows).map(|i| self.confidence_at(param.start + i as f64 * interval)).collect()
    }
}
