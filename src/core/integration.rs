// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright © 2026 Gyrosync contributors

use nalgebra::Vector3;

use crate::filtering::SmoothingKernel;
use crate::gyro_source::{ AngularVelocity, Quat64, ResamplerParameter };
use crate::SyncError;

/// Continuous-time camera orientation integrated from an angular velocity series.
///
/// Orientations are memoized at every sample boundary when the track is built, so after
/// construction the track is immutable and can be queried from any number of threads.
/// Query times are on the video clock, relative to the synchronized start described by the
/// [`ResamplerParameter`] the track was built with.
#[derive(Clone, Debug)]
pub struct RotationTrack {
    parameter: ResamplerParameter,
    interval: f64,
    knots: Vec<Quat64>,
}

impl RotationTrack {
    pub fn new(series: &AngularVelocity, parameter: ResamplerParameter) -> Result<Self, SyncError> {
        if !(parameter.frequency > 0.0) || !parameter.frequency.is_finite() {
            return Err(SyncError::InvalidFrequency(parameter.frequency));
        }
        let interval = series.interval();

        // Each sample is a constant body rate over its own interval
        let mut knots = Vec::with_capacity(series.len() + 1);
        let mut orientation = Quat64::identity();
        knots.push(orientation);
        for omega in series.data() {
            orientation = orientation * Quat64::from_scaled_axis(omega * interval);
            orientation.renormalize_fast();
            knots.push(orientation);
        }

        log::debug!("Rotation track: {} knots, start {:.6} s, drift {:.3e}", knots.len(), parameter.start, parameter.drift);

        Ok(Self { parameter, interval, knots })
    }

    /// Duration covered by the integrated orientation, on the clock of the series.
    pub fn span(&self) -> f64 { (self.knots.len() - 1) as f64 * self.interval }

    /// Orientation at a time on the clock of the series.
    pub fn orientation_at_source(&self, time: f64) -> Result<Quat64, SyncError> {
        let last = (self.knots.len() - 1) as f64;
        let pos = time / self.interval;
        if !pos.is_finite() || pos < -1e-6 || pos > last + 1e-6 {
            return Err(SyncError::OutOfRange { time, start: 0.0, end: self.span() });
        }
        let pos = pos.max(0.0).min(last);
        let i = (pos.floor() as usize).min(self.knots.len() - 2);
        let fract = pos - i as f64;
        if fract <= 0.0 {
            return Ok(self.knots[i]);
        }
        Ok(self.knots[i].slerp(&self.knots[i + 1], fract))
    }

    /// Source time of a video time. The sampling phase correction of the alignment can put the
    /// first or last frame up to half a video frame past the track, such times are held at its ends.
    fn frame_source_time(&self, time: f64) -> f64 {
        let source = self.parameter.source_time(time);
        let band = self.parameter.interval() * 0.5;
        if source >= -band && source <= self.span() + band {
            source.max(0.0).min(self.span())
        } else {
            source
        }
    }

    /// Orientation at a video time.
    pub fn orientation_at(&self, time: f64) -> Result<Quat64, SyncError> {
        self.orientation_at_source(self.frame_source_time(time))
    }

    /// Low-pass filtered orientation at a video time: the kernel-weighted mean of the rotations
    /// relative to the orientation at `time`. Taps are one video frame apart and are clamped to
    /// the integrated span near the ends of the recording.
    pub fn smoothed_orientation_at(&self, time: f64, kernel: &SmoothingKernel) -> Result<Quat64, SyncError> {
        let center_time = self.frame_source_time(time);
        let center = self.orientation_at_source(center_time)?;
        if kernel.coefficients().len() <= 1 {
            return Ok(center);
        }
        let inverse = center.inverse();
        let tap_interval = self.parameter.interval();
        let span = self.span();

        let mut mean = Vector3::zeros();
        for (offset, weight) in kernel.taps() {
            let tap_time = (center_time + offset as f64 * tap_interval).max(0.0).min(span);
            let q = self.orientation_at_source(tap_time)?;
            mean += (inverse * q).scaled_axis() * weight;
        }

        Ok(center * Quat64::from_scaled_axis(mean))
    }

    /// Rotation taking a ray of the stabilized camera at `from` into the camera that was exposing at `to`.
    pub fn correction_between(&self, from: f64, to: f64, kernel: &SmoothingKernel) -> Result<Quat64, SyncError> {
        let smoothed = self.smoothed_orientation_at(from, kernel)?;
        self.correction_from_smoothed(&smoothed, to)
    }

    /// Same as [`Self::correction_between`] with the smoothed orientation of the frame computed
    /// once by the caller and shared by every row.
    /// Row times of the first and last frames may reach past the track, those are held at its ends.
    pub fn correction_from_smoothed(&self, smoothed: &Quat64, to: f64) -> Result<Quat64, SyncError> {
        let time = self.parameter.source_time(to).max(0.0).min(self.span());
        Ok(self.orientation_at_source(time)?.inverse() * smoothed)
    }

    /// Orientation at every video frame.
    pub fn rotation_quaternions(&self, frame_count: usize, video_frequency: f64) -> Result<Vec<Quat64>, SyncError> {
        (0..frame_count).map(|i| self.orientation_at(i as f64 / video_frequency)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filtering::KaiserWindow;
    use test_case::test_case;

    fn constant_rate(omega: Vector3<f64>, frequency: f64, n: usize) -> AngularVelocity {
        AngularVelocity::new(frequency, vec![omega; n]).unwrap()
    }

    fn angle_between(a: &Quat64, b: &Quat64) -> f64 {
        a.angle_to(b)
    }

    #[test_case(0.37)]
    #[test_case(1.0)]
    #[test_case(2.5013)]
    #[test_case(4.0)]
    fn constant_rate_integrates_to_exponential_map(duration: f64) {
        let omega = Vector3::new(0.3, -0.2, 0.5);
        let series = constant_rate(omega, 200.0, 800);
        let track = RotationTrack::new(&series, ResamplerParameter::new(30.0, 0.0, 0.0)).unwrap();

        let expected = Quat64::from_scaled_axis(omega * duration);
        let actual = track.orientation_at_source(duration).unwrap();
        assert!(angle_between(&expected, &actual) < 1e-9);
    }

    #[test]
    fn result_does_not_depend_on_sampling_rate() {
        let omega = Vector3::new(-0.7, 0.1, 0.25);
        let coarse = RotationTrack::new(&constant_rate(omega, 50.0, 200), ResamplerParameter::new(30.0, 0.0, 0.0)).unwrap();
        let fine = RotationTrack::new(&constant_rate(omega, 1000.0, 4000), ResamplerParameter::new(30.0, 0.0, 0.0)).unwrap();
        for t in [0.013, 0.5, 1.777, 3.9] {
            let a = coarse.orientation_at_source(t).unwrap();
            let b = fine.orientation_at_source(t).unwrap();
            assert!(angle_between(&a, &b) < 1e-9);
        }
    }

    #[test]
    fn queries_outside_track_fail() {
        let track = RotationTrack::new(&constant_rate(Vector3::x(), 100.0, 100), ResamplerParameter::new(30.0, 0.5, 0.0)).unwrap();
        assert!(matches!(track.orientation_at(-0.6), Err(SyncError::OutOfRange { .. })));
        assert!(matches!(track.orientation_at(0.6), Err(SyncError::OutOfRange { .. })));
        assert!(track.orientation_at(0.4).is_ok());
    }

    #[test]
    fn video_time_is_mapped_through_parameter() {
        let series = constant_rate(Vector3::new(0.0, 0.0, 1.0), 100.0, 1000);
        let parameter = ResamplerParameter::new(30.0, 0.5, 5.0).with_clock_drift(0.01);
        let track = RotationTrack::new(&series, parameter).unwrap();
        let a = track.orientation_at(2.0).unwrap();
        let b = track.orientation_at_source(0.5 + 2.0 * 1.01).unwrap();
        assert!(angle_between(&a, &b) < 1e-12);
    }

    #[test]
    fn correction_without_smoothing_is_relative_rotation() {
        let series = constant_rate(Vector3::new(0.1, 0.4, -0.3), 100.0, 500);
        let track = RotationTrack::new(&series, ResamplerParameter::new(30.0, 0.0, 0.0)).unwrap();
        let (t1, t2) = (1.2, 1.2137);
        let expected = track.orientation_at(t2).unwrap().inverse() * track.orientation_at(t1).unwrap();
        let actual = track.correction_between(t1, t2, &SmoothingKernel::identity()).unwrap();
        assert!(angle_between(&expected, &actual) < 1e-12);

        let same = track.correction_between(t1, t1, &SmoothingKernel::identity()).unwrap();
        assert!(same.angle() < 1e-12);
    }

    #[test]
    fn row_times_past_the_track_are_held() {
        let series = constant_rate(Vector3::new(0.0, 0.2, 0.0), 100.0, 100);
        let track = RotationTrack::new(&series, ResamplerParameter::new(30.0, 0.0, 0.0)).unwrap();
        let start = track.orientation_at(0.0).unwrap();
        let held = track.correction_from_smoothed(&start, -0.01).unwrap();
        assert!(held.angle() < 1e-12);
        assert!(track.correction_between(-0.05, 0.0, &SmoothingKernel::identity()).is_err());
    }

    #[test]
    fn frames_within_half_a_frame_of_the_track_are_held() {
        let series = constant_rate(Vector3::new(0.0, 0.0, 0.4), 100.0, 300);
        // Start slightly before the first sample, as after the sampling phase correction
        let track = RotationTrack::new(&series, ResamplerParameter::new(30.0, -0.016, 0.0)).unwrap();
        assert!(track.orientation_at(0.0).unwrap().angle() < 1e-12);
        assert!(track.smoothed_orientation_at(0.0, &KaiserWindow::new(31).kernel(2.0)).is_ok());

        let end = track.span() + 0.016 + 0.01;
        let held = track.orientation_at(end).unwrap();
        assert!(angle_between(&held, &track.orientation_at_source(track.span()).unwrap()) < 1e-12);
        assert!(matches!(track.orientation_at(-0.02), Err(SyncError::OutOfRange { .. })));
    }

    #[test]
    fn uniform_rotation_is_left_alone_by_symmetric_kernel() {
        let series = constant_rate(Vector3::new(0.0, 0.5, 0.0), 200.0, 2000);
        let track = RotationTrack::new(&series, ResamplerParameter::new(30.0, 0.0, 0.0)).unwrap();
        let kernel = KaiserWindow::new(31).kernel(2.0);
        let correction = track.correction_between(5.0, 5.0, &kernel).unwrap();
        assert!(correction.angle() < 1e-9);
    }

    #[test]
    fn smoothing_removes_shake() {
        // Slow pan with a 6 Hz wobble on the same axis, sampled at the wobble peak
        let frequency = 200.0;
        let data = (0..2000).map(|i| {
            let t = i as f64 / frequency;
            Vector3::new(0.0, 0.3 + 0.2 * (2.0 * std::f64::consts::PI * 6.0 * t).cos(), 0.0)
        }).collect();
        let series = AngularVelocity::new(frequency, data).unwrap();
        let track = RotationTrack::new(&series, ResamplerParameter::new(30.0, 0.0, 0.0)).unwrap();
        let kernel = KaiserWindow::new(31).kernel(0.0);

        let t = 5.0 + 1.0 / 24.0;
        let smoothed = track.smoothed_orientation_at(t, &kernel).unwrap();
        let raw = track.orientation_at(t).unwrap();
        let pan_only = Quat64::from_scaled_axis(Vector3::new(0.0, 0.3 * t, 0.0));
        assert!(angle_between(&smoothed, &pan_only) < angle_between(&raw, &pan_only));
    }

    #[test]
    fn frame_orientations() {
        let series = constant_rate(Vector3::new(0.0, 0.0, 0.3), 100.0, 400);
        let track = RotationTrack::new(&series, ResamplerParameter::new(30.0, 0.0, 0.0)).unwrap();
        let quats = track.rotation_quaternions(90, 30.0).unwrap();
        assert_eq!(quats.len(), 90);
        assert!(quats[0].angle() < 1e-12);
        assert!((quats[30].angle() - 0.3).abs() < 1e-9);
    }
}
