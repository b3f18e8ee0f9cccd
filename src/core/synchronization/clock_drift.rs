// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright © 2026 Gyrosync contributors

use serde::Serialize;

use super::{ correlate, refine, Segment, SubframeSearch };
use crate::gyro_source::{ AngularVelocity, ResamplerParameter };
use crate::SyncError;

#[derive(Clone, Debug, Default, Serialize)]
pub struct ClockDrift {
    /// Time offset of the first window, in seconds.
    pub offset_begin: f64,
    /// Time offset of the last window, relative to its own first frame.
    pub offset_end: f64,
    /// Relative rate error between the clocks, 0 when they run at the same rate.
    pub ratio: f64,
    pub window: usize,
    /// Correlation curves of the two windows, one score per integer frame offset.
    pub correlation_begin: Vec<f64>,
    pub correlation_end: Vec<f64>,
}

impl ClockDrift {
    /// Alignment of the whole estimated series with the drift folded in.
    pub fn resampler_parameter(&self, video_frequency: f64, estimated: &AngularVelocity) -> ResamplerParameter {
        ResamplerParameter::new(video_frequency, self.offset_begin, estimated.length_in_seconds())
            .with_clock_drift(self.ratio)
    }
}

/// Aligns a window at the start and a window at the end of the estimated series independently,
/// the difference of the two offsets is the drift accumulated in between.
pub fn estimate_clock_drift(estimated: &AngularVelocity, measured: &AngularVelocity, window: usize, search_range: Option<usize>, search: &SubframeSearch) -> Result<ClockDrift, SyncError> {
    let frame_count = estimated.len();
    let window = window.min(frame_count / 2);
    if window == 0 {
        return Err(SyncError::EmptyVideo);
    }
    let video_frequency = search.video_frequency;

    let begin = Segment::new(estimated, 0, window)?;
    let correlation_begin = correlate(&begin, measured, video_frequency, search_range)?;
    let offset_begin = refine(&correlation_begin, &begin, measured, search)?.time_offset;

    let end_frame = frame_count - window;
    let end_time = end_frame as f64 / video_frequency;
    let end = Segment::new(estimated, end_frame, window)?;
    // The end window has to be free to land anywhere after the drift accumulated
    let correlation_end = correlate(&end, measured, video_frequency, None)?;
    let offset_end = refine(&correlation_end, &end, measured, search)?.time_offset - end_time;

    let ratio = if end_frame > 0 { (offset_end - offset_begin) / end_time } else { 0.0 };

    log::info!("Clock drift: offset begin {:.6} s, offset end {:.6} s, ratio {:.3e} (window {} frames)", offset_begin, offset_end, ratio, window);

    Ok(ClockDrift { offset_begin, offset_end, ratio, window, correlation_begin, correlation_end })
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;
    use test_case::test_case;

    fn signal(t: f64) -> Vector3<f64> {
        Vector3::new((t * 2.3).sin() + 0.3 * (t * 7.1).cos(), (t * 1.7).cos() * 0.8, (t * 3.1).sin() * (t * 0.5).cos())
    }

    // Frames spaced `rate / fps` seconds apart on the measured clock
    fn video(fps: f64, frames: usize, start: f64, rate: f64) -> AngularVelocity {
        AngularVelocity::new(fps, (0..frames).map(|k| signal(start + k as f64 / fps * rate)).collect()).unwrap()
    }

    fn gyro(frequency: f64, seconds: f64) -> AngularVelocity {
        AngularVelocity::new(frequency, (0..(frequency * seconds) as usize).map(|i| signal(i as f64 / frequency)).collect()).unwrap()
    }

    #[test_case(1.0,    0.0;    "undrifted")]
    #[test_case(1.0001, 1e-4;   "slow video clock")]
    #[test_case(0.9998, -2e-4;  "fast video clock")]
    fn recovers_injected_drift(rate: f64, expected: f64) {
        let fps = 30.0;
        let measured = gyro(1000.0, 90.0);
        let estimated = video(fps, 2400, 0.5, rate);

        let drift = estimate_clock_drift(&estimated, &measured, 1000, None, &SubframeSearch::new(fps)).unwrap();
        assert_eq!(drift.window, 1000);
        assert!((drift.ratio - expected).abs() < 2e-5, "ratio {}", drift.ratio);
        let phase = (1.0 / fps - 1.0 / 1000.0) * 0.5;
        assert!((drift.offset_begin - (0.5 - phase)).abs() < 0.005, "offset {}", drift.offset_begin);
    }

    #[test]
    fn drift_keeps_frame_count() {
        let fps = 30.0;
        let measured = gyro(1000.0, 90.0);
        let estimated = video(fps, 2400, 0.5, 1.0001);
        let drift = estimate_clock_drift(&estimated, &measured, 1000, None, &SubframeSearch::new(fps)).unwrap();
        let param = drift.resampler_parameter(fps, &estimated);
        assert_eq!(param.rows(&measured).unwrap(), 2400);
        assert_eq!(param.drift, drift.ratio);
    }

    #[test]
    fn window_is_limited_to_half_of_the_video() {
        let fps = 30.0;
        let measured = gyro(1000.0, 20.0);
        let estimated = video(fps, 300, 1.2, 1.0);
        let drift = estimate_clock_drift(&estimated, &measured, 1000, None, &SubframeSearch::new(fps)).unwrap();
        assert_eq!(drift.window, 150);
        assert!(drift.ratio.abs() < 2e-4);

        let best = drift.correlation_begin.iter().enumerate().min_by(|a, b| a.1.total_cmp(b.1)).map(|x| x.0);
        assert_eq!(best, Some(36));
        let json = serde_json::to_value(&drift).unwrap();
        assert_eq!(json["correlation_begin"].as_array().unwrap().len(), drift.correlation_begin.len());
        assert_eq!(json["correlation_end"].as_array().unwrap().len(), drift.correlation_end.len());
    }

    #[test]
    fn single_frame_video_is_rejected() {
        let measured = gyro(1000.0, 20.0);
        let estimated = video(30.0, 1, 0.0, 1.0);
        assert!(matches!(
            estimate_clock_drift(&estimated, &measured, 1000, None, &SubframeSearch::new(30.0)),
            Err(SyncError::EmptyVideo)
        ));
    }
}
