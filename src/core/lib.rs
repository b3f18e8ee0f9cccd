// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright © 2026 Gyrosync contributors

pub mod gyro_source;
pub mod filtering;
pub mod integration;
pub mod lens_profile;
pub mod stabilization_params;
pub mod synchronization;
pub mod adaptive_strength;
pub mod stabilization;

use std::collections::BTreeMap;
use std::sync::Arc;

use nalgebra::Vector3;
use parking_lot::RwLock;

use adaptive_strength::FilterStrengthSelector;
use filtering::KaiserWindow;
use gyro_source::{ AngularVelocity, Quat64, ResamplerParameter };
use integration::RotationTrack;
use stabilization::{ FrameTransform, WarpMapper };
use stabilization_params::{ SyncParams, VideoParam };
use synchronization::{ ClockDrift, Segment, SubframeOffset, SubframeSearch };

lazy_static::lazy_static! {
    static ref THREAD_POOL: rayon::ThreadPool = rayon::ThreadPoolBuilder::new().build().unwrap();
}

#[derive(thiserror::Error, Debug)]
pub enum SyncError {
    #[error("Time {time} is outside of the recorded span [{start}, {end}]")]        OutOfRange { time: f64, start: f64, end: f64 },
    #[error("Angular velocity series is empty")]                                   EmptySeries,
    #[error("No {0} angular velocity loaded")]                                     MissingSeries(&'static str),
    #[error("Invalid frequency {0}")]                                              InvalidFrequency(f64),
    #[error("Video has no frames")]                                                EmptyVideo,
    #[error("Reference of {reference} samples doesn't fit in {measured} measured samples")] DegenerateSearchRange { reference: usize, measured: usize },
    #[error("Length mismatch: expected {expected}, got {actual}")]                 LengthMismatch { expected: usize, actual: usize },
    #[error("Not synchronized yet")]                                               NotSynchronized,
    #[error("Invalid sub-frame search: range {range}, step {step}")]               InvalidSubframeSearch { range: f64, step: f64 },
}

/// Current alignment of the measured series to the video clock.
#[derive(Default, Clone)]
pub struct Alignment {
    pub resampler: Option<ResamplerParameter>,
    pub clock_drift: Option<ClockDrift>,
    pub track: Option<Arc<RotationTrack>>,
}

pub struct SyncManager {
    pub measured: Arc<RwLock<Option<Arc<AngularVelocity>>>>,
    pub estimated: Arc<RwLock<Option<Arc<AngularVelocity>>>>,
    pub video: Arc<RwLock<VideoParam>>,
    pub params: Arc<RwLock<SyncParams>>,
    pub alignment: Arc<RwLock<Alignment>>,
}

impl Default for SyncManager {
    fn default() -> Self {
        Self {
            measured: Arc::new(RwLock::new(None)),
            estimated: Arc::new(RwLock::new(None)),
            video: Arc::new(RwLock::new(VideoParam::default())),
            params: Arc::new(RwLock::new(SyncParams::default())),
            alignment: Arc::new(RwLock::new(Alignment::default())),
        }
    }
}

impl SyncManager {
    pub fn set_video(&self, video: VideoParam) {
        *self.video.write() = video;
        self.clear_alignment();
    }
    pub fn set_params(&self, params: SyncParams) { *self.params.write() = params; }

    /// Takes the raw sensor samples, rotated into the camera frame once here.
    pub fn set_measured_angular_velocity(&self, series: AngularVelocity) {
        let rotation = self.video.read().camera.mounting_rotation();
        *self.measured.write() = Some(Arc::new(series.with_mounting_rotation(&rotation)));
        self.clear_alignment();
    }

    pub fn set_estimated_angular_velocity(&self, series: AngularVelocity) {
        *self.estimated.write() = Some(Arc::new(series));
        self.clear_alignment();
    }

    pub fn estimate_from_board_poses(&self, rotation_vectors: &BTreeMap<usize, Vector3<f64>>) -> Result<(), SyncError> {
        let (frame_count, frequency) = { let v = self.video.read(); (v.frame_count, v.frequency) };
        let series = synchronization::estimate_pose::from_board_poses(rotation_vectors, frame_count, frequency)?;
        self.set_estimated_angular_velocity(series);
        Ok(())
    }

    pub fn estimate_from_optical_flow(&self, flow: &[Vector3<f64>], confidence: Vec<f64>) -> Result<(), SyncError> {
        let series = {
            let video = self.video.read();
            synchronization::estimate_pose::from_optical_flow(flow, confidence, &video.camera, video.frequency)?
        };
        self.set_estimated_angular_velocity(series);
        Ok(())
    }

    fn measured(&self) -> Result<Arc<AngularVelocity>, SyncError> {
        self.measured.read().clone().ok_or(SyncError::MissingSeries("measured"))
    }
    fn estimated(&self) -> Result<Arc<AngularVelocity>, SyncError> {
        self.estimated.read().clone().ok_or(SyncError::MissingSeries("estimated"))
    }
    fn video_frequency(&self) -> Result<f64, SyncError> {
        let frequency = self.video.read().frequency;
        if !(frequency > 0.0) || !frequency.is_finite() {
            return Err(SyncError::InvalidFrequency(frequency));
        }
        Ok(frequency)
    }
    fn frame_count(&self) -> Result<usize, SyncError> {
        let frame_count = self.video.read().frame_count;
        let frame_count = if frame_count > 0 { frame_count } else { self.estimated.read().as_ref().map(|x| x.len()).unwrap_or_default() };
        if frame_count == 0 {
            return Err(SyncError::EmptyVideo);
        }
        Ok(frame_count)
    }
    fn subframe_search(&self) -> Result<SubframeSearch, SyncError> {
        let params = self.params.read();
        SubframeSearch { video_frequency: self.video_frequency()?, range: params.subframe_range, step: params.subframe_step }.validate()
    }

    /// Correlation of `length` estimated samples starting at `begin` (0 = all of them) against the measured series.
    pub fn correlation_coefficients(&self, begin: usize, length: usize) -> Result<Vec<f64>, SyncError> {
        let (measured, estimated) = (self.measured()?, self.estimated()?);
        let length = if length == 0 { estimated.len() - begin.min(estimated.len()) } else { length };
        let segment = Segment::new(&estimated, begin, length)?;
        let frequency = self.video_frequency()?;
        let search_range = self.params.read().search_range;

        THREAD_POOL.install(|| synchronization::correlate(&segment, &measured, frequency, search_range))
    }

    pub fn subframe_offset(&self, coefficients: &[f64], begin: usize, length: usize) -> Result<SubframeOffset, SyncError> {
        let (measured, estimated) = (self.measured()?, self.estimated()?);
        let length = if length == 0 { estimated.len() - begin.min(estimated.len()) } else { length };
        let segment = Segment::new(&estimated, begin, length)?;
        let search = self.subframe_search()?;

        THREAD_POOL.install(|| synchronization::refine(coefficients, &segment, &measured, &search))
    }

    /// Aligns the whole recording, with clock drift estimation when enabled, and builds the rotation track.
    pub fn synchronize(&self) -> Result<ResamplerParameter, SyncError> {
        let (measured, estimated) = (self.measured()?, self.estimated()?);
        let frequency = self.video_frequency()?;
        let search = self.subframe_search()?;
        let (estimate_drift, window, search_range) = {
            let params = self.params.read();
            (params.estimate_clock_drift, params.clock_drift_window, params.search_range)
        };

        let (parameter, clock_drift) = if estimate_drift {
            let drift = THREAD_POOL.install(|| synchronization::estimate_clock_drift(&estimated, &measured, window, search_range, &search))?;
            (drift.resampler_parameter(frequency, &estimated), Some(drift))
        } else {
            let coefficients = self.correlation_coefficients(0, 0)?;
            let offset = self.subframe_offset(&coefficients, 0, 0)?;
            log::info!("Offset: {:.3} frames, {:.6} s", offset.frame, offset.time_offset);
            (ResamplerParameter::new(frequency, offset.time_offset, estimated.length_in_seconds()), None)
        };

        self.set_resampler_parameter(parameter)?;
        self.alignment.write().clock_drift = clock_drift;
        Ok(parameter)
    }

    /// Uses an externally known alignment.
    pub fn set_resampler_parameter(&self, parameter: ResamplerParameter) -> Result<(), SyncError> {
        let measured = self.measured()?;
        let track = RotationTrack::new(&measured, parameter)?;
        let mut alignment = self.alignment.write();
        alignment.resampler = Some(parameter);
        alignment.clock_drift = None;
        alignment.track = Some(Arc::new(track));
        Ok(())
    }

    pub fn resampler_parameter(&self) -> Option<ResamplerParameter> { self.alignment.read().resampler }
    pub fn clock_drift(&self) -> Option<ClockDrift> { self.alignment.read().clock_drift.clone() }

    pub fn rotation_track(&self) -> Result<Arc<RotationTrack>, SyncError> {
        self.alignment.read().track.clone().ok_or(SyncError::NotSynchronized)
    }

    pub fn rotation_quaternions(&self) -> Result<Vec<Quat64>, SyncError> {
        self.rotation_track()?.rotation_quaternions(self.frame_count()?, self.video_frequency()?)
    }

    /// Estimated samples next to the measured ones resampled at the synchronized times.
    pub fn synchronized_angular_velocity(&self) -> Result<Vec<(Vector3<f64>, Vector3<f64>)>, SyncError> {
        let (measured, estimated) = (self.measured()?, self.estimated()?);
        let parameter = self.resampler_parameter().ok_or(SyncError::NotSynchronized)?;
        // The sampling phase correction may put the first frame just before the recording
        let resampled = measured.resample_within(&parameter, parameter.interval() * 0.5)?;
        if resampled.len() != estimated.len() {
            return Err(SyncError::LengthMismatch { expected: estimated.len(), actual: resampled.len() });
        }
        Ok(estimated.data().iter().copied().zip(resampled).collect())
    }

    fn window(&self) -> KaiserWindow {
        KaiserWindow::new(self.params.read().kernel_length)
    }

    /// Strongest safe smoothing for every frame. `progress(done, total)` is called from worker threads.
    pub fn filter_strengths<F: Fn(usize, usize) + Sync>(&self, progress: F) -> Result<Vec<f64>, SyncError> {
        let track = self.rotation_track()?;
        let (frame_count, frequency) = (self.frame_count()?, self.video_frequency()?);
        let (selector, zoom) = {
            let params = self.params.read();
            (FilterStrengthSelector::from_params(&params), params.zoom)
        };
        let camera = self.video.read().camera.clone();
        let mapper = WarpMapper::new(&track, &camera, self.window(), zoom);

        THREAD_POOL.install(|| selector.select(&mapper, frame_count, frequency, &progress))
    }

    pub fn frame_transform(&self, frame: usize, strength: f64) -> Result<FrameTransform, SyncError> {
        let track = self.rotation_track()?;
        let frequency = self.video_frequency()?;
        let camera = self.video.read().camera.clone();
        let mapper = WarpMapper::new(&track, &camera, self.window(), self.params.read().zoom);

        THREAD_POOL.install(|| mapper.frame_transform(frame as f64 / frequency, strength))
    }

    /// Source pixel coordinates of every stabilized pixel of `frame`.
    pub fn remap_grid(&self, frame: usize, strength: f64) -> Result<Vec<(f32, f32)>, SyncError> {
        let transform = self.frame_transform(frame, strength)?;
        let camera = self.video.read().camera.clone();
        Ok(THREAD_POOL.install(|| transform.remap_grid(&camera)))
    }

    /// Observed pixel positions in `frame` with the rolling shutter of `line_delay` removed.
    pub fn unroll_points(&self, frame: usize, points: &[(f64, f64)], line_delay: f64) -> Result<Vec<(f64, f64)>, SyncError> {
        let track = self.rotation_track()?;
        let frequency = self.video_frequency()?;
        let camera = self.video.read().camera.clone();
        let mapper = WarpMapper::new(&track, &camera, self.window(), 1.0);
        mapper.unroll_points(frame as f64 / frequency, points, line_delay)
    }

    pub fn clear_alignment(&self) {
        *self.alignment.write() = Alignment::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lens_profile::CameraIntrinsics;

    fn signal(t: f64) -> Vector3<f64> {
        Vector3::new((t * 2.3).sin() + 0.3 * (t * 7.1).cos(), (t * 1.7).cos() * 0.8, (t * 3.1).sin() * (t * 0.5).cos())
    }

    fn manager(frames: usize, start: f64) -> SyncManager {
        let fps = 30.0;
        let camera = CameraIntrinsics {
            fx: 400.0, fy: 400.0, cx: 159.5, cy: 119.5,
            width: 320, height: 240,
            line_delay: 2e-5,
            ..Default::default()
        };
        let manager = SyncManager::default();
        manager.set_video(VideoParam::new(fps, frames, Arc::new(camera), "test.mp4"));
        manager.set_params(SyncParams { kernel_length: 31, clock_drift_window: 200, ..Default::default() });

        let measured = (0..(frames as f64 / fps * 1000.0) as usize + 3000).map(|i| signal(i as f64 / 1000.0) * 0.2).collect();
        manager.set_measured_angular_velocity(AngularVelocity::new(1000.0, measured).unwrap());
        let estimated = (0..frames).map(|k| signal(start + k as f64 / fps) * 0.2).collect();
        manager.set_estimated_angular_velocity(AngularVelocity::new(fps, estimated).unwrap());
        manager
    }

    #[test]
    fn nothing_before_synchronization() {
        let manager = manager(300, 0.4);
        assert!(matches!(manager.rotation_track(), Err(SyncError::NotSynchronized)));
        assert!(matches!(manager.filter_strengths(|_, _| {}), Err(SyncError::NotSynchronized)));
        assert!(matches!(SyncManager::default().synchronize(), Err(SyncError::MissingSeries("measured"))));
    }

    #[test]
    fn full_pipeline() {
        let manager = manager(450, 0.4);
        let parameter = manager.synchronize().unwrap();
        let phase = (1.0 / 30.0 - 1.0 / 1000.0) * 0.5;
        assert!((parameter.start - (0.4 - phase)).abs() < 0.005, "{:?}", parameter);
        assert!(parameter.drift.abs() < 1e-4);
        assert!(manager.clock_drift().is_some());

        let pairs = manager.synchronized_angular_velocity().unwrap();
        assert_eq!(pairs.len(), 450);

        let quats = manager.rotation_quaternions().unwrap();
        assert_eq!(quats.len(), 450);

        let strengths = manager.filter_strengths(|_, _| {}).unwrap();
        assert_eq!(strengths.len(), 450);
        let params = manager.params.read().clone();
        for w in strengths.windows(2) {
            assert!((w[1] - w[0]).abs() <= params.maximum_gradient + 1e-9);
        }

        let transform = manager.frame_transform(100, strengths[100]).unwrap();
        assert_eq!(transform.matrices.len(), 240);
        assert_eq!(manager.remap_grid(100, strengths[100]).unwrap().len(), 320 * 240);
    }

    #[test]
    fn single_offset_without_drift() {
        let manager = manager(300, 1.1);
        manager.params.write().estimate_clock_drift = false;
        let parameter = manager.synchronize().unwrap();
        let phase = (1.0 / 30.0 - 1.0 / 1000.0) * 0.5;
        assert!((parameter.start - (1.1 - phase)).abs() < 0.002);
        assert_eq!(parameter.drift, 0.0);
        assert!(manager.clock_drift().is_none());
    }

    #[test]
    fn gyro_starting_with_the_video() {
        let manager = manager(300, 0.0);
        manager.params.write().estimate_clock_drift = false;
        let parameter = manager.synchronize().unwrap();
        // Negative by the sampling phase correction
        assert!(parameter.start < 0.0 && parameter.start > -0.5 / 30.0);

        let quats = manager.rotation_quaternions().unwrap();
        assert_eq!(quats.len(), 300);
        assert!(quats[0].angle() < 1e-12);
        assert_eq!(manager.synchronized_angular_velocity().unwrap().len(), 300);
        assert_eq!(manager.filter_strengths(|_, _| {}).unwrap().len(), 300);
        assert_eq!(manager.frame_transform(0, 0.0).unwrap().matrices.len(), 240);
        assert_eq!(manager.unroll_points(0, &[(10.0, 10.0)], 2e-5).unwrap().len(), 1);
    }

    #[test]
    fn invalid_subframe_step_is_rejected() {
        let manager = manager(300, 0.4);
        manager.set_params(SyncParams { subframe_step: 0.0, estimate_clock_drift: false, ..Default::default() });
        assert!(matches!(manager.synchronize(), Err(SyncError::InvalidSubframeSearch { .. })));
        manager.set_params(SyncParams { subframe_range: -1.0, ..Default::default() });
        assert!(matches!(manager.synchronize(), Err(SyncError::InvalidSubframeSearch { .. })));
    }

    #[test]
    fn new_data_invalidates_alignment() {
        let manager = manager(300, 0.4);
        manager.set_resampler_parameter(ResamplerParameter::new(30.0, 0.4, 10.0)).unwrap();
        assert!(manager.rotation_track().is_ok());
        manager.set_estimated_angular_velocity(AngularVelocity::new(30.0, vec![Vector3::zeros(); 300]).unwrap());
        assert!(manager.rotation_track().is_err());
        assert!(manager.resampler_parameter().is_none());
    }
}
