// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright © 2026 Gyrosync contributors

use nalgebra::{ Matrix3, Vector3 };

use crate::filtering::{ KaiserWindow, SmoothingKernel };
use crate::integration::RotationTrack;
use crate::lens_profile::CameraIntrinsics;
use crate::SyncError;

mod frame_transform;
pub use frame_transform::FrameTransform;

// Slack for border points that map exactly onto the frame edge
const EDGE_EPSILON: f64 = 1e-6;

/// Exposure time of row `v` relative to the middle row of the frame.
pub fn row_time_offset(camera: &CameraIntrinsics, v: f64) -> f64 {
    camera.line_delay * (v - camera.height as f64 * 0.5)
}

/// Source pixel sampled by the stabilized pixel `(u, v)` given the correction of its row.
/// The flag is set when the distortion polynomial diverged and the undistorted point was used instead.
pub fn map_point(rotation: &Matrix3<f64>, camera: &CameraIntrinsics, zoom: f64, (u, v): (f64, f64)) -> ((f64, f64), bool) {
    let p = Vector3::new((u - camera.cx) / (camera.fx * zoom), (v - camera.cy) / (camera.fy * zoom), 1.0);
    let xyw = rotation * p;
    let (x1, y1) = (xyw.x / xyw.z, xyw.y / xyw.z);

    let ((x2, y2), clamped) = match camera.inverse_distort(x1, y1) {
        Some(distorted) => (distorted, false),
        None => ((x1, y1), true)
    };

    ((x2 * camera.fx + camera.cx, y2 * camera.fy + camera.cy), clamped)
}

/// `per_side` points on every edge of a `w`×`h` rectangle, corners included once, clockwise from the origin.
pub fn points_around_rect(w: f64, h: f64, per_side: usize) -> Vec<(f64, f64)> {
    let cnt = per_side.max(2) - 1;
    let (wstep, hstep) = (w / cnt as f64, h / cnt as f64);

    // ordered!
    let mut points: Vec<(f64, f64)> = Vec::with_capacity(cnt * 4);
    for i in 0..cnt { points.push((i as f64 * wstep,         0.0)); }
    for i in 0..cnt { points.push((w,                        i as f64 * hstep)); }
    for i in 0..cnt { points.push(((cnt - i) as f64 * wstep, h)); }
    for i in 0..cnt { points.push((0.0,                      (cnt - i) as f64 * hstep)); }
    points
}

/// Rolling shutter aware mapping from stabilized to original pixels for one camera and track.
pub struct WarpMapper<'a> {
    pub track: &'a RotationTrack,
    pub camera: &'a CameraIntrinsics,
    pub window: KaiserWindow,
    pub zoom: f64,
}

impl<'a> WarpMapper<'a> {
    pub fn new(track: &'a RotationTrack, camera: &'a CameraIntrinsics, window: KaiserWindow, zoom: f64) -> Self {
        Self { track, camera, window, zoom }
    }

    pub fn frame_transform(&self, frame_time: f64, strength: f64) -> Result<FrameTransform, SyncError> {
        FrameTransform::at_frame(self.track, self.camera, &self.window.kernel(strength), frame_time, self.zoom)
    }

    /// Whether any of `border` (stabilized pixel positions) samples outside of the recorded frame.
    /// Only the border is tested, not every pixel: the warp is smooth, so the frame edge is
    /// where the view leaves the footage first.
    pub fn has_black_space(&self, frame_time: f64, strength: f64, border: &[(f64, f64)]) -> Result<bool, SyncError> {
        let smoothed = self.track.smoothed_orientation_at(frame_time, &self.window.kernel(strength))?;
        let (max_x, max_y) = ((self.camera.width as f64 - 1.0).max(0.0) + EDGE_EPSILON, (self.camera.height as f64 - 1.0).max(0.0) + EDGE_EPSILON);

        for &(u, v) in border {
            let correction = self.track.correction_from_smoothed(&smoothed, frame_time + row_time_offset(self.camera, v))?;
            let ((x, y), _) = map_point(correction.to_rotation_matrix().matrix(), self.camera, self.zoom, (u, v));
            if !(-EDGE_EPSILON..=max_x).contains(&x) || !(-EDGE_EPSILON..=max_y).contains(&y) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Observed pixel positions (eg. calibration board corners) of the frame at `frame_time` with
    /// the rolling shutter of `line_delay` rolled back to the middle row. No smoothing, no zoom.
    pub fn unroll_points(&self, frame_time: f64, points: &[(f64, f64)], line_delay: f64) -> Result<Vec<(f64, f64)>, SyncError> {
        let reference = self.track.smoothed_orientation_at(frame_time, &SmoothingKernel::identity())?;
        points.iter().map(|&(u, v)| {
            let row_time = frame_time + line_delay * (v - self.camera.height as f64 * 0.5);
            let correction = self.track.correction_from_smoothed(&reference, row_time)?;
            let (p, _) = map_point(correction.to_rotation_matrix().matrix(), self.camera, 1.0, (u, v));
            Ok(p)
        }).collect()
    }

    pub fn border(&self, per_side: usize) -> Vec<(f64, f64)> {
        let (w, h) = ((self.camera.width as f64 - 1.0).max(0.0), (self.camera.height as f64 - 1.0).max(0.0));
        points_around_rect(w, h, per_side)
    }
}
