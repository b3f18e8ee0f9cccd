// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright © 2026 Gyrosync contributors

use std::collections::BTreeMap;

use nalgebra::Vector3;

use crate::gyro_source::{ AngularVelocity, Quat64 };
use crate::lens_profile::CameraIntrinsics;
use crate::SyncError;

/// Angular velocity of the camera from calibration board poses (board to camera rotation
/// vectors keyed by frame number).
///
/// A frame gets confidence 1 only when the board was also found in the previous frame.
pub fn from_board_poses(rotation_vectors: &BTreeMap<usize, Vector3<f64>>, frame_count: usize, video_frequency: f64) -> Result<AngularVelocity, SyncError> {
    if frame_count == 0 {
        return Err(SyncError::EmptyVideo);
    }
    let mut data = vec![Vector3::zeros(); frame_count];
    let mut confidence = vec![0.0; frame_count];

    for (&frame, rvec) in rotation_vectors.range(1..frame_count) {
        let Some(prev) = rotation_vectors.get(&(frame - 1)) else { continue; };

        let q = Quat64::from_scaled_axis(*rvec).inverse();
        let q_prev = Quat64::from_scaled_axis(*prev).inverse();
        let diff = (q * q_prev.inverse()).scaled_axis();

        data[frame] = q.inverse() * diff * video_frequency;
        confidence[frame] = 1.0;
    }

    let found = confidence.iter().filter(|c| **c > 0.0).count();
    log::info!("Board poses: {} of {} frames usable", found, frame_count);

    AngularVelocity::with_confidence(video_frequency, data, confidence)
}

/// Angular velocity from per-frame image shifts: `x` and `y` in pixels, `z` the in-plane rotation in radians.
pub fn from_optical_flow(flow: &[Vector3<f64>], confidence: Vec<f64>, camera: &CameraIntrinsics, video_frequency: f64) -> Result<AngularVelocity, SyncError> {
    let data = flow.iter().map(|f| Vector3::new(
        video_frequency * (f.y / camera.fy).atan(),
        video_frequency * -(f.x / camera.fx).atan(),
        -video_frequency * f.z
    )).collect();

    AngularVelocity::with_confidence(video_frequency, data, confidence)
}
