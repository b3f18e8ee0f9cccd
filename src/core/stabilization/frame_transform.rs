// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright © 2026 Gyrosync contributors

use nalgebra::Matrix3;
use rayon::iter::{ ParallelIterator, IntoParallelIterator };

use super::{ map_point, row_time_offset };
use crate::filtering::SmoothingKernel;
use crate::integration::RotationTrack;
use crate::lens_profile::CameraIntrinsics;
use crate::SyncError;

/// Everything the renderer needs to resample one frame: a correction matrix per scanline.
#[derive(Default, Clone, Debug)]
pub struct FrameTransform {
    pub frame_time: f64,
    pub strength: f64,
    pub zoom: f64,
    /// Row-major 3x3 rotation per row of the frame.
    pub matrices: Vec<[f32; 9]>,
}

impl FrameTransform {
    pub fn at_frame(track: &RotationTrack, camera: &CameraIntrinsics, kernel: &SmoothingKernel, frame_time: f64, zoom: f64) -> Result<Self, SyncError> {
        let smoothed = track.smoothed_orientation_at(frame_time, kernel)?;

        let matrices = (0..camera.height.max(1)).into_par_iter().map(|row| -> Result<[f32; 9], SyncError> {
            let correction = track.correction_from_smoothed(&smoothed, frame_time + row_time_offset(camera, row as f64))?;
            let r: Matrix3<f32> = nalgebra::convert(correction.to_rotation_matrix().into_inner());
            Ok([
                r[(0, 0)], r[(0, 1)], r[(0, 2)],
                r[(1, 0)], r[(1, 1)], r[(1, 2)],
                r[(2, 0)], r[(2, 1)], r[(2, 2)],
            ])
        }).collect::<Result<Vec<_>, _>>()?;

        Ok(Self { frame_time, strength: kernel.strength(), zoom, matrices })
    }

    pub fn rotation(&self, row: usize) -> Matrix3<f64> {
        let m = self.matrices.get(row).or(self.matrices.last()).copied().unwrap_or([1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0]);
        Matrix3::new(
            m[0] as f64, m[1] as f64, m[2] as f64,
            m[3] as f64, m[4] as f64, m[5] as f64,
            m[6] as f64, m[7] as f64, m[8] as f64
        )
    }

    /// Source coordinates of every stabilized pixel, row by row.
    pub fn remap_grid(&self, camera: &CameraIntrinsics) -> Vec<(f32, f32)> {
        let (width, height) = (camera.width, camera.height);
        let rows: Vec<Vec<(f32, f32)>> = (0..height).into_par_iter().map(|v| {
            let r = self.rotation(v);
            (0..width).map(|u| {
                let ((x, y), _) = map_point(&r, camera, self.zoom, (u as f64, v as f64));
                (x as f32, y as f32)
            }).collect()
        }).collect();
        rows.concat()
    }
}
