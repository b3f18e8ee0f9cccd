// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright © 2026 Gyrosync contributors

use std::sync::Arc;

use serde::{ Serialize, Deserialize };

use crate::lens_profile::CameraIntrinsics;

#[derive(Clone, Debug, Default)]
pub struct VideoParam {
    pub frequency: f64, // Frame rate
    pub frame_count: usize,
    pub rolling_shutter_time: f64,
    pub camera: Arc<CameraIntrinsics>,
    pub video_name: String,
}

impl VideoParam {
    pub fn new(frequency: f64, frame_count: usize, camera: Arc<CameraIntrinsics>, video_name: &str) -> Self {
        Self {
            frequency,
            frame_count,
            rolling_shutter_time: camera.rolling_shutter_time(),
            camera,
            video_name: video_name.to_string(),
        }
    }

    pub fn duration(&self) -> f64 { self.frame_count as f64 / self.frequency }
    pub fn frame_time(&self, frame: usize) -> f64 { frame as f64 / self.frequency }
}

/// Tunables of synchronization and stabilization.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct SyncParams {
    /// Largest integer frame offset tried by the correlator, `None` uses everything that fits.
    pub search_range: Option<usize>,
    /// Half width of the sub-frame search, in frames.
    pub subframe_range: f64,
    pub subframe_step: f64,

    pub estimate_clock_drift: bool,
    /// Frames per correlation window of the drift estimation.
    pub clock_drift_window: usize,

    /// Smoothing kernel length in frames.
    pub kernel_length: usize,
    pub strongest_strength: f64,
    pub weakest_strength: f64,
    pub strength_tolerance: f64,
    /// Largest allowed strength change between consecutive frames.
    pub maximum_gradient: f64,
    pub border_points_per_side: usize,
    /// Values above 1 crop into the frame.
    pub zoom: f64,
}

impl Default for SyncParams {
    fn default() -> Self {
        Self {
            search_range: None,
            subframe_range: 2.0,
            subframe_step: 0.001,

            estimate_clock_drift: true,
            clock_drift_window: 1000,

            kernel_length: 199,
            strongest_strength: 0.0,
            weakest_strength: 100.0,
            strength_tolerance: 1.0,
            maximum_gradient: 1.0,
            border_points_per_side: 31,
            zoom: 1.1,
        }
    }
}
