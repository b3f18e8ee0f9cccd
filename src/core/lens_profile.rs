// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright © 2026 Gyrosync contributors

use nalgebra::{ Matrix3, Rotation3 };
use serde::{ Serialize, Deserialize };

/// Pinhole camera with OpenCV style radial/tangential distortion and a rolling shutter.
///
/// `k1 k2 p1 p2` distort an ideal normalized point, `ik1 ik2 ip1 ip2` approximate the
/// opposite direction. `line_delay` is the exposure time offset between consecutive scanlines.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct CameraIntrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,

    pub k1: f64,
    pub k2: f64,
    pub p1: f64,
    pub p2: f64,

    pub ik1: f64,
    pub ik2: f64,
    pub ip1: f64,
    pub ip2: f64,

    pub width: usize,
    pub height: usize,

    pub line_delay: f64,

    /// Sensor to camera rotation, row-major.
    pub sd_card_rotation: [[f64; 3]; 3],
}

impl Default for CameraIntrinsics {
    fn default() -> Self {
        Self {
            fx: 1.0, fy: 1.0, cx: 0.0, cy: 0.0,
            k1: 0.0, k2: 0.0, p1: 0.0, p2: 0.0,
            ik1: 0.0, ik2: 0.0, ip1: 0.0, ip2: 0.0,
            width: 0, height: 0,
            line_delay: 0.0,
            sd_card_rotation: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
        }
    }
}

impl CameraIntrinsics {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Nearest proper rotation to the configured mounting matrix.
    pub fn mounting_rotation(&self) -> Rotation3<f64> {
        let r = &self.sd_card_rotation;
        let m = Matrix3::new(
            r[0][0], r[0][1], r[0][2],
            r[1][0], r[1][1], r[1][2],
            r[2][0], r[2][1], r[2][2]
        );
        Rotation3::from_matrix(&m)
    }

    /// Total readout time of one frame.
    pub fn rolling_shutter_time(&self) -> f64 {
        self.line_delay * self.height as f64
    }

    /// Maps an ideal normalized point to the distorted normalized point.
    /// Returns `None` when the polynomial diverged, i.e. moved the point by more than one
    /// normalized unit on either axis.
    pub fn inverse_distort(&self, x1: f64, y1: f64) -> Option<(f64, f64)> {
        let r2 = x1 * x1 + y1 * y1;
        let radial = 1.0 + self.ik1 * r2 + self.ik2 * r2 * r2;
        let x2 = x1 * radial + 2.0 * self.ip1 * x1 * y1 + self.ip2 * (r2 + 2.0 * x1 * x1);
        let y2 = y1 * radial + self.ip1 * (r2 + 2.0 * y1 * y1) + 2.0 * self.ip2 * x1 * y1;

        if (x2 - x1).powi(2) > 1.0 || (y2 - y1).powi(2) > 1.0 {
            return None;
        }
        Some((x2, y2))
    }
}
