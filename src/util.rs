// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright © 2026 Gyrosync contributors

use std::collections::BTreeMap;
use std::path::Path;

use nalgebra::Vector3;
use serde::{ Serialize, Deserialize };
use simplelog::*;

use gyrosync_core::gyro_source::{ AngularVelocity, Quat64, ResamplerParameter };
use gyrosync_core::lens_profile::CameraIntrinsics;
use gyrosync_core::stabilization_params::SyncParams;
use gyrosync_core::synchronization::ClockDrift;

use crate::cli::CliError;

pub fn init_logging(log_file: Option<&str>) -> Result<(), CliError> {
    let config = ConfigBuilder::new()
        .set_target_level(LevelFilter::Off)
        .set_thread_level(LevelFilter::Off)
        .set_time_level(LevelFilter::Off)
        .build();

    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![
        TermLogger::new(LevelFilter::Info, config.clone(), TerminalMode::Mixed, ColorChoice::Auto)
    ];
    if let Some(path) = log_file {
        let file = std::fs::File::create(path)?;
        loggers.push(WriteLogger::new(LevelFilter::Debug, config, file));
    }
    CombinedLogger::init(loggers).map_err(|e| CliError::Logging(e.to_string()))
}

pub fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, CliError> {
    let data = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&data)?)
}

/// Inline JSON (`'` accepted as `"`) or a path to a JSON file.
pub fn json_or_file<T: for<'de> Deserialize<'de>>(value: &str) -> Result<T, CliError> {
    let value = value.trim();
    if value.starts_with('{') {
        Ok(serde_json::from_str(&value.replace('\'', "\""))?)
    } else {
        read_json(Path::new(value))
    }
}

#[derive(Deserialize, Debug)]
pub struct AngularVelocityFile {
    pub frequency: f64,
    pub angular_velocity: Vec<[f64; 3]>,
    #[serde(default)]
    pub confidence: Option<Vec<f64>>,
}

impl AngularVelocityFile {
    pub fn into_series(self) -> Result<AngularVelocity, CliError> {
        let data: Vec<Vector3<f64>> = self.angular_velocity.iter().map(|v| Vector3::from(*v)).collect();
        Ok(match self.confidence {
            Some(confidence) => AngularVelocity::with_confidence(self.frequency, data, confidence)?,
            None => AngularVelocity::new(self.frequency, data)?,
        })
    }
}

/// Calibration board rotations, keyed by the frame they were detected in.
#[derive(Deserialize, Debug)]
pub struct BoardPosesFile {
    pub frequency: f64,
    pub frame_count: usize,
    pub rotation_vectors: BTreeMap<String, [f64; 3]>,
}

impl BoardPosesFile {
    pub fn rotation_vectors(&self) -> Result<BTreeMap<usize, Vector3<f64>>, CliError> {
        self.rotation_vectors.iter().map(|(frame, r)| {
            let frame = frame.trim().parse::<usize>().map_err(|_| CliError::InvalidFrame(frame.clone()))?;
            Ok((frame, Vector3::from(*r)))
        }).collect()
    }
}

/// Estimated motion comes either as angular velocity or as detected board poses.
#[derive(Deserialize, Debug)]
#[serde(untagged)]
pub enum EstimatedFile {
    Poses(BoardPosesFile),
    AngularVelocity(AngularVelocityFile),
}

impl EstimatedFile {
    pub fn frequency(&self) -> f64 {
        match self {
            Self::Poses(x) => x.frequency,
            Self::AngularVelocity(x) => x.frequency,
        }
    }
    pub fn frame_count(&self) -> usize {
        match self {
            Self::Poses(x) => x.frame_count,
            Self::AngularVelocity(x) => x.angular_velocity.len(),
        }
    }
}

pub fn load_camera(value: Option<&str>) -> Result<CameraIntrinsics, CliError> {
    match value {
        Some(v) => json_or_file(v),
        None => Ok(CameraIntrinsics::default()),
    }
}

pub fn load_params(value: Option<&str>) -> Result<SyncParams, CliError> {
    match value {
        Some(v) => json_or_file(v),
        None => Ok(SyncParams::default()),
    }
}

#[derive(Serialize, Debug, Default)]
pub struct Report {
    pub video_name: String,
    pub resampler_parameter: ResamplerParameter,
    pub clock_drift: Option<ClockDrift>,
    pub strengths: Vec<f64>,
    /// `[w, x, y, z]` per frame
    pub orientations: Vec<[f64; 4]>,
}

impl Report {
    pub fn with_orientations(mut self, quats: &[Quat64]) -> Self {
        self.orientations = quats.iter().map(|q| [q.w, q.i, q.j, q.k]).collect();
        self
    }

    pub fn write(&self, output: Option<&str>) -> Result<(), CliError> {
        let json = serde_json::to_string_pretty(self)?;
        match output {
            Some(path) => std::fs::write(path, json)?,
            None => println!("{}", json),
        }
        Ok(())
    }
}
