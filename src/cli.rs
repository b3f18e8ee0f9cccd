// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright © 2026 Gyrosync contributors

use std::fmt::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use argh::FromArgs;
use indicatif::{ ProgressBar, ProgressState, ProgressStyle };

use gyrosync_core::stabilization_params::VideoParam;
use gyrosync_core::{ SyncError, SyncManager };

use crate::util::{ self, AngularVelocityFile, EstimatedFile, Report };

#[derive(thiserror::Error, Debug)]
pub enum CliError {
    #[error("{0}")]                        Sync(#[from] SyncError),
    #[error("IO error: {0}")]              IO(#[from] std::io::Error),
    #[error("Invalid JSON: {0}")]          JSON(#[from] serde_json::Error),
    #[error("Invalid progress style: {0}")] Template(#[from] indicatif::style::TemplateError),
    #[error("Invalid frame number {0:?}")]  InvalidFrame(String),
    #[error("Unable to initialize logging: {0}")] Logging(String),
}

/** Gyrosync v0.3.0
Gyroscope to video synchronization and rolling shutter correction
*/
#[derive(FromArgs)]
pub struct Opts {
    /// measured angular velocity, eg. "{{ 'frequency': 1000, 'angular_velocity': [[x, y, z], ...] }}" or a path to a JSON file
    #[argh(option, short = 'm')]
    pub measured: String,

    /// motion estimated from the video: angular velocity per frame (with optional confidence) or calibration board rotation vectors
    #[argh(option, short = 'e')]
    pub estimated: String,

    /// camera intrinsics, eg. "{{ 'fx': 1200, 'fy': 1200, 'cx': 960, 'cy': 540, 'width': 1920, 'height': 1080, 'line_delay': 1.5e-5 }}"
    #[argh(option, short = 'c')]
    pub camera: Option<String>,

    /// synchronization parameters, eg. "{{ 'zoom': 1.2, 'estimate_clock_drift': false }}"
    #[argh(option, short = 'p')]
    pub params: Option<String>,

    /// output report path, prints to stdout when not set
    #[argh(option, short = 'o')]
    pub output: Option<String>,

    /// write the debug log to this file
    #[argh(option)]
    pub log_file: Option<String>,

    /// only synchronize, skip the per-frame smoothing strength selection
    #[argh(switch)]
    pub no_strengths: bool,
}

pub fn run(opts: Opts) -> Result<(), CliError> {
    let time = Instant::now();

    let camera = util::load_camera(opts.camera.as_deref())?;
    let params = util::load_params(opts.params.as_deref())?;
    let measured: AngularVelocityFile = util::json_or_file(&opts.measured)?;
    let estimated: EstimatedFile = util::json_or_file(&opts.estimated)?;

    let video_name = Path::new(&opts.estimated).file_stem().map(|x| x.to_string_lossy().to_string()).unwrap_or_default();
    let manager = SyncManager::default();
    manager.set_video(VideoParam::new(estimated.frequency(), estimated.frame_count(), Arc::new(camera), &video_name));
    manager.set_params(params);
    manager.set_measured_angular_velocity(measured.into_series()?);
    match estimated {
        EstimatedFile::Poses(poses) => manager.estimate_from_board_poses(&poses.rotation_vectors()?)?,
        EstimatedFile::AngularVelocity(velocity) => manager.set_estimated_angular_velocity(velocity.into_series()?),
    }

    let parameter = manager.synchronize()?;
    log::info!("Synchronized: start {:.6} s, drift {:.3e}, took {:.2?}", parameter.start, parameter.drift, time.elapsed());

    let strengths = if opts.no_strengths {
        Vec::new()
    } else {
        let frame_count = manager.video.read().frame_count;
        let pb = ProgressBar::new(frame_count as u64);
        pb.set_style(ProgressStyle::with_template("[{bar:50.cyan/blue}] {pos:>5}/{len:5} {eta:11} \x1B[37;1m{msg}\x1B[0m")?
            .with_key("eta", |state: &ProgressState, w: &mut dyn std::fmt::Write| { let _ = write!(w, "ETA {:.1}s", state.eta().as_secs_f64()); })
            .progress_chars("#>-"));
        pb.set_message("Smoothing strength");

        let strengths = manager.filter_strengths(|_, total| {
            pb.set_length(total as u64);
            pb.inc(1);
        });
        pb.finish_and_clear();
        strengths?
    };

    let report = Report {
        video_name,
        resampler_parameter: parameter,
        clock_drift: manager.clock_drift(),
        strengths,
        ..Default::default()
    }.with_orientations(&manager.rotation_quaternions()?);
    report.write(opts.output.as_deref())?;

    log::info!("Done in {:.2?}", time.elapsed());
    Ok(())
}
