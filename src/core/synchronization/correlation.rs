// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright © 2026 Gyrosync contributors

use rayon::iter::{ ParallelIterator, IntoParallelIterator };

use super::Segment;
use crate::gyro_source::{ AngularVelocity, ResamplerParameter };
use crate::SyncError;

/// Dissimilarity between `reference` and the measured series for every integer frame offset in
/// `0..=search_range`. The measured series is resampled once at `frequency`, starting at its first sample.
/// Lower is better, `f64::MAX` marks windows that cannot be decided.
pub fn correlate(reference: &Segment, measured: &AngularVelocity, frequency: f64, search_range: Option<usize>) -> Result<Vec<f64>, SyncError> {
    if reference.is_empty() {
        return Err(SyncError::EmptySeries);
    }
    if reference.confidence.len() != reference.len() {
        return Err(SyncError::LengthMismatch { expected: reference.len(), actual: reference.confidence.len() });
    }

    let resampled = measured.resample(&ResamplerParameter::new(frequency, 0.0, 0.0))?;
    if resampled.len() < reference.len() {
        return Err(SyncError::DegenerateSearchRange { reference: reference.len(), measured: resampled.len() });
    }
    let max_range = resampled.len() - reference.len();
    let search_range = match search_range {
        Some(range) if range > max_range => {
            log::warn!("Search range {} doesn't fit the measured data, limiting to {}", range, max_range);
            max_range
        },
        Some(range) => range,
        None => max_range
    };

    log::debug!("Correlating {} samples over {} offsets", reference.len(), search_range + 1);

    Ok((0..=search_range)
        .into_par_iter()
        .map(|offset| reference.difference(&resampled[offset..offset + reference.len()]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;

    pub fn wobble(frequency: f64, n: usize) -> AngularVelocity {
        let data = (0..n).map(|i| {
            let t = i as f64 / frequency;
            Vector3::new((t * 2.3).sin() + 0.3 * (t * 7.1).cos(), (t * 1.7).cos() * 0.8, (t * 3.1).sin() * (t * 0.5).cos())
        }).collect();
        AngularVelocity::new(frequency, data).unwrap()
    }

    #[test]
    fn reinjected_segment_scores_zero_at_true_offset() {
        let measured = wobble(30.0, 600);
        let estimated = AngularVelocity::new(30.0, measured.data()[40..240].to_vec()).unwrap();
        let scores = correlate(&Segment::whole(&estimated), &measured, 30.0, None).unwrap();

        assert_eq!(scores.len(), 401);
        assert!(scores[40] < 1e-12);
        for (offset, score) in scores.iter().enumerate() {
            if offset != 40 {
                assert!(*score > scores[40]);
            }
        }
        assert!(scores[39] > scores[40] && scores[41] > scores[40]);
    }

    #[test]
    fn error_grows_with_offset_error() {
        let measured = wobble(30.0, 600);
        let estimated = AngularVelocity::new(30.0, measured.data()[100..300].to_vec()).unwrap();
        let scores = correlate(&Segment::whole(&estimated), &measured, 30.0, Some(150)).unwrap();
        assert_eq!(scores.len(), 151);
        assert!(scores[100] < scores[101] && scores[101] < scores[102] && scores[102] < scores[103]);
        assert!(scores[100] < scores[99] && scores[99] < scores[98]);
    }

    #[test]
    fn untrusted_window_is_undecidable() {
        let measured = wobble(30.0, 100);
        let estimated = AngularVelocity::with_confidence(30.0, vec![Vector3::zeros(); 10], vec![0.0; 10]).unwrap();
        let scores = correlate(&Segment::whole(&estimated), &measured, 30.0, None).unwrap();
        assert!(scores.iter().all(|s| *s == f64::MAX));
    }

    #[test]
    fn zero_confidence_samples_are_ignored() {
        let measured = wobble(30.0, 300);
        let mut data = measured.data()[20..120].to_vec();
        let mut confidence = vec![1.0; data.len()];
        for i in (0..data.len()).step_by(3) {
            data[i] = Vector3::new(50.0, -50.0, 50.0);
            confidence[i] = 0.0;
        }
        let estimated = AngularVelocity::with_confidence(30.0, data, confidence).unwrap();
        let scores = correlate(&Segment::whole(&estimated), &measured, 30.0, None).unwrap();
        assert!(scores[20] < 1e-12);
    }

    #[test]
    fn reference_longer_than_measured_is_rejected() {
        let measured = wobble(30.0, 50);
        let estimated = wobble(30.0, 60);
        assert!(matches!(
            correlate(&Segment::whole(&estimated), &measured, 30.0, None),
            Err(SyncError::DegenerateSearchRange { reference: 60, measured: 50 })
        ));
    }
}
