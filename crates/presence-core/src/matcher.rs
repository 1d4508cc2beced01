//! Face encoding comparison.

use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum MatchError {
    #[error("encoding dimension mismatch: stored template has {stored} components, probe has {probe}")]
    DimensionMismatch { stored: usize, probe: usize },
}

/// Result of comparing a live probe encoding against a stored template.
///
/// `distance` is a non-negative Euclidean dissimilarity: lower means more
/// similar. Callers see it under the name "confidence" for compatibility
/// with existing API consumers.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct MatchVerdict {
    pub is_match: bool,
    pub distance: f32,
}

/// Compare two encodings by Euclidean distance against a fixed threshold.
///
/// Fails closed on dimensionality mismatch: a template enrolled under an
/// older extractor model is rejected, never truncated or padded.
pub fn match_encodings(
    probe: &[f32],
    stored: &[f32],
    threshold: f32,
) -> Result<MatchVerdict, MatchError> {
    if probe.len() != stored.len() {
        return Err(MatchError::DimensionMismatch {
            stored: stored.len(),
            probe: probe.len(),
        });
    }

    let distance = euclidean_distance(probe, stored);
    Ok(MatchVerdict {
        is_match: distance <= threshold,
        distance,
    })
}

fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f32>()
        .sqrt()
}
