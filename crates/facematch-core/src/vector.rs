//! Element-wise vector arithmetic over embeddings.
//!
//! Every operation requires its operands to share one length; a mismatch is
//! reported rather than truncated, since zipping two embeddings of different
//! models would yield a meaningless number.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VectorError {
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("no vectors to aggregate")]
    EmptyInput,
}

fn check_len(a: &[f64], b: &[f64]) -> Result<(), VectorError> {
    if a.len() != b.len() {
        return Err(VectorError::DimensionMismatch {
            expected: a.len(),
            actual: b.len(),
        });
    }
    Ok(())
}

/// Returns `a + multiplier * b`.
pub fn add(a: &[f64], b: &[f64], multiplier: f64) -> Result<Vec<f64>, VectorError> {
    check_len(a, b)?;
    Ok(a.iter().zip(b).map(|(x, y)| x + multiplier * y).collect())
}

/// Returns `a - b`.
pub fn subtract(a: &[f64], b: &[f64]) -> Result<Vec<f64>, VectorError> {
    add(a, b, -1.0)
}

/// Element-wise arithmetic mean of a non-empty set of equal-length vectors.
pub fn mean<V: AsRef<[f64]>>(vectors: &[V]) -> Result<Vec<f64>, VectorError> {
    let (first, rest) = vectors.split_first().ok_or(VectorError::EmptyInput)?;

    let mut sum = first.as_ref().to_vec();
    for v in rest {
        sum = add(&sum, v.as_ref(), 1.0)?;
    }

    let n = vectors.len() as f64;
    Ok(sum.into_iter().map(|x| x / n).collect())
}

/// Euclidean (L2) distance. Smaller = more similar, unbounded above.
pub fn euclidean_distance(a: &[f64], b: &[f64]) -> Result<f64, VectorError> {
    check_len(a, b)?;
    Ok(a.iter()
        .zip(b)
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt())
}
