//! Face embedding vectors

use crate::AuthError;
use serde::{Deserialize, Serialize};

/// Unit-normalized face embedding produced by the external recognition model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceEmbedding {
    pub vector: Vec<f32>,
}

impl FaceEmbedding {
    /// Wrap a raw vector, L2-normalizing it
    pub fn from_raw(vector: Vec<f32>) -> Self {
        Self {
            vector: normalize(&vector),
        }
    }

    pub fn dim(&self) -> usize {
        self.vector.len()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.vector
    }
}

fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// L2-normalize a vector; an all-zero vector is returned unchanged
pub fn normalize(v: &[f32]) -> Vec<f32> {
    let norm = l2_norm(v);
    if norm > 1e-8 {
        v.iter().map(|x| x / norm).collect()
    } else {
        v.to_vec()
    }
}

/// Check an embedding before it is trusted as evidence
///
/// Rejects wrong dimensionality, NaN/Inf components and norms outside
/// `norm_range` (the model's output should already be near unit length).
pub fn validate_embedding(
    v: &[f32],
    expected_dim: usize,
    norm_range: (f32, f32),
) -> Result<(), AuthError> {
    if v.len() != expected_dim {
        return Err(AuthError::InvalidEmbedding(format!(
            "expected {} dims, got {}",
            expected_dim,
            v.len()
        )));
    }
    if v.iter().any(|x| !x.is_finite()) {
        return Err(AuthError::InvalidEmbedding(
            "contains NaN or infinite values".into(),
        ));
    }
    let norm = l2_norm(v);
    if norm < norm_range.0 || norm > norm_range.1 {
        return Err(AuthError::InvalidEmbedding(format!(
            "norm {:.3} outside [{}, {}]",
            norm, norm_range.0, norm_range.1
        )));
    }
    Ok(())
}

/// Average several embeddings of the same face and re-normalize
pub fn average_embeddings(embeddings: &[&[f32]]) -> Option<Vec<f32>> {
    let first = embeddings.first()?;
    let dim = first.len();
    let mut sum = vec![0.0f32; dim];
    for e in embeddings.iter().filter(|e| e.len() == dim) {
        for (acc, x) in sum.iter_mut().zip(e.iter()) {
            *acc += x;
        }
    }
    Some(normalize(&sum))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(dim: usize, hot: usize) -> Vec<f32> {
        let mut v = vec![0.0; dim];
        v[hot] = 1.0;
        v
    }

    #[test]
    fn test_validate_embedding() {
        assert!(validate_embedding(&unit(512, 0), 512, (0.5, 1.5)).is_ok());
        assert!(validate_embedding(&unit(128, 0), 512, (0.5, 1.5)).is_err());

        let mut nan = unit(512, 3);
        nan[7] = f32::NAN;
        assert!(validate_embedding(&nan, 512, (0.5, 1.5)).is_err());

        let tiny: Vec<f32> = unit(512, 0).iter().map(|x| x * 0.1).collect();
        assert!(validate_embedding(&tiny, 512, (0.5, 1.5)).is_err());
    }

    #[test]
    fn test_normalize() {
        let v = normalize(&[3.0, 4.0]);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
        assert_eq!(normalize(&[0.0, 0.0]), vec![0.0, 0.0]);
    }

    #[test]
    fn test_average_renormalizes() {
        let a = unit(4, 0);
        let b = unit(4, 1);
        let avg = average_embeddings(&[&a, &b]).unwrap();
        let expected = 1.0 / 2f32.sqrt();
        assert!((avg[0] - expected).abs() < 1e-6);
        assert!((avg[1] - expected).abs() < 1e-6);
        assert!(average_embeddings(&[]).is_none());
    }
}
