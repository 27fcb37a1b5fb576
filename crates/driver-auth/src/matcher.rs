//! Similarity index over known embeddings

use crate::embedding::normalize;
use crate::UserProfile;
use ndarray::{Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Distance used to compare embeddings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    /// L2 distance between unit vectors, in [0, 2]
    #[default]
    Euclidean,
    /// 1 - cosine similarity, in [0, 2]
    Cosine,
}

impl DistanceMetric {
    /// Convert a dot product of unit vectors to a distance
    pub fn from_similarity(&self, similarity: f32) -> f32 {
        match self {
            DistanceMetric::Euclidean => (2.0 - 2.0 * similarity).max(0.0).sqrt(),
            DistanceMetric::Cosine => 1.0 - similarity,
        }
    }
}

/// Best candidate for a query embedding
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Match {
    /// Row in the index
    pub index: usize,
    pub user_id: u32,
    pub distance: f32,
    pub similarity: f32,
}

/// Row-per-profile matrix of L2-normalized embeddings
#[derive(Debug, Clone)]
pub struct SimilarityIndex {
    user_ids: Vec<u32>,
    matrix: Array2<f32>,
    metric: DistanceMetric,
}

impl SimilarityIndex {
    /// Build the matrix from profiles; rows with a mismatched dimension are skipped
    pub fn build(profiles: &[UserProfile], metric: DistanceMetric) -> Self {
        let dim = profiles.first().map(|p| p.face_encoding.dim()).unwrap_or(0);
        let mut user_ids = Vec::with_capacity(profiles.len());
        let mut flat = Vec::with_capacity(profiles.len() * dim);

        for profile in profiles {
            if profile.face_encoding.dim() != dim {
                warn!(
                    user_id = profile.user_id,
                    dim = profile.face_encoding.dim(),
                    expected = dim,
                    "Skipping profile with mismatched embedding size"
                );
                continue;
            }
            user_ids.push(profile.user_id);
            flat.extend(normalize(profile.face_encoding.as_slice()));
        }

        let matrix = Array2::from_shape_vec((user_ids.len(), dim), flat)
            .unwrap_or_else(|_| Array2::zeros((0, dim)));

        Self {
            user_ids,
            matrix,
            metric,
        }
    }

    pub fn empty(metric: DistanceMetric) -> Self {
        Self::build(&[], metric)
    }

    pub fn len(&self) -> usize {
        self.user_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.user_ids.is_empty()
    }

    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    /// Nearest known profile; ties go to the lowest row
    pub fn best_match(&self, query: &[f32]) -> Option<Match> {
        if self.is_empty() || query.len() != self.matrix.ncols() {
            return None;
        }
        let query = normalize(query);
        let similarities = self.matrix.dot(&ArrayView1::from(&query[..]));

        let mut best: Option<Match> = None;
        for (index, &similarity) in similarities.iter().enumerate() {
            let distance = self.metric.from_similarity(similarity);
            if best.map_or(true, |b| distance < b.distance) {
                best = Some(Match {
                    index,
                    user_id: self.user_ids[index],
                    distance,
                    similarity,
                });
            }
        }
        best
    }

    /// Distance from the query to one specific profile
    pub fn distance_to(&self, user_id: u32, query: &[f32]) -> Option<f32> {
        if query.len() != self.matrix.ncols() {
            return None;
        }
        let index = self.user_ids.iter().position(|&id| id == user_id)?;
        let query = normalize(query);
        let similarity = self.matrix.row(index).dot(&ArrayView1::from(&query[..]));
        Some(self.metric.from_similarity(similarity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FaceEmbedding;

    fn profile(user_id: u32, vector: Vec<f32>) -> UserProfile {
        UserProfile::new(user_id, 0.2, FaceEmbedding::from_raw(vector))
    }

    #[test]
    fn test_best_match_euclidean() {
        let index = SimilarityIndex::build(
            &[
                profile(1, vec![1.0, 0.0, 0.0]),
                profile(2, vec![0.0, 1.0, 0.0]),
            ],
            DistanceMetric::Euclidean,
        );
        let m = index.best_match(&[0.1, 0.9, 0.0]).unwrap();
        assert_eq!(m.user_id, 2);
        assert!(m.distance < 0.2);

        // Orthogonal unit vectors are sqrt(2) apart
        let d = index.distance_to(1, &[0.0, 1.0, 0.0]).unwrap();
        assert!((d - 2f32.sqrt()).abs() < 1e-5);
    }

    #[test]
    fn test_cosine_metric() {
        let index = SimilarityIndex::build(
            &[profile(5, vec![1.0, 0.0])],
            DistanceMetric::Cosine,
        );
        let m = index.best_match(&[-1.0, 0.0]).unwrap();
        assert!((m.distance - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_tie_goes_to_lowest_row() {
        let index = SimilarityIndex::build(
            &[
                profile(9, vec![1.0, 0.0]),
                profile(4, vec![1.0, 0.0]),
            ],
            DistanceMetric::Euclidean,
        );
        let m = index.best_match(&[1.0, 0.0]).unwrap();
        assert_eq!(m.index, 0);
        assert_eq!(m.user_id, 9);
    }

    #[test]
    fn test_empty_and_mismatched() {
        let empty = SimilarityIndex::empty(DistanceMetric::Euclidean);
        assert!(empty.best_match(&[1.0]).is_none());

        let index = SimilarityIndex::build(&[profile(1, vec![1.0, 0.0])], DistanceMetric::Euclidean);
        assert!(index.best_match(&[1.0, 0.0, 0.0]).is_none());
    }
}
