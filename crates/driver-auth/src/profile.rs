//! Known driver profile

use crate::embedding::FaceEmbedding;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Registered driver with personalized thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    /// Stable id allocated by the profile store (never 0)
    pub user_id: u32,
    /// Personalized eye-closure threshold from calibration
    pub ear_threshold: f64,
    pub face_encoding: FaceEmbedding,
    pub created_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl UserProfile {
    pub fn new(user_id: u32, ear_threshold: f64, face_encoding: FaceEmbedding) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            ear_threshold,
            face_encoding,
            created_at: now,
            last_seen: now,
        }
    }
}

impl std::fmt::Display for UserProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "User #{} (ear_threshold={:.3}, last_seen={})",
            self.user_id,
            self.ear_threshold,
            self.last_seen.format("%Y-%m-%d %H:%M:%S")
        )
    }
}
