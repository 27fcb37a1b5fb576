//! Persistence contract for driver profiles

use crate::{AuthError, UserProfile};
use chrono::{DateTime, Utc};

/// Profile persistence collaborator
///
/// Implementations own the storage format. Calls may be slow and are never
/// made while the resolver's cache lock is held.
pub trait ProfileStore: Send + Sync {
    /// Load every known profile (called once on start)
    fn load_all(&self) -> Result<Vec<UserProfile>, AuthError>;

    /// Append a newly registered profile
    fn save(&self, profile: &UserProfile) -> Result<(), AuthError>;

    /// Allocate the next free user id (must never return 0)
    fn next_user_id(&self) -> Result<u32, AuthError>;

    /// Record a successful recognition
    fn touch_last_seen(&self, user_id: u32, at: DateTime<Utc>) -> Result<(), AuthError>;
}
