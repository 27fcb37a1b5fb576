//! Repository Implementation

use crate::StorageError;
use alerting::{AlertError, EventRecord, EventSink, Severity};
use chrono::{DateTime, Utc};
use driver_auth::{AuthError, ProfileStore, UserProfile};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

/// Repository for profiles and events (in-memory implementation)
pub struct Repository {
    /// Registered drivers, in registration order
    profiles: Mutex<Vec<UserProfile>>,
    /// Event log, oldest first
    events: Mutex<VecDeque<EventRecord>>,
    /// Max event records kept
    max_event_records: usize,
}

fn lock<'a, T>(mutex: &'a Mutex<T>) -> Result<MutexGuard<'a, T>, StorageError> {
    mutex
        .lock()
        .map_err(|e| StorageError::DatabaseError(format!("Lock error: {}", e)))
}

impl Repository {
    /// Create a new in-memory repository
    pub fn new() -> Self {
        Self::with_retention(10_000)
    }

    /// Create a repository keeping at most `max_event_records` events
    pub fn with_retention(max_event_records: usize) -> Self {
        info!(max_event_records, "Creating in-memory repository");
        Self {
            profiles: Mutex::new(Vec::new()),
            events: Mutex::new(VecDeque::with_capacity(max_event_records.min(1024))),
            max_event_records: max_event_records.max(1),
        }
    }

    /// Seed the repository with existing profiles
    pub fn with_profiles(profiles: Vec<UserProfile>) -> Self {
        let repo = Self::new();
        if let Ok(mut stored) = repo.profiles.lock() {
            *stored = profiles;
        }
        repo
    }

    /// Insert an event record, dropping the oldest beyond retention
    pub fn insert_event(&self, record: EventRecord) -> Result<(), StorageError> {
        let mut events = lock(&self.events)?;

        // Enforce retention
        while events.len() >= self.max_event_records {
            events.pop_front();
        }

        debug!(
            user_id = record.user_id,
            event_type = %record.event_type,
            "Inserted event"
        );
        events.push_back(record);
        Ok(())
    }

    /// Most recent events first
    pub fn recent_events(&self, limit: usize) -> Result<Vec<EventRecord>, StorageError> {
        let events = lock(&self.events)?;
        Ok(events.iter().rev().take(limit).cloned().collect())
    }

    /// Events for one driver, optionally filtered by severity, most recent first
    pub fn events_for_user(
        &self,
        user_id: u32,
        severity: Option<Severity>,
        limit: usize,
    ) -> Result<Vec<EventRecord>, StorageError> {
        let events = lock(&self.events)?;

        let filtered: Vec<_> = events
            .iter()
            .rev()
            .filter(|e| e.user_id == user_id)
            .filter(|e| severity.map_or(true, |s| e.severity == s))
            .take(limit)
            .cloned()
            .collect();

        Ok(filtered)
    }

    /// Events recorded at or after `since`
    pub fn events_since(&self, since: DateTime<Utc>) -> Result<Vec<EventRecord>, StorageError> {
        let events = lock(&self.events)?;
        Ok(events.iter().filter(|e| e.recorded_at >= since).cloned().collect())
    }

    pub fn get_profile(&self, user_id: u32) -> Result<UserProfile, StorageError> {
        lock(&self.profiles)?
            .iter()
            .find(|p| p.user_id == user_id)
            .cloned()
            .ok_or(StorageError::NotFound)
    }

    /// Get total event count
    pub fn event_count(&self) -> usize {
        self.events.lock().map(|e| e.len()).unwrap_or(0)
    }

    /// Get total profile count
    pub fn profile_count(&self) -> usize {
        self.profiles.lock().map(|p| p.len()).unwrap_or(0)
    }

    /// Clear all data (for testing)
    pub fn clear(&self) {
        if let Ok(mut profiles) = self.profiles.lock() {
            profiles.clear();
        }
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }
}

impl Default for Repository {
    fn default() -> Self {
        Self::new()
    }
}

impl ProfileStore for Repository {
    fn load_all(&self) -> Result<Vec<UserProfile>, AuthError> {
        Ok(lock(&self.profiles)?.clone())
    }

    fn save(&self, profile: &UserProfile) -> Result<(), AuthError> {
        let mut profiles = lock(&self.profiles)?;
        if profiles.iter().any(|p| p.user_id == profile.user_id) {
            return Err(StorageError::Duplicate(profile.user_id).into());
        }
        profiles.push(profile.clone());
        info!(user_id = profile.user_id, "Saved profile");
        Ok(())
    }

    fn next_user_id(&self) -> Result<u32, AuthError> {
        let profiles = lock(&self.profiles)?;
        Ok(profiles.iter().map(|p| p.user_id).max().unwrap_or(0) + 1)
    }

    fn touch_last_seen(&self, user_id: u32, at: DateTime<Utc>) -> Result<(), AuthError> {
        let mut profiles = lock(&self.profiles)?;
        let profile = profiles
            .iter_mut()
            .find(|p| p.user_id == user_id)
            .ok_or(StorageError::NotFound)?;
        profile.last_seen = at;
        Ok(())
    }
}

impl EventSink for Repository {
    fn record(&self, event: &EventRecord) -> Result<(), AlertError> {
        self.insert_event(event.clone())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use driver_auth::FaceEmbedding;

    fn profile(user_id: u32) -> UserProfile {
        let mut vector = vec![0.0f32; 4];
        vector[user_id as usize % 4] = 1.0;
        UserProfile::new(user_id, 0.2, FaceEmbedding::from_raw(vector))
    }

    fn event(user_id: u32, severity: Severity) -> EventRecord {
        EventRecord::new(user_id, "DROWSY", "Drowsiness", "Eyes Closed Too Long", severity)
            .with_measurement(1.2, 0.14)
    }

    #[test]
    fn test_profile_lifecycle() {
        let repo = Repository::new();
        assert_eq!(repo.next_user_id().unwrap(), 1);

        repo.save(&profile(1)).unwrap();
        repo.save(&profile(2)).unwrap();
        assert_eq!(repo.next_user_id().unwrap(), 3);
        assert_eq!(repo.load_all().unwrap().len(), 2);

        let seen = Utc::now();
        repo.touch_last_seen(2, seen).unwrap();
        assert_eq!(repo.get_profile(2).unwrap().last_seen, seen);
    }

    #[test]
    fn test_duplicate_and_missing_profiles() {
        let repo = Repository::with_profiles(vec![profile(5)]);
        assert_eq!(repo.next_user_id().unwrap(), 6);
        assert!(matches!(repo.save(&profile(5)), Err(AuthError::Store(_))));
        assert!(matches!(
            repo.touch_last_seen(9, Utc::now()),
            Err(AuthError::Store(_))
        ));
        assert!(matches!(repo.get_profile(9), Err(StorageError::NotFound)));
    }

    #[test]
    fn test_event_queries() {
        let repo = Repository::new();
        repo.record(&event(1, Severity::Medium)).unwrap();
        repo.record(&event(2, Severity::High)).unwrap();
        repo.record(&event(1, Severity::High)).unwrap();

        let user_one = repo.events_for_user(1, None, 10).unwrap();
        assert_eq!(user_one.len(), 2);
        assert_eq!(user_one[0].severity, Severity::High);

        let high = repo.events_for_user(1, Some(Severity::High), 10).unwrap();
        assert_eq!(high.len(), 1);

        assert_eq!(repo.recent_events(2).unwrap()[0].user_id, 1);
        assert_eq!(repo.events_since(Utc::now() + chrono::Duration::hours(1)).unwrap().len(), 0);
    }

    #[test]
    fn test_event_retention() {
        let repo = Repository::with_retention(3);
        for _ in 0..5 {
            repo.insert_event(event(1, Severity::Low)).unwrap();
        }
        assert_eq!(repo.event_count(), 3);

        repo.clear();
        assert_eq!(repo.event_count(), 0);
        assert_eq!(repo.profile_count(), 0);
    }
}
