//! Identity resolution with multi-frame consensus

use crate::consensus::ConsensusBuffer;
use crate::embedding::{average_embeddings, validate_embedding, FaceEmbedding};
use crate::matcher::{DistanceMetric, SimilarityIndex};
use crate::store::ProfileStore;
use crate::{AuthError, UserProfile};
use chrono::Utc;
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Identity configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub metric: DistanceMetric,
    /// Maximum distance for a frame to count as evidence
    pub recognition_threshold: f32,
    /// Registration duplicate threshold = recognition_threshold * this
    pub registration_factor: f32,
    /// Consensus window length (frames)
    pub min_consistent_frames: usize,
    /// Share of the window the majority candidate must hold
    pub consensus_ratio: f64,
    pub embedding_dim: usize,
    /// Accepted L2 norm range for raw embeddings
    pub embedding_norm_range: (f32, f32),
    /// Frames between identity re-checks of the active driver
    pub verify_interval_frames: u32,
    /// Minimum spacing of "no match" info logs (seconds)
    pub no_match_log_interval_sec: f64,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            metric: DistanceMetric::Euclidean,
            recognition_threshold: 0.5,
            registration_factor: 0.8,
            min_consistent_frames: 10,
            consensus_ratio: 0.6,
            embedding_dim: 512,
            embedding_norm_range: (0.5, 1.5),
            verify_interval_frames: 30,
            no_match_log_interval_sec: 2.0,
        }
    }
}

impl IdentityConfig {
    pub fn validate(&self) -> Result<(), AuthError> {
        if !(self.recognition_threshold > 0.0) {
            return Err(AuthError::Config(format!(
                "recognition_threshold must be positive, got {}",
                self.recognition_threshold
            )));
        }
        if !(self.registration_factor > 0.0 && self.registration_factor <= 1.0) {
            return Err(AuthError::Config(format!(
                "registration_factor must be in (0, 1], got {}",
                self.registration_factor
            )));
        }
        if self.min_consistent_frames == 0 {
            return Err(AuthError::Config(
                "min_consistent_frames must be at least 1".into(),
            ));
        }
        if !(self.consensus_ratio > 0.0 && self.consensus_ratio <= 1.0) {
            return Err(AuthError::Config(format!(
                "consensus_ratio must be in (0, 1], got {}",
                self.consensus_ratio
            )));
        }
        if self.embedding_dim == 0 {
            return Err(AuthError::Config("embedding_dim must be positive".into()));
        }
        if self.embedding_norm_range.0 >= self.embedding_norm_range.1 {
            return Err(AuthError::Config(format!(
                "embedding_norm_range {:?} is empty",
                self.embedding_norm_range
            )));
        }
        if self.verify_interval_frames == 0 {
            return Err(AuthError::Config(
                "verify_interval_frames must be at least 1".into(),
            ));
        }
        if !(self.no_match_log_interval_sec.is_finite() && self.no_match_log_interval_sec >= 0.0) {
            return Err(AuthError::Config(format!(
                "no_match_log_interval_sec must be a non-negative number, got {}",
                self.no_match_log_interval_sec
            )));
        }
        Ok(())
    }

    /// Stricter threshold used to reject near-duplicate registrations
    pub fn registration_threshold(&self) -> f32 {
        self.recognition_threshold * self.registration_factor
    }
}

/// Outcome of one frame of identity evidence
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// No usable embedding this frame
    NoFace,
    /// Cold start: nothing to match against
    NoProfiles,
    /// Best candidate too far away; consensus cleared
    Rejected { candidate: u32, distance: f32 },
    /// Evidence recorded, no decision yet
    Pending {
        candidate: u32,
        distance: f32,
        votes: usize,
    },
    /// Consensus reached
    Accepted {
        profile: UserProfile,
        distance: f32,
        confidence: f32,
    },
}

/// Outcome of a registration attempt
#[derive(Debug, Clone, PartialEq)]
pub enum RegistrationOutcome {
    Created(UserProfile),
    /// The face is already known; no new profile was written
    Existing { profile: UserProfile, distance: f32 },
}

impl RegistrationOutcome {
    pub fn profile(&self) -> &UserProfile {
        match self {
            RegistrationOutcome::Created(profile) => profile,
            RegistrationOutcome::Existing { profile, .. } => profile,
        }
    }
}

/// Recognition statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IdentityStats {
    pub attempts: u64,
    pub accepted: u64,
    pub rejected: u64,
    pub mean_accepted_distance: f32,
}

struct ProfileCache {
    profiles: Vec<UserProfile>,
    index: SimilarityIndex,
}

struct Tracker {
    consensus: ConsensusBuffer,
    stats: IdentityStats,
    last_no_match_log: Option<Instant>,
}

/// Resolves face embeddings to known drivers
///
/// The profile cache and the consensus tracker sit behind separate mutexes.
/// Neither is held while the profile store is called. Registrations are
/// serialized by their own lock, held from the duplicate check to the save.
pub struct IdentityResolver<S: ProfileStore> {
    config: IdentityConfig,
    store: Arc<S>,
    cache: Mutex<ProfileCache>,
    tracker: Mutex<Tracker>,
    registration: Mutex<()>,
}

impl<S: ProfileStore> IdentityResolver<S> {
    /// Validate the configuration and load all profiles from the store
    pub fn new(config: IdentityConfig, store: Arc<S>) -> Result<Self, AuthError> {
        config.validate()?;

        let resolver = Self {
            cache: Mutex::new(ProfileCache {
                profiles: Vec::new(),
                index: SimilarityIndex::empty(config.metric),
            }),
            tracker: Mutex::new(Tracker {
                consensus: ConsensusBuffer::new(
                    config.min_consistent_frames,
                    config.consensus_ratio,
                ),
                stats: IdentityStats::default(),
                last_no_match_log: None,
            }),
            registration: Mutex::new(()),
            config,
            store,
        };
        resolver.reload()?;
        Ok(resolver)
    }

    pub fn config(&self) -> &IdentityConfig {
        &self.config
    }

    fn lock_cache(&self) -> Result<MutexGuard<'_, ProfileCache>, AuthError> {
        self.cache
            .lock()
            .map_err(|e| AuthError::Lock(format!("profile cache: {}", e)))
    }

    fn lock_tracker(&self) -> Result<MutexGuard<'_, Tracker>, AuthError> {
        self.tracker
            .lock()
            .map_err(|e| AuthError::Lock(format!("consensus tracker: {}", e)))
    }

    /// Replace the cache with the store's current contents
    pub fn reload(&self) -> Result<usize, AuthError> {
        let profiles = self.store.load_all()?;
        let index = SimilarityIndex::build(&profiles, self.config.metric);
        let count = profiles.len();

        let mut cache = self.lock_cache()?;
        cache.profiles = profiles;
        cache.index = index;
        info!(profiles = count, "Loaded user profiles");
        Ok(count)
    }

    pub fn profile_count(&self) -> Result<usize, AuthError> {
        Ok(self.lock_cache()?.profiles.len())
    }

    pub fn get_profile(&self, user_id: u32) -> Result<Option<UserProfile>, AuthError> {
        Ok(self
            .lock_cache()?
            .profiles
            .iter()
            .find(|p| p.user_id == user_id)
            .cloned())
    }

    /// `max(0, 1 - distance / threshold)`
    pub fn confidence(&self, distance: f32) -> f32 {
        (1.0 - distance / self.config.recognition_threshold).max(0.0)
    }

    fn is_valid(&self, embedding: &[f32]) -> bool {
        match validate_embedding(
            embedding,
            self.config.embedding_dim,
            self.config.embedding_norm_range,
        ) {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, "Ignoring embedding");
                false
            }
        }
    }

    /// Feed one frame of identity evidence
    pub fn resolve(&self, embedding: Option<&[f32]>) -> Result<Resolution, AuthError> {
        let embedding = match embedding {
            Some(e) if self.is_valid(e) => e,
            _ => {
                self.lock_tracker()?.consensus.clear();
                return Ok(Resolution::NoFace);
            }
        };

        let best = {
            let cache = self.lock_cache()?;
            if cache.profiles.is_empty() {
                None
            } else {
                cache
                    .index
                    .best_match(embedding)
                    .map(|m| (m, cache.profiles.iter().find(|p| p.user_id == m.user_id).cloned()))
            }
        };

        let mut tracker = self.lock_tracker()?;
        tracker.stats.attempts += 1;

        let (best, profile) = match best {
            Some((m, Some(profile))) => (m, profile),
            _ => {
                tracker.consensus.clear();
                return Ok(Resolution::NoProfiles);
            }
        };

        if best.distance > self.config.recognition_threshold {
            tracker.consensus.clear();
            tracker.stats.rejected += 1;
            counter!("dms_identity_rejected_total").increment(1);

            let interval = Duration::from_secs_f64(self.config.no_match_log_interval_sec.max(0.0));
            let due = tracker
                .last_no_match_log
                .map_or(true, |t| t.elapsed() >= interval);
            if due {
                tracker.last_no_match_log = Some(Instant::now());
                info!(
                    closest = best.user_id,
                    distance = best.distance,
                    threshold = self.config.recognition_threshold,
                    "No matching user"
                );
            } else {
                debug!(closest = best.user_id, distance = best.distance, "No matching user");
            }
            return Ok(Resolution::Rejected {
                candidate: best.user_id,
                distance: best.distance,
            });
        }

        tracker.consensus.push(best.user_id, best.distance);
        let votes = tracker.consensus.len();

        let Some(user_id) = tracker.consensus.decide(best.user_id) else {
            debug!(candidate = best.user_id, distance = best.distance, votes, "Identity pending");
            return Ok(Resolution::Pending {
                candidate: best.user_id,
                distance: best.distance,
                votes,
            });
        };

        let distance = tracker.consensus.mean_distance(user_id).unwrap_or(best.distance);
        let stats = &mut tracker.stats;
        stats.accepted += 1;
        stats.mean_accepted_distance +=
            (distance - stats.mean_accepted_distance) / stats.accepted as f32;
        drop(tracker);

        counter!("dms_identity_accepted_total").increment(1);
        let confidence = self.confidence(distance);
        debug!(user_id, distance, confidence, "Identity accepted");

        let now = Utc::now();
        if let Err(e) = self.store.touch_last_seen(user_id, now) {
            warn!(user_id, error = %e, "Failed to update last seen");
        }
        let mut profile = profile;
        profile.last_seen = now;
        if let Some(cached) = self
            .lock_cache()?
            .profiles
            .iter_mut()
            .find(|p| p.user_id == user_id)
        {
            cached.last_seen = now;
        }

        Ok(Resolution::Accepted {
            profile,
            distance,
            confidence,
        })
    }

    /// Single-frame lookup without consensus (known-user probe)
    pub fn identify_once(&self, embedding: &[f32]) -> Result<Option<(UserProfile, f32)>, AuthError> {
        if !self.is_valid(embedding) {
            return Ok(None);
        }
        let cache = self.lock_cache()?;
        let Some(m) = cache.index.best_match(embedding) else {
            return Ok(None);
        };
        if m.distance > self.config.recognition_threshold {
            return Ok(None);
        }
        Ok(cache
            .profiles
            .iter()
            .find(|p| p.user_id == m.user_id)
            .map(|p| (p.clone(), m.distance)))
    }

    /// Does the embedding still belong to `user_id`? `None` when there is no usable face
    pub fn verify(&self, user_id: u32, embedding: Option<&[f32]>) -> Result<Option<bool>, AuthError> {
        let Some(embedding) = embedding.filter(|e| self.is_valid(e)) else {
            return Ok(None);
        };
        let distance = self.lock_cache()?.index.distance_to(user_id, embedding);
        Ok(Some(
            distance.map_or(false, |d| d <= self.config.recognition_threshold),
        ))
    }

    /// Register a new driver from one or more embeddings of the same face
    ///
    /// Embeddings are validated, averaged and re-normalized. A face within the
    /// registration threshold of an existing profile returns that profile.
    pub fn register(
        &self,
        embeddings: &[Vec<f32>],
        ear_threshold: f64,
    ) -> Result<RegistrationOutcome, AuthError> {
        if !(ear_threshold.is_finite() && ear_threshold > 0.0) {
            return Err(AuthError::Config(format!(
                "ear_threshold must be positive, got {}",
                ear_threshold
            )));
        }

        let valid: Vec<&[f32]> = embeddings
            .iter()
            .map(Vec::as_slice)
            .filter(|e| self.is_valid(e))
            .collect();
        let encoding = average_embeddings(&valid).ok_or(AuthError::NoValidEmbeddings)?;

        let _registering = self
            .registration
            .lock()
            .map_err(|e| AuthError::Lock(format!("registration: {}", e)))?;
        {
            let cache = self.lock_cache()?;
            if let Some(m) = cache.index.best_match(&encoding) {
                if m.distance <= self.config.registration_threshold() {
                    if let Some(existing) = cache.profiles.iter().find(|p| p.user_id == m.user_id) {
                        warn!(
                            user_id = existing.user_id,
                            distance = m.distance,
                            "Duplicate face detected, reusing existing profile"
                        );
                        return Ok(RegistrationOutcome::Existing {
                            profile: existing.clone(),
                            distance: m.distance,
                        });
                    }
                }
            }
        }

        let user_id = self.store.next_user_id()?;
        let profile = UserProfile::new(user_id, ear_threshold, FaceEmbedding::from_raw(encoding));
        self.store.save(&profile)?;

        {
            let mut cache = self.lock_cache()?;
            cache.profiles.push(profile.clone());
            cache.index = SimilarityIndex::build(&cache.profiles, self.config.metric);
        }
        counter!("dms_users_registered_total").increment(1);
        info!(
            user_id,
            ear_threshold,
            samples = valid.len(),
            "Registered new user"
        );
        Ok(RegistrationOutcome::Created(profile))
    }

    /// Forget accumulated evidence (identity hand-off)
    pub fn reset_consensus(&self) -> Result<(), AuthError> {
        self.lock_tracker()?.consensus.clear();
        Ok(())
    }

    pub fn consensus_len(&self) -> Result<usize, AuthError> {
        Ok(self.lock_tracker()?.consensus.len())
    }

    pub fn stats(&self) -> Result<IdentityStats, AuthError> {
        Ok(self.lock_tracker()?.stats.clone())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::DateTime;

    /// In-memory store for resolver tests
    #[derive(Default)]
    pub(crate) struct TestStore {
        pub profiles: Mutex<Vec<UserProfile>>,
        pub touched: Mutex<Vec<u32>>,
    }

    impl ProfileStore for TestStore {
        fn load_all(&self) -> Result<Vec<UserProfile>, AuthError> {
            Ok(self.profiles.lock().unwrap().clone())
        }

        fn save(&self, profile: &UserProfile) -> Result<(), AuthError> {
            self.profiles.lock().unwrap().push(profile.clone());
            Ok(())
        }

        fn next_user_id(&self) -> Result<u32, AuthError> {
            let profiles = self.profiles.lock().unwrap();
            Ok(profiles.iter().map(|p| p.user_id).max().unwrap_or(0) + 1)
        }

        fn touch_last_seen(&self, user_id: u32, _at: DateTime<Utc>) -> Result<(), AuthError> {
            self.touched.lock().unwrap().push(user_id);
            Ok(())
        }
    }

    pub(crate) const DIM: usize = 8;

    pub(crate) fn axis(hot: usize) -> Vec<f32> {
        let mut v = vec![0.0; DIM];
        v[hot] = 1.0;
        v
    }

    /// Unit vector at a chosen Euclidean distance from `axis(hot)`
    pub(crate) fn near(hot: usize, other: usize, distance: f32) -> Vec<f32> {
        // For unit a, b: |a-b|^2 = 2 - 2cos
        let cos = 1.0 - distance * distance / 2.0;
        let sin = (1.0 - cos * cos).max(0.0).sqrt();
        let mut v = vec![0.0; DIM];
        v[hot] = cos;
        v[other] = sin;
        v
    }

    pub(crate) fn config() -> IdentityConfig {
        IdentityConfig {
            embedding_dim: DIM,
            ..IdentityConfig::default()
        }
    }

    pub(crate) fn resolver_with(users: &[(u32, usize)]) -> IdentityResolver<TestStore> {
        let store = TestStore::default();
        for &(user_id, hot) in users {
            store
                .profiles
                .lock()
                .unwrap()
                .push(UserProfile::new(user_id, 0.21, FaceEmbedding::from_raw(axis(hot))));
        }
        IdentityResolver::new(config(), Arc::new(store)).unwrap()
    }

    #[test]
    fn test_invalid_config_rejected() {
        let bad = IdentityConfig {
            min_consistent_frames: 0,
            ..config()
        };
        let result = IdentityResolver::new(bad, Arc::new(TestStore::default()));
        assert!(matches!(result, Err(AuthError::Config(_))));
    }

    #[test]
    fn test_no_profiles() {
        let resolver = resolver_with(&[]);
        assert_eq!(resolver.resolve(Some(&axis(0))).unwrap(), Resolution::NoProfiles);
    }

    #[test]
    fn test_consensus_accepts_after_full_window() {
        let resolver = resolver_with(&[(3, 0), (4, 1)]);
        let query = near(0, 2, 0.4);

        for frame in 1..10 {
            match resolver.resolve(Some(&query)).unwrap() {
                Resolution::Pending { candidate, votes, .. } => {
                    assert_eq!(candidate, 3);
                    assert_eq!(votes, frame);
                }
                other => panic!("unexpected {:?}", other),
            }
        }

        match resolver.resolve(Some(&query)).unwrap() {
            Resolution::Accepted {
                profile,
                distance,
                confidence,
            } => {
                assert_eq!(profile.user_id, 3);
                assert!((distance - 0.4).abs() < 1e-3);
                assert!((confidence - 0.2).abs() < 1e-2);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(resolver.store.touched.lock().unwrap().as_slice(), &[3]);
        assert_eq!(resolver.stats().unwrap().accepted, 1);
    }

    #[test]
    fn test_high_distance_frame_clears_buffer() {
        let resolver = resolver_with(&[(3, 0)]);
        for _ in 0..9 {
            resolver.resolve(Some(&near(0, 2, 0.4))).unwrap();
        }
        assert_eq!(resolver.consensus_len().unwrap(), 9);

        let result = resolver.resolve(Some(&near(0, 2, 0.9))).unwrap();
        assert!(matches!(result, Resolution::Rejected { candidate: 3, .. }));
        assert_eq!(resolver.consensus_len().unwrap(), 0);
        assert_eq!(resolver.stats().unwrap().accepted, 0);
    }

    #[test]
    fn test_missing_face_clears_buffer() {
        let resolver = resolver_with(&[(3, 0)]);
        resolver.resolve(Some(&axis(0))).unwrap();
        assert_eq!(resolver.resolve(None).unwrap(), Resolution::NoFace);
        assert_eq!(resolver.consensus_len().unwrap(), 0);

        // Wrong dimension is absence of evidence too
        assert_eq!(resolver.resolve(Some(&[1.0, 0.0])).unwrap(), Resolution::NoFace);
    }

    #[test]
    fn test_register_creates_then_reuses() {
        let resolver = resolver_with(&[]);
        let created = resolver
            .register(&[near(1, 2, 0.1), near(1, 3, 0.1)], 0.2)
            .unwrap();
        let user_id = match &created {
            RegistrationOutcome::Created(p) => p.user_id,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(user_id, 1);
        assert_eq!(resolver.profile_count().unwrap(), 1);

        let again = resolver.register(&[axis(1)], 0.25).unwrap();
        assert!(matches!(again, RegistrationOutcome::Existing { .. }));
        assert_eq!(again.profile().user_id, user_id);
        assert_eq!(resolver.profile_count().unwrap(), 1);

        // Clearly different face gets a new id
        let other = resolver.register(&[axis(5)], 0.2).unwrap();
        assert_eq!(other.profile().user_id, 2);
    }

    #[test]
    fn test_concurrent_register_creates_one_profile() {
        let resolver = &resolver_with(&[]);
        let start = &std::sync::Barrier::new(2);

        let outcomes: Vec<RegistrationOutcome> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..2)
                .map(|_| {
                    scope.spawn(move || {
                        start.wait();
                        resolver.register(&[axis(3)], 0.2).unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let created = outcomes
            .iter()
            .filter(|o| matches!(o, RegistrationOutcome::Created(_)))
            .count();
        assert_eq!(created, 1);
        assert!(outcomes.iter().all(|o| o.profile().user_id == 1));
        assert_eq!(resolver.profile_count().unwrap(), 1);
        assert_eq!(resolver.store.profiles.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_register_needs_valid_embedding() {
        let resolver = resolver_with(&[]);
        assert_eq!(
            resolver.register(&[vec![f32::NAN; DIM]], 0.2),
            Err(AuthError::NoValidEmbeddings)
        );
    }

    #[test]
    fn test_verify_active_user() {
        let resolver = resolver_with(&[(3, 0), (4, 1)]);
        assert_eq!(resolver.verify(3, Some(&near(0, 2, 0.3))).unwrap(), Some(true));
        assert_eq!(resolver.verify(3, Some(&axis(1))).unwrap(), Some(false));
        assert_eq!(resolver.verify(3, None).unwrap(), None);
    }

    #[test]
    fn test_identify_once() {
        let resolver = resolver_with(&[(7, 4)]);
        let (profile, _) = resolver.identify_once(&axis(4)).unwrap().unwrap();
        assert_eq!(profile.user_id, 7);
        assert!(resolver.identify_once(&axis(0)).unwrap().is_none());
    }
}
