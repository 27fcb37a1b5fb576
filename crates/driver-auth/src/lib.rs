//! Driver Identity Module
//!
//! Face-embedding based driver identification:
//! - Similarity index over known profiles (Euclidean or cosine)
//! - Multi-frame consensus before a match is accepted
//! - Registration with a stricter duplicate check
//! - Background "is this a known user?" probe with a latest-wins mailbox

mod consensus;
mod embedding;
mod matcher;
mod probe;
mod profile;
mod resolver;
mod store;

pub use consensus::ConsensusBuffer;
pub use embedding::{average_embeddings, normalize, validate_embedding, FaceEmbedding};
pub use matcher::{DistanceMetric, Match, SimilarityIndex};
pub use probe::{KnownUserProbe, ProbeOutcome, ProbeResult};
pub use profile::UserProfile;
pub use resolver::{
    IdentityConfig, IdentityResolver, IdentityStats, RegistrationOutcome, Resolution,
};
pub use store::ProfileStore;

use thiserror::Error;

/// Identity error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AuthError {
    #[error("Invalid embedding: {0}")]
    InvalidEmbedding(String),

    #[error("No valid embeddings supplied for registration")]
    NoValidEmbeddings,

    #[error("Invalid identity configuration: {0}")]
    Config(String),

    #[error("Profile store error: {0}")]
    Store(String),

    #[error("Lock error: {0}")]
    Lock(String),
}
