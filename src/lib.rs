//! Memoric — persistent, policy-governed memory store for AI agents.
//!
//! A memory is saved once, enriched with metadata, and ages through
//! short-term, mid-term, and long-term tiers under a policy executor that
//! trims, summarizes, and clusters it over time. Retrieval scores
//! candidates deterministically against importance, recency, and
//! repetition rather than embeddings.

pub mod config;
pub mod enrich;
pub mod error;
pub mod events;
pub mod manager;
pub mod policy;
pub mod retriever;
pub mod scoring;
pub mod store;
pub mod text;
pub mod types;

pub use config::Config;
pub use error::{MemoricError, Result};
pub use manager::{Capability, InspectionReport, MemoryManager, RetrieveRequest, RetrievedContext, SaveRequest, TierStats};
pub use store::{SqliteStore, StorageBackend};
pub use types::{MemoryCluster, MemoryId, MemoryRecord, Metadata, MetadataValue, Tier};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
