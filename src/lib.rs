//! Near-duplicate grouping for free-text tag vocabularies.
//!
//! Tags are embedded through an injected [`etq::embeddings::EmbeddingProvider`],
//! memoized in a persistent [`etq::cache::EmbeddingCache`], and grouped into
//! connected components of cosine similarity by
//! [`etq::similarity::group_near_duplicates`]. Groups feed
//! [`etq::canonical`] to produce an alias map; [`etq::hierarchy`] builds a
//! dendrogram ordering over the same vectors for review.

pub mod config;
pub mod display;
pub mod etq;

pub use etq::error::{DedupError, Result};
