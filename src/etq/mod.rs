pub mod cache;
pub mod canonical;
pub mod embeddings;
pub mod error;
pub mod hierarchy;
pub mod inputs;
pub mod model;
pub mod similarity;

#[cfg(feature = "bert")]
pub mod bert;
