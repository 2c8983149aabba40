//! Local sentence-embedding provider backed by `rust-bert`.

use anyhow::{Context, Result};
use rust_bert::pipelines::sentence_embeddings;
use tch::Device;
use tracing::{debug, info};

use super::embeddings::{EmbeddingProvider, Embeddings, SentenceEmbeddingsModelType};

/// A loaded sentence-embedding model. Loading downloads weights on first
/// use, so build one per run and reuse it across calls.
pub struct SentenceEmbedder {
    model: sentence_embeddings::SentenceEmbeddingsModel,
    model_type: SentenceEmbeddingsModelType,
}

impl SentenceEmbedder {
    /// Load `model_type` on the first CUDA device, falling back to CPU.
    pub fn load(model_type: SentenceEmbeddingsModelType) -> Result<Self> {
        Self::load_on(model_type, Device::cuda_if_available())
    }

    pub fn load_on(model_type: SentenceEmbeddingsModelType, device: Device) -> Result<Self> {
        let model = sentence_embeddings::SentenceEmbeddingsBuilder::remote(model_type.into())
            .with_device(device)
            .create_model()
            .with_context(|| format!("loading embedding model {}", model_type.model_name()))?;
        info!(model = model_type.model_name(), ?device, "loaded embedding model");
        Ok(Self { model, model_type })
    }

    /// The cache key for vectors this model produces.
    pub fn model_name(&self) -> &'static str {
        self.model_type.model_name()
    }
}

impl EmbeddingProvider for SentenceEmbedder {
    fn embed(&self, texts: &[&str]) -> Result<Embeddings> {
        debug!(texts = texts.len(), model = self.model_name(), "encoding");
        self.model
            .encode(texts)
            .map(Embeddings::from)
            .with_context(|| format!("encoding {} texts", texts.len()))
    }
}

impl From<SentenceEmbeddingsModelType> for sentence_embeddings::SentenceEmbeddingsModelType {
    fn from(val: SentenceEmbeddingsModelType) -> Self {
        use sentence_embeddings::SentenceEmbeddingsModelType as Remote;
        match val {
            SentenceEmbeddingsModelType::DistiluseBaseMultilingualCased => {
                Remote::DistiluseBaseMultilingualCased
            }
            SentenceEmbeddingsModelType::BertBaseNliMeanTokens => Remote::BertBaseNliMeanTokens,
            SentenceEmbeddingsModelType::AllMiniLmL12V2 => Remote::AllMiniLmL12V2,
            SentenceEmbeddingsModelType::AllMiniLmL6V2 => Remote::AllMiniLmL6V2,
            SentenceEmbeddingsModelType::AllDistilrobertaV1 => Remote::AllDistilrobertaV1,
            SentenceEmbeddingsModelType::ParaphraseAlbertSmallV2 => Remote::ParaphraseAlbertSmallV2,
            SentenceEmbeddingsModelType::SentenceT5Base => Remote::SentenceT5Base,
        }
    }
}
