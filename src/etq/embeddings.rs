use std::{collections::HashMap, path::Path};

use anyhow::{Context, anyhow};
use derive_more::{Display, From, Into, IntoIterator};
use ndarray::prelude::*;
use serde::{Deserialize, Serialize};
use strum::{EnumString, IntoStaticStr};
use tracing::{debug, warn};

use super::{
    cache::EmbeddingCache,
    error::{DedupError, Result},
};

/// Something that turns a batch of strings into one vector per string, in
/// input order.
///
/// Implemented for any `Fn(&[&str]) -> anyhow::Result<Embeddings>`, so a
/// closure is a provider.
pub trait EmbeddingProvider {
    fn embed(&self, texts: &[&str]) -> anyhow::Result<Embeddings>;
}

impl<F> EmbeddingProvider for F
where
    F: Fn(&[&str]) -> anyhow::Result<Embeddings>,
{
    fn embed(&self, texts: &[&str]) -> anyhow::Result<Embeddings> {
        self(texts)
    }
}

/// Whether rows are scaled to unit L2 length after embedding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum VectorNorm {
    /// Rows as the provider (or cache) returned them.
    #[default]
    Raw,
    /// Rows scaled to unit length; all-zero rows stay zero.
    L2,
}

/// Call the provider once for `texts`, check the row count, optionally
/// normalize. No cache involvement.
pub fn embed_texts<P, S>(texts: &[S], provider: &P, norm: VectorNorm) -> Result<Embeddings>
where
    P: EmbeddingProvider + ?Sized,
    S: AsRef<str>,
{
    let batch: Vec<&str> = texts.iter().map(|t| t.as_ref()).collect();
    let mut embeddings = call_provider(provider, &batch)?;
    if norm == VectorNorm::L2 {
        embeddings.normalize_l2();
    }
    Ok(embeddings)
}

/// Embed `texts`, consulting and filling `cache` when one is given.
///
/// Row `i` of the result belongs to `texts[i]`. Cache misses are sent to
/// the provider in a single batch, in their input order; a fully warm
/// cache makes no provider call. Vectors are cached as the provider
/// returned them and normalized afterwards, so one cache serves callers
/// with different normalization needs.
pub fn embed_with_cache<P, S>(
    texts: &[S],
    provider: &P,
    model_name: &str,
    cache: Option<&EmbeddingCache>,
    norm: VectorNorm,
) -> Result<Embeddings>
where
    P: EmbeddingProvider + ?Sized,
    S: AsRef<str>,
{
    let mut slots: Vec<Option<Vec<f32>>> = Vec::with_capacity(texts.len());
    let mut missing: Vec<&str> = vec![];
    let mut missing_indices: Vec<usize> = vec![];

    for (idx, text) in texts.iter().enumerate() {
        let text = text.as_ref();
        let hit = match cache {
            Some(c) => c.get(model_name, text)?,
            None => None,
        };
        if hit.is_none() {
            missing.push(text);
            missing_indices.push(idx);
        }
        slots.push(hit);
    }

    debug!(
        model = model_name,
        total = texts.len(),
        hits = texts.len() - missing.len(),
        misses = missing.len(),
        "embedding lookup"
    );

    if !missing.is_empty() {
        let computed = call_provider(provider, &missing)?;
        for ((text, idx), vector) in missing.iter().zip(&missing_indices).zip(computed) {
            if let Some(c) = cache {
                c.put(model_name, text, &vector)?;
            }
            slots[*idx] = Some(vector);
        }
    }

    let rows: Vec<Vec<f32>> = slots.into_iter().flatten().collect();
    if rows.len() != texts.len() {
        return Err(DedupError::CacheConsistency(format!(
            "assembled {} vectors for {} texts",
            rows.len(),
            texts.len()
        )));
    }
    let mut embeddings = Embeddings::from(rows);
    // Fresh rows agree with each other; a stale cached row may not.
    if let Some(first) = embeddings.0.first().map(Vec::len) {
        if let Some((idx, bad)) = embeddings.0.iter().enumerate().find(|(_, r)| r.len() != first) {
            return Err(DedupError::CacheConsistency(format!(
                "vector for {:?} has dimensionality {}, expected {}",
                texts[idx].as_ref(),
                bad.len(),
                first
            )));
        }
    }

    if norm == VectorNorm::L2 {
        embeddings.normalize_l2();
    }
    Ok(embeddings)
}

fn call_provider<P>(provider: &P, batch: &[&str]) -> Result<Embeddings>
where
    P: EmbeddingProvider + ?Sized,
{
    debug!(batch = batch.len(), "calling embedding provider");
    let embeddings = provider
        .embed(batch)
        .map_err(DedupError::EmbeddingProvider)?;
    if embeddings.len() != batch.len() {
        return Err(DedupError::EmbeddingProvider(anyhow!(
            "provider returned {} vectors for a batch of {} texts",
            embeddings.len(),
            batch.len()
        )));
    }
    if let Some(first) = embeddings.0.first().map(Vec::len) {
        if let Some((idx, bad)) = embeddings.0.iter().enumerate().find(|(_, r)| r.len() != first) {
            return Err(DedupError::EmbeddingProvider(anyhow!(
                "provider returned dimensionality {} for {:?}, expected {}",
                bad.len(),
                batch[idx],
                first
            )));
        }
    }
    Ok(embeddings)
}

// ========================================================================
// Types

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, From, Into, Display)]
#[display("{{ rows:{} columns:{} }}", self.0.0, self.0.1)]
pub struct Shape((usize, usize));

/// Newtype wrapper around a batch of embeddings, one row per text.
#[derive(Debug, Clone, Default, From, Into, Serialize, Deserialize, IntoIterator, PartialEq)]
#[into_iterator(owned, ref)]
#[serde(transparent)]
pub struct Embeddings(Vec<Vec<f32>>);

impl Embeddings {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn row(&self, idx: usize) -> Option<&[f32]> {
        self.0.get(idx).map(Vec::as_slice)
    }

    /// Rows and columns; an empty batch has zero columns.
    pub fn shape(&self) -> Shape {
        (self.0.len(), self.0.first().map(Vec::len).unwrap_or(0)).into()
    }

    /// Scale every row to unit L2 length. Zero rows are left untouched.
    pub fn normalize_l2(&mut self) {
        for (idx, row) in self.0.iter_mut().enumerate() {
            let norm = row.iter().map(|v| v * v).sum::<f32>().sqrt();
            if norm == 0.0 {
                warn!(row = idx, "zero-norm embedding left unnormalized");
                continue;
            }
            row.iter_mut().for_each(|v| *v /= norm);
        }
    }

    /// Concatenate the rows into one flat buffer.
    fn as_flattened_vec(&self) -> Vec<f32> {
        self.0.iter().flatten().copied().collect()
    }

    /// Convert into an `Array2`; rows must share one dimensionality.
    pub fn as_ndarray(&self) -> Result<Array2<f32>> {
        let shape = self.shape();
        Array2::from_shape_vec(shape.0, self.as_flattened_vec())
            .map_err(|e| DedupError::CacheConsistency(format!("embeddings {}: {}", shape, e)))
    }
}

/// A provider backed by a precomputed `text -> vector` table, such as a
/// JSON file exported from another embedding run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, From, Into)]
#[serde(transparent)]
pub struct PrecomputedEmbeddings(HashMap<String, Vec<f32>>);

impl PrecomputedEmbeddings {
    /// Load a JSON object mapping each text to its vector.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let body = std::fs::read_to_string(path)
            .with_context(|| format!("reading embeddings table {}", path.display()))?;
        serde_json::from_str(&body)
            .with_context(|| format!("parsing embeddings table {}", path.display()))
    }

    pub fn insert<S: Into<String>>(&mut self, text: S, vector: Vec<f32>) {
        self.0.insert(text.into(), vector);
    }
}

impl EmbeddingProvider for PrecomputedEmbeddings {
    fn embed(&self, texts: &[&str]) -> anyhow::Result<Embeddings> {
        texts
            .iter()
            .map(|t| {
                self.0
                    .get(*t)
                    .cloned()
                    .ok_or_else(|| anyhow!("no precomputed embedding for {:?}", t))
            })
            .collect::<anyhow::Result<Vec<_>>>()
            .map(Embeddings::from)
    }
}

/// Sentence-embedding models known to the tool. The variant's
/// [`model_name`](SentenceEmbeddingsModelType::model_name) is the cache key
/// for vectors it produced.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    clap::ValueEnum,
    Default,
    IntoStaticStr,
    EnumString,
    Display,
)]
pub enum SentenceEmbeddingsModelType {
    DistiluseBaseMultilingualCased,
    BertBaseNliMeanTokens,
    AllMiniLmL12V2,
    #[default]
    AllMiniLmL6V2,
    AllDistilrobertaV1,
    ParaphraseAlbertSmallV2,
    SentenceT5Base,
}

impl SentenceEmbeddingsModelType {
    /// Model identity as published, used as the cache `model` key.
    pub fn model_name(&self) -> &'static str {
        match self {
            Self::DistiluseBaseMultilingualCased => "distiluse-base-multilingual-cased",
            Self::BertBaseNliMeanTokens => "bert-base-nli-mean-tokens",
            Self::AllMiniLmL12V2 => "all-MiniLM-L12-v2",
            Self::AllMiniLmL6V2 => "all-MiniLM-L6-v2",
            Self::AllDistilrobertaV1 => "all-distilroberta-v1",
            Self::ParaphraseAlbertSmallV2 => "paraphrase-albert-small-v2",
            Self::SentenceT5Base => "sentence-t5-base",
        }
    }
}
