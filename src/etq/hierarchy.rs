//! Agglomerative clustering over tag embeddings, for review ordering.
//!
//! This never feeds canonicalization: the merge tree only decides a leaf
//! order that puts similar tags next to each other in reports.

use serde::{Deserialize, Serialize};
use strum::{EnumString, IntoStaticStr};
use tracing::info;

use super::{
    cache::EmbeddingCache,
    embeddings::{EmbeddingProvider, VectorNorm, embed_with_cache},
    error::Result,
    model::NormalizedItems,
    similarity::cosine_similarity_matrix,
};

/// How the distance between two clusters is derived from member distances.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    clap::ValueEnum,
    IntoStaticStr,
    EnumString,
    derive_more::Display,
)]
#[strum(serialize_all = "lowercase")]
pub enum LinkageMethod {
    Single,
    Complete,
    #[default]
    Average,
    Weighted,
    Ward,
}

/// One merge of the dendrogram.
///
/// Labels below `n` are leaves (input positions); label `n + k` is the
/// cluster formed at step `k`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinkageStep {
    pub left: usize,
    pub right: usize,
    /// Cosine distance at which the two clusters merged.
    pub distance: f64,
    /// Number of leaves under the new cluster.
    pub size: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HierarchyResult {
    /// One label per input, in input order.
    pub labels: Vec<String>,
    /// Dendrogram leaf order; a permutation of `0..labels.len()`.
    pub order: Vec<usize>,
    /// `labels.len() - 1` merges, in the order they happened.
    pub linkage: Vec<LinkageStep>,
}

impl HierarchyResult {
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Labels in dendrogram leaf order.
    pub fn ordered_labels(&self) -> Vec<&str> {
        self.order.iter().map(|&i| self.labels[i].as_str()).collect()
    }
}

/// Average-linkage hierarchy over `texts`, labelled by text.
pub fn build_hierarchy<P, S>(
    texts: &[S],
    provider: &P,
    model_name: &str,
    cache: Option<&EmbeddingCache>,
) -> Result<HierarchyResult>
where
    P: EmbeddingProvider + ?Sized,
    S: AsRef<str>,
{
    build_hierarchy_with(texts, provider, model_name, cache, LinkageMethod::Average)
}

/// [`build_hierarchy`] with an explicit linkage method.
pub fn build_hierarchy_with<P, S>(
    texts: &[S],
    provider: &P,
    model_name: &str,
    cache: Option<&EmbeddingCache>,
    method: LinkageMethod,
) -> Result<HierarchyResult>
where
    P: EmbeddingProvider + ?Sized,
    S: AsRef<str>,
{
    let labels = texts.iter().map(|t| t.as_ref().to_string()).collect();
    hierarchy_of(texts, labels, provider, model_name, cache, method)
}

/// Hierarchy over normalized items, labelled by item id.
pub fn build_item_hierarchy<P>(
    items: &NormalizedItems,
    provider: &P,
    model_name: &str,
    cache: Option<&EmbeddingCache>,
    method: LinkageMethod,
) -> Result<HierarchyResult>
where
    P: EmbeddingProvider + ?Sized,
{
    let labels = items.ids().into_iter().map(str::to_string).collect();
    hierarchy_of(&items.texts(), labels, provider, model_name, cache, method)
}

fn hierarchy_of<P, S>(
    texts: &[S],
    labels: Vec<String>,
    provider: &P,
    model_name: &str,
    cache: Option<&EmbeddingCache>,
    method: LinkageMethod,
) -> Result<HierarchyResult>
where
    P: EmbeddingProvider + ?Sized,
    S: AsRef<str>,
{
    if texts.is_empty() {
        return Ok(HierarchyResult::default());
    }
    linkage::ensure_available()?;

    let n = texts.len();
    let vectors = embed_with_cache(texts, provider, model_name, cache, VectorNorm::L2)?;
    let similarity = cosine_similarity_matrix(&vectors)?;

    let mut condensed = Vec::with_capacity(n * (n - 1) / 2);
    for i in 0..n {
        for j in (i + 1)..n {
            condensed.push(f64::from(1.0 - similarity[[i, j]]).max(0.0));
        }
    }

    let steps = linkage::agglomerate(&mut condensed, n, method)?;
    let order = leaf_order(n, &steps);
    info!(items = n, method = %method, "built tag hierarchy");

    Ok(HierarchyResult {
        labels,
        order,
        linkage: steps,
    })
}

/// Left-to-right leaves of the merge tree rooted at the last step.
fn leaf_order(n: usize, steps: &[LinkageStep]) -> Vec<usize> {
    if n == 0 {
        return vec![];
    }
    let root = n + steps.len().saturating_sub(1);
    if steps.is_empty() {
        return (0..n).collect();
    }

    let mut order = Vec::with_capacity(n);
    let mut stack = vec![root];
    while let Some(label) = stack.pop() {
        if label < n {
            order.push(label);
        } else {
            let step = &steps[label - n];
            stack.push(step.right);
            stack.push(step.left);
        }
    }
    order
}

#[cfg(feature = "hierarchy")]
mod linkage {
    use super::{LinkageMethod, LinkageStep};
    use crate::etq::error::Result;

    pub(super) fn ensure_available() -> Result<()> {
        Ok(())
    }

    pub(super) fn agglomerate(
        condensed: &mut [f64],
        n: usize,
        method: LinkageMethod,
    ) -> Result<Vec<LinkageStep>> {
        if n < 2 {
            return Ok(vec![]);
        }
        let dendrogram = kodama::linkage(condensed, n, method.into());
        Ok(dendrogram
            .steps()
            .iter()
            .map(|s| LinkageStep {
                left: s.cluster1,
                right: s.cluster2,
                distance: s.dissimilarity,
                size: s.size,
            })
            .collect())
    }

    impl From<LinkageMethod> for kodama::Method {
        fn from(value: LinkageMethod) -> Self {
            match value {
                LinkageMethod::Single => kodama::Method::Single,
                LinkageMethod::Complete => kodama::Method::Complete,
                LinkageMethod::Average => kodama::Method::Average,
                LinkageMethod::Weighted => kodama::Method::Weighted,
                LinkageMethod::Ward => kodama::Method::Ward,
            }
        }
    }
}

#[cfg(not(feature = "hierarchy"))]
mod linkage {
    use super::{LinkageMethod, LinkageStep};
    use crate::etq::error::{DedupError, Result};

    const UNAVAILABLE: &str =
        "hierarchical clustering needs the `hierarchy` feature (kodama linkage); rebuild with it enabled";

    pub(super) fn ensure_available() -> Result<()> {
        Err(DedupError::DependencyUnavailable(UNAVAILABLE.to_string()))
    }

    pub(super) fn agglomerate(
        _condensed: &mut [f64],
        _n: usize,
        _method: LinkageMethod,
    ) -> Result<Vec<LinkageStep>> {
        Err(DedupError::DependencyUnavailable(UNAVAILABLE.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::etq::embeddings::Embeddings;

    fn provider() -> impl Fn(&[&str]) -> anyhow::Result<Embeddings> {
        let table: HashMap<&'static str, Vec<f32>> = HashMap::from([
            ("alpha", vec![1.0, 0.0]),
            ("beta", vec![0.0, 1.0]),
            ("gamma", vec![0.7, 0.3]),
        ]);
        move |texts: &[&str]| Ok(texts.iter().map(|t| table[*t].clone()).collect::<Vec<_>>().into())
    }

    #[test]
    fn test_leaf_order_walks_left_first() {
        let steps = vec![
            LinkageStep { left: 0, right: 2, distance: 0.1, size: 2 },
            LinkageStep { left: 1, right: 3, distance: 0.8, size: 3 },
        ];
        assert_eq!(leaf_order(3, &steps), vec![1, 0, 2]);
        assert_eq!(leaf_order(1, &[]), vec![0]);
        assert!(leaf_order(0, &[]).is_empty());
    }

    #[test]
    fn test_empty_input() {
        let none: [&str; 0] = [];
        let result = build_hierarchy(&none, &provider(), "m", None).unwrap();
        assert!(result.is_empty());
        assert!(result.order.is_empty());
        assert!(result.linkage.is_empty());
    }

    #[cfg(feature = "hierarchy")]
    #[test]
    fn test_builds_average_linkage() {
        let items = ["alpha", "beta", "gamma"];
        let result = build_hierarchy(&items, &provider(), "m", None).unwrap();

        assert_eq!(result.labels, vec!["alpha", "beta", "gamma"]);
        let mut sorted = result.order.clone();
        sorted.sort();
        assert_eq!(sorted, vec![0, 1, 2]);

        assert_eq!(result.linkage.len(), 2);
        let first = result.linkage[0];
        let mut merged = [first.left, first.right];
        merged.sort();
        assert_eq!(merged, [0, 2]);
        assert_eq!(result.linkage[1].size, 3);

        // beta joins {alpha, gamma} at the mean of its two distances.
        let gamma = [0.7_f64, 0.3];
        let norm = (gamma[0] * gamma[0] + gamma[1] * gamma[1]).sqrt();
        let expected = (1.0 + (1.0 - gamma[1] / norm)) / 2.0;
        assert!((result.linkage[1].distance - expected).abs() < 1e-4);

        let pos = |i: usize| result.order.iter().position(|&o| o == i).unwrap();
        assert_eq!(pos(0).abs_diff(pos(2)), 1);
    }

    #[cfg(feature = "hierarchy")]
    #[test]
    fn test_single_item() {
        let result = build_hierarchy(&["alpha"], &provider(), "m", None).unwrap();
        assert_eq!(result.order, vec![0]);
        assert!(result.linkage.is_empty());
    }

    #[cfg(feature = "hierarchy")]
    #[test]
    fn test_item_hierarchy_labels_by_id() {
        let items = crate::etq::inputs::normalize_inputs(
            &[("a", "alpha"), ("b", "beta")].into_iter().collect(),
        )
        .unwrap();
        let result =
            build_item_hierarchy(&items, &provider(), "m", None, LinkageMethod::Complete).unwrap();
        assert_eq!(result.labels, vec!["a", "b"]);
        assert_eq!(result.ordered_labels().len(), 2);
    }

    #[cfg(not(feature = "hierarchy"))]
    #[test]
    fn test_unavailable_without_feature() {
        use crate::etq::error::DedupError;

        let result = build_hierarchy(&["alpha", "beta"], &provider(), "m", None);
        assert!(matches!(result, Err(DedupError::DependencyUnavailable(_))));
    }

    #[test]
    fn test_linkage_method_names() {
        assert_eq!("ward".parse::<LinkageMethod>().unwrap(), LinkageMethod::Ward);
        assert_eq!(LinkageMethod::default(), LinkageMethod::Average);
    }
}
