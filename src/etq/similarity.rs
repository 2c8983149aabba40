//! Flat near-duplicate grouping: connected components of the cosine
//! similarity graph at a threshold.

use std::collections::{BTreeMap, HashMap};

use ndarray::Array2;
use tracing::{debug, info};

use super::{
    cache::EmbeddingCache,
    embeddings::{EmbeddingProvider, Embeddings, VectorNorm, embed_with_cache},
    error::Result,
    inputs::normalize_texts,
    model::{DuplicateGroup, DuplicateGroups, NormalizedItems, SimilarityThreshold},
};

/// Disjoint-set forest over `0..n`, with path halving and union by size.
#[derive(Debug, Clone)]
pub struct DisjointSet {
    parent: Vec<usize>,
    size: Vec<usize>,
}

impl DisjointSet {
    pub fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            size: vec![1; n],
        }
    }

    pub fn len(&self) -> usize {
        self.parent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parent.is_empty()
    }

    /// Representative of the set containing `x`.
    pub fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    /// Merge the sets containing `a` and `b`. Returns false if they were
    /// already one set.
    pub fn union(&mut self, a: usize, b: usize) -> bool {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return false;
        }
        let (big, small) = if self.size[ra] >= self.size[rb] {
            (ra, rb)
        } else {
            (rb, ra)
        };
        self.parent[small] = big;
        self.size[big] += self.size[small];
        true
    }

    /// All sets, each listing its members in ascending order, ordered by
    /// their smallest member.
    pub fn components(&mut self) -> Vec<Vec<usize>> {
        let mut by_root: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for i in 0..self.len() {
            let root = self.find(i);
            by_root.entry(root).or_default().push(i);
        }
        let mut components: Vec<Vec<usize>> = by_root.into_values().collect();
        components.sort_by_key(|c| c[0]);
        components
    }
}

/// Dense `n x n` cosine similarity of unit-length rows (plain dot product).
pub fn cosine_similarity_matrix(unit_rows: &Embeddings) -> Result<Array2<f32>> {
    let m = unit_rows.as_ndarray()?;
    Ok(m.dot(&m.t()))
}

/// Index sets of the connected components with at least two members,
/// where an edge joins every pair `i < j` with `similarity[[i, j]] >=
/// threshold`. Ordered by descending size, then by first member.
pub fn connected_duplicates(
    similarity: &Array2<f32>,
    threshold: SimilarityThreshold,
) -> Vec<Vec<usize>> {
    let n = similarity.nrows();
    let mut sets = DisjointSet::new(n);
    let mut edges = 0usize;
    for i in 0..n {
        for j in (i + 1)..n {
            if threshold.admits(similarity[[i, j]]) {
                edges += 1;
                sets.union(i, j);
            }
        }
    }

    let mut groups: Vec<Vec<usize>> = sets
        .components()
        .into_iter()
        .filter(|c| c.len() >= 2)
        .collect();
    groups.sort_by(|a, b| b.len().cmp(&a.len()).then(a[0].cmp(&b[0])));
    debug!(items = n, edges, groups = groups.len(), "connected near-duplicates");
    groups
}

/// Group near-duplicate items by cosine similarity of their embeddings.
///
/// Fewer than two items yields no groups and no provider call. Vectors are
/// always L2-normalized before comparison.
pub fn group_near_duplicate_items<P>(
    items: &NormalizedItems,
    provider: &P,
    model_name: &str,
    threshold: SimilarityThreshold,
    cache: Option<&EmbeddingCache>,
) -> Result<DuplicateGroups>
where
    P: EmbeddingProvider + ?Sized,
{
    if items.len() < 2 {
        return Ok(DuplicateGroups::default());
    }

    let vectors = embed_with_cache(&items.texts(), provider, model_name, cache, VectorNorm::L2)?;
    let mut similarity = cosine_similarity_matrix(&vectors)?;
    pin_identical_texts(items, &mut similarity);

    let groups: DuplicateGroups = connected_duplicates(&similarity, threshold)
        .into_iter()
        .map(|indices| DuplicateGroup {
            members: indices.iter().map(|&i| items[i].clone()).collect(),
            indices,
        })
        .collect::<Vec<_>>()
        .into();

    info!(
        items = items.len(),
        threshold = threshold.value(),
        groups = groups.len(),
        grouped = groups.num_grouped(),
        "grouped near-duplicates"
    );
    Ok(groups)
}

/// Repeated texts embed identically; rounding in the normalized dot product
/// must not split them, so their pairwise similarity is set to exactly 1.
fn pin_identical_texts(items: &NormalizedItems, similarity: &mut Array2<f32>) {
    let mut positions: HashMap<&str, Vec<usize>> = HashMap::new();
    for (idx, item) in items.iter().enumerate() {
        positions.entry(item.text.as_str()).or_default().push(idx);
    }
    for same in positions.values().filter(|p| p.len() > 1) {
        for (a, &i) in same.iter().enumerate() {
            for &j in &same[a + 1..] {
                similarity[[i, j]] = 1.0;
                similarity[[j, i]] = 1.0;
            }
        }
    }
}

/// [`group_near_duplicate_items`] over plain strings. A string appearing
/// twice is two items, and they always share a group.
pub fn group_near_duplicates<P, S>(
    texts: &[S],
    provider: &P,
    model_name: &str,
    threshold: SimilarityThreshold,
    cache: Option<&EmbeddingCache>,
) -> Result<DuplicateGroups>
where
    P: EmbeddingProvider + ?Sized,
    S: AsRef<str>,
{
    group_near_duplicate_items(&normalize_texts(texts), provider, model_name, threshold, cache)
}
