//! Canonical tag selection and alias maps.
//!
//! A duplicate group collapses onto its most frequent member (ties broken
//! by lexicographic order); every other distinct member becomes an alias of
//! it. Alias maps are kept per tag field.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    path::Path,
};

use derive_more::{Deref, From, Into, IntoIterator};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{
    cache::EmbeddingCache,
    embeddings::EmbeddingProvider,
    error::{DedupError, Result},
    model::{DuplicateGroups, SimilarityThreshold},
    similarity::group_near_duplicates,
};

/// How often each tag text occurred in the source corpus.
#[derive(Debug, Clone, Default, PartialEq, Eq, From, Into, Deref, IntoIterator)]
#[into_iterator(owned, ref)]
pub struct TagCounts(HashMap<String, usize>);

impl TagCounts {
    /// Count one occurrence of `raw`, trimmed. Blank tags are ignored.
    pub fn add(&mut self, raw: &str) {
        let tag = raw.trim();
        if !tag.is_empty() {
            *self.0.entry(tag.to_string()).or_default() += 1;
        }
    }

    pub fn count(&self, tag: &str) -> usize {
        self.0.get(tag).copied().unwrap_or(0)
    }

    /// Distinct tags, sorted.
    pub fn sorted_tags(&self) -> Vec<&str> {
        let mut tags: Vec<&str> = self.0.keys().map(String::as_str).collect();
        tags.sort_unstable();
        tags
    }
}

impl<S: AsRef<str>> FromIterator<S> for TagCounts {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        let mut counts = TagCounts::default();
        for tag in iter {
            counts.add(tag.as_ref());
        }
        counts
    }
}

/// Pick the member with the highest count; ties go to the
/// lexicographically smallest text. Empty texts are not candidates.
pub fn choose_canonical<'a, S>(members: &'a [S], counts: &TagCounts) -> Result<&'a str>
where
    S: AsRef<str>,
{
    members
        .iter()
        .map(|m| m.as_ref())
        .filter(|t| !t.is_empty())
        .collect::<BTreeSet<&str>>()
        .into_iter()
        .min_by(|a, b| counts.count(b).cmp(&counts.count(a)).then(a.cmp(b)))
        .ok_or_else(|| {
            DedupError::InvalidParameter("cannot choose a canonical tag from an empty group".into())
        })
}

/// `alias -> canonical` for one tag field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, From, Into, Deref, IntoIterator)]
#[into_iterator(owned, ref)]
#[serde(transparent)]
pub struct AliasMap(BTreeMap<String, String>);

impl AliasMap {
    /// Resolve `tag` to its canonical form; unknown tags map to themselves.
    pub fn resolve<'a>(&'a self, tag: &'a str) -> &'a str {
        self.0.get(tag).map(String::as_str).unwrap_or(tag)
    }
}

/// Map every non-canonical member of every group to its group's canonical.
pub fn build_alias_map(groups: &DuplicateGroups, counts: &TagCounts) -> Result<AliasMap> {
    let mut aliases = BTreeMap::new();
    for group in groups {
        let texts = group.texts();
        let canonical = choose_canonical(&texts, counts)?;
        for tag in texts.iter().filter(|t| !t.is_empty() && **t != canonical) {
            aliases.insert(tag.to_string(), canonical.to_string());
        }
    }
    Ok(aliases.into())
}

/// Alias maps keyed by tag field, as written to disk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasDocument {
    pub aliases: BTreeMap<String, AliasMap>,
}

impl AliasDocument {
    /// Total aliases across every field.
    pub fn total_aliases(&self) -> usize {
        self.aliases.values().map(|a| a.len()).sum()
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Write as TOML, creating parent directories.
    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_toml()?)?;
        info!(path = %path.display(), aliases = self.total_aliases(), "wrote alias map");
        Ok(())
    }
}

/// Group each field's distinct tags and derive its alias map. Fields with
/// fewer than two distinct tags get an empty map.
pub fn build_aliases<P>(
    counts_by_field: &BTreeMap<String, TagCounts>,
    provider: &P,
    model_name: &str,
    threshold: SimilarityThreshold,
    cache: Option<&EmbeddingCache>,
) -> Result<AliasDocument>
where
    P: EmbeddingProvider + ?Sized,
{
    let mut document = AliasDocument::default();
    for (field, counts) in counts_by_field {
        let tags = counts.sorted_tags();
        let aliases = if tags.len() < 2 {
            AliasMap::default()
        } else {
            let groups = group_near_duplicates(&tags, provider, model_name, threshold, cache)?;
            build_alias_map(&groups, counts)?
        };
        info!(field = %field, tags = tags.len(), aliases = aliases.len(), "field aliases");
        document.aliases.insert(field.clone(), aliases);
    }
    Ok(document)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::etq::{embeddings::Embeddings, model::DuplicateGroup, inputs::normalize_texts};

    fn group(texts: &[&str]) -> DuplicateGroup {
        let items = normalize_texts(texts);
        DuplicateGroup {
            indices: (0..texts.len()).collect(),
            members: items.to_vec(),
        }
    }

    #[test]
    fn test_counts_trim_and_skip_blank() {
        let counts: TagCounts = ["delay ", "delay", "  ", "", "cost"].into_iter().collect();
        assert_eq!(counts.count("delay"), 2);
        assert_eq!(counts.count("cost"), 1);
        assert_eq!(counts.sorted_tags(), vec!["cost", "delay"]);
    }

    #[test]
    fn test_choose_most_frequent_then_lexicographic() {
        let counts: TagCounts = ["b", "b", "a", "c", "c"].into_iter().collect();
        assert_eq!(choose_canonical(&["a", "b", "c"], &counts).unwrap(), "b");

        let tied: TagCounts = ["zeta", "eta"].into_iter().collect();
        assert_eq!(choose_canonical(&["zeta", "eta"], &tied).unwrap(), "eta");

        assert!(choose_canonical(&["", ""], &tied).is_err());
    }

    #[test]
    fn test_alias_map_from_groups() {
        let counts: TagCounts = ["cost overrun", "cost overruns", "cost overruns", "delay", "delays"]
            .into_iter()
            .collect();
        let groups = DuplicateGroups::from(vec![
            group(&["cost overrun", "cost overruns"]),
            group(&["delay", "delays"]),
        ]);
        let aliases = build_alias_map(&groups, &counts).unwrap();
        assert_eq!(aliases.len(), 2);
        assert_eq!(aliases.resolve("cost overrun"), "cost overruns");
        assert_eq!(aliases.resolve("delays"), "delay");
        assert_eq!(aliases.resolve("delay"), "delay");
        assert_eq!(aliases.resolve("unrelated"), "unrelated");
    }

    #[test]
    fn test_build_aliases_per_field() {
        let provider = |texts: &[&str]| -> anyhow::Result<Embeddings> {
            Ok(texts
                .iter()
                .map(|t| if t.starts_with("trust") { vec![1.0_f32, 0.0] } else { vec![0.0, 1.0] })
                .collect::<Vec<_>>()
                .into())
        };
        let mut by_field = BTreeMap::new();
        by_field.insert(
            "mechanism_tags".to_string(),
            ["trust", "trust", "trust erosion", "delay"].into_iter().collect::<TagCounts>(),
        );
        by_field.insert("outcome_tags".to_string(), ["only"].into_iter().collect::<TagCounts>());

        let threshold = SimilarityThreshold::try_new(0.9).unwrap();
        let document = build_aliases(&by_field, &provider, "m", threshold, None).unwrap();

        assert_eq!(document.total_aliases(), 1);
        assert_eq!(document.aliases["mechanism_tags"].resolve("trust erosion"), "trust");
        assert!(document.aliases["outcome_tags"].is_empty());

        let toml = document.to_toml().unwrap();
        let parsed: AliasDocument = toml::from_str(&toml).unwrap();
        assert_eq!(parsed, document);
    }

    #[test]
    fn test_write_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("normalised_tags.toml");
        let mut document = AliasDocument::default();
        document.aliases.insert(
            "context_tags".into(),
            AliasMap::from(BTreeMap::from([("a".to_string(), "b".to_string())])),
        );
        document.write(&path).unwrap();
        let body = std::fs::read_to_string(&path).unwrap();
        assert!(body.contains("[aliases.context_tags]"));
        assert!(body.contains("a = \"b\""));
    }
}
