use ndarray::Array2;
use serde::Serialize;
use tera::{Context, Tera};

use crate::etq::{
    error::{DedupError, Result},
    hierarchy::HierarchyResult,
    model::DuplicateGroups,
};

const GROUPS_TEMPLATE: &str = r#"{% for group in groups -%}
Group {{ loop.index }} ({{ group.members | length }})
{% for member in group.members -%}
{{ "  - " }}[{{ member.id }}] {{ member.text }}
{% endfor -%}
{% endfor -%}
{{ groups | length }} groups, {{ grouped }} items grouped
"#;

const HIERARCHY_TEMPLATE: &str = r#"Leaf order:
{% for label in ordered -%}
{{ "  " }}{{ loop.index0 }}. {{ label }}
{% endfor -%}
{% if merges %}Merges:
{% for merge in merges -%}
{{ "  " }}#{{ merge.cluster }} = {{ merge.left }} + {{ merge.right }} @ {{ merge.distance }} ({{ merge.size }})
{% endfor -%}
{% endif -%}
"#;

const HISTOGRAM_TEMPLATE: &str = r#"{{ pairs }} pairs
{% for bucket in buckets -%}
{{ bucket.range }} | {{ bucket.bar }} {{ bucket.count }}
{% endfor -%}
"#;

const BAR_WIDTH: usize = 40;

/// Duplicate groups as a plain-text listing, largest first.
pub fn render_groups(groups: &DuplicateGroups) -> Result<String> {
    let mut context = Context::new();
    context.insert("groups", groups);
    context.insert("grouped", &groups.num_grouped());
    Ok(Tera::one_off(GROUPS_TEMPLATE, &context, false)?)
}

#[derive(Serialize)]
struct MergeLine {
    cluster: usize,
    left: String,
    right: String,
    distance: String,
    size: usize,
}

/// Leaves in dendrogram order followed by the merge steps. Clusters are
/// written `#k` using the dendrogram's own numbering.
pub fn render_hierarchy(hierarchy: &HierarchyResult) -> Result<String> {
    let n = hierarchy.labels.len();
    let name = |label: usize| match hierarchy.labels.get(label) {
        Some(text) => text.clone(),
        None => format!("#{}", label),
    };
    let merges: Vec<MergeLine> = hierarchy
        .linkage
        .iter()
        .enumerate()
        .map(|(k, step)| MergeLine {
            cluster: n + k,
            left: name(step.left),
            right: name(step.right),
            distance: format!("{:.4}", step.distance),
            size: step.size,
        })
        .collect();

    let mut context = Context::new();
    context.insert("ordered", &hierarchy.ordered_labels());
    context.insert("merges", &merges);
    Ok(Tera::one_off(HIERARCHY_TEMPLATE, &context, false)?)
}

/// Count of item pairs whose similarity falls in `[lower, upper)`. The last
/// bucket also holds pairs at exactly `1.0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Bucket {
    pub lower: f32,
    pub upper: f32,
    pub count: usize,
}

/// Bucket the distinct pairs (`i < j`) of a square similarity matrix over
/// `[-1, 1]`. The diagonal is skipped.
pub fn similarity_histogram(similarity: &Array2<f32>, bucket_width: f32) -> Result<Vec<Bucket>> {
    let (rows, cols) = similarity.dim();
    if rows != cols {
        return Err(DedupError::InvalidParameter(format!(
            "similarity matrix must be square, got {}x{}",
            rows, cols
        )));
    }
    if !bucket_width.is_finite() || bucket_width <= 0.0 || bucket_width > 2.0 {
        return Err(DedupError::InvalidParameter(format!(
            "bucket width must be in (0, 2], got {}",
            bucket_width
        )));
    }

    let num_buckets = (2.0 / bucket_width).ceil() as usize;
    let mut buckets: Vec<Bucket> = (0..num_buckets)
        .map(|k| {
            let lower = -1.0 + k as f32 * bucket_width;
            Bucket {
                lower,
                upper: (lower + bucket_width).min(1.0),
                count: 0,
            }
        })
        .collect();

    for ((i, j), sim) in similarity.indexed_iter() {
        if i >= j || !sim.is_finite() {
            continue;
        }
        let offset = (sim.clamp(-1.0, 1.0) + 1.0) / bucket_width;
        let k = (offset.floor() as usize).min(num_buckets - 1);
        buckets[k].count += 1;
    }
    Ok(buckets)
}

#[derive(Serialize)]
struct BucketLine {
    range: String,
    bar: String,
    count: usize,
}

/// Text bar chart of a histogram, scaled to the fullest bucket.
pub fn render_histogram(buckets: &[Bucket]) -> Result<String> {
    let max = buckets.iter().map(|b| b.count).max().unwrap_or(0).max(1);
    let lines: Vec<BucketLine> = buckets
        .iter()
        .map(|b| BucketLine {
            range: format!("{:>5.2} .. {:<5.2}", b.lower, b.upper),
            bar: "#".repeat(b.count * BAR_WIDTH / max),
            count: b.count,
        })
        .collect();

    let mut context = Context::new();
    context.insert("pairs", &buckets.iter().map(|b| b.count).sum::<usize>());
    context.insert("buckets", &lines);
    Ok(Tera::one_off(HISTOGRAM_TEMPLATE, &context, false)?)
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;
    use crate::etq::{
        hierarchy::LinkageStep,
        model::{DuplicateGroup, NormalizedItem},
    };

    #[test]
    fn test_render_groups() {
        let groups = DuplicateGroups::from(vec![DuplicateGroup {
            indices: vec![0, 2],
            members: vec![
                NormalizedItem::new("0", "cost overrun"),
                NormalizedItem::new("2", "cost overruns"),
            ],
        }]);
        let text = render_groups(&groups).unwrap();
        assert!(text.contains("Group 1 (2)"));
        assert!(text.contains("  - [0] cost overrun\n"));
        assert!(text.contains("  - [2] cost overruns\n"));
        assert!(text.ends_with("1 groups, 2 items grouped\n"));
    }

    #[test]
    fn test_render_no_groups() {
        let text = render_groups(&DuplicateGroups::default()).unwrap();
        assert_eq!(text, "0 groups, 0 items grouped\n");
    }

    #[test]
    fn test_render_hierarchy() {
        let hierarchy = HierarchyResult {
            labels: vec!["alpha".into(), "beta".into(), "gamma".into()],
            order: vec![1, 0, 2],
            linkage: vec![
                LinkageStep { left: 0, right: 2, distance: 0.125, size: 2 },
                LinkageStep { left: 1, right: 3, distance: 0.75, size: 3 },
            ],
        };
        let text = render_hierarchy(&hierarchy).unwrap();
        assert!(text.contains("  0. beta\n  1. alpha\n  2. gamma\n"));
        assert!(text.contains("#3 = alpha + gamma @ 0.1250 (2)"));
        assert!(text.contains("#4 = beta + #3 @ 0.7500 (3)"));
    }

    #[test]
    fn test_histogram_counts_upper_triangle() {
        let sim = array![[1.0_f32, 1.0, 0.5], [1.0, 1.0, -1.0], [0.5, -1.0, 1.0]];
        let buckets = similarity_histogram(&sim, 0.5).unwrap();
        assert_eq!(buckets.len(), 4);
        let counts: Vec<usize> = buckets.iter().map(|b| b.count).collect();
        assert_eq!(counts, vec![1, 0, 0, 2]);
        assert_eq!(buckets[0].lower, -1.0);
        assert_eq!(buckets[3].upper, 1.0);

        let text = render_histogram(&buckets).unwrap();
        assert!(text.starts_with("3 pairs\n"));
        assert!(text.contains(&format!("{} 2", "#".repeat(BAR_WIDTH))));
    }

    #[test]
    fn test_histogram_rejects_bad_input() {
        let square = array![[1.0_f32]];
        assert!(similarity_histogram(&square, 0.0).is_err());
        assert!(similarity_histogram(&square, f32::NAN).is_err());
        let wide = Array2::<f32>::zeros((2, 3));
        assert!(matches!(
            similarity_histogram(&wide, 0.1),
            Err(DedupError::InvalidParameter(_))
        ));
    }
}
