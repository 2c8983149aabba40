use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, anyhow, bail};
use clap::{Args, Parser, Subcommand};
use etiquetas_dedup::{
    config::Settings,
    display::report,
    etq::{
        cache::EmbeddingCache,
        canonical::{TagCounts, build_aliases},
        embeddings::{
            EmbeddingProvider, PrecomputedEmbeddings, SentenceEmbeddingsModelType, VectorNorm,
            embed_with_cache,
        },
        hierarchy::{LinkageMethod, build_hierarchy_with},
        inputs::{TagInput, load_tag_list, normalize_inputs},
        model::{NormalizedItems, SimilarityThreshold},
        similarity::{cosine_similarity_matrix, group_near_duplicate_items},
    },
};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// tp: A Tag Processor
#[derive(Parser)]
#[command(name = "tp")]
#[command(about = "Find and collapse near-duplicate tags", long_about = None)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct GlobalArgs {
    /// Settings file. Defaults to ~/.config/etiquetas/dedup.toml.
    #[arg(long, global = true, env = "ETIQUETAS_CONFIG")]
    config: Option<PathBuf>,

    /// Embedding model; also the cache key for stored vectors.
    #[arg(short, long, global = true, value_enum)]
    model: Option<SentenceEmbeddingsModelType>,

    /// Cosine similarity at or above which two tags are duplicates.
    #[arg(short, long, global = true)]
    threshold: Option<f32>,

    /// Embedding cache file.
    #[arg(long, global = true)]
    cache_path: Option<PathBuf>,

    /// Skip the embedding cache entirely.
    #[arg(long, global = true)]
    no_cache: bool,

    /// JSON object of precomputed `text -> vector` embeddings to use instead
    /// of a local model.
    #[arg(short, long, global = true)]
    embeddings: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// List near-duplicate groups in a tag file.
    Dupes {
        /// JSON (strings, records, or id -> text object), CSV/TSV, or one tag per line.
        #[arg(short, long)]
        input: PathBuf,

        /// Print the groups as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Order tags by agglomerative clustering, for review.
    Hierarchy {
        #[arg(short, long)]
        input: PathBuf,

        #[arg(long, value_enum, default_value_t)]
        method: LinkageMethod,
    },

    /// Build per-field alias maps and write them as TOML.
    Aliases {
        /// `field=path`; the file holds one tag occurrence per line.
        #[arg(short, long = "field", value_parser = parse_field, required = true)]
        fields: Vec<(String, PathBuf)>,

        #[arg(short, long)]
        output: PathBuf,
    },

    /// Histogram of pairwise similarities, for picking a threshold.
    Histogram {
        #[arg(short, long)]
        input: PathBuf,

        #[arg(long, default_value_t = 0.05)]
        bucket_width: f32,
    },

    /// Inspect or prune the embedding cache.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Cached vector counts per model.
    Stats,
    /// Delete every vector stored for a model.
    Purge {
        /// Model name as stored, e.g. all-MiniLM-L6-v2.
        #[arg(long = "model-name")]
        model_name: String,
    },
}

fn parse_field(raw: &str) -> Result<(String, PathBuf)> {
    let (field, path) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("expected field=path, got {:?}", raw))?;
    if field.trim().is_empty() {
        bail!("empty field name in {:?}", raw);
    }
    Ok((field.trim().to_string(), PathBuf::from(path)))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = resolve_settings(&cli.global)?;
    debug!(?settings, "resolved settings");

    match &cli.command {
        Commands::Dupes { input, json } => handle_dupes(&cli.global, &settings, input, *json),
        Commands::Hierarchy { input, method } => {
            handle_hierarchy(&cli.global, &settings, input, *method)
        }
        Commands::Aliases { fields, output } => {
            handle_aliases(&cli.global, &settings, fields, output)
        }
        Commands::Histogram { input, bucket_width } => {
            handle_histogram(&cli.global, &settings, input, *bucket_width)
        }
        Commands::Cache { action } => handle_cache(&settings, action),
    }
}

/// Settings file first, then command-line overrides.
fn resolve_settings(global: &GlobalArgs) -> Result<Settings> {
    let mut settings = match &global.config {
        Some(path) => Settings::load(path)?,
        None => Settings::load_default()?,
    };
    if let Some(model) = global.model {
        settings.model = model;
    }
    if let Some(threshold) = global.threshold {
        settings.threshold = threshold;
    }
    if let Some(path) = &global.cache_path {
        settings.cache_path = Some(path.clone());
    }
    if global.no_cache {
        settings.use_cache = false;
    }
    settings.similarity_threshold()?;
    Ok(settings)
}

fn open_cache(settings: &Settings) -> Result<Option<EmbeddingCache>> {
    settings
        .resolved_cache_path()?
        .map(|path| EmbeddingCache::open(&path))
        .transpose()
        .context("opening embedding cache")
}

fn provider(global: &GlobalArgs, settings: &Settings) -> Result<Box<dyn EmbeddingProvider>> {
    if let Some(path) = &global.embeddings {
        info!(path = %path.display(), "using precomputed embeddings");
        return Ok(Box::new(PrecomputedEmbeddings::load(path)?));
    }
    local_model(settings.model)
}

#[cfg(feature = "bert")]
fn local_model(model: SentenceEmbeddingsModelType) -> Result<Box<dyn EmbeddingProvider>> {
    Ok(Box::new(etiquetas_dedup::etq::bert::SentenceEmbedder::load(model)?))
}

#[cfg(not(feature = "bert"))]
fn local_model(model: SentenceEmbeddingsModelType) -> Result<Box<dyn EmbeddingProvider>> {
    bail!(
        "no embedding provider for {}: pass --embeddings or rebuild with the `bert` feature",
        model.model_name()
    )
}

fn load_items(path: &Path) -> Result<NormalizedItems> {
    let input = if path.extension().is_some_and(|e| e == "json") {
        let body = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        TagInput::from_json(serde_json::from_str(&body)?)?
    } else {
        TagInput::Strings(load_tag_list(path)?)
    };
    let items = normalize_inputs(&input).with_context(|| format!("in {}", path.display()))?;
    info!(path = %path.display(), items = items.len(), "loaded tags");
    Ok(items)
}

fn handle_dupes(global: &GlobalArgs, settings: &Settings, input: &Path, json: bool) -> Result<()> {
    let items = load_items(input)?;
    let provider = provider(global, settings)?;
    let threshold = settings.similarity_threshold()?;
    let groups = EmbeddingCache::run_then_close(open_cache(settings)?, |cache| {
        group_near_duplicate_items(
            &items,
            provider.as_ref(),
            settings.model.model_name(),
            threshold,
            cache,
        )
    })?;

    if json {
        println!("{}", serde_json::to_string_pretty(&groups)?);
    } else {
        print!("{}", report::render_groups(&groups)?);
    }
    Ok(())
}

fn handle_hierarchy(
    global: &GlobalArgs,
    settings: &Settings,
    input: &Path,
    method: LinkageMethod,
) -> Result<()> {
    let items = load_items(input)?;
    let provider = provider(global, settings)?;
    let hierarchy = EmbeddingCache::run_then_close(open_cache(settings)?, |cache| {
        build_hierarchy_with(
            &items.texts(),
            provider.as_ref(),
            settings.model.model_name(),
            cache,
            method,
        )
    })?;

    print!("{}", report::render_hierarchy(&hierarchy)?);
    Ok(())
}

fn handle_aliases(
    global: &GlobalArgs,
    settings: &Settings,
    fields: &[(String, PathBuf)],
    output: &Path,
) -> Result<()> {
    let mut counts_by_field: BTreeMap<String, TagCounts> = BTreeMap::new();
    for (field, path) in fields {
        let tags = load_tag_list(path).with_context(|| format!("field {}", field))?;
        let counts = counts_by_field.entry(field.clone()).or_default();
        tags.iter().for_each(|t| counts.add(t));
    }

    let provider = provider(global, settings)?;
    let threshold = settings.similarity_threshold()?;
    let document = EmbeddingCache::run_then_close(open_cache(settings)?, |cache| {
        build_aliases(
            &counts_by_field,
            provider.as_ref(),
            settings.model.model_name(),
            threshold,
            cache,
        )
    })?;

    document.write(output)?;
    println!(
        "{} aliases across {} fields -> {}",
        document.total_aliases(),
        document.aliases.len(),
        output.display()
    );
    Ok(())
}

fn handle_histogram(
    global: &GlobalArgs,
    settings: &Settings,
    input: &Path,
    bucket_width: f32,
) -> Result<()> {
    let items = load_items(input)?;
    let provider = provider(global, settings)?;
    let vectors = EmbeddingCache::run_then_close(open_cache(settings)?, |cache| {
        embed_with_cache(
            &items.texts(),
            provider.as_ref(),
            settings.model.model_name(),
            cache,
            VectorNorm::L2,
        )
    })?;

    let similarity = cosine_similarity_matrix(&vectors)?;
    let buckets = report::similarity_histogram(&similarity, bucket_width)?;
    print!("{}", report::render_histogram(&buckets)?);

    let threshold: SimilarityThreshold = settings.similarity_threshold()?;
    let at_or_above = similarity
        .indexed_iter()
        .filter(|((i, j), s)| i < j && threshold.admits(**s))
        .count();
    println!("{} pairs at or above {}", at_or_above, threshold);
    Ok(())
}

fn handle_cache(settings: &Settings, action: &CacheAction) -> Result<()> {
    let cache = open_cache(settings)?
        .ok_or_else(|| anyhow!("the embedding cache is disabled"))?;
    let outcome = match action {
        CacheAction::Stats => cache.models().map(|models| {
            if let Some(path) = cache.path() {
                println!("{}", path.display());
            }
            for (model, count) in models {
                println!("  {:<40} {}", model, count);
            }
        }),
        CacheAction::Purge { model_name } => cache
            .purge_model(model_name)
            .map(|removed| println!("removed {} vectors for {}", removed, model_name)),
    };
    let closed = cache.close();
    outcome?;
    Ok(closed?)
}
