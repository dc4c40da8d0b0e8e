use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use cinesift::RetrievalError;
use cinesift::config::Config;
use cinesift::embed::normalize;
use cinesift::index::handle::IndexHandle;
use cinesift::precompute;
use cinesift::search::SimilarityResult;
use cinesift::search::similarity::SimilaritySearch;

#[derive(Parser)]
#[command(
    name = "cinesift",
    version,
    about = "Movie similarity retrieval over precomputed embeddings"
)]
struct Cli {
    /// Project root holding .cinesift/
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,
    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,
    /// Debug logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default .cinesift/config.toml
    Init,
    /// Embed the movie catalog and build the index
    Precompute {
        /// Movie catalog JSON (defaults to storage.movies from config)
        #[arg(long)]
        movies: Option<PathBuf>,
        /// Ignore cached embeddings
        #[arg(long)]
        no_cache: bool,
    },
    /// Movies similar to one or more catalog movies
    Similar {
        /// Target movie ids
        #[arg(required = true)]
        ids: Vec<i64>,
        #[arg(short = 'k', long)]
        top_k: Option<usize>,
        #[arg(long)]
        min_similarity: Option<f32>,
    },
    /// Embed free text and query the vector index
    Search {
        /// Natural language query
        text: String,
        #[arg(short = 'k', long)]
        top_k: Option<usize>,
        #[arg(long)]
        min_similarity: Option<f32>,
    },
    /// Show index and cache status
    Stats,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    let root = cli.root.as_path();

    match &cli.command {
        Commands::Init => {
            Config::default().save(root)?;
            let path = root.join(cinesift::config::CONFIG_DIR).join("config.toml");
            println!("Wrote {}", path.display());
        }
        Commands::Precompute { movies, no_cache } => {
            let config = Config::load(root)?;
            let movies_path = movies.clone().unwrap_or_else(|| config.movies_path(root));
            let embedder = config.embedder()?;
            let use_cache = config.embed.use_cache && !no_cache;
            let report = precompute::run(root, &config, embedder, &movies_path, use_cache)?;
            println!(
                "Embedded {} of {} movies (dim {}, {} skipped{}) in {:.2}s",
                report.embedded,
                report.movies_loaded,
                report.dimension,
                report.skipped,
                if report.from_cache { ", from cache" } else { "" },
                report.elapsed.as_secs_f64()
            );
            println!("  index:      {}", report.index_path.display());
            println!("  embeddings: {}", report.mapping_path.display());
        }
        Commands::Similar {
            ids,
            top_k,
            min_similarity,
        } => {
            let config = Config::load(root)?;
            let top_k = top_k.unwrap_or(config.search.top_k);
            let min_similarity = min_similarity.unwrap_or(config.search.min_similarity);
            let search = SimilaritySearch::load(&config.mapping_path(root))
                .context("loading embeddings (run `cinesift precompute` first)")?;

            if let [id] = ids.as_slice() {
                let results = search.find_similar(*id, top_k, min_similarity);
                print_results(cli.json, Some(*id), &results)?;
            } else {
                let batch = search.batch_find_similar_with(ids, top_k, min_similarity);
                for id in ids {
                    let results = batch.get(id).map(Vec::as_slice).unwrap_or_default();
                    print_results(cli.json, Some(*id), results)?;
                }
            }
        }
        Commands::Search {
            text,
            top_k,
            min_similarity,
        } => {
            let config = Config::load(root)?;
            let top_k = top_k.unwrap_or(config.search.top_k);
            let min_similarity = min_similarity.unwrap_or(config.search.min_similarity);

            let handle = IndexHandle::new();
            load_index(&handle, &config.index_path(root))?;

            let embedder = config.embedder()?;
            let mut query = embedder.embed(text)?;
            if !normalize(&mut query) {
                bail!("query has no embeddable content");
            }
            let results = handle.search(&query, top_k, min_similarity)?;
            print_results(cli.json, None, &results)?;
        }
        Commands::Stats => {
            let config = Config::load(root)?;
            let handle = IndexHandle::new();
            match handle.load(&config.index_path(root)) {
                Ok(()) | Err(RetrievalError::IndexNotFound(_)) => {}
                Err(e) => return Err(e.into()),
            }
            let cache = config.cache(root).metadata();
            if cli.json {
                let index = match handle.stats() {
                    Some(stats) => serde_json::to_value(stats)?,
                    None => serde_json::json!({}),
                };
                let stats = serde_json::json!({ "index": index, "cache": cache });
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                match handle.stats() {
                    Some(s) => println!(
                        "index: {} vectors, dim {}, trained: {}",
                        s.count, s.dimension, s.is_trained
                    ),
                    None => println!("index: not built"),
                }
                match cache {
                    Some(m) => println!(
                        "cache: {} movies, dim {}, model {} ({}), created {}",
                        m.num_movies, m.embedding_dim, m.model_name, m.version, m.created
                    ),
                    None => println!("cache: empty"),
                }
            }
        }
    }

    Ok(())
}

fn load_index(handle: &IndexHandle, path: &Path) -> Result<()> {
    match handle.load(path) {
        Err(RetrievalError::IndexNotFound(p)) => {
            bail!("no index at {} (run `cinesift precompute` first)", p.display())
        }
        other => Ok(other?),
    }
}

fn print_results(json: bool, target: Option<i64>, results: &[SimilarityResult]) -> Result<()> {
    if json {
        let out = serde_json::json!({ "target": target, "results": results });
        println!("{}", serde_json::to_string(&out)?);
        return Ok(());
    }
    if let Some(id) = target {
        println!("Similar to {id}:");
    }
    if results.is_empty() {
        println!("  (no matches)");
    }
    for r in results {
        println!("  {:>10}  {:.4}", r.id, r.score);
    }
    Ok(())
}
