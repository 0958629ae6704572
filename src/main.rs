use anyhow::{bail, Context, Result};
use asse::{
    extract_file, report, search, Config, Database, Engine, EngineRegistry, FeatureMatrix,
    MfccExtractor, Signature, SignatureStore, SimilarityScore,
};
use chrono::Local;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

const SUPPORTED_EXTENSIONS: &[&str] = &[
    "flac", "wav", "wave", "aiff", "aif", "mp3", "m4a", "aac", "ogg", "oga",
];

#[derive(Parser, Debug)]
#[command(name = "asse")]
#[command(author, version, about = "Find tracks that sound alike")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database (overrides the config file)
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    /// Number of parallel workers (default: number of CPUs)
    #[arg(short, long, global = true)]
    jobs: Option<usize>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Only warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract and store signatures for every audio file under a path
    Index {
        /// File or directory to index
        path: PathBuf,

        /// Dataset name (default: the directory name)
        #[arg(short, long)]
        dataset: Option<String>,

        /// Engine to index for; repeat for several (default: config default_engine)
        #[arg(short, long)]
        engine: Vec<String>,

        /// Drop existing signatures for these engines first
        #[arg(long)]
        reindex: bool,
    },

    /// Rank a dataset by similarity to a query file
    Search {
        /// Query audio file
        query: PathBuf,

        /// Dataset to search
        #[arg(short, long)]
        dataset: String,

        /// Engine identifier (default: config default_engine)
        #[arg(short, long)]
        engine: Option<String>,

        /// Number of results
        #[arg(short = 'k', long)]
        results: Option<usize>,

        /// Output report file (.csv, .json)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Compare two audio files directly
    Compare {
        a: PathBuf,
        b: PathBuf,

        /// Engine identifier (default: every registered engine)
        #[arg(short, long)]
        engine: Option<String>,
    },

    /// List registered engines
    Engines,

    /// Database operations
    Db {
        #[command(subcommand)]
        action: DbAction,
    },
}

#[derive(Subcommand, Debug)]
enum DbAction {
    /// List datasets
    Datasets,

    /// List tracks in a dataset
    Tracks {
        dataset: String,
    },

    /// Show dataset, track and signature counts
    Summary,

    /// Delete one engine's signatures from a dataset
    Clear {
        dataset: String,

        #[arg(short, long)]
        engine: String,
    },

    /// Create a backup of the database
    Backup {
        /// Output path for backup (default: asse_backup_<timestamp>.db)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() {
    let args = Args::parse();
    init_tracing(args.verbose, args.quiet);

    if let Err(e) = run(args) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool, quiet: bool) {
    let level = if verbose {
        "debug"
    } else if quiet {
        "warn"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_env("ASSE_LOG").unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(args: Args) -> Result<()> {
    let mut config = Config::load_or_default(args.config.as_deref())?;
    if let Some(database) = args.database {
        config.database = database;
    }
    if let Some(jobs) = args.jobs {
        config.jobs = jobs;
    }

    // Set up thread pool
    if config.jobs > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(config.jobs)
            .build_global()
            .ok();
    }

    let registry = EngineRegistry::with_defaults(&config).context("Failed to set up engines")?;

    match args.command {
        Command::Index { path, dataset, engine, reindex } => {
            let engines = if engine.is_empty() {
                vec![registry.get(&config.default_engine)?]
            } else {
                engine
                    .iter()
                    .map(|id| registry.get(id))
                    .collect::<asse::Result<Vec<_>>>()?
            };
            let dataset = match dataset {
                Some(d) => d,
                None => default_dataset_name(&path)?,
            };
            index(&config, &path, &dataset, &engines, reindex, args.quiet)
        }
        Command::Search { query, dataset, engine, results, output } => {
            let engine = registry.get(engine.as_deref().unwrap_or(&config.default_engine))?;
            let k = results.unwrap_or(config.results);
            run_search(&config, &query, &dataset, engine.as_ref(), k, output.as_deref())
        }
        Command::Compare { a, b, engine } => {
            let engines: Vec<Arc<dyn Engine>> = match engine {
                Some(id) => vec![registry.get(&id)?],
                None => registry.engines().cloned().collect(),
            };
            compare(&config, &a, &b, &engines)
        }
        Command::Engines => {
            println!("{:<20} {:<10} {}", "IDENTIFIER", "KIND", "PARTS");
            println!("{}", "-".repeat(60));
            for engine in registry.engines() {
                let weights = engine.partial_weights();
                let kind = if engine.is_compound() { "compound" } else { "atomic" };
                let parts = weights
                    .iter()
                    .map(|(name, w)| format!("{}={:.3}", name, w))
                    .collect::<Vec<_>>()
                    .join(", ");
                let marker = if engine.identifier() == config.default_engine { " *" } else { "" };
                println!("{:<20} {:<10} {}{}", engine.identifier(), kind, parts, marker);
            }
            Ok(())
        }
        Command::Db { action } => handle_db_action(&config, action),
    }
}

fn default_dataset_name(path: &Path) -> Result<String> {
    let dir = if path.is_dir() { Some(path) } else { path.parent() };
    dir.and_then(|d| d.canonicalize().ok())
        .and_then(|d| d.file_name().map(|n| n.to_string_lossy().to_string()))
        .context("Cannot derive a dataset name from the path; pass --dataset")
}

fn collect_audio_files(path: &Path) -> Vec<PathBuf> {
    if !path.is_dir() {
        return vec![path.to_path_buf()];
    }
    let mut files: Vec<PathBuf> = WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.path()
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| SUPPORTED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                .unwrap_or(false)
        })
        .map(|e| e.path().to_path_buf())
        .collect();
    files.sort();
    files
}

fn progress_bar(len: usize, quiet: bool) -> Option<ProgressBar> {
    if quiet || len < 2 {
        return None;
    }
    let pb = ProgressBar::new(len as u64);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
    {
        pb.set_style(style.progress_chars("=>-"));
    }
    Some(pb)
}

fn file_features(config: &Config, path: &Path) -> Result<(FeatureMatrix, u32)> {
    let extractor = MfccExtractor::new(config.features.clone());
    let features = extract_file(path, &extractor, config.features.max_seconds)?;
    Ok(features)
}

fn index(
    config: &Config,
    path: &Path,
    dataset: &str,
    engines: &[Arc<dyn Engine>],
    reindex: bool,
    quiet: bool,
) -> Result<()> {
    let db = Database::open_at(&config.database)
        .with_context(|| format!("Failed to open database {}", config.database.display()))?;
    let root = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    db.ensure_dataset(dataset, Some(root.to_string_lossy().as_ref()))?;

    let mut done: Vec<HashSet<String>> = Vec::with_capacity(engines.len());
    for engine in engines {
        if reindex {
            let removed = db.delete_signatures(dataset, engine.identifier())?;
            info!(engine = engine.identifier(), removed, "cleared signatures");
        }
        done.push(db.indexed_paths(dataset, engine.identifier())?);
    }

    let files: Vec<(PathBuf, String)> = collect_audio_files(path)
        .into_iter()
        .map(|f| {
            let key = f.canonicalize().unwrap_or_else(|_| f.clone()).to_string_lossy().to_string();
            (f, key)
        })
        .filter(|(_, key)| done.iter().any(|paths| !paths.contains(key)))
        .collect();

    if files.is_empty() {
        info!(dataset, "nothing to index");
        return Ok(());
    }
    info!(dataset, files = files.len(), engines = engines.len(), "indexing");

    let pb = progress_bar(files.len(), quiet);

    // Decode and sign in parallel; SQLite writes stay on this thread.
    let signed: Vec<(String, Vec<(usize, asse::Result<Signature>)>)> = files
        .par_iter()
        .map(|(file, key)| {
            let pending: Vec<usize> = (0..engines.len()).filter(|&i| !done[i].contains(key)).collect();
            let outcome = match file_features(config, file) {
                Ok((features, rate)) => pending
                    .into_iter()
                    .map(|i| (i, engines[i].extract_signature(&features, rate)))
                    .collect(),
                Err(e) => {
                    warn!(file = %file.display(), error = %e, "feature extraction failed");
                    Vec::new()
                }
            };
            if let Some(ref pb) = pb {
                pb.inc(1);
                pb.set_message(file.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default());
            }
            (key.clone(), outcome)
        })
        .collect();

    if let Some(pb) = pb {
        pb.finish_and_clear();
    }

    let (mut stored, mut failed) = (0usize, 0usize);
    for (key, outcomes) in signed {
        if outcomes.is_empty() {
            failed += 1;
        }
        for (i, signature) in outcomes {
            let engine = engines[i].identifier();
            match signature.and_then(|s| db.store_signature(dataset, engine, &key, &s)) {
                Ok(track) => {
                    stored += 1;
                    debug!(track = track.track_id, engine, "indexed {}", track.name);
                }
                Err(e) => {
                    failed += 1;
                    warn!(file = %key, engine, error = %e, "not indexed");
                }
            }
        }
    }

    info!(dataset, stored, failed, "indexing finished");
    Ok(())
}

fn run_search(
    config: &Config,
    query: &Path,
    dataset: &str,
    engine: &dyn Engine,
    k: usize,
    output: Option<&Path>,
) -> Result<()> {
    let db = Database::open_at(&config.database)
        .with_context(|| format!("Failed to open database {}", config.database.display()))?;
    if db.dataset_id(dataset)?.is_none() {
        bail!("No dataset named '{}'", dataset);
    }

    let (features, rate) = file_features(config, query)?;
    let signature = engine
        .extract_signature(&features, rate)
        .with_context(|| format!("Cannot sign query {}", query.display()))?;

    let outcome = search(engine, &signature, db.candidates(dataset, engine.identifier())?, k)?;

    println!(
        "{:<5} {:>10} {:>12}  {}",
        "RANK", "SIMILARITY", "STANDARDIZED", "TRACK"
    );
    println!("{}", "-".repeat(70));
    for (i, r) in outcome.results.iter().enumerate() {
        println!(
            "{:<5} {:>10.4} {:>12.4}  {}",
            i + 1,
            r.similarity,
            r.standardized,
            r.reference.path
        );
    }
    println!(
        "\n{} scored, {} skipped (mean {:.4}, std {:.4})",
        outcome.population, outcome.skipped, outcome.mean, outcome.std_dev
    );

    if let Some(output) = output {
        report::generate(output, &outcome)
            .with_context(|| format!("Failed to write report {}", output.display()))?;
        println!("Report written to {}", output.display());
    }
    Ok(())
}

fn compare(config: &Config, a: &Path, b: &Path, engines: &[Arc<dyn Engine>]) -> Result<()> {
    let (fa, ra) = file_features(config, a)?;
    let (fb, rb) = file_features(config, b)?;

    for engine in engines {
        let result = engine
            .extract_signature(&fa, ra)
            .and_then(|sa| engine.extract_signature(&fb, rb).map(|sb| (sa, sb)))
            .and_then(|(sa, sb)| engine.measure_similarity(&sa, &sb));
        match result {
            Ok(SimilarityScore::Scalar(s)) => println!("{:<20} {:.6}", engine.identifier(), s),
            Ok(SimilarityScore::Partial(parts)) => {
                // Fusion needs a corpus, so only the parts are meaningful here.
                let parts = parts
                    .iter()
                    .map(|(name, s)| format!("{}={:.6}", name, s))
                    .collect::<Vec<_>>()
                    .join(" ");
                println!("{:<20} {}", engine.identifier(), parts);
            }
            Err(e) => println!("{:<20} error: {}", engine.identifier(), e),
        }
    }
    Ok(())
}

fn handle_db_action(config: &Config, action: DbAction) -> Result<()> {
    if let DbAction::Backup { output } = action {
        let db_path = &config.database;
        if !db_path.exists() {
            bail!("No database found at {}", db_path.display());
        }

        let backup_path = output.unwrap_or_else(|| {
            let timestamp = Local::now().format("%Y%m%d_%H%M%S");
            PathBuf::from(format!("asse_backup_{}.db", timestamp))
        });

        let bytes = std::fs::copy(db_path, &backup_path)
            .with_context(|| format!("Failed to create backup {}", backup_path.display()))?;
        println!("Backup created: {} ({} bytes)", backup_path.display(), bytes);
        return Ok(());
    }

    let db = Database::open_at(&config.database)
        .with_context(|| format!("Failed to open database {}", config.database.display()))?;

    match action {
        DbAction::Datasets => {
            let datasets = db.list_datasets()?;
            if datasets.is_empty() {
                println!("No datasets found.");
            } else {
                println!("{:<5} {:<20} {}", "ID", "NAME", "ROOT");
                println!("{}", "-".repeat(60));
                for d in datasets {
                    println!("{:<5} {:<20} {}", d.id, d.name, d.root_path.unwrap_or_default());
                }
            }
        }

        DbAction::Tracks { dataset } => {
            let tracks = db.list_tracks(&dataset)?;
            if tracks.is_empty() {
                println!("No tracks found.");
            } else {
                println!("{:<6} {:<30} {}", "ID", "NAME", "PATH");
                println!("{}", "-".repeat(70));
                for t in tracks {
                    println!("{:<6} {:<30} {}", t.id, truncate(&t.name, 30), t.path);
                }
            }
        }

        DbAction::Summary => {
            let summary = db.get_summary()?;
            println!("Schema:     {}", summary.schema);
            println!("Datasets:   {}", summary.datasets);
            println!("Tracks:     {}", summary.tracks);
            for (engine, count) in &summary.signatures {
                println!("  {:<20} {} signatures", engine, count);
            }
        }

        DbAction::Clear { dataset, engine } => {
            let removed = db.delete_signatures(&dataset, &engine)?;
            println!("Removed {} {} signatures from '{}'", removed, engine, dataset);
        }

        DbAction::Backup { .. } => {}
    }
    Ok(())
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}
