//! fmtlib: command-line tool for the format library.
//!
//! Runs migrations, ingests the PRONOM and LOC catalogs, loads YAML/JSON
//! bulk documents and prints formats, tags and their closures as JSON.

use std::env;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fmtlib_core::{
    defaults, AssociationRepository, ClosureStrategy, EntityKind, FormatRepository,
    TagClosureRepository, TagRepository,
};
use fmtlib_db::{Database, PoolConfig};
use fmtlib_ingest::{IngestConfig, Ingestor};

#[derive(Parser)]
#[command(name = "fmtlib")]
#[command(author, version, about = "File format library: catalogs, tags and closures")]
#[command(propagate_version = true)]
struct Cli {
    /// Database URL (default: DATABASE_URL)
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending database migrations
    Migrate,

    /// Ingest an external signature catalog
    Ingest {
        #[arg(value_enum)]
        catalog: Catalog,
    },

    /// Load a YAML or JSON bulk document
    Load {
        #[arg(value_enum)]
        kind: Kind,

        /// Document file (`.json`, otherwise parsed as YAML)
        file: PathBuf,

        /// Fields identifying existing entities (default: primary key)
        #[arg(short, long, value_delimiter = ',')]
        key: Vec<String>,
    },

    /// Ingest both catalogs, then load the seed documents
    Seed {
        /// Only load the seed documents
        #[arg(long)]
        skip_ingest: bool,
    },

    /// Show a format
    Format {
        uid: String,

        /// Show every tag classifying the format, including ancestors
        #[arg(long)]
        all_tags: bool,

        #[arg(short, long, default_value = "fixed-point")]
        strategy: ClosureStrategy,
    },

    /// Show a tag or one of its derived views
    Tag {
        tag: String,

        #[arg(short, long, value_enum, default_value_t = TagView::Show)]
        view: TagView,

        #[arg(short, long, default_value = "fixed-point")]
        strategy: ClosureStrategy,
    },

    /// List tags
    Tags {
        /// Restrict to one profile
        #[arg(short, long)]
        profile: Option<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Catalog {
    Pronom,
    Loc,
}

#[derive(Clone, Copy, ValueEnum)]
enum Kind {
    Formats,
    Tags,
}

impl From<Kind> for EntityKind {
    fn from(kind: Kind) -> Self {
        match kind {
            Kind::Formats => EntityKind::Format,
            Kind::Tags => EntityKind::Tag,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum TagView {
    /// The tag with its direct parents and children
    Show,
    Ancestors,
    Descendants,
    /// Nested descendant tree
    Tree,
    /// Nested descendant tree with directly tagged formats
    TreeWithFormats,
    /// Formats tagged directly
    Formats,
    /// Formats tagged with the tag or any descendant
    AllFormats,
}

#[derive(Serialize)]
struct TagDetail {
    #[serde(flatten)]
    tag: fmtlib_core::Tag,
    parents: Vec<String>,
    children: Vec<String>,
}

#[derive(Serialize)]
struct FormatDetail {
    #[serde(flatten)]
    format: fmtlib_core::Format,
    tags: Vec<String>,
}

fn init_logging() {
    // Environment variables:
    //   LOG_FORMAT  - "json" or "text" (default: "text")
    //   LOG_ANSI    - "true"/"false" override ANSI colors (auto-detected by default)
    //   RUST_LOG    - standard env filter (default: "fmtlib=info")
    let log_format = env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_ansi = env::var("LOG_ANSI").ok().map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "fmtlib=info,fmtlib_db=info,fmtlib_ingest=info".into());

    // Logs go to stderr; stdout carries the JSON results.
    let registry = tracing_subscriber::registry().with(env_filter);
    if log_format == "json" {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        let mut layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
        if let Some(ansi) = log_ansi {
            layer = layer.with_ansi(ansi);
        }
        registry.with(layer).init();
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env.local takes precedence over .env; neither overrides the environment
    dotenvy::from_filename(".env.local").ok();
    dotenvy::dotenv().ok();

    init_logging();

    let cli = Cli::parse();
    let database_url = cli
        .database_url
        .clone()
        .or_else(|| env::var("DATABASE_URL").ok())
        .unwrap_or_else(|| defaults::DATABASE_URL.to_string());

    let db = Database::connect_with_config(&database_url, PoolConfig::from_env()?)
        .await
        .context("Failed to connect to database")?;

    match cli.command {
        Commands::Migrate => {
            db.migrate().await?;
            info!(subsystem = "cli", op = "migrate", "Migrations applied");
        }
        Commands::Ingest { catalog } => {
            let ingestor = Ingestor::new(IngestConfig::from_env()?)?;
            let report = match catalog {
                Catalog::Pronom => ingestor.load_pronom_signatures(&db.formats).await?,
                Catalog::Loc => ingestor.load_loc_signatures(&db.formats).await?,
            };
            print_json(&report)?;
        }
        Commands::Load { kind, file, key } => {
            let key: Vec<&str> = key.iter().map(String::as_str).collect();
            let key = (!key.is_empty()).then_some(key.as_slice());
            let summary = db
                .loader()
                .load_file(kind.into(), &file, key)
                .await
                .with_context(|| format!("Failed to load {}", file.display()))?;
            print_json(&summary.keys)?;
        }
        Commands::Seed { skip_ingest } => cmd_seed(&db, skip_ingest).await?,
        Commands::Format {
            uid,
            all_tags,
            strategy,
        } => {
            let format = db
                .formats
                .find(&uid)
                .await?
                .with_context(|| format!("Format not found: {}", uid))?;
            let tags: Vec<String> = if all_tags {
                db.associations
                    .all_tags_of_format(&uid, strategy)
                    .await?
                    .into_keys()
                    .collect()
            } else {
                db.formats
                    .direct_tags(&uid)
                    .await?
                    .into_iter()
                    .map(|t| t.tag)
                    .collect()
            };
            print_json(&FormatDetail { format, tags })?;
        }
        Commands::Tag {
            tag,
            view,
            strategy,
        } => cmd_tag(&db, &tag, view, strategy).await?,
        Commands::Tags { profile } => {
            print_json(&db.tags.with_profile(profile.as_deref()).await?)?;
        }
    }

    Ok(())
}

async fn cmd_tag(
    db: &Database,
    tag: &str,
    view: TagView,
    strategy: ClosureStrategy,
) -> anyhow::Result<()> {
    match view {
        TagView::Show => {
            let found = db
                .tags
                .find(tag)
                .await?
                .with_context(|| format!("Tag not found: {}", tag))?;
            let parents = db.tags.parent_tags(tag).await?;
            let children = db.tags.child_tags(tag).await?;
            print_json(&TagDetail {
                tag: found,
                parents: parents.into_iter().map(|t| t.tag).collect(),
                children: children.into_iter().map(|t| t.tag).collect(),
            })
        }
        TagView::Ancestors => print_json(&db.closure.ancestors(tag, strategy).await?),
        TagView::Descendants => print_json(&db.closure.descendants(tag, strategy).await?),
        TagView::Tree => print_json(&db.closure.tree(tag).await?),
        TagView::TreeWithFormats => print_json(&db.closure.tree_with_formats(tag).await?),
        TagView::Formats => print_json(&db.tags.direct_formats(tag).await?),
        TagView::AllFormats => print_json(
            &db.associations
                .all_formats_under_tag(tag, strategy)
                .await?,
        ),
    }
}

/// Catalog ingests first, so the seed documents can reference ingested uids.
async fn cmd_seed(db: &Database, skip_ingest: bool) -> anyhow::Result<()> {
    if !skip_ingest {
        let ingestor = Ingestor::new(IngestConfig::from_env()?)?;
        ingestor.load_pronom_signatures(&db.formats).await?;
        ingestor.load_loc_signatures(&db.formats).await?;
    }

    let loader = db.loader();

    let data_dir =
        env::var("SEEDS_DATA_DIR").unwrap_or_else(|_| defaults::SEEDS_DATA_DIR.to_string());
    let formats_file = Path::new(&data_dir).join(defaults::SEED_FORMATS_FILE);
    if formats_file.is_file() {
        loader
            .load_yaml_file(EntityKind::Format, &formats_file, None)
            .await
            .with_context(|| format!("Failed to load {}", formats_file.display()))?;
    } else {
        warn!(
            subsystem = "cli",
            op = "seed",
            path = %formats_file.display(),
            "Formats seed document not found, skipping"
        );
    }

    let tag_dir = env::var("FORMAT_LIBRARY_SEEDS_TAG_DIR")
        .unwrap_or_else(|_| defaults::SEEDS_TAG_DIR.to_string());
    let mut tag_files: Vec<PathBuf> = std::fs::read_dir(&tag_dir)
        .with_context(|| format!("Failed to read tag seed directory {}", tag_dir))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|e| e == "yml" || e == "yaml"))
        .collect();
    tag_files.sort();

    for path in &tag_files {
        loader
            .load_yaml_file(EntityKind::Tag, path, Some(&["tag"][..]))
            .await
            .with_context(|| format!("Failed to load {}", path.display()))?;
    }

    info!(
        subsystem = "cli",
        op = "seed",
        tag_documents = tag_files.len(),
        formats = db.formats.count().await?,
        "Seed complete"
    );
    Ok(())
}
