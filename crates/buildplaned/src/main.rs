//! buildplaned: operator binary for the release build control plane.
//!
//! Opens the redb-backed object store named in `buildplane.toml` and exposes
//! the catalog, the pipeline orchestrator and the comparison engine as
//! subcommands.
//!
//! # Usage
//!
//! ```text
//! buildplaned --config /etc/buildplane.toml list --center international --product snomedct
//! buildplaned run --center international --product snomedct --id 2024-07-01T08:00:00
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::info;

use buildplane_catalog::{BuildCatalog, VisibilityFilter};
use buildplane_core::{BuildKey, BuildplaneConfig};
use buildplane_store::RedbObjectStore;

mod commands;

#[derive(Parser)]
#[command(
    name = "buildplaned",
    about = "Buildplane release build control plane",
    version,
    propagate_version = true
)]
struct Cli {
    /// Path to buildplane.toml. Defaults apply when the file is absent.
    #[arg(short, long, default_value = "buildplane.toml", global = true)]
    config: PathBuf,

    /// Override the store path from the config file.
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

/// Identifies one build.
#[derive(Args, Clone)]
pub struct BuildArgs {
    #[arg(long)]
    pub center: String,
    #[arg(long)]
    pub product: String,
    /// Build id (creation timestamp, `YYYY-MM-DDTHH:MM:SS`).
    #[arg(long)]
    pub id: String,
}

impl BuildArgs {
    pub fn key(&self) -> BuildKey {
        BuildKey::new(&self.center, &self.product, &self.id)
    }
}

#[derive(Clone, Copy, ValueEnum)]
pub enum Visibility {
    Any,
    Visible,
    Hidden,
}

impl From<Visibility> for VisibilityFilter {
    fn from(value: Visibility) -> Self {
        match value {
            Visibility::Any => VisibilityFilter::Any,
            Visibility::Visible => VisibilityFilter::Visible,
            Visibility::Hidden => VisibilityFilter::Hidden,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
pub enum UploadKind {
    Manifest,
    Input,
}

#[derive(Subcommand)]
enum Command {
    /// List builds of a product, newest first.
    List {
        #[arg(long)]
        center: String,
        #[arg(long)]
        product: String,
        #[arg(long, value_enum, default_value = "any")]
        visibility: Visibility,
        #[arg(long)]
        include_deleted: bool,
        #[arg(long)]
        from_year: Option<i32>,
        #[arg(long)]
        to_year: Option<i32>,
        /// Zero-based page number; all builds when omitted.
        #[arg(long)]
        page: Option<usize>,
        #[arg(long, default_value = "20")]
        size: usize,
    },
    /// Show one build with its configuration and report.
    Show {
        #[command(flatten)]
        build: BuildArgs,
    },
    /// Create a build from a JSON build configuration.
    Create {
        #[arg(long)]
        center: String,
        #[arg(long)]
        product: String,
        /// JSON file holding the build configuration.
        #[arg(long)]
        configuration: Option<PathBuf>,
        /// JSON file holding the QA configuration.
        #[arg(long)]
        qa: Option<PathBuf>,
    },
    /// Store manifest or input files under a build.
    Upload {
        #[command(flatten)]
        build: BuildArgs,
        #[arg(long, value_enum)]
        kind: UploadKind,
        files: Vec<PathBuf>,
    },
    /// Move a build to another status.
    Status {
        #[command(flatten)]
        build: BuildArgs,
        /// Target status, e.g. BUILDING or CANCEL_REQUESTED.
        #[arg(long)]
        to: String,
    },
    /// Add release tags, or replace them with --replace.
    Tag {
        #[command(flatten)]
        build: BuildArgs,
        /// Comma-separated tags: ALPHA, BETA, PRE_PRODUCTION, PUBLISHED.
        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,
        #[arg(long)]
        replace: bool,
    },
    /// Show or hide a build in listings.
    Visibility {
        #[command(flatten)]
        build: BuildArgs,
        #[arg(long, action = clap::ArgAction::Set)]
        visible: bool,
    },
    /// Set the owning user and roles.
    Owner {
        #[command(flatten)]
        build: BuildArgs,
        #[arg(long)]
        user: String,
        #[arg(long, value_delimiter = ',')]
        roles: Vec<String>,
    },
    /// Soft-delete a build, or erase every object with --hard.
    Delete {
        #[command(flatten)]
        build: BuildArgs,
        #[arg(long)]
        hard: bool,
    },
    /// Request cancellation of a running build.
    Cancel {
        #[command(flatten)]
        build: BuildArgs,
    },
    /// Create a new build from another build's configuration and inputs.
    Clone {
        #[command(flatten)]
        build: BuildArgs,
    },
    /// Run the release pipeline for a BEFORE_TRIGGER build.
    ///
    /// Requires `offline_mode = true`: no release validator is wired in.
    Run {
        #[command(flatten)]
        build: BuildArgs,
    },
    /// Compare two builds of one product once both have finished.
    Compare {
        #[arg(long)]
        center: String,
        #[arg(long)]
        product: String,
        #[arg(long)]
        left: String,
        #[arg(long)]
        right: String,
        /// Report id; derived from the build ids when omitted.
        #[arg(long)]
        compare_id: Option<String>,
    },
    /// Diff one output file between two builds.
    DiffFile {
        #[arg(long)]
        center: String,
        #[arg(long)]
        product: String,
        #[arg(long)]
        left: String,
        #[arg(long)]
        right: String,
        #[arg(long)]
        file: String,
        #[arg(long)]
        compare_id: Option<String>,
    },
    /// Print the effective configuration as TOML.
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,buildplane=debug")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = BuildplaneConfig::load_or_default(&cli.config)?;
    if let Some(store) = cli.store {
        config.store.path = store;
    }

    if let Command::Config = cli.command {
        print!("{}", config.to_toml_string()?);
        return Ok(());
    }

    let catalog = open_catalog(&config)?;

    match cli.command {
        Command::List {
            center,
            product,
            visibility,
            include_deleted,
            from_year,
            to_year,
            page,
            size,
        } => commands::builds::list(
            &catalog,
            &center,
            &product,
            commands::builds::ListOptions {
                visibility: visibility.into(),
                include_deleted,
                from_year,
                to_year,
                page,
                size,
            },
        ),
        Command::Show { build } => commands::builds::show(&catalog, &build.key()),
        Command::Create {
            center,
            product,
            configuration,
            qa,
        } => commands::builds::create(&catalog, &center, &product, configuration, qa),
        Command::Upload { build, kind, files } => {
            commands::builds::upload(&catalog, &build.key(), kind, &files)
        }
        Command::Status { build, to } => commands::builds::set_status(&catalog, &build.key(), &to),
        Command::Tag {
            build,
            tags,
            replace,
        } => commands::builds::tag(&catalog, &build.key(), &tags, replace),
        Command::Visibility { build, visible } => {
            commands::builds::visibility(&catalog, &build.key(), visible)
        }
        Command::Owner { build, user, roles } => {
            commands::builds::owner(&catalog, &build.key(), &user, &roles)
        }
        Command::Delete { build, hard } => commands::builds::delete(&catalog, &build.key(), hard),
        Command::Cancel { build } => commands::pipeline::cancel(&catalog, &build.key()),
        Command::Clone { build } => commands::pipeline::clone(catalog, &config, &build.key()),
        Command::Run { build } => commands::pipeline::run(catalog, &config, &build.key()).await,
        Command::Compare {
            center,
            product,
            left,
            right,
            compare_id,
        } => {
            let left = BuildKey::new(&center, &product, &left);
            let right = BuildKey::new(&center, &product, &right);
            commands::compare::builds(catalog, &config, compare_id, &left, &right).await
        }
        Command::DiffFile {
            center,
            product,
            left,
            right,
            file,
            compare_id,
        } => {
            let left = BuildKey::new(&center, &product, &left);
            let right = BuildKey::new(&center, &product, &right);
            commands::compare::file(catalog, &config, compare_id, &left, &right, &file).await
        }
        Command::Config => Ok(()),
    }
}

fn open_catalog(config: &BuildplaneConfig) -> anyhow::Result<BuildCatalog> {
    if let Some(parent) = config.store.path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let store = RedbObjectStore::open(&config.store.path)?.with_page_size(config.store.list_page_size);
    info!(path = ?config.store.path, "object store opened");
    Ok(BuildCatalog::new(
        Arc::new(store),
        config.pipeline.offline_mode,
    ))
}
