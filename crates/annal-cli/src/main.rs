//! `annal`: inspect and compact audit trails kept in a SQLite file.
//!
//! # Usage
//!
//! ```
//! annal history User 42 --associated
//! annal revisions User 42 --from 3
//! annal revision User 42 --previous
//! annal revision User 42 --at 2024-05-01T12:00:00Z
//! annal compact User 42 --max 20
//! ```
//!
//! Settings come from `annal.toml` (or `--config`) and `ANNAL_*` environment
//! variables, e.g. `ANNAL_STORE_PATH` or `ANNAL_AUDIT__MAX_AUDITS`.

use std::path::PathBuf;

use annal_core::{
  auditable::Tombstone,
  config::AuditConfig,
  record::EntityRef,
  retention::RetentionCombiner,
  revision::{RevisionReconstructor, VersionSelector},
  store::{AuditQuery, AuditStore as _},
};
use annal_store_sqlite::SqliteStore;
use anyhow::{Context as _, Result};
use chrono::{DateTime, Utc};
use clap::{ArgGroup, Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

// ─── CLI args ────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "annal", version, about = "Inspect and compact Annal audit trails")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "annal.toml")]
  config: PathBuf,

  /// SQLite file to open; overrides `store_path` from the config.
  #[arg(long, value_name = "FILE")]
  store: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

/// The audited entity a command operates on.
#[derive(Args, Debug)]
struct Target {
  /// Entity type name, e.g. `User`.
  entity_type: String,
  /// Entity id.
  entity_id:   String,
}

impl Target {
  fn entity(&self) -> EntityRef { EntityRef::new(self.entity_type.clone(), &self.entity_id) }
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Print an entity's audit records as JSON lines.
  History {
    #[command(flatten)]
    target:     Target,
    /// Also include records filed under the entity as the associated one.
    #[arg(long)]
    associated: bool,
    /// Newest first.
    #[arg(long)]
    desc:       bool,
  },

  /// Print every revision from a version onwards as JSON lines.
  Revisions {
    #[command(flatten)]
    target: Target,
    #[arg(long, default_value_t = 1)]
    from:   u32,
  },

  /// Print one reconstructed revision.
  #[command(group(ArgGroup::new("when").required(true)))]
  Revision {
    #[command(flatten)]
    target:   Target,
    #[arg(long, group = "when")]
    version:  Option<u32>,
    /// The version before the latest.
    #[arg(long, group = "when")]
    previous: bool,
    /// RFC 3339 timestamp; the state as of that moment.
    #[arg(long, group = "when")]
    at:       Option<DateTime<Utc>>,
  },

  /// Fold the oldest records so at most `--max` remain.
  Compact {
    #[command(flatten)]
    target: Target,
    /// Defaults to the configured cap for the entity type.
    #[arg(long)]
    max:    Option<usize>,
  },
}

// ─── Config ──────────────────────────────────────────────────────────────────

fn default_store_path() -> PathBuf { PathBuf::from("annal.db") }

/// Shape of `annal.toml`.
#[derive(Debug, Deserialize)]
struct CliConfig {
  #[serde(default = "default_store_path")]
  store_path: PathBuf,
  #[serde(default)]
  audit:      AuditConfig,
}

fn load_config(path: PathBuf) -> Result<CliConfig> {
  let settings = config::Config::builder()
    .add_source(config::File::from(path).required(false))
    .add_source(
      config::Environment::with_prefix("ANNAL")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true),
    )
    .build()
    .context("failed to read config file")?;

  settings.try_deserialize().context("failed to deserialise config")
}

// ─── Entry point ─────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_writer(std::io::stderr)
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();
  let cfg = load_config(cli.config)?;

  let store_path = cli.store.unwrap_or(cfg.store_path);
  let store = SqliteStore::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;

  run(cli.command, &store, &cfg.audit).await
}

async fn run(command: Command, store: &SqliteStore, audit: &AuditConfig) -> Result<()> {
  match command {
    Command::History { target, associated, desc } => {
      let entity = target.entity();
      let mut query = if associated {
        AuditQuery { own_or_associated: Some(entity), ..Default::default() }
      } else {
        AuditQuery::for_entity(entity)
      };
      query.descending = desc;

      let records = store
        .audits(&query)
        .await
        .context("failed to read audits")?;
      for r in &records {
        print_json(r)?;
      }
    }

    Command::Revisions { target, from } => {
      // The live entity is not available here; revisions are rebuilt on a
      // blank instance.
      let entity = Tombstone::new(target.entity());
      let revisions = RevisionReconstructor::new(store)
        .revision_list(&entity, from)
        .await
        .context("failed to reconstruct revisions")?;
      for r in &revisions {
        print_json(r)?;
      }
    }

    Command::Revision { target, version, previous, at } => {
      let entity = Tombstone::new(target.entity());
      let reconstructor = RevisionReconstructor::new(store);

      let revision = match (version, previous, at) {
        (Some(v), ..) => reconstructor.revision_at_version(&entity, v).await,
        (None, true, _) => {
          reconstructor.revision_at_version(&entity, VersionSelector::Previous).await
        }
        (None, false, Some(at)) => reconstructor.revision_at_time(&entity, at).await,
        (None, false, None) => anyhow::bail!("one of --version, --previous or --at is required"),
      }
      .context("failed to reconstruct revision")?;

      match revision {
        Some(r) => print_json(&r)?,
        None => println!("no revision found for {}", entity.identity),
      }
    }

    Command::Compact { target, max } => {
      let entity = target.entity();
      let Some(max) = max.or_else(|| audit.max_audits_for(&entity.entity_type)) else {
        anyhow::bail!("no --max given and no max_audits configured for {}", entity.entity_type);
      };

      let merged = RetentionCombiner::new(store)
        .combine_if_needed(&entity, max)
        .await
        .context("failed to compact audits")?;
      match merged {
        Some(r) => print_json(&r)?,
        None => tracing::info!(auditable = %entity, max, "nothing to compact"),
      }
    }
  }
  Ok(())
}

fn print_json(value: &impl Serialize) -> Result<()> {
  println!("{}", serde_json::to_string(value)?);
  Ok(())
}
