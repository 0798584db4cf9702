//! journal-daemon: Headless journal sync device.
//!
//! Uses the same journal-sync engine as the apps, with a shared directory
//! standing in for the hosted document store.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use journal_daemon::{Device, DeviceOptions, LogNotifier};
use journal_sync::{EntryPatch, JournalId, Role, SyncConfig, UserIdentity};

#[derive(Parser, Debug)]
#[command(name = "journal-daemon")]
#[command(about = "Offline-first journal sync device")]
struct Args {
    /// Shared store directory
    #[arg(long, env = "JOURNAL_STORE")]
    store: PathBuf,

    /// Directory for this device's state
    #[arg(long, env = "JOURNAL_DATA_DIR")]
    data_dir: PathBuf,

    /// Identity of the signed-in user
    #[arg(long, env = "JOURNAL_USER")]
    user: String,

    /// Display name shown to other members (defaults to the identity)
    #[arg(long, env = "JOURNAL_NAME")]
    name: Option<String>,

    /// JSON file with sync settings
    #[arg(long)]
    config: Option<PathBuf>,

    /// Seconds between background syncs (overrides the config file)
    #[arg(long, env = "JOURNAL_SYNC_INTERVAL")]
    sync_interval: Option<u64>,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Listen to shared journals and sync on an interval until stopped
    Run,
    /// Sync private entries once
    Sync,
    /// Write (or update) the private entry of a date
    Write {
        /// Entry date, YYYY-MM-DD
        date: String,
        text: String,
        #[arg(long)]
        mood: Option<String>,
    },
    /// Create a shared journal
    CreateJournal { name: String },
    /// Create an invite link for a shared journal
    Invite {
        journal: JournalId,
        #[arg(long, value_enum, default_value_t = RoleArg::Member)]
        role: RoleArg,
    },
    /// Join a shared journal with an invite link
    Join { url: String },
    /// Leave a shared journal
    Leave { journal: JournalId },
    /// Rebuild the list of shared journals from the store
    Restore,
    /// Post an entry to a shared journal
    Post { journal: JournalId, text: String },
    /// List private entries and shared journals
    List,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum RoleArg {
    Member,
    Viewer,
}

impl From<RoleArg> for Role {
    fn from(role: RoleArg) -> Self {
        match role {
            RoleArg::Member => Role::Member,
            RoleArg::Viewer => Role::Viewer,
        }
    }
}

fn load_config(path: Option<&Path>, sync_interval: Option<u64>) -> Result<SyncConfig> {
    let mut config = match path {
        Some(path) => {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {:?}", path))?;
            serde_json::from_str(&contents).with_context(|| format!("parsing config {:?}", path))?
        }
        None => SyncConfig::default(),
    };
    if let Some(secs) = sync_interval {
        config.sync_interval_secs = secs;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,journal_daemon=debug"
    } else {
        "info,journal_daemon=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = load_config(args.config.as_deref(), args.sync_interval)?;
    let name = args.name.clone().unwrap_or_else(|| args.user.clone());
    let device = Device::open(
        DeviceOptions {
            store_dir: args.store.clone(),
            data_dir: args.data_dir.clone(),
            user: UserIdentity::new(args.user.clone(), name),
            config,
        },
        Arc::new(LogNotifier),
    )?;
    info!("Store: {:?}, data: {:?}", args.store, args.data_dir);

    let engine = device.engine();
    match args.command {
        Command::Run => {
            device
                .run(async {
                    let _ = tokio::signal::ctrl_c().await;
                })
                .await?;
            return Ok(());
        }
        Command::Sync => {
            let report = engine.reconciler.sync_with_cloud().await?;
            println!(
                "adopted {}, conflicts {}, pushed {}",
                report.adopted.len(),
                report.conflicts.len(),
                report.pushed.len()
            );
        }
        Command::Write { date, text, mood } => {
            let mut patch = EntryPatch::text(text);
            if let Some(mood) = mood {
                patch = patch.with_mood(mood);
            }
            let entry = engine.cache.upsert(&date, patch)?;
            println!("saved {} (pending sync)", entry.date);
        }
        Command::CreateJournal { name } => {
            let meta = engine.membership.create_journal(&name).await?;
            println!("{}", meta.id);
        }
        Command::Invite { journal, role } => {
            let link = engine
                .membership
                .create_invite_link(&journal, role.into())
                .await?;
            println!("{}", link);
        }
        Command::Join { url } => {
            let outcome = engine.membership.join_via_invite(&url).await?;
            println!("{}", outcome);
        }
        Command::Leave { journal } => {
            engine.membership.leave_journal(&journal).await?;
            println!("left {}", journal);
        }
        Command::Restore => {
            let journals = engine.membership.restore_journals().await?;
            println!("{} journal(s)", journals.len());
        }
        Command::Post { journal, text } => {
            if !engine.directory.contains(&journal) {
                bail!("unknown journal {journal}; run `restore` or `join` first");
            }
            let entry = engine
                .shared
                .post_entry(&journal, EntryPatch::text(text))
                .await?;
            println!("{}", entry.id);
        }
        Command::List => {
            for entry in engine.cache.entries().values() {
                let marker = if entry.is_pending() { "*" } else { " " };
                println!("{} {} {}", marker, entry.date, journal_sync::model::snippet(&entry.text, 60));
            }
            for meta in engine.directory.list() {
                println!("# {} {} ({} members)", meta.id, meta.name, meta.member_ids.len());
            }
        }
    }

    engine.shutdown().await;
    device.save()?;
    Ok(())
}
