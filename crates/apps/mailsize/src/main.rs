//! Mailsize - report how much Gmail storage each label uses
//!
//! Mirrors message metadata (date, labels, size) into a local SQLite
//! database, then aggregates sizes per label or label combination.

use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info, warn};
use mailsize::{
    EnrichOptions, GmailAuth, GmailClient, GmailCredentials, LabelFilter, SqliteMailStore,
    enrich_all, import_stubs, refresh_labels, report_sizes, write_table,
};

/// Default database file in the config directory
const STORE_FILE: &str = "mailsize.sqlite";

#[derive(Parser, Debug)]
#[command(name = "mailsize", version, about = "Mirror Gmail metadata and report size per label")]
struct Cli {
    /// Replace the stored label catalog with the mailbox's current labels
    #[arg(long = "importLabels")]
    import_labels: bool,

    /// Store a stub for every message listed since the last import
    #[arg(long = "importMessages")]
    import_messages: bool,

    /// Fetch date, labels and size for every stub
    #[arg(long = "processMessages")]
    process_messages: bool,

    /// Print the size table to stdout
    #[arg(long = "showSizes")]
    show_sizes: bool,

    /// Number of enrichment workers (1-50)
    #[arg(long = "procNum", default_value_t = 1)]
    proc_num: usize,

    /// SQLite database path
    #[arg(
        long,
        visible_alias = "mongoConnectString",
        env = "MAILSIZE_STORE",
        value_name = "PATH"
    )]
    store: Option<PathBuf>,

    /// Label id to report on; repeat to report on messages carrying all of them
    #[arg(short = 'l', long = "label", value_name = "LABEL_ID")]
    labels: Vec<String>,

    /// Google OAuth client secret JSON
    #[arg(long, value_name = "PATH")]
    credentials: Option<PathBuf>,

    /// Remove the cached access token
    #[arg(long)]
    logout: bool,
}

impl Cli {
    fn needs_source(&self) -> bool {
        self.import_labels || self.import_messages || self.process_messages
    }

    fn has_action(&self) -> bool {
        self.needs_source() || self.show_sizes
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();

    // Bootstrap config directory
    if let Err(e) = config::init() {
        error!("Failed to initialize config directory: {}", e);
    }

    // Reject a bad worker count before touching the store or the network
    let enrich_options = EnrichOptions::new(cli.proc_num)?;
    let filter = LabelFilter::from_ids(cli.labels.iter().map(String::as_str));

    if cli.logout && !GmailAuth::clear_token_cache()? {
        info!("No cached token to remove");
    }

    if !cli.has_action() {
        if !cli.logout {
            warn!("Nothing to do: pass --importLabels, --importMessages, --processMessages or --showSizes");
        }
        return Ok(());
    }

    let store = open_store(cli.store.as_deref())?;
    let client = if cli.needs_source() {
        Some(connect(cli.credentials.as_deref())?)
    } else {
        None
    };

    if let Some(client) = &client {
        if cli.import_labels {
            refresh_labels(client, &store)?;
        }

        if cli.import_messages {
            let stats = import_stubs(client, &store)?;
            info!(
                "Imported {} new messages ({} already known)",
                stats.inserted, stats.already_known
            );
        }

        if cli.process_messages {
            let stats = enrich_all(client, &store, &enrich_options)?;
            info!(
                "Processed messages in {} passes ({} ms), {} left unenriched",
                stats.passes, stats.duration_ms, stats.remaining
            );
        }
    }

    if cli.show_sizes {
        let reports = report_sizes(&store, &filter)?;
        write_table(io::stdout().lock(), &reports)?;
    }

    Ok(())
}

/// Open the SQLite store at `path`, or the default one in the config directory
fn open_store(path: Option<&Path>) -> Result<SqliteMailStore> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => config::config_path(STORE_FILE).context("Could not determine config directory")?,
    };
    info!("Using store {}", path.display());
    SqliteMailStore::new(&path).with_context(|| format!("Failed to open store {}", path.display()))
}

/// Build an authenticated Gmail client
fn connect(credentials: Option<&Path>) -> Result<GmailClient> {
    let creds = match GmailCredentials::load(credentials) {
        Ok(creds) => creds,
        Err(e) => {
            if let Some(path) = GmailCredentials::default_credentials_path() {
                warn!(
                    "To configure Gmail access, either:\n\
                     1. Place your Google OAuth credentials at: {}\n\
                     2. Or set environment variables: GMAIL_CLIENT_ID and GMAIL_CLIENT_SECRET",
                    path.display()
                );
            }
            return Err(e.context("Gmail credentials not found"));
        }
    };

    let auth = GmailAuth::new(creds)?;
    Ok(GmailClient::new(auth))
}
