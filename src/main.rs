use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use lrclib_sidecar::catalog::{find_library, CatalogEnumerator, CatalogSource, JellyfinClient};
use lrclib_sidecar::checkpoint::{ProgressRecord, ProgressStore};
use lrclib_sidecar::config::Config;
use lrclib_sidecar::lrclib::{LrclibClient, LyricSource};
use lrclib_sidecar::pipeline::{Pipeline, RunOptions, RunOutcome};
use lrclib_sidecar::policy::Profile;
use lrclib_sidecar::progress::{create_spinner, format_duration, set_log_only};
use lrclib_sidecar::remote::{LocalShellExecutor, RemoteExecutor, SshExecutor, Transport};

#[derive(Parser)]
#[command(name = "lrclib-sidecar")]
#[command(about = "Refresh .lrc lyric sidecars for a Jellyfin music library from LRCLIB")]
struct Cli {
    /// TOML config file
    #[arg(long, global = true, env = "LRCLIB_SIDECAR_CONFIG")]
    config: Option<PathBuf>,

    /// Jellyfin base URL
    #[arg(long, global = true, env = "JELLYFIN_URL")]
    server_url: Option<String>,

    /// Jellyfin API key
    #[arg(long, global = true, env = "JELLYFIN_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Checkpoint file
    #[arg(long, global = true)]
    checkpoint: Option<PathBuf>,

    /// Hide progress bars and print periodic progress lines instead
    #[arg(long, global = true)]
    log_only: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Clear stale sidecars and write fresh lyrics for every track
    Run(RunArgs),

    /// Show the saved checkpoint
    Status {
        /// Print the raw checkpoint document
        #[arg(long)]
        json: bool,
    },

    /// List music libraries on the server
    Libraries,
}

#[derive(Args)]
struct RunArgs {
    /// Restrict the run to one library by id
    #[arg(long, conflicts_with = "library")]
    library_id: Option<String>,

    /// Restrict the run to one library by name
    #[arg(long)]
    library: Option<String>,

    /// ssh destination holding the media files
    #[arg(long, env = "LRCLIB_SIDECAR_REMOTE_HOST")]
    remote_host: Option<String>,

    #[arg(long, value_enum)]
    transport: Option<Transport>,

    /// Timeout and pacing preset
    #[arg(long, value_enum)]
    profile: Option<Profile>,

    /// Ignore an unfinished checkpoint and start from the first track
    #[arg(long)]
    no_resume: bool,

    /// Report what would be done without touching anything
    #[arg(long)]
    dry_run: bool,

    /// Stop after this many tracks
    #[arg(long)]
    limit: Option<u64>,

    /// Only tracks whose title or artist contains this text
    #[arg(long)]
    only: Option<String>,

    #[arg(long)]
    page_size: Option<usize>,

    /// Emit run statistics as JSON on stderr
    #[arg(long)]
    json_stats: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    set_log_only(cli.log_only);

    let mut config = Config::load(cli.config.as_deref()).context("Failed to load config")?;
    if let Some(url) = cli.server_url {
        config.server_url = url;
    }
    if let Some(key) = cli.api_key {
        config.api_token = key;
    }
    if let Some(path) = cli.checkpoint {
        config.checkpoint_path = path;
    }

    match cli.command {
        Command::Run(args) => run(config, args),
        Command::Status { json } => status(&config, json),
        Command::Libraries => libraries(&config),
    }
}

fn jellyfin(config: &Config) -> Result<JellyfinClient> {
    if config.api_token.trim().is_empty() {
        bail!("No Jellyfin API key: set JELLYFIN_API_KEY or api_token in the config file");
    }
    JellyfinClient::new(&config.server_url, &config.api_token, &config.user_agent)
        .context("Failed to create Jellyfin client")
}

fn run(mut config: Config, args: RunArgs) -> Result<()> {
    if let Some(profile) = args.profile {
        config.policies = profile.policies();
    }
    if let Some(host) = args.remote_host {
        config.remote_host = host;
    }
    if let Some(transport) = args.transport {
        config.transport = transport;
    }
    if let Some(size) = args.page_size {
        config.page_size = size;
    }
    if let Some(id) = args.library_id {
        config.library_id = Some(id);
    }
    config.validate(args.dry_run).context("Invalid configuration")?;

    let mut catalog = jellyfin(&config)?;
    if let Some(name) = &args.library {
        let enumerator = CatalogEnumerator::new(catalog, config.policies.catalog.clone());
        let spinner = create_spinner("Discovering music libraries");
        let found = enumerator.libraries();
        spinner.finish_and_clear();
        let libraries = found.context("Failed to list libraries")?;
        let Some(library) = find_library(&libraries, name) else {
            let names: Vec<&str> = libraries.iter().map(|l| l.name.as_str()).collect();
            bail!("Library {:?} not found (available: {})", name, names.join(", "));
        };
        info!(id = %library.id, name = %library.name, "using library");
        config.library_id = Some(library.id.clone());
        catalog = enumerator.into_source();
    }

    let lyrics =
        LrclibClient::new(&config.lookup_url, &config.user_agent).context("Failed to create LRCLIB client")?;
    let options = RunOptions {
        resume: !args.no_resume,
        dry_run: args.dry_run,
        limit: args.limit,
        only: args.only,
    };

    match config.transport {
        Transport::Ssh => {
            let remote = SshExecutor::new(
                config.ssh_program.clone(),
                config.ssh_options.clone(),
                config.remote_host.clone(),
            );
            drive(config, catalog, lyrics, remote, &options, args.json_stats)
        }
        Transport::Local => drive(config, catalog, lyrics, LocalShellExecutor, &options, args.json_stats),
    }
}

fn drive<C, L, R>(
    config: Config,
    catalog: C,
    lyrics: L,
    remote: R,
    options: &RunOptions,
    json_stats: bool,
) -> Result<()>
where
    C: CatalogSource,
    L: LyricSource,
    R: RemoteExecutor,
{
    let pipeline = Pipeline::new(config, catalog, lyrics, remote);

    let cancel = pipeline.cancel_flag();
    ctrlc::set_handler(move || {
        if !cancel.swap(true, Ordering::SeqCst) {
            eprintln!("\nInterrupt received, stopping after the current track...");
        }
    })
    .context("Failed to install Ctrl-C handler")?;

    if options.dry_run {
        println!("Dry run: no lookups, no remote commands, checkpoint left untouched");
    }
    let checkpoint = pipeline.config().checkpoint_path.display().to_string();
    let report = pipeline.run(options).context("Run aborted")?;

    println!("\n{:=<60}", "");
    match report.outcome {
        RunOutcome::Completed => println!("Run complete!"),
        RunOutcome::Interrupted => println!("Run interrupted; rerun to resume"),
        RunOutcome::LimitReached => println!("Limit reached; rerun to continue"),
        RunOutcome::CatalogFailed => println!("Catalog stopped responding; rerun to resume"),
    }
    println!("{}", report.stats.summary());
    println!(
        "  Elapsed: {}",
        format_duration(Duration::from_secs_f64(report.stats.elapsed_seconds))
    );
    print_record(&report.record);
    if !options.dry_run {
        println!("  Checkpoint: {}", checkpoint);
    }
    println!("{:=<60}", "");

    if json_stats {
        report.stats.log_json("run");
    }
    Ok(())
}

fn print_record(record: &ProgressRecord) {
    println!("  Status: {:?}", record.status);
    println!(
        "  Processed: {}/{} (succeeded {}, lyrics found {})",
        record.processed, record.total_songs, record.success_count, record.lyrics_found
    );
    if let Some(offset) = record.last_offset {
        println!("  Next offset: {}", offset);
    }
    if let Some(updated) = &record.updated_at {
        println!("  Updated: {}", updated);
    }
    if !record.errors.is_empty() {
        println!("  Recent errors:");
        for error in &record.errors {
            println!("    - {}", error);
        }
    }
}

fn status(config: &Config, json: bool) -> Result<()> {
    let path = &config.checkpoint_path;
    if !path.exists() {
        warn!(path = %path.display(), "no checkpoint yet");
    }
    let record = ProgressStore::load(path)
        .with_context(|| format!("Failed to read checkpoint {}", path.display()))?;
    if json {
        println!("{}", serde_json::to_string_pretty(&record)?);
    } else {
        println!("Checkpoint: {}", path.display());
        if let Some(library) = &record.library_id {
            println!("  Library: {}", library);
        }
        print_record(&record);
    }
    Ok(())
}

fn libraries(config: &Config) -> Result<()> {
    let enumerator = CatalogEnumerator::new(jellyfin(config)?, config.policies.catalog.clone());
    let spinner = create_spinner("Discovering music libraries");
    let found = enumerator.libraries();
    spinner.finish_and_clear();
    let libraries = found.context("Failed to list libraries")?;

    if libraries.is_empty() {
        println!("No music libraries found.");
    }
    for library in &libraries {
        println!(
            "{}  {}  {}",
            library.id,
            library.name,
            library.path.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}
