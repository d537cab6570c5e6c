use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use rpassword::prompt_password;
use std::collections::HashMap;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;
use vaultkeep_core::platform;
use vaultkeep_core::sync::WebDavRemote;
use vaultkeep_core::{
    AuthGate, ConflictRecord, Database, EntryStore, Resolution, SecureBuffer, SecureStore,
    SqliteEntryStore, SqliteSecureStore, SyncConfig, SyncCredentials, SyncEngine, SyncMode,
    SyncOutcome, SyncResult,
};

/// Vaultkeep - encrypted personal vault with WebDAV sync
#[derive(Parser)]
#[command(name = "vaultkeep", version)]
#[command(about = "Encrypted personal vault with end-to-end encrypted WebDAV sync", long_about = None)]
struct Cli {
    /// Directory holding vault.db and sync.toml
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Set the master password for a new vault
    Init,

    /// Check the master password
    Unlock,

    /// Change the master password and re-encrypt stored entries
    ChangePassword,

    /// Show lock, lockout and sync status
    Status,

    /// Update sync settings
    Configure(ConfigureArgs),

    /// Check that the WebDAV server is reachable with the stored credentials
    TestConnection,

    /// Sync with the remote
    Sync {
        /// Push local state, replacing the remote
        #[arg(long, conflicts_with = "download")]
        upload: bool,

        /// Replace local state with the remote
        #[arg(long)]
        download: bool,
    },
}

#[derive(Args)]
struct ConfigureArgs {
    /// WebDAV server URL (https only)
    #[arg(long)]
    url: Option<String>,

    /// Folder on the server
    #[arg(long)]
    path: Option<String>,

    /// auto, manual, upload_only or download_only
    #[arg(long)]
    mode: Option<String>,

    /// Auto-sync interval in minutes
    #[arg(long)]
    interval: Option<u64>,

    /// Per-request network timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// WebDAV username; prompts for the password
    #[arg(long)]
    username: Option<String>,

    #[arg(long, conflicts_with = "disable")]
    enable: bool,

    #[arg(long)]
    disable: bool,

    /// Forget the stored WebDAV credentials
    #[arg(long)]
    clear_credentials: bool,
}

struct Paths {
    database: PathBuf,
    config: PathBuf,
}

impl Paths {
    fn resolve(data_dir: Option<PathBuf>) -> Result<Self> {
        let paths = match data_dir {
            Some(dir) => {
                platform::ensure_dir(&dir)?;
                Self {
                    database: platform::database_path_in(&dir),
                    config: platform::config_path_in(&dir),
                }
            }
            None => {
                platform::ensure_dir(&platform::data_dir())?;
                Self {
                    database: platform::default_database_path(),
                    config: platform::default_config_path(),
                }
            }
        };
        Ok(paths)
    }
}

/// Opened stores for one invocation
struct Vault {
    gate: Arc<AuthGate>,
    secure: Arc<SqliteSecureStore>,
    entries: Arc<SqliteEntryStore>,
}

impl Vault {
    fn open(paths: &Paths) -> Result<Self> {
        let db = Database::open(&paths.database)
            .with_context(|| format!("Failed to open vault at {:?}", paths.database))?;
        let db = Arc::new(Mutex::new(db));
        let secure = Arc::new(SqliteSecureStore::new(db.clone()));
        let entries = Arc::new(SqliteEntryStore::new(db));
        let gate = Arc::new(AuthGate::new(secure.clone())?);
        Ok(Self {
            gate,
            secure,
            entries,
        })
    }

    async fn unlock(&self) -> Result<()> {
        if !self.gate.is_password_set()? {
            bail!("No vault found. Create one with: vaultkeep init");
        }
        let password = SecureBuffer::from(prompt_password("Master password: ")?);
        match self.gate.verify_master_password(password.as_bytes()).await {
            Ok(true) => Ok(()),
            Ok(false) => {
                let status = self.gate.lockout_status()?;
                bail!(
                    "Wrong master password ({} failed attempt(s))",
                    status.failed_attempts
                )
            }
            Err(e) => Err(e.into()),
        }
    }

    fn engine(&self, paths: &Paths, config: SyncConfig) -> Result<SyncEngine> {
        let credentials = SyncCredentials::load(self.secure.as_ref())?.ok_or_else(|| {
            anyhow!("No WebDAV credentials stored. Run: vaultkeep configure --username <name>")
        })?;
        let remote = WebDavRemote::new(&config, credentials)?;
        info!("Using remote folder {}", remote.folder_url());

        Ok(SyncEngine::new(
            self.gate.clone(),
            self.entries.clone(),
            Arc::new(remote),
            self.secure.clone(),
            config,
        )
        .with_config_path(paths.config.clone()))
    }
}

fn prompt_new_password(prompt: &str) -> Result<SecureBuffer> {
    let first = SecureBuffer::from(prompt_password(prompt)?);
    let second = SecureBuffer::from(prompt_password("Repeat: ")?);
    if first.as_bytes() != second.as_bytes() {
        bail!("Passwords do not match");
    }
    if first.is_empty() {
        bail!("Password must not be empty");
    }
    Ok(first)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("warn".parse()?))
        .init();

    let cli = Cli::parse();
    let paths = Paths::resolve(cli.data_dir)?;

    match cli.command {
        Commands::Init => cmd_init(&paths).await,
        Commands::Unlock => {
            Vault::open(&paths)?.unlock().await?;
            println!("Master password accepted");
            Ok(())
        }
        Commands::ChangePassword => cmd_change_password(&paths).await,
        Commands::Status => cmd_status(&paths),
        Commands::Configure(args) => cmd_configure(&paths, args),
        Commands::TestConnection => cmd_test_connection(&paths).await,
        Commands::Sync { upload, download } => cmd_sync(&paths, upload, download).await,
    }
}

async fn cmd_init(paths: &Paths) -> Result<()> {
    let vault = Vault::open(paths)?;
    if vault.gate.is_password_set()? {
        bail!("A vault already exists at {:?}", paths.database);
    }
    let password = prompt_new_password("New master password: ")?;
    vault.gate.setup_master_password(password.as_bytes()).await?;
    println!("Vault created at {:?}", paths.database);
    Ok(())
}

async fn cmd_change_password(paths: &Paths) -> Result<()> {
    let vault = Vault::open(paths)?;
    let old = SecureBuffer::from(prompt_password("Current master password: ")?);
    let new = prompt_new_password("New master password: ")?;

    // Decrypt with the current key before anything is rewritten
    let change = vault
        .gate
        .prepare_password_change(old.as_bytes(), new.as_bytes())
        .await?;
    let entries = vault.entries.load_all(&change.previous)?;
    vault
        .entries
        .replace_all_with_credential(&change.current, &entries, change.credential_record())?;
    vault.gate.complete_password_change(change).await?;

    println!("Master password changed, {} entries re-encrypted", entries.len());
    Ok(())
}

fn cmd_status(paths: &Paths) -> Result<()> {
    let vault = Vault::open(paths)?;
    let config = SyncConfig::load(&paths.config)?;

    println!("Vault:        {:?}", paths.database);
    if !vault.gate.is_password_set()? {
        println!("Password:     not set");
        return Ok(());
    }
    println!("Password:     set");

    let lockout = vault.gate.lockout_status()?;
    match lockout.remaining_secs {
        Some(secs) => println!(
            "Lockout:      locked for {} more minute(s)",
            (secs.max(0) + 59) / 60
        ),
        None => println!("Lockout:      {} failed attempt(s)", lockout.failed_attempts),
    }

    println!("Config:       {:?}", paths.config);
    println!(
        "Server:       {}",
        config.server_url.as_deref().unwrap_or("(not configured)")
    );
    println!("Folder:       {}", config.folder_path());
    println!(
        "Mode:         {}{}",
        config.mode.as_str(),
        if config.enabled { "" } else { " (disabled)" }
    );
    println!("Interval:     {} min", config.auto_sync_interval_minutes);
    match (config.last_sync_at, config.last_sync_status) {
        (Some(at), Some(status)) => println!("Last sync:    {} ({})", at, status.as_str()),
        (None, Some(status)) => println!("Last sync:    never ({})", status.as_str()),
        _ => println!("Last sync:    never"),
    }
    Ok(())
}

fn cmd_configure(paths: &Paths, args: ConfigureArgs) -> Result<()> {
    let mut config = SyncConfig::load(&paths.config)?;

    if let Some(url) = args.url {
        config.server_url = Some(url);
    }
    if let Some(path) = args.path {
        config.remote_path = path;
    }
    if let Some(mode) = args.mode {
        config.mode =
            SyncMode::parse(&mode).ok_or_else(|| anyhow!("Unknown sync mode: {}", mode))?;
    }
    if let Some(interval) = args.interval {
        config.auto_sync_interval_minutes = interval;
    }
    if let Some(timeout) = args.timeout {
        config.timeout_secs = timeout;
    }
    if args.enable {
        config.enabled = true;
    }
    if args.disable {
        config.enabled = false;
    }

    if config.server_url.is_some() {
        config.validate()?;
    }
    config.save(&paths.config)?;

    if args.clear_credentials || args.username.is_some() {
        let vault = Vault::open(paths)?;
        let store: &dyn SecureStore = vault.secure.as_ref();
        if args.clear_credentials {
            SyncCredentials::clear(store)?;
            println!("WebDAV credentials removed");
        }
        if let Some(username) = args.username {
            let password = SecureBuffer::from(prompt_password("WebDAV password: ")?);
            SyncCredentials { username, password }.save(store)?;
            println!("WebDAV credentials saved");
        }
    }

    println!("Sync settings saved to {:?}", paths.config);
    Ok(())
}

async fn cmd_test_connection(paths: &Paths) -> Result<()> {
    let vault = Vault::open(paths)?;
    let config = SyncConfig::load(&paths.config)?;
    let engine = vault.engine(paths, config)?;

    let result = engine.test_connection().await;
    if result.success {
        println!("Connected ({} ms)", result.latency_ms);
        Ok(())
    } else {
        bail!("Connection failed: {}", result.message)
    }
}

async fn cmd_sync(paths: &Paths, upload: bool, download: bool) -> Result<()> {
    let vault = Vault::open(paths)?;
    let config = SyncConfig::load(&paths.config)?;
    let engine = vault.engine(paths, config)?;
    vault.unlock().await?;

    // Dropping the cycle at an await point leaves local state untouched
    let result = tokio::select! {
        result = run_sync(&engine, upload, download) => result?,
        _ = tokio::signal::ctrl_c() => bail!("Sync interrupted"),
    };

    print_result(&result);
    Ok(())
}

async fn run_sync(engine: &SyncEngine, upload: bool, download: bool) -> Result<SyncResult> {
    if upload {
        return Ok(engine.sync_upload().await?);
    }
    if download {
        return Ok(engine.sync_download().await?);
    }

    match engine.sync().await? {
        SyncOutcome::Completed(result) => Ok(result),
        SyncOutcome::Conflicted(conflicts) => {
            println!("{} conflict(s) need a decision:", conflicts.len());
            let strategies = ask_resolutions(&conflicts)?;
            Ok(engine.resolve_all_conflicts(&strategies).await?)
        }
    }
}

fn ask_resolutions(conflicts: &[ConflictRecord]) -> Result<HashMap<Uuid, Resolution>> {
    let stdin = std::io::stdin();
    let mut lines = stdin.lock().lines();
    let mut strategies = HashMap::new();

    for conflict in conflicts {
        println!();
        println!(
            "[{}] {} ({})",
            conflict.kind.as_str(),
            conflict.local.title(),
            conflict.entry_id
        );
        println!(
            "  local:  {}{}",
            conflict.local_modified_at,
            if conflict.local.deleted { " (deleted)" } else { "" }
        );
        println!(
            "  remote: {}{}",
            conflict.remote_modified_at,
            if conflict.remote.deleted { " (deleted)" } else { "" }
        );

        let strategy = loop {
            print!("  keep [l]ocal, keep [r]emote, [m]erge or [s]kip? ");
            std::io::stdout().flush()?;
            let line = lines
                .next()
                .ok_or_else(|| anyhow!("Input closed before every conflict was resolved"))??;
            match line.trim() {
                "l" | "local" => break Resolution::KeepLocal,
                "r" | "remote" => break Resolution::KeepRemote,
                "m" | "merge" => break Resolution::Merge,
                "s" | "skip" => break Resolution::Skip,
                other => println!("  unrecognized choice {:?}", other),
            }
        };
        strategies.insert(conflict.entry_id, strategy);
    }
    Ok(strategies)
}

fn print_result(result: &SyncResult) {
    if result.is_noop() {
        println!("Already up to date");
        return;
    }
    let counts = result.counts;
    println!(
        "Sync complete: {} added, {} updated, {} deleted locally; {} uploaded",
        counts.added, counts.updated, counts.deleted, counts.uploaded
    );
    if !result.skipped.is_empty() {
        println!(
            "{} conflict(s) skipped; they will come up again on the next sync",
            result.skipped.len()
        );
    }
}
