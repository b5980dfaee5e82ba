//! CLI entry point for Keywarden.
//!
//! This binary provides the `keywarden` command with subcommands for
//! managing the local vault (register, login, add, list, remove),
//! generating passwords, and serving the HTTP API.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use keywarden_core::{
    Cipher, DEFAULT_TTL_DAYS, MASTER_KEY_ENTRY, SessionManager, TOKEN_KEY_ENTRY, TokenSigner,
    generate_password, get_or_create_key, platform_keychain,
};
use keywarden_server::{ApiServer, ServerConfig};
use keywarden_store::{CredentialStore, Database, PoolConfig};

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

/// Keywarden — a local-first password vault.
#[derive(Parser)]
#[command(
    name = "keywarden",
    version,
    about = "Keywarden — local-first password vault",
    long_about = "Stores credentials encrypted with AES-256-GCM under a device-held \
                  master key, with an optional HTTP API for remote clients."
)]
struct Cli {
    /// Directory holding the database, keys, and session file.
    #[arg(long, env = "KEYWARDEN_DATA_DIR", default_value = "data")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new account in the local vault.
    Register,

    /// Log in and start a local session.
    Login,

    /// End the local session.
    Logout,

    /// List stored credentials.
    List,

    /// Add a credential to the vault.
    Add {
        /// Site or service the credential belongs to.
        site: String,
        /// Username at that site.
        username: String,
        /// Generate the password instead of prompting for it.
        #[arg(long)]
        generate: bool,
    },

    /// Remove a credential by id.
    Remove {
        /// The credential id shown by `list`.
        id: i64,
    },

    /// Generate a random password and print it.
    Generate {
        /// Password length (clamped to 6..=32).
        #[arg(long, default_value_t = keywarden_core::generator::DEFAULT_LENGTH)]
        length: usize,
    },

    /// Start the HTTP API server.
    Serve {
        /// Address to bind to.
        #[arg(long, default_value = "127.0.0.1")]
        bind: String,
        /// Port to listen on.
        #[arg(long, default_value_t = 8000)]
        port: u16,
    },

    /// Show vault status.
    Status,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Register => cmd_register(&cli.data_dir).await,
        Commands::Login => cmd_login(&cli.data_dir).await,
        Commands::Logout => cmd_logout(&cli.data_dir).await,
        Commands::List => cmd_list(&cli.data_dir).await,
        Commands::Add {
            site,
            username,
            generate,
        } => cmd_add(&cli.data_dir, &site, &username, generate).await,
        Commands::Remove { id } => cmd_remove(&cli.data_dir, id).await,
        Commands::Generate { length } => cmd_generate(length),
        Commands::Serve { bind, port } => cmd_serve(&cli.data_dir, bind, port).await,
        Commands::Status => cmd_status(&cli.data_dir).await,
    }
}

// ---------------------------------------------------------------------------
// Vault context
// ---------------------------------------------------------------------------

/// Everything an interactive command needs: the store and the session.
struct Vault {
    store: CredentialStore,
    session: SessionManager,
}

impl Vault {
    /// Open the vault under `data_dir`, creating keys and schema on first use.
    async fn open(data_dir: &Path) -> Result<Self> {
        if !data_dir.exists() {
            std::fs::create_dir_all(data_dir).context("failed to create data directory")?;
        }

        let keychain = platform_keychain(data_dir);
        let master = get_or_create_key(keychain.as_ref(), MASTER_KEY_ENTRY)
            .context("failed to load master key")?;
        let cipher = Cipher::new(&master).context("failed to initialize cipher")?;

        let db_path = data_dir.join("keywarden.db");
        let db = Database::open_and_migrate(db_path, PoolConfig::default())
            .await
            .context("failed to open database")?;

        let session = SessionManager::new(data_dir.join("session.bin"), cipher.clone());
        let store = CredentialStore::new(db, cipher);

        Ok(Self { store, session })
    }

    /// The logged-in user id, or an error telling the user to log in.
    fn current_user(&self) -> Result<i64> {
        match self.session.load() {
            Some(payload) => Ok(payload.user),
            None => bail!("not logged in (run `keywarden login`)"),
        }
    }
}

// ---------------------------------------------------------------------------
// Subcommand: register
// ---------------------------------------------------------------------------

async fn cmd_register(data_dir: &Path) -> Result<()> {
    init_tracing("warn");
    let vault = Vault::open(data_dir).await?;

    let email = prompt("Email: ")?;
    let username = prompt("Username: ")?;
    let password = rpassword::prompt_password("Password: ")?;
    let confirm = rpassword::prompt_password("Confirm password: ")?;
    if password != confirm {
        bail!("passwords do not match");
    }

    let profile = vault.store.create_user(&email, &username, &password).await?;
    vault.session.save(profile.id, DEFAULT_TTL_DAYS)?;

    println!("Account '{}' created. You are now logged in.", profile.username);
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand: login / logout
// ---------------------------------------------------------------------------

async fn cmd_login(data_dir: &Path) -> Result<()> {
    init_tracing("warn");
    let vault = Vault::open(data_dir).await?;

    let identity = prompt("Username or email: ")?;
    let password = rpassword::prompt_password("Password: ")?;

    match vault.store.verify_credentials(&identity, &password).await? {
        Some(user_id) => {
            vault.session.save(user_id, DEFAULT_TTL_DAYS)?;
            println!("Logged in.");
            Ok(())
        }
        None => bail!("invalid credentials"),
    }
}

async fn cmd_logout(data_dir: &Path) -> Result<()> {
    init_tracing("warn");
    let vault = Vault::open(data_dir).await?;
    vault.session.clear();
    println!("Logged out.");
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand: list / add / remove
// ---------------------------------------------------------------------------

async fn cmd_list(data_dir: &Path) -> Result<()> {
    init_tracing("warn");
    let vault = Vault::open(data_dir).await?;
    let user_id = vault.current_user()?;

    let secrets = vault.store.list_secrets(user_id).await?;
    if secrets.is_empty() {
        println!("No credentials stored.");
        return Ok(());
    }

    println!("{:>6}  {:<24} {:<20} {}", "id", "site", "username", "password");
    for secret in secrets {
        println!(
            "{:>6}  {:<24} {:<20} {}",
            secret.id, secret.site, secret.username, secret.password
        );
    }
    Ok(())
}

async fn cmd_add(data_dir: &Path, site: &str, username: &str, generate: bool) -> Result<()> {
    init_tracing("warn");
    let vault = Vault::open(data_dir).await?;
    let user_id = vault.current_user()?;

    let password = if generate {
        let pw = generate_password(keywarden_core::generator::DEFAULT_LENGTH)?;
        println!("Generated password: {pw}");
        pw
    } else {
        rpassword::prompt_password("Password for this site: ")?
    };

    let record = vault
        .store
        .save_secret(user_id, site, username, &password)
        .await?;
    println!("Stored credential #{} for {}.", record.id, record.site);
    Ok(())
}

async fn cmd_remove(data_dir: &Path, id: i64) -> Result<()> {
    init_tracing("warn");
    let vault = Vault::open(data_dir).await?;
    let user_id = vault.current_user()?;

    if vault.store.delete_secret(user_id, id).await? {
        println!("Removed credential #{id}.");
        Ok(())
    } else {
        bail!("no credential with id {id}");
    }
}

// ---------------------------------------------------------------------------
// Subcommand: generate
// ---------------------------------------------------------------------------

fn cmd_generate(length: usize) -> Result<()> {
    let pw = generate_password(length)?;
    println!("{pw}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand: serve
// ---------------------------------------------------------------------------

async fn cmd_serve(data_dir: &Path, bind: String, port: u16) -> Result<()> {
    init_tracing("info");

    let vault = Vault::open(data_dir).await?;

    // The token key lives in the keychain next to the master key, so
    // restarting the server does not invalidate issued tokens.
    let keychain = platform_keychain(data_dir);
    let token_key = get_or_create_key(keychain.as_ref(), TOKEN_KEY_ENTRY)
        .context("failed to load token key")?;
    let tokens = TokenSigner::new(&token_key);

    let config = ServerConfig {
        bind_addr: bind,
        port,
    };
    info!(addr = %format!("{}:{}", config.bind_addr, config.port), "serving api");

    ApiServer::new(config, vault.store, tokens)
        .start()
        .await
        .map_err(|e| anyhow::anyhow!("server error: {e}"))
}

// ---------------------------------------------------------------------------
// Subcommand: status
// ---------------------------------------------------------------------------

/// Report vault state without touching it: no keys are generated and no
/// database is created by asking for status.
async fn cmd_status(data_dir: &Path) -> Result<()> {
    init_tracing("warn");

    println!();
    println!("  Keywarden Status");
    println!("  ================");
    println!();

    if data_dir.exists() {
        println!("  Data directory:   OK ({})", data_dir.display());
    } else {
        println!("  Data directory:   MISSING (created on first use)");
    }

    let db_path = data_dir.join("keywarden.db");
    if db_path.exists() {
        println!("  Database:         OK ({})", db_path.display());
    } else {
        println!("  Database:         NOT INITIALIZED");
    }

    let session_path = data_dir.join("session.bin");
    let session = if session_path.exists() {
        let keychain = platform_keychain(data_dir);
        match keychain.has_key(MASTER_KEY_ENTRY) {
            Ok(true) => {
                let master = keychain
                    .get_key(MASTER_KEY_ENTRY)
                    .context("failed to load master key")?;
                let cipher = Cipher::new(&master).context("failed to initialize cipher")?;
                SessionManager::new(session_path, cipher).load()
            }
            _ => None,
        }
    } else {
        None
    };
    match session {
        Some(payload) => println!("  Session:          ACTIVE (user {})", payload.user),
        None => println!("  Session:          NONE"),
    }

    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Initialize the tracing subscriber with the given default log level.
/// A no-op if a subscriber is already installed.
fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .ok();
}

/// Prompt for a single trimmed line on stdout/stdin.
fn prompt(label: &str) -> Result<String> {
    print!("{label}");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin()
        .read_line(&mut line)
        .context("failed to read input")?;
    Ok(line.trim().to_string())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
