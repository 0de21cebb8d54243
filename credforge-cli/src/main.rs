//! Credforge git credential helper
//!
//! Resolves credentials for git remotes from the OS keychain (or an
//! encrypted file), acquiring them through the provider's flow on a miss.
//!
//! # Usage
//!
//! ```bash
//! # Register with git
//! git config --global credential.helper credforge
//!
//! # What git runs
//! printf 'protocol=https\nhost=github.com\n' | git-credential-credforge get
//!
//! # Show the storage key for a remote
//! git-credential-credforge key https://github.com/owner/repo
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use credforge_core::{
    context::{ContextOptions, RuntimeContext},
    paths::AppPaths,
    provider::ProviderRegistry,
    store::StoreBackend,
    target::{KeyNormalizer, NamingMode, TargetUri},
    AuthenticationResult, Authenticator, TokenScope,
};
use std::io::{self, BufReader};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

mod config;
mod prompt;
mod protocol;

use config::CliConfig;
use prompt::TerminalPrompter;
use protocol::CredentialRequest;

#[derive(Parser)]
#[command(name = "git-credential-credforge")]
#[command(about = "Git credential helper backed by credforge")]
#[command(version)]
struct Cli {
    /// Enable verbose output on stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (defaults to the platform config directory)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Namespace prefixed to storage keys
    #[arg(long, global = true)]
    namespace: Option<String>,

    /// Use Mercurial-compatible storage keys
    #[arg(long, global = true)]
    mercurial: bool,

    /// Secret store backend
    #[arg(long, global = true, value_enum)]
    store: Option<BackendArg>,

    /// Never prompt or open a browser; answer from the store only
    #[arg(long, global = true)]
    no_prompt: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Return credentials for the remote described on stdin
    Get,

    /// Store the credentials described on stdin
    Store,

    /// Erase stored credentials for the remote described on stdin
    Erase,

    /// Print the storage key for a remote URL
    Key {
        /// Remote URL (e.g., https://github.com/owner/repo)
        url: String,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum BackendArg {
    Keyring,
    File,
    Memory,
}

impl From<BackendArg> for StoreBackend {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Keyring => StoreBackend::Keyring,
            BackendArg::File => StoreBackend::File,
            BackendArg::Memory => StoreBackend::Memory,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    let result = runtime.block_on(run(cli));
    // A prompt still blocked on the terminal after cancellation is abandoned.
    runtime.shutdown_timeout(Duration::from_millis(100));
    result
}

fn init_logging(verbose: bool, level: &str) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    };

    // stdout carries the credential protocol.
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

/// Everything a command needs, resolved from flags and configuration.
struct Session {
    ctx: RuntimeContext,
    registry: ProviderRegistry,
    mode: NamingMode,
    namespace: String,
    scope: TokenScope,
    retries: u32,
    cancel: CancellationToken,
}

impl Session {
    fn new(cli: &Cli, config: CliConfig, paths: AppPaths) -> Self {
        let mode = if cli.mercurial || NamingMode::from_env() == NamingMode::Mercurial {
            NamingMode::Mercurial
        } else {
            config.naming_mode
        };

        let ctx = RuntimeContext::new(ContextOptions {
            store_backend: cli.store.map(Into::into).unwrap_or(config.store),
            http_timeout: config.http_timeout(),
            paths,
        });
        if !cli.no_prompt {
            ctx.set_prompter(Arc::new(TerminalPrompter));
        }

        Self {
            ctx,
            registry: config.registry(),
            mode,
            namespace: cli.namespace.clone().unwrap_or_else(|| config.namespace.clone()),
            scope: config.scope(),
            retries: config.transport_retries,
            cancel: CancellationToken::new(),
        }
    }

    fn normalizer(&self) -> KeyNormalizer {
        KeyNormalizer::new(self.mode, Some(&self.namespace))
    }

    fn authenticator(&self, target: &TargetUri) -> Authenticator {
        let provider = self.registry.for_host(target.host());
        debug!("Host {} served by provider {}", target.host(), provider.id);

        Authenticator::for_provider(&self.ctx, provider, self.normalizer())
            .with_scope(provider.scope() | self.scope.clone())
            .with_cancellation(self.cancel.clone())
    }
}

async fn run(cli: Cli) -> Result<()> {
    let paths = AppPaths::discover();
    let config = config::load_config(cli.config.as_deref(), &paths)?;
    init_logging(cli.verbose, &config.log_level);

    if let Some(path) = &config.config_path {
        debug!("Loaded configuration from {:?}", path);
    }

    let session = Session::new(&cli, config, paths);

    let interrupt = session.cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling");
            interrupt.cancel();
        }
    });

    match cli.command {
        Commands::Get => get(&session, cli.no_prompt).await,
        Commands::Store => store(&session).await,
        Commands::Erase => erase(&session).await,
        Commands::Key { url } => key(&session, &url),
    }
}

fn read_request() -> Result<CredentialRequest> {
    CredentialRequest::read(BufReader::new(io::stdin().lock()))
}

async fn get(session: &Session, no_prompt: bool) -> Result<()> {
    let request = read_request()?;
    let target = request.target()?;
    let auth = session.authenticator(&target);

    if no_prompt {
        match auth.cached_credentials(&target).await? {
            Some(credential) => protocol::write_credential(io::stdout().lock(), &credential)?,
            None => debug!("No stored credentials for {}", target),
        }
        return Ok(());
    }

    let mut attempt = 0;
    loop {
        match auth.get_credentials(&target).await? {
            AuthenticationResult::Success { credential, .. } => {
                return protocol::write_credential(io::stdout().lock(), &credential);
            }
            AuthenticationResult::Cancelled => {
                info!("Cancelled credential lookup for {}", target);
                return protocol::write_quit(io::stdout().lock());
            }
            AuthenticationResult::Failure(reason) if reason.is_retryable() && attempt < session.retries => {
                attempt += 1;
                warn!(
                    "Attempt {} for {} failed ({}), retrying",
                    attempt, target, reason
                );
            }
            AuthenticationResult::Failure(reason) => {
                bail!("Could not get credentials for {}: {}", target, reason);
            }
            other => bail!("Could not get credentials for {}: {:?}", target, other),
        }
    }
}

async fn store(session: &Session) -> Result<()> {
    let request = read_request()?;
    let target = request.target()?;
    let credential = request.credential()?;

    session
        .authenticator(&target)
        .set_credentials(&target, credential)
        .await
        .with_context(|| format!("Failed to store credentials for {}", target))?;
    info!("Stored credentials for {}", target);
    Ok(())
}

async fn erase(session: &Session) -> Result<()> {
    let request = read_request()?;
    let target = request.target()?;

    let removed = session
        .authenticator(&target)
        .delete_credentials(&target)
        .await
        .with_context(|| format!("Failed to erase credentials for {}", target))?;
    if removed {
        info!("Erased credentials for {}", target);
    } else {
        debug!("No stored credentials for {}", target);
    }
    Ok(())
}

fn key(session: &Session, url: &str) -> Result<()> {
    let target = TargetUri::parse(url)?;
    let provider = session.registry.for_host(target.host());
    let key = provider
        .apply_aliases(session.normalizer())
        .storage_key(&target)?;
    println!("{}", key);
    Ok(())
}
