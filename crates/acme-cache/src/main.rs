//! Sentinel ACME Cache - operator tool
//!
//! Inspect and edit the Kubernetes Secret a certificate manager uses as its
//! ACME cache.

use std::io::{Read, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context as _, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, info};

use sentinel_acme_cache::config::env_flag;
use sentinel_acme_cache::{
    encode_key, AcmeStore, Cache, CacheConfig, CacheError, ConnectionMode, Context,
    KubernetesCache,
};

/// Manage ACME certificates cached in a Kubernetes Secret
#[derive(Parser, Debug)]
#[command(name = "sentinel-acme-cache")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path (TOML)
    #[arg(short = 'c', long = "config", env = "SENTINEL_ACME_CACHE_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Namespace holding the cache secret
    #[arg(short = 'n', long = "namespace", global = true)]
    namespace: Option<String>,

    /// Secret used for certificate storage
    #[arg(short = 's', long = "secret", global = true)]
    secret: Option<String>,

    /// Path to a kubeconfig file
    #[arg(long = "kubeconfig", global = true)]
    kubeconfig: Option<PathBuf>,

    /// Kubeconfig context to use
    #[arg(long = "context", global = true)]
    kube_context: Option<String>,

    /// Use the in-cluster service account (defaults to $IN_CLUSTER)
    #[arg(long = "in-cluster", global = true)]
    in_cluster: Option<bool>,

    /// Grace period in seconds when the emptied secret is deleted
    #[arg(long = "grace-period", global = true)]
    grace_period: Option<u64>,

    /// Timeout for the whole operation, in seconds
    #[arg(long = "timeout", default_value_t = 30, global = true)]
    timeout: u64,

    /// Enable verbose logging (debug level)
    #[arg(long = "verbose", global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print a cached entry
    Get {
        key: String,
        /// Write to a file instead of stdout
        #[arg(short = 'o', long = "output")]
        output: Option<PathBuf>,
    },
    /// Store an entry
    Put {
        key: String,
        /// Read from a file instead of stdin
        #[arg(short = 'f', long = "file")]
        file: Option<PathBuf>,
    },
    /// Remove an entry (the secret is deleted with its last entry)
    Delete { key: String },
    /// Show the secret data key a cache key is stored under
    Encode { key: String },
    /// Show the stored certificate for a domain and whether it needs renewal
    Status {
        domain: String,
        #[arg(long = "renew-before-days", default_value_t = 30)]
        renew_before_days: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Commands::Encode { key } = &cli.command {
        println!("{}", encode_key(key));
        return Ok(());
    }

    let config = build_config(&cli)?;
    let cache = KubernetesCache::from_config(&config).context("Failed to initialize cache")?;
    let ctx = Context::with_timeout(Duration::from_secs(cli.timeout));

    match cli.command {
        Commands::Get { key, output } => get(&cache, &ctx, &key, output).await,
        Commands::Put { key, file } => put(&cache, &ctx, &key, file).await,
        Commands::Delete { key } => {
            cache
                .delete(&ctx, &key)
                .await
                .with_context(|| format!("Failed to delete '{key}'"))?;
            info!(key = %key, "Deleted cache entry");
            Ok(())
        }
        Commands::Status {
            domain,
            renew_before_days,
        } => status(cache, &ctx, &domain, renew_before_days).await,
        Commands::Encode { .. } => Ok(()),
    }
}

/// Merge the optional config file with command line overrides
fn build_config(cli: &Cli) -> Result<CacheConfig> {
    let mut config = match &cli.config {
        Some(path) => CacheConfig::from_file(path)
            .with_context(|| format!("Failed to load configuration file {}", path.display()))?,
        None => CacheConfig::default(),
    };

    if let Some(namespace) = &cli.namespace {
        config.namespace = Some(namespace.clone());
    }
    if let Some(secret) = &cli.secret {
        config.secret_name = secret.clone();
    }
    if let Some(grace_period) = cli.grace_period {
        config.delete_grace_period_secs = grace_period;
    }

    let in_cluster = cli
        .in_cluster
        .or_else(|| std::env::var_os("IN_CLUSTER").map(|_| env_flag("IN_CLUSTER", true)));

    if cli.kubeconfig.is_some() || cli.kube_context.is_some() {
        if cli.in_cluster == Some(true) {
            bail!("--in-cluster cannot be combined with --kubeconfig or --context");
        }
        config.connection = ConnectionMode::Kubeconfig {
            path: cli.kubeconfig.clone(),
            context: cli.kube_context.clone(),
        };
    } else {
        match in_cluster {
            Some(true) => config.connection = ConnectionMode::InCluster,
            Some(false) => {
                config.connection = ConnectionMode::Kubeconfig {
                    path: None,
                    context: None,
                }
            }
            None => {}
        }
    }

    config.check().context("Configuration validation failed")?;
    debug!(?config, "Resolved configuration");
    Ok(config)
}

async fn get(
    cache: &KubernetesCache,
    ctx: &Context,
    key: &str,
    output: Option<PathBuf>,
) -> Result<()> {
    let data = match cache.get(ctx, key).await {
        Ok(data) => data,
        Err(CacheError::Miss) => bail!("'{key}' is not cached"),
        Err(e) => return Err(e).with_context(|| format!("Failed to read '{key}'")),
    };

    match output {
        Some(path) => std::fs::write(&path, &data)
            .with_context(|| format!("Failed to write {}", path.display()))?,
        None => std::io::stdout()
            .write_all(&data)
            .context("Failed to write to stdout")?,
    }
    Ok(())
}

async fn put(
    cache: &KubernetesCache,
    ctx: &Context,
    key: &str,
    file: Option<PathBuf>,
) -> Result<()> {
    let data = match file {
        Some(path) => {
            std::fs::read(&path).with_context(|| format!("Failed to read {}", path.display()))?
        }
        None => {
            let mut buf = Vec::new();
            std::io::stdin()
                .read_to_end(&mut buf)
                .context("Failed to read stdin")?;
            buf
        }
    };

    cache
        .put(ctx, key, &data)
        .await
        .with_context(|| format!("Failed to store '{key}'"))?;
    info!(key = %key, bytes = data.len(), "Stored cache entry");
    Ok(())
}

async fn status(
    cache: KubernetesCache,
    ctx: &Context,
    domain: &str,
    renew_before_days: u32,
) -> Result<()> {
    let acme = AcmeStore::new(cache);

    let Some(cert) = acme
        .load_certificate(ctx, domain)
        .await
        .with_context(|| format!("Failed to load certificate for {domain}"))?
    else {
        println!("{domain}: no certificate stored");
        return Ok(());
    };

    let needs_renewal = acme
        .needs_renewal(ctx, domain, renew_before_days)
        .await
        .context("Failed to check renewal")?;

    println!("{domain}:");
    println!("  domains: {}", cert.meta.domains.join(", "));
    println!("  issued:  {}", cert.meta.issued);
    println!("  expires: {}", cert.meta.expires);
    if needs_renewal {
        println!("  renewal: due (within {renew_before_days} days)");
    } else {
        println!("  renewal: not due");
    }
    Ok(())
}
