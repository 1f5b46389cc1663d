use anyhow::{Context, Result};
use clap::Parser;
use memtftp::config::{
    DeadlinePolicy, LogFormat, LoggingConfig, TftpConfig, load_config, validate_config,
    write_config,
};
use memtftp::{MemoryStore, TftpServer};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "memtftp-server", about = "TFTP server backed by an in-memory store")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "memtftp.toml")]
    config: PathBuf,

    /// Write a default TOML configuration file and exit
    #[arg(long)]
    init_config: bool,

    /// Validate the configuration and exit (no socket bind)
    #[arg(long)]
    check_config: bool,

    /// Address to listen on
    #[arg(long)]
    address: Option<IpAddr>,

    /// Port to listen on
    #[arg(long)]
    port: Option<u16>,

    /// Number of transfer workers
    #[arg(long)]
    threads: Option<usize>,

    /// Transfer timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Whether the timeout bounds the whole transfer or each receive
    #[arg(long, value_enum)]
    deadline: Option<DeadlinePolicy>,

    /// Directory whose files are loaded into the store at startup
    #[arg(long)]
    preload_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = if cli.config.exists() {
        load_config(&cli.config)?
    } else {
        TftpConfig::default()
    };

    let ip = cli.address.unwrap_or(config.bind_addr.ip());
    let port = cli.port.unwrap_or(config.bind_addr.port());
    config.bind_addr = SocketAddr::new(ip, port);
    if let Some(threads) = cli.threads {
        config.workers = threads;
    }
    if let Some(timeout) = cli.timeout {
        config.timeout_secs = timeout;
    }
    if let Some(deadline) = cli.deadline {
        config.deadline = deadline;
    }
    if let Some(preload_dir) = cli.preload_dir {
        config.store.preload_dir = Some(preload_dir);
    }

    if cli.init_config {
        write_config(&cli.config, &config)?;
        println!("Wrote config to {}", cli.config.display());
        return Ok(());
    }

    validate_config(&config)?;

    if cli.check_config {
        println!("Config OK: {}", cli.config.display());
        return Ok(());
    }

    let _log_guard = init_logging(&config.logging)?;

    let store = MemoryStore::new();
    if let Some(ref dir) = config.store.preload_dir {
        let loaded = store
            .preload_dir(dir)
            .await
            .with_context(|| format!("Failed to preload {}", dir.display()))?;
        info!("Preloaded {} files from {}", loaded, dir.display());
    }

    let bind_addr = config.bind_addr;
    let server = TftpServer::bind(config, store)
        .await
        .with_context(|| format!("Failed to bind {}", bind_addr))?;

    let shutdown = server.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl-C, shutting down");
            shutdown.cancel();
        }
    });

    server.run().await?;
    Ok(())
}

fn init_logging(logging: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_new(&logging.level)
        .with_context(|| format!("Invalid logging.level '{}'", logging.level))?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let Some(ref log_file) = logging.file else {
        match logging.format {
            LogFormat::Text => builder.init(),
            LogFormat::Json => builder.json().init(),
        }
        return Ok(None);
    };

    let dir = log_file.parent().unwrap_or(Path::new("."));
    let file_name = log_file
        .file_name()
        .context("logging.file must include a file name")?;
    let file_appender = tracing_appender::rolling::never(dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let builder = builder.with_writer(non_blocking).with_ansi(false);
    match logging.format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }

    Ok(Some(guard))
}
