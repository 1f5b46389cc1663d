use anyhow::{Context, Result, bail};
use clap::Parser;
use memtftp::TftpClient;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

/// memtftp client
#[derive(Parser, Debug)]
#[command(name = "memtftp-client")]
#[command(about = "Octet-mode TFTP client", long_about = None)]
struct Cli {
    /// TFTP server address (e.g., 127.0.0.1:7125)
    #[arg(short, long)]
    server: SocketAddr,

    /// Get file from server
    #[arg(short, long, conflicts_with = "put")]
    get: Option<String>,

    /// Put file to server
    #[arg(short, long, conflicts_with = "get")]
    put: Option<PathBuf>,

    /// Local file path for get, remote name for put
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Timeout in seconds
    #[arg(short, long, default_value_t = 5)]
    timeout: u64,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .with_target(false)
        .init();

    let client = TftpClient::new(cli.server, Duration::from_secs(cli.timeout));

    if let Some(remote_file) = cli.get {
        let local_file = cli.file.unwrap_or_else(|| PathBuf::from(&remote_file));
        info!("Downloading {} from {} to {:?}", remote_file, cli.server, local_file);
        let data = client.get(&remote_file).await?;
        tokio::fs::write(&local_file, &data)
            .await
            .with_context(|| format!("Failed to write {}", local_file.display()))?;
        info!("Download complete: {} bytes", data.len());
    } else if let Some(local_file) = cli.put {
        let remote_file = match cli.file {
            Some(path) => path.to_string_lossy().into_owned(),
            None => local_file
                .file_name()
                .context("--put needs a file name")?
                .to_string_lossy()
                .into_owned(),
        };
        let data = tokio::fs::read(&local_file)
            .await
            .with_context(|| format!("Failed to read {}", local_file.display()))?;
        info!("Uploading {:?} to {} as {}", local_file, cli.server, remote_file);
        client.put(&remote_file, &data).await?;
        info!("Upload complete: {} bytes", data.len());
    } else {
        bail!("Must specify either --get or --put");
    }

    Ok(())
}
