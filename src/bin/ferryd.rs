use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;

use ferry::cli::DaemonOpts;
use ferry::config::ServerConfig;
use ferry::logger::{Logger, StderrLogger, TeeLogger, TextLogger};
use ferry::server::Server;

fn main() -> Result<()> {
    let opts = DaemonOpts::parse();
    let config = ServerConfig::from_opts(&opts)?;

    let console: Arc<dyn Logger> = Arc::new(StderrLogger::new(config.verbose));
    let logger: Arc<dyn Logger> = match &config.log_file {
        Some(path) => {
            let file = TextLogger::open(path)
                .with_context(|| format!("Failed to open log file: {}", path.display()))?;
            Arc::new(TeeLogger::new(vec![console, Arc::new(file)]))
        }
        None => console,
    };

    // One thread: every socket is serviced from the same readiness loop
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    rt.block_on(async {
        let server = Server::bind(&config, logger).await?;
        let addr = server.local_addr()?;
        println!("Starting Ferry daemon:");
        println!("  Root: {}", server.root().display());
        println!("  Port: {}", addr.port());
        println!("  Max clients: {}", config.max_clients);
        server
            .run_until(async {
                let _ = tokio::signal::ctrl_c().await;
            })
            .await
    })
}
