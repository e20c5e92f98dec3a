use anyhow::{Context, Result};
use clap::Parser;

use ferry::cli::ClientOpts;
use ferry::client::{run_shell, Client};

fn main() -> Result<()> {
    let opts = ClientOpts::parse();
    let workdir = std::env::current_dir().context("Failed to read current directory")?;

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    rt.block_on(async {
        let client = Client::connect(&opts.address, opts.port).await?;
        println!("Connected to {}:{}", opts.address, opts.port);
        println!("Commands: List, Files, Get <filename>, Put <filename>, Quit");
        let stdin = tokio::io::BufReader::new(tokio::io::stdin());
        run_shell(client, stdin, &workdir).await
    })
}
