//! Server configuration: defaults, optional TOML file, CLI overrides

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cli::DaemonOpts;
use crate::protocol::{timeouts, DEFAULT_MAX_CLIENTS, MAX_CHUNK};

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_host: String,
    pub port: u16,
    pub root: PathBuf,
    pub max_clients: usize,
    pub max_chunk: usize,
    pub upload_idle: Duration,
    pub log_file: Option<PathBuf>,
    pub verbose: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            port: 0,
            root: PathBuf::from("."),
            max_clients: DEFAULT_MAX_CLIENTS,
            max_chunk: MAX_CHUNK,
            upload_idle: Duration::from_millis(timeouts::UPLOAD_IDLE_MS),
            log_file: None,
            verbose: false,
        }
    }
}

/// On-disk form; every key is optional
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub bind: Option<String>,
    pub port: Option<u16>,
    pub root: Option<PathBuf>,
    pub max_clients: Option<usize>,
    pub chunk_size: Option<usize>,
    pub upload_idle_ms: Option<u64>,
    pub log: Option<PathBuf>,
}

impl ConfigFile {
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&data).with_context(|| format!("Invalid config file: {}", path.display()))
    }

    pub fn parse(data: &str) -> Result<Self> {
        Ok(toml::from_str(data)?)
    }
}

impl ServerConfig {
    /// Layer: defaults < config file < command line.
    pub fn from_opts(opts: &DaemonOpts) -> Result<Self> {
        let file = match &opts.config {
            Some(path) => ConfigFile::load(path)?,
            None => ConfigFile::default(),
        };
        let mut cfg = Self::default();
        cfg.apply_file(file);
        cfg.apply_opts(opts);
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn apply_file(&mut self, file: ConfigFile) {
        if let Some(v) = file.bind {
            self.bind_host = v;
        }
        if let Some(v) = file.port {
            self.port = v;
        }
        if let Some(v) = file.root {
            self.root = v;
        }
        if let Some(v) = file.max_clients {
            self.max_clients = v;
        }
        if let Some(v) = file.chunk_size {
            self.max_chunk = v;
        }
        if let Some(v) = file.upload_idle_ms {
            self.upload_idle = Duration::from_millis(v);
        }
        if file.log.is_some() {
            self.log_file = file.log;
        }
    }

    pub fn apply_opts(&mut self, opts: &DaemonOpts) {
        if let Some(v) = &opts.bind {
            self.bind_host = v.clone();
        }
        if let Some(v) = opts.port {
            self.port = v;
        }
        if let Some(v) = &opts.root {
            self.root = v.clone();
        }
        if let Some(v) = opts.max_clients {
            self.max_clients = v;
        }
        if let Some(v) = opts.chunk_size {
            self.max_chunk = v;
        }
        if let Some(v) = opts.upload_idle_ms {
            self.upload_idle = Duration::from_millis(v);
        }
        if opts.log.is_some() {
            self.log_file = opts.log.clone();
        }
        self.verbose |= opts.verbose;
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_clients == 0 {
            bail!("max_clients must be at least 1");
        }
        if self.max_chunk == 0 {
            bail!("chunk size must be at least 1 byte");
        }
        if self.upload_idle.is_zero() {
            bail!("upload idle timeout must be greater than zero");
        }
        if !self.root.exists() {
            bail!("Root directory does not exist: {}", self.root.display());
        }
        if !self.root.is_dir() {
            bail!("Root path is not a directory: {}", self.root.display());
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind_host, self.port)
    }
}
