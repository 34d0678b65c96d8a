//! Configuration parsing and validation for the switchbind binary
//!
//! This module handles command-line argument parsing and validation using clap.
use anyhow::anyhow;
use clap::Parser;
use std::path::PathBuf;
use url::Url;

#[derive(Debug, Clone, Parser)]
#[command(version, about, long_about = None)]
pub struct Config {
    /// JSON file holding the current parameters, e.g. `{"id": "42"}`.
    #[arg(short = 'f', long)]
    pub params: PathBuf,

    /// Base URL of the API serving the entities.
    #[arg(short = 'u', long, env = "SWITCHBIND_BASE_URL")]
    pub base_url: Url,

    /// Collection under `/api/` to fetch from.
    #[arg(long, default_value = "users")]
    pub collection: String,

    /// Parameter key holding the identifier.
    #[arg(short = 'k', long, default_value = "id")]
    pub key: String,

    /// Keep watching the params file for changes until the first fetch settles.
    #[arg(short = 'w', long, default_value_t = true, action = clap::ArgAction::Set)]
    pub watch: bool,

    /// Enable debug logging for switchbind.
    #[arg(short = 'v', long)]
    pub verbose: bool,
}

impl Config {
    pub fn validate(self) -> Result<Self, anyhow::Error> {
        if !self.params.exists() {
            return Err(anyhow!(
                "Params file '{}' does not exist",
                self.params.display()
            ));
        }
        if !matches!(self.base_url.scheme(), "http" | "https") {
            return Err(anyhow!(
                "Base URL '{}' must be http or https",
                self.base_url
            ));
        }
        if self.key.is_empty() {
            return Err(anyhow!("Parameter key must not be empty"));
        }
        Ok(self)
    }
}
