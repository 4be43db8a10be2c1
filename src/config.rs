// ABOUTME: TOML configuration for the replicator - remote org, destination database, sync targets
// ABOUTME: Loaded once at startup and validated before any connection is opened

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::sync::{SyncOptions, SyncTarget, WatermarkBoundary, DEFAULT_FULL_RELOAD_RATIO};
use crate::utils::{
    split_table_name, validate_connection_string, validate_postgres_identifier,
    validate_soql_identifier,
};

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "sfdc-replicator.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub salesforce: SalesforceConfig,
    #[serde(default)]
    pub postgres: PostgresConfig,
    #[serde(default)]
    pub targets: Vec<TargetConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SalesforceConfig {
    pub instance_url: String,
    pub api_version: Option<String>,
    /// Usually left out and passed through `SFDC_ACCESS_TOKEN` instead
    pub access_token: Option<String>,
    /// Seconds between bulk batch status checks
    #[serde(default = "default_bulk_poll_secs")]
    pub bulk_poll_secs: u64,
    /// Give up on a bulk export after this many seconds
    #[serde(default = "default_bulk_timeout_secs")]
    pub bulk_timeout_secs: u64,
}

fn default_bulk_poll_secs() -> u64 {
    5
}

fn default_bulk_timeout_secs() -> u64 {
    3600
}

impl SalesforceConfig {
    pub fn bulk_poll_interval(&self) -> Duration {
        Duration::from_secs(self.bulk_poll_secs)
    }

    pub fn bulk_timeout(&self) -> Duration {
        Duration::from_secs(self.bulk_timeout_secs)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PostgresConfig {
    pub url: Option<String>,
    #[serde(default)]
    pub allow_self_signed_certs: bool,
}

/// One `[[targets]]` entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TargetConfig {
    pub table: String,
    pub object: String,
    #[serde(default)]
    pub boundary: WatermarkBoundary,
    pub full_reload_ratio: Option<f64>,
    /// local column -> remote field
    pub fields: BTreeMap<String, String>,
}

impl TargetConfig {
    pub fn to_sync_target(&self) -> SyncTarget {
        SyncTarget::new(
            self.table.clone(),
            self.object.clone(),
            self.fields
                .iter()
                .map(|(local, remote)| (local.clone(), remote.clone())),
        )
    }

    pub fn sync_options(&self, dry_run: bool) -> SyncOptions {
        SyncOptions {
            boundary: self.boundary,
            full_reload_ratio: self.full_reload_ratio.unwrap_or(DEFAULT_FULL_RELOAD_RATIO),
            dry_run,
        }
    }

    fn validate(&self) -> Result<()> {
        let (schema, table) = split_table_name(&self.table);
        validate_postgres_identifier(schema)
            .and_then(|_| validate_postgres_identifier(table))
            .with_context(|| format!("Invalid table name '{}'", self.table))?;
        validate_soql_identifier(&self.object)
            .with_context(|| format!("Invalid object name for table '{}'", self.table))?;

        if let Some(ratio) = self.full_reload_ratio {
            if !(ratio.is_finite() && ratio > 0.0) {
                bail!(
                    "full_reload_ratio for table '{}' must be a positive number, got {}",
                    self.table,
                    ratio
                );
            }
        }

        if self.fields.is_empty() {
            bail!("Table '{}' has no fields configured", self.table);
        }
        for (local, remote) in &self.fields {
            validate_postgres_identifier(local)
                .with_context(|| format!("Invalid column name in table '{}'", self.table))?;
            validate_soql_identifier(remote)
                .with_context(|| format!("Invalid field name for column '{}'", local))?;
        }

        Ok(())
    }
}

impl Config {
    /// Read and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {:?}", path))?;
        Self::from_toml(&contents).with_context(|| format!("Invalid config file {:?}", path))
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents).context("Failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.salesforce.instance_url).with_context(|| {
            format!(
                "Invalid Salesforce instance URL: {}",
                self.salesforce.instance_url
            )
        })?;
        if self.salesforce.bulk_poll_secs == 0 {
            bail!("bulk_poll_secs must be at least 1");
        }

        if let Some(url) = &self.postgres.url {
            validate_connection_string(url)?;
        }

        if self.targets.is_empty() {
            bail!("No [[targets]] configured");
        }

        let mut seen = std::collections::HashSet::new();
        for target in &self.targets {
            target.validate()?;
            if !seen.insert(target.table.to_lowercase()) {
                bail!("Table '{}' is configured more than once", target.table);
            }
        }

        Ok(())
    }

    /// Targets named in `tables`, in configuration order. Empty selects all.
    pub fn select_targets(&self, tables: &[String]) -> Result<Vec<&TargetConfig>> {
        if tables.is_empty() {
            return Ok(self.targets.iter().collect());
        }

        for name in tables {
            if !self.targets.iter().any(|t| t.table == *name) {
                bail!("Table '{}' is not configured", name);
            }
        }

        Ok(self
            .targets
            .iter()
            .filter(|t| tables.contains(&t.table))
            .collect())
    }
}
