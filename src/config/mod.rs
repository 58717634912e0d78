//! Configuration Management Module
//!
//! This module handles loading and managing configuration for the escrow client.
//! Configuration includes polling behaviour, the ledger node connection, the
//! fiat price feed and the optional property-token contract.

use serde::{Deserialize, Serialize};

use crate::ledger::Address;

// ============================================================================
// CONFIGURATION STRUCTURES
// ============================================================================

/// Main configuration structure containing all escrow client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Session behaviour (polling, auto-refresh)
    #[serde(default)]
    pub service: ServiceConfig,
    /// Ledger node connection
    pub ledger: LedgerConfig,
    /// Fiat/native price feed
    pub price_feed: PriceFeedConfig,
    /// Property token contract (only needed for ownership lookups)
    #[serde(default)]
    pub token: Option<TokenConfig>,
}

/// Session-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Interval between poll ticks in milliseconds
    #[serde(default = "default_polling_interval_ms")]
    pub polling_interval_ms: u64,
    /// Start polling automatically after an escrow is loaded
    #[serde(default = "default_auto_refresh")]
    pub auto_refresh: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            polling_interval_ms: default_polling_interval_ms(),
            auto_refresh: default_auto_refresh(),
        }
    }
}

/// Configuration for the EVM ledger node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Human-readable name for the chain
    pub name: String,
    /// RPC endpoint URL
    pub rpc_url: String,
    /// Chain ID the node must report (e.g., 31337 for a local Hardhat node)
    pub chain_id: u64,
    /// Account to act as; the node's first account when unset
    #[serde(default)]
    pub account: Option<String>,
    /// Per-request HTTP timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Delay between transaction receipt polls in milliseconds
    #[serde(default = "default_receipt_poll_interval_ms")]
    pub receipt_poll_interval_ms: u64,
    /// Give up waiting for a receipt after this many polls (wait forever when unset)
    #[serde(default)]
    pub max_receipt_polls: Option<u32>,
}

/// Which public price API to query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceFeedKind {
    /// `GET /v2/prices/ETH-<FIAT>/spot`
    Coinbase,
    /// `GET /api/v3/simple/price?ids=ethereum&vs_currencies=<fiat>`
    Coingecko,
}

/// Price feed configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceFeedConfig {
    pub kind: PriceFeedKind,
    /// API base URL (e.g., "https://api.coinbase.com")
    pub base_url: String,
    /// Fiat currency code
    #[serde(default = "default_fiat")]
    pub fiat: String,
    /// Native-unit decimal places kept after conversion
    #[serde(default = "default_decimals")]
    pub decimals: u32,
}

/// Property token contract configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenConfig {
    /// Address of the PropertyToken contract
    pub property_token_addr: String,
}

fn default_polling_interval_ms() -> u64 {
    5000
}

fn default_auto_refresh() -> bool {
    true
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_receipt_poll_interval_ms() -> u64 {
    1000
}

fn default_fiat() -> String {
    "USD".to_string()
}

fn default_decimals() -> u32 {
    6
}

impl ClientConfig {
    /// Loads configuration from a TOML file.
    ///
    /// This function:
    /// 1. Uses the provided path, else ESCROW_CLIENT_CONFIG_PATH, else config/escrow-client.toml
    /// 2. If it exists, loads and parses the configuration
    /// 3. Validates the configuration
    /// 4. If it doesn't exist, returns an error asking user to copy template
    ///
    /// # Arguments
    ///
    /// * `path` - Optional path to config file
    ///
    /// # Returns
    ///
    /// * `Ok(ClientConfig)` - Successfully loaded and validated configuration
    /// * `Err(anyhow::Error)` - File missing, unparseable, or invalid
    pub fn load_from_path(path: Option<&str>) -> anyhow::Result<Self> {
        let config_path = path
            .map(|p| p.to_string())
            .or_else(|| std::env::var("ESCROW_CLIENT_CONFIG_PATH").ok())
            .unwrap_or_else(|| "config/escrow-client.toml".to_string());

        if std::path::Path::new(&config_path).exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: ClientConfig = toml::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            Err(anyhow::anyhow!(
                "Configuration file '{}' not found. Please copy the template:\n\
                cp config/escrow-client.template.toml config/escrow-client.toml\n\
                Then edit config/escrow-client.toml with your actual values.",
                config_path
            ))
        }
    }

    /// Loads configuration from the default location.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from_path(None)
    }

    /// Validates the configuration for consistency and correctness.
    ///
    /// Checks:
    /// - Polling and receipt intervals and the request timeout are non-zero
    /// - RPC and price feed URLs are http(s)
    /// - Optional account and token addresses parse
    /// - Conversion decimals fit the native unit
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.service.polling_interval_ms == 0 {
            anyhow::bail!("Configuration error: service.polling_interval_ms must be greater than 0");
        }
        if self.ledger.receipt_poll_interval_ms == 0 {
            anyhow::bail!("Configuration error: ledger.receipt_poll_interval_ms must be greater than 0");
        }
        if self.ledger.request_timeout_secs == 0 {
            anyhow::bail!("Configuration error: ledger.request_timeout_secs must be greater than 0");
        }

        validate_http_url("ledger.rpc_url", &self.ledger.rpc_url)?;
        validate_http_url("price_feed.base_url", &self.price_feed.base_url)?;

        if let Some(account) = &self.ledger.account {
            Address::parse(account)
                .map_err(|e| anyhow::anyhow!("Configuration error: ledger.account: {}", e))?;
        }

        if let Some(token) = &self.token {
            Address::parse(&token.property_token_addr)
                .map_err(|e| anyhow::anyhow!("Configuration error: token.property_token_addr: {}", e))?;
        }

        if self.price_feed.decimals > crate::units::NATIVE_DECIMALS {
            anyhow::bail!(
                "Configuration error: price_feed.decimals {} exceeds native precision {}",
                self.price_feed.decimals,
                crate::units::NATIVE_DECIMALS
            );
        }

        if self.price_feed.fiat.trim().is_empty() {
            anyhow::bail!("Configuration error: price_feed.fiat must not be empty");
        }

        Ok(())
    }
}

fn validate_http_url(field: &str, raw: &str) -> anyhow::Result<()> {
    let parsed = url::Url::parse(raw)
        .map_err(|e| anyhow::anyhow!("Configuration error: {} '{}' is not a valid URL: {}", field, raw, e))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => anyhow::bail!("Configuration error: {} must use http or https, got '{}'", field, other),
    }
}
