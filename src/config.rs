use serde::Deserialize;
use std::fs;
use std::time::Duration;

use anyhow::Context;

use crate::amount::FeeRate;
use crate::btc::circuit_breaker::CircuitBreakerConfig;
use crate::btc::resilient::ExplorerConfig;
use crate::fee::FeeConfig;

#[derive(Deserialize, Clone, Debug)]
pub struct Config {
    pub db: DBConfig,
    pub btc: BTCConfig,
    pub evm: EVMConfig,
    pub fee: FeeSettings,
    pub oracle: OracleConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

#[derive(Deserialize, Clone, Debug)]
pub struct DBConfig {
    pub dsn: String,
    pub automigrate: bool,
}

#[derive(Deserialize, Clone, Debug)]
pub struct BTCConfig {
    pub network: Option<String>,
    pub treasury_address: String,
    pub rpc_address: String,
    pub rpc_user: String,
    pub rpc_password: String,
    pub explorer: ExplorerSettings,
}

impl BTCConfig {
    pub fn get_network(&self) -> bitcoin::Network {
        let Some(net) = self.network.clone() else {
            return bitcoin::Network::Bitcoin;
        };

        match net.as_str() {
            "mainnet" => bitcoin::Network::Bitcoin,
            "testnet" => bitcoin::Network::Testnet,
            "signet" => bitcoin::Network::Signet,
            "regtest" => bitcoin::Network::Regtest,
            _ => bitcoin::Network::Bitcoin,
        }
    }
}

#[derive(Deserialize, Clone, Debug)]
pub struct ExplorerSettings {
    /// Ordered list of Esplora base urls, the first one is the primary.
    pub endpoints: Vec<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_open_duration_secs")]
    pub open_duration_secs: u64,
    pub genesis_txid: Option<String>,
}

impl ExplorerSettings {
    pub fn explorer_config(&self) -> ExplorerConfig {
        ExplorerConfig {
            endpoints: self.endpoints.clone(),
            timeout: Duration::from_millis(self.timeout_ms),
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: self.failure_threshold,
                open_duration: Duration::from_secs(self.open_duration_secs),
            },
        }
    }
}

#[derive(Deserialize, Clone, Debug)]
pub struct EVMConfig {
    pub rpc_url: String,
    pub icy_token_address: String,
    pub swap_contract_address: String,
    pub operator_address: String,
    pub watched_address: String,
    #[serde(default = "default_max_block_range")]
    pub max_block_range: u64,
    pub icy_genesis_block: u64,
    pub swap_genesis_block: u64,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Deserialize, Clone, Debug)]
pub struct FeeSettings {
    /// Decimal string, e.g. "0.01" for one percent.
    pub service_fee_rate: String,
    pub min_fee_sats: u64,
}

impl FeeSettings {
    pub fn fee_config(&self) -> anyhow::Result<FeeConfig> {
        let rate = FeeRate::parse(&self.service_fee_rate)
            .with_context(|| format!("invalid service_fee_rate {}", self.service_fee_rate))?;
        Ok(FeeConfig {
            rate,
            min_fee_sats: self.min_fee_sats,
        })
    }
}

#[derive(Deserialize, Clone, Debug)]
pub struct OracleConfig {
    pub url: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Deserialize, Clone, Debug)]
pub struct SchedulerConfig {
    pub btc_index_secs: u64,
    pub icy_index_secs: u64,
    pub swap_index_secs: u64,
    pub settlement_secs: u64,
    pub payout_secs: u64,
    pub cycle_deadline_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            btc_index_secs: 60,
            icy_index_secs: 30,
            swap_index_secs: 30,
            settlement_secs: 30,
            payout_secs: 60,
            cycle_deadline_secs: 300,
        }
    }
}

impl SchedulerConfig {
    pub fn cycle_deadline(&self) -> Duration {
        Duration::from_secs(self.cycle_deadline_secs)
    }
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_retry_delay_ms() -> u64 {
    500
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_open_duration_secs() -> u64 {
    60
}

fn default_max_block_range() -> u64 {
    2_000
}

pub fn read_config(path: &str) -> anyhow::Result<Config> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read config file {}", path))?;

    let config: Config =
        toml::from_str(&contents).with_context(|| format!("parse config file {}", path))?;
    Ok(config)
}
