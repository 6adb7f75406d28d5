//! Keeper configuration.
//!
//! Settings are deserialized leniently into [`RawKeeperSettings`] and then
//! validated into [`KeeperSettings`]. Validation collects every problem it
//! finds so a broken deployment can be fixed in one pass.

use std::fmt::{Debug, Display, Formatter};
use std::str::FromStr;
use std::time::Duration;

use ethers::signers::LocalWallet;
use ethers::types::{Address, H256, U256};
use ethers::utils::parse_units;
use eyre::{eyre, Report, WrapErr};
use serde::Deserialize;
use url::Url;

pub use loader::{load_settings, load_settings_from, ENV_PREFIX};
pub use trace::{Level, Style, TracingConfig};

use crate::gas::GasStrategy;
use crate::manager::SubmissionConf;

mod loader;
mod trace;

const DEFAULT_RPC_TIMEOUT_SECS: u64 = 10;
const DEFAULT_LOG_CHUNK_SIZE: u64 = 10_000;
const DEFAULT_INTERVAL_SECS: u64 = 30;
const DEFAULT_BUMP_PERCENT: f64 = 12.5;
const DEFAULT_MAX_PRICE_GWEI: &str = "500";
const DEFAULT_GAS_LIMIT: u64 = 200_000;
const DEFAULT_STUCK_THRESHOLD_BLOCKS: u64 = 10;
const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// All the errors found while validating the settings.
#[must_use]
#[derive(Debug, Default)]
pub struct ConfigParsingError(Vec<(String, Report)>);

impl ConfigParsingError {
    /// Record a problem with the setting at the dotted `path`.
    pub fn push(&mut self, path: &str, report: Report) {
        self.0.push((path.to_owned(), report));
    }

    /// Keeps the value on success, or records the error and returns `None`.
    pub fn take<T>(&mut self, path: &str, res: eyre::Result<T>) -> Option<T> {
        match res {
            Ok(value) => Some(value),
            Err(report) => {
                self.push(path, report);
                None
            }
        }
    }

    /// Whether no problem was recorded.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Dotted paths of the settings that failed, in the order recorded.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(path, _)| path.as_str())
    }
}

/// Environment variable that sets the dotted config `path`.
pub fn env_name(path: &str) -> String {
    std::iter::once(ENV_PREFIX)
        .chain(path.split('.'))
        .map(str::to_uppercase)
        .collect::<Vec<_>>()
        .join("__")
}

impl Display for ConfigParsingError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "ParsingError")?;
        for (path, report) in &self.0 {
            writeln!(f, "\n#####\n")?;
            writeln!(f, "config_path: `{path}`")?;
            writeln!(f, "env_path: `{}`", env_name(path))?;
            writeln!(f, "error: {report:?}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ConfigParsingError {}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawSignerConf {
    pub key: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawGasConf {
    pub margin_gwei: Option<String>,
    pub bump_percent: Option<f64>,
    pub max_price_gwei: Option<String>,
    pub gas_limit: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawSubmissionConf {
    pub stuck_threshold_blocks: Option<u64>,
    pub max_attempts: Option<u32>,
}

/// Settings as they come out of the config sources. Everything is optional
/// here; [`KeeperSettings::try_from`] decides what is required.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawKeeperSettings {
    pub rpc_url: Option<String>,
    pub rpc_timeout_secs: Option<u64>,
    pub chain_id: Option<u64>,
    pub chief_address: Option<String>,
    pub chief_deployment_block: Option<u64>,
    pub log_chunk_size: Option<u64>,
    pub account: Option<String>,
    pub signer: RawSignerConf,
    pub interval_secs: Option<u64>,
    pub gas: RawGasConf,
    pub submission: RawSubmissionConf,
    pub tracing: TracingConfig,
}

/// Key used to sign lift transactions.
#[derive(Clone)]
pub enum SignerConf {
    /// A raw secp256k1 private key
    HexKey { key: H256 },
}

impl Debug for SignerConf {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            SignerConf::HexKey { .. } => f
                .debug_struct("HexKey")
                .field("key", &"<redacted>")
                .finish(),
        }
    }
}

impl SignerConf {
    pub fn wallet(&self) -> eyre::Result<LocalWallet> {
        match self {
            SignerConf::HexKey { key } => {
                LocalWallet::from_bytes(key.as_bytes()).wrap_err("Invalid signer key")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GasConf {
    /// Added to the suggested price, in wei
    pub margin: U256,
    pub bump_percent: f64,
    /// Price cap, in wei
    pub max_price: U256,
    pub gas_limit: U256,
}

impl GasConf {
    pub fn strategy(&self) -> GasStrategy {
        GasStrategy::from_percent(self.margin, self.bump_percent, self.max_price)
    }
}

/// Validated keeper settings.
#[derive(Debug, Clone)]
pub struct KeeperSettings {
    pub rpc_url: Url,
    pub rpc_timeout: Duration,
    /// Chain id the endpoint must report, if set
    pub chain_id: Option<u64>,
    pub chief_address: Address,
    pub chief_deployment_block: u64,
    pub log_chunk_size: u64,
    /// Account the keeper transacts from
    pub account: Address,
    pub signer: SignerConf,
    pub interval: Duration,
    pub gas: GasConf,
    pub submission: SubmissionConf,
    pub tracing: TracingConfig,
}

fn required<T>(path: &str, value: Option<T>) -> eyre::Result<T> {
    value.ok_or_else(|| eyre!("Missing required setting `{path}`"))
}

fn nonzero<T: Default + PartialEq>(path: &str, value: T) -> eyre::Result<T> {
    if value == T::default() {
        Err(eyre!("`{path}` must be greater than zero"))
    } else {
        Ok(value)
    }
}

fn parse_address(path: &str, value: Option<String>) -> eyre::Result<Address> {
    let value = required(path, value)?;
    Address::from_str(value.trim()).wrap_err_with(|| format!("Invalid address `{value}`"))
}

fn parse_gwei(value: &str) -> eyre::Result<U256> {
    let wei = parse_units(value.trim(), "gwei")
        .wrap_err_with(|| format!("Invalid gwei amount `{value}`"))?;
    Ok(wei.into())
}

fn parse_rpc_url(value: Option<String>) -> eyre::Result<Url> {
    let value = required("rpc_url", value)?;
    let url = Url::parse(value.trim()).wrap_err("Invalid rpc url")?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(eyre!("Unsupported rpc url scheme `{scheme}`, expected http or https")),
    }
}

fn parse_key(value: Option<String>) -> eyre::Result<SignerConf> {
    let value = required("signer.key", value)?;
    let key = H256::from_str(value.trim()).map_err(|_| eyre!("Signer key is not 32 hex bytes"))?;
    let signer = SignerConf::HexKey { key };
    signer.wallet()?;
    Ok(signer)
}

impl TryFrom<RawKeeperSettings> for KeeperSettings {
    type Error = ConfigParsingError;

    fn try_from(raw: RawKeeperSettings) -> Result<Self, Self::Error> {
        let mut err = ConfigParsingError::default();

        let rpc_url = err.take("rpc_url", parse_rpc_url(raw.rpc_url));
        let rpc_timeout_secs = err.take(
            "rpc_timeout_secs",
            nonzero(
                "rpc_timeout_secs",
                raw.rpc_timeout_secs.unwrap_or(DEFAULT_RPC_TIMEOUT_SECS),
            ),
        );
        let chief_address = err.take("chief_address", parse_address("chief_address", raw.chief_address));
        let log_chunk_size = err.take(
            "log_chunk_size",
            nonzero(
                "log_chunk_size",
                raw.log_chunk_size.unwrap_or(DEFAULT_LOG_CHUNK_SIZE),
            ),
        );
        let account = err.take("account", parse_address("account", raw.account));
        let signer = err.take("signer.key", parse_key(raw.signer.key));
        let interval_secs = err.take(
            "interval_secs",
            nonzero(
                "interval_secs",
                raw.interval_secs.unwrap_or(DEFAULT_INTERVAL_SECS),
            ),
        );

        let margin = err.take(
            "gas.margin_gwei",
            raw.gas
                .margin_gwei
                .as_deref()
                .map(parse_gwei)
                .unwrap_or(Ok(U256::zero())),
        );
        let bump_percent = raw.gas.bump_percent.unwrap_or(DEFAULT_BUMP_PERCENT);
        let bump_percent = err.take(
            "gas.bump_percent",
            if bump_percent.is_finite() && bump_percent > 0.0 {
                Ok(bump_percent)
            } else {
                Err(eyre!("`gas.bump_percent` must be a positive number"))
            },
        );
        let max_price = err.take(
            "gas.max_price_gwei",
            parse_gwei(raw.gas.max_price_gwei.as_deref().unwrap_or(DEFAULT_MAX_PRICE_GWEI))
                .and_then(|cap| nonzero("gas.max_price_gwei", cap)),
        );
        if let (Some(margin), Some(cap)) = (margin, max_price) {
            if margin > cap {
                err.push(
                    "gas.max_price_gwei",
                    eyre!("Gas price cap is below the gas price margin"),
                );
            }
        }
        let gas_limit = err.take(
            "gas.gas_limit",
            nonzero(
                "gas.gas_limit",
                raw.gas.gas_limit.unwrap_or(DEFAULT_GAS_LIMIT),
            ),
        );

        let stuck_threshold_blocks = err.take(
            "submission.stuck_threshold_blocks",
            nonzero(
                "submission.stuck_threshold_blocks",
                raw.submission
                    .stuck_threshold_blocks
                    .unwrap_or(DEFAULT_STUCK_THRESHOLD_BLOCKS),
            ),
        );
        let max_attempts = err.take(
            "submission.max_attempts",
            nonzero(
                "submission.max_attempts",
                raw.submission.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS),
            ),
        );

        match (
            rpc_url,
            rpc_timeout_secs,
            chief_address,
            log_chunk_size,
            account,
            signer,
            interval_secs,
            margin,
            bump_percent,
            max_price,
            gas_limit,
            stuck_threshold_blocks,
            max_attempts,
        ) {
            (
                Some(rpc_url),
                Some(rpc_timeout_secs),
                Some(chief_address),
                Some(log_chunk_size),
                Some(account),
                Some(signer),
                Some(interval_secs),
                Some(margin),
                Some(bump_percent),
                Some(max_price),
                Some(gas_limit),
                Some(stuck_threshold_blocks),
                Some(max_attempts),
            ) if err.is_empty() => Ok(KeeperSettings {
                rpc_url,
                rpc_timeout: Duration::from_secs(rpc_timeout_secs),
                chain_id: raw.chain_id,
                chief_address,
                chief_deployment_block: raw.chief_deployment_block.unwrap_or_default(),
                log_chunk_size,
                account,
                signer,
                interval: Duration::from_secs(interval_secs),
                gas: GasConf {
                    margin,
                    bump_percent,
                    max_price,
                    gas_limit: U256::from(gas_limit),
                },
                submission: SubmissionConf {
                    stuck_threshold_blocks,
                    max_attempts,
                },
                tracing: raw.tracing,
            }),
            _ => Err(err),
        }
    }
}
