use config::{Config, ConfigError, Environment, File};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use url::Url;

use crate::ensemble::{EnsembleConfig, ModelsConfig};
use crate::risk::RiskConfig;
use crate::selector::{RegimeConfig, SelectorConfig};
use crate::transport::TransportKind;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub connector: ConnectorConfig,
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub ensemble: EnsembleConfig,
    #[serde(default)]
    pub selector: SelectorConfig,
    #[serde(default)]
    pub regime: RegimeConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub sizing: SizingConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Connection and dispatch options shared by every account
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectorConfig {
    #[serde(default = "default_http_timeout")]
    pub http_timeout_ms: u64,
    #[serde(default = "default_ws_timeout")]
    pub ws_timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_ms: u64,
    /// Parked commands per account while disconnected
    #[serde(default = "default_command_queue_size")]
    pub command_queue_size: usize,
    /// Inbound events buffered ahead of the correlator
    #[serde(default = "default_callback_queue_size")]
    pub callback_queue_size: usize,
    #[serde(default = "default_true")]
    pub enable_logging: bool,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_true")]
    pub enable_metrics: bool,
    #[serde(default = "default_metrics_interval")]
    pub metrics_interval_ms: u64,
    /// Default per-command deadline
    #[serde(default = "default_command_timeout")]
    pub command_timeout_ms: u64,
    /// Filled tickets with no close report are forgotten after this long
    #[serde(default = "default_attribution_ttl")]
    pub attribution_ttl_secs: u64,
}

fn default_http_timeout() -> u64 {
    10_000
}
fn default_ws_timeout() -> u64 {
    10_000
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_delay() -> u64 {
    1_000
}
fn default_heartbeat_interval() -> u64 {
    30_000
}
fn default_command_queue_size() -> usize {
    256
}
fn default_callback_queue_size() -> usize {
    1_024
}
fn default_true() -> bool {
    true
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_metrics_interval() -> u64 {
    60_000
}
fn default_command_timeout() -> u64 {
    5_000
}
fn default_attribution_ttl() -> u64 {
    7 * 24 * 3_600
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            http_timeout_ms: default_http_timeout(),
            ws_timeout_ms: default_ws_timeout(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay(),
            heartbeat_interval_ms: default_heartbeat_interval(),
            command_queue_size: default_command_queue_size(),
            callback_queue_size: default_callback_queue_size(),
            enable_logging: true,
            log_level: default_log_level(),
            enable_metrics: true,
            metrics_interval_ms: default_metrics_interval(),
            command_timeout_ms: default_command_timeout(),
            attribution_ttl_secs: default_attribution_ttl(),
        }
    }
}

/// One trading account and the agent that executes for it
#[derive(Debug, Clone, Deserialize)]
pub struct AccountConfig {
    pub account_id: String,
    #[serde(default)]
    pub transport: TransportKind,
    /// `http(s)://` base URL or `ws(s)://` URL depending on `transport`
    pub endpoint: String,
    /// API key presented to the agent
    #[serde(default)]
    pub credential: Option<String>,
    #[serde(default)]
    pub magic_number: u32,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl AccountConfig {
    fn validate(&self, errors: &mut Vec<String>) {
        if self.account_id.trim().is_empty() {
            errors.push("accounts[].account_id must not be empty".to_string());
            return;
        }
        let id = &self.account_id;

        match Url::parse(&self.endpoint) {
            Ok(url) => {
                let ok = match self.transport {
                    TransportKind::Http => matches!(url.scheme(), "http" | "https"),
                    TransportKind::WebSocket => matches!(url.scheme(), "ws" | "wss"),
                };
                if !ok {
                    errors.push(format!(
                        "account {id}: scheme '{}' does not match transport {}",
                        url.scheme(),
                        self.transport
                    ));
                }
            }
            Err(e) => errors.push(format!("account {id}: invalid endpoint '{}': {e}", self.endpoint)),
        }

        if let Some(cred) = &self.credential {
            if cred.trim().is_empty() || cred.chars().any(|c| c.is_control()) {
                errors.push(format!("account {id}: credential is empty or malformed"));
            }
        }
    }
}

/// Lot sizing from action intensity
#[derive(Debug, Clone, Deserialize)]
pub struct SizingConfig {
    #[serde(default = "default_base_lot")]
    pub base_lot: Decimal,
    #[serde(default = "default_lot_step")]
    pub lot_step: Decimal,
    #[serde(default = "default_min_lot")]
    pub min_lot: Decimal,
}

fn default_base_lot() -> Decimal {
    Decimal::new(10, 2)
}
fn default_lot_step() -> Decimal {
    Decimal::new(1, 2)
}
fn default_min_lot() -> Decimal {
    Decimal::new(1, 2)
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            base_lot: default_base_lot(),
            lot_step: default_lot_step(),
            min_lot: default_min_lot(),
        }
    }
}

impl SizingConfig {
    /// base_lot × intensity, rounded down to `lot_step`, floored at `min_lot`
    pub fn lot_for(&self, intensity: f64) -> Decimal {
        let intensity = Decimal::from_f64(intensity.clamp(0.0, 1.0)).unwrap_or(Decimal::ZERO);
        let raw = self.base_lot * intensity;
        let stepped = if self.lot_step > Decimal::ZERO {
            (raw / self.lot_step).round_dp_with_strategy(0, RoundingStrategy::ToZero) * self.lot_step
        } else {
            raw
        };
        stepped.max(self.min_lot).normalize()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_bind")]
    pub bind: String,
    /// HMAC-SHA256 secret; signatures are required when set
    #[serde(default)]
    pub secret: Option<String>,
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind: default_bind(),
            secret: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LoggingConfig {
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
    /// Directory for daily-rolling log files; console only when unset
    #[serde(default)]
    pub dir: Option<String>,
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .set_default("connector.log_level", "info")?
            .set_default("logging.json", false)?
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("TRADEGATE_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // TRADEGATE__CONNECTOR__MAX_RETRIES, etc.
            .add_source(
                Environment::with_prefix("TRADEGATE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        let c = &self.connector;

        for (name, v) in [
            ("http_timeout_ms", c.http_timeout_ms),
            ("ws_timeout_ms", c.ws_timeout_ms),
            ("retry_delay_ms", c.retry_delay_ms),
            ("heartbeat_interval_ms", c.heartbeat_interval_ms),
            ("metrics_interval_ms", c.metrics_interval_ms),
            ("command_timeout_ms", c.command_timeout_ms),
            ("attribution_ttl_secs", c.attribution_ttl_secs),
        ] {
            if v == 0 {
                errors.push(format!("connector.{name} must be positive"));
            }
        }
        if c.command_queue_size == 0 || c.callback_queue_size == 0 {
            errors.push("connector queue sizes must be positive".to_string());
        }
        if c.max_retries > 16 {
            errors.push("connector.max_retries must be <= 16".to_string());
        }

        let mut seen = HashSet::new();
        for account in &self.accounts {
            account.validate(&mut errors);
            if !seen.insert(account.account_id.as_str()) {
                errors.push(format!("duplicate account_id {}", account.account_id));
            }
        }

        if self.sizing.base_lot <= Decimal::ZERO || self.sizing.min_lot <= Decimal::ZERO {
            errors.push("sizing.base_lot and sizing.min_lot must be positive".to_string());
        }
        if self.sizing.lot_step < Decimal::ZERO {
            errors.push("sizing.lot_step must not be negative".to_string());
        }
        if self.webhook.enabled && self.webhook.bind.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!("webhook.bind '{}' is not a socket address", self.webhook.bind));
        }

        errors.extend(self.models.validate());
        errors.extend(self.ensemble.validate());
        errors.extend(self.selector.validate());
        errors.extend(self.risk.validate());

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    pub fn account(&self, account_id: &str) -> Option<&AccountConfig> {
        self.accounts.iter().find(|a| a.account_id == account_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn base() -> AppConfig {
        AppConfig {
            connector: ConnectorConfig::default(),
            accounts: vec![AccountConfig {
                account_id: "acc-1".into(),
                transport: TransportKind::Http,
                endpoint: "http://127.0.0.1:9000".into(),
                credential: Some("key".into()),
                magic_number: 7,
                enabled: true,
            }],
            models: ModelsConfig {
                baseline_path: Some("models/baseline.json".into()),
                ..Default::default()
            },
            ensemble: EnsembleConfig::default(),
            selector: SelectorConfig::default(),
            regime: RegimeConfig::default(),
            risk: RiskConfig::default(),
            sizing: SizingConfig::default(),
            webhook: WebhookConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    #[test]
    fn connector_defaults() {
        let c = ConnectorConfig::default();
        assert_eq!(c.http_timeout_ms, 10_000);
        assert_eq!(c.ws_timeout_ms, 10_000);
        assert_eq!(c.max_retries, 3);
        assert_eq!(c.retry_delay_ms, 1_000);
        assert_eq!(c.heartbeat_interval_ms, 30_000);
        assert_eq!(c.command_queue_size, 256);
        assert_eq!(c.callback_queue_size, 1_024);
        assert!(c.enable_logging && c.enable_metrics);
        assert_eq!(c.log_level, "info");
        assert_eq!(c.metrics_interval_ms, 60_000);
    }

    #[test]
    fn valid_config_passes() {
        assert!(base().validate().is_ok());
    }

    #[test]
    fn endpoint_scheme_must_match_transport() {
        let mut cfg = base();
        cfg.accounts[0].transport = TransportKind::WebSocket;
        let errors = cfg.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("scheme")));

        cfg.accounts[0].endpoint = "not a url".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn duplicate_accounts_rejected() {
        let mut cfg = base();
        cfg.accounts.push(cfg.accounts[0].clone());
        let errors = cfg.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("duplicate")));
    }

    #[test]
    fn lot_sizing_rounds_down_to_step() {
        let sizing = SizingConfig {
            base_lot: dec!(1.00),
            lot_step: dec!(0.01),
            min_lot: dec!(0.01),
        };
        assert_eq!(sizing.lot_for(0.678), dec!(0.67));
        assert_eq!(sizing.lot_for(0.0), dec!(0.01));
        assert_eq!(sizing.lot_for(1.5), dec!(1));
    }

    #[test]
    fn loads_defaults_without_files() {
        let dir = std::env::temp_dir().join(format!("tradegate-cfg-{}", uuid::Uuid::new_v4()));
        let cfg = AppConfig::load_from(&dir).unwrap();
        assert_eq!(cfg.connector.max_retries, 3);
        assert!(cfg.accounts.is_empty());
    }
}
