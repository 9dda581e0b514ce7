//! Configuration loading, validation and environment overrides.

use crate::error::HearthError;
use crate::resilience::rate_limit::RateLimitConfig;
use serde::{Deserialize, Serialize};

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Service identity.
    pub service: ServiceConfig,
    /// Logging configuration.
    pub logging: LoggingConfig,
    /// Gateway (HTTP/realtime) configuration.
    pub gateway: GatewayConfig,
    /// Domain-subsystem configuration (tariffs etc.)
    pub domain: DomainConfig,
}

impl AppConfig {
    /// Validate every section.
    pub fn validate(&self) -> Result<(), HearthError> {
        self.service.validate()?;
        self.logging.validate()?;
        self.gateway.validate()?;
        Ok(())
    }

    /// Load configuration, applying environment variable overrides on top
    /// of defaults, then validate.
    pub fn load_from_env() -> Result<Self, HearthError> {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("HEARTH_LOG_LEVEL") {
            config.logging.level = val;
        }
        if let Ok(val) = std::env::var("HEARTH_SERVICE_NAME") {
            config.service.name = val;
        }
        if let Ok(val) = std::env::var("HEARTH_PORT") {
            config.gateway.port = val
                .parse()
                .map_err(|_| HearthError::Validation("HEARTH_PORT must be a number".into()))?;
        }
        if let Ok(val) = std::env::var("HEARTH_ALLOWED_ORIGINS") {
            config.gateway.allowed_origins = val.split(',').map(|s| s.trim().to_string()).collect();
        }
        if let Ok(val) = std::env::var("HEARTH_INTERNAL_BEARER_TOKEN") {
            config.gateway.internal_bearer_token = Some(val);
        }
        if let Ok(val) = std::env::var("HEARTH_AUTH_SECRET") {
            config.gateway.auth_secret = Some(val);
        }
        if let Ok(val) = std::env::var("HEARTH_MAX_REQUESTS_PER_MINUTE") {
            config.gateway.rate_limit.max_requests_per_minute = val
                .parse()
                .map_err(|_| HearthError::Validation("HEARTH_MAX_REQUESTS_PER_MINUTE must be a number".into()))?;
        }
        if let Ok(val) = std::env::var("HEARTH_ENERGY_TARIFF_SEK_PER_KWH") {
            config.domain.energy_tariff_sek_per_kwh = val.parse().map_err(|_| {
                HearthError::Validation("HEARTH_ENERGY_TARIFF_SEK_PER_KWH must be a number".into())
            })?;
        }

        config.validate()?;
        Ok(config)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            service: ServiceConfig::default(),
            logging: LoggingConfig::default(),
            gateway: GatewayConfig::default(),
            domain: DomainConfig::default(),
        }
    }
}

/// Service identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Service name (used in logs/traces).
    pub name: String,
    /// Service version, taken from the crate manifest.
    pub version: String,
}

impl ServiceConfig {
    fn validate(&self) -> Result<(), HearthError> {
        if self.name.is_empty() {
            return Err(HearthError::Validation("service name cannot be empty".into()));
        }
        Ok(())
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "hearth".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Logging configuration, consumed by `tracing-subscriber` in `main.rs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `trace`/`debug`/`info`/`warn`/`error`.
    pub level: String,
    /// Emit JSON-formatted log lines instead of human-readable ones.
    pub json: bool,
}

impl LoggingConfig {
    fn validate(&self) -> Result<(), HearthError> {
        const VALID: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
        if !VALID.contains(&self.level.as_str()) {
            return Err(HearthError::Validation(format!("invalid log level: {}", self.level)));
        }
        Ok(())
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Gateway configuration: ports, CORS allow-list, auth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Listen port.
    pub port: u16,
    /// Origins admitted by the CORS middleware. Empty means nothing is
    /// admitted unless explicitly configured (no wildcard by default).
    pub allowed_origins: Vec<String>,
    /// Bearer token admitting internal-only routes from non-private networks.
    pub internal_bearer_token: Option<String>,
    /// Shared secret realtime clients must present at handshake in production.
    pub auth_secret: Option<String>,
    /// Rate limiting policy.
    pub rate_limit: RateLimitConfig,
    /// Whether this is a production deployment (gates realtime auth).
    pub production: bool,
}

impl GatewayConfig {
    fn validate(&self) -> Result<(), HearthError> {
        if self.port == 0 {
            return Err(HearthError::Validation("gateway port cannot be 0".into()));
        }
        Ok(())
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            allowed_origins: Vec::new(),
            internal_bearer_token: None,
            auth_secret: None,
            rate_limit: RateLimitConfig::default(),
            production: false,
        }
    }
}

/// Domain-subsystem configuration (§9: tariff belongs in config, not code).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainConfig {
    /// Electricity tariff used by the energy analytics endpoint.
    pub energy_tariff_sek_per_kwh: f64,
}

impl Default for DomainConfig {
    fn default() -> Self {
        Self {
            energy_tariff_sek_per_kwh: 1.50,
        }
    }
}
