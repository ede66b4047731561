use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the YAML configuration file
    #[arg(short = 'f', long, env = "LOYALTYCTL_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate the configuration and exit
    #[arg(long)]
    pub validate: bool,
}

/// Top-level configuration.
///
/// Values are layered: built-in defaults, then the YAML file, then `LOYALTYCTL_*` environment
/// variables (nested keys separated by `__`, e.g. `LOYALTYCTL_POINTS__FIRST_PURCHASE_BONUS`).
/// `DATABASE_URL` is honoured on its own as well.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    /// Maximum number of pooled database connections
    pub database_max_connections: u32,
    /// Email of the administrator created on startup
    pub admin_email: String,
    pub auth: AuthConfig,
    pub points: PointsConfig,
    pub reconciler: ReconcilerConfig,
    pub cors: CorsConfig,
    pub enable_metrics: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AuthConfig {
    pub proxy_header: ProxyHeaderAuthConfig,
}

/// Trusted-proxy authentication: the upstream proxy puts the caller's email in a header.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyHeaderAuthConfig {
    pub enabled: bool,
    pub header_name: String,
}

impl Default for ProxyHeaderAuthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            header_name: "x-loyalty-user".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PointsConfig {
    /// Added once, to the first credited order of a user with no ledger history
    pub first_purchase_bonus: i64,
    /// Let administrative adjustments take a balance below zero
    pub allow_negative_adjustments: bool,
    /// How long a ledger transaction waits for a user's balance lock before failing
    #[serde(with = "humantime_serde")]
    pub lock_timeout: Duration,
}

impl Default for PointsConfig {
    fn default() -> Self {
        Self {
            first_purchase_bonus: 100,
            allow_negative_adjustments: false,
            lock_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    pub enabled: bool,
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    pub batch_size: i64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(60),
            batch_size: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
    pub allow_credentials: bool,
    /// Preflight cache duration, in seconds
    pub max_age: Option<u64>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec![],
            allow_credentials: true,
            max_age: Some(3600),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            database_url: "postgres://localhost:5432/loyalty".to_string(),
            database_max_connections: 10,
            admin_email: "admin@example.org".to_string(),
            auth: AuthConfig::default(),
            points: PointsConfig::default(),
            reconciler: ReconcilerConfig::default(),
            cors: CorsConfig::default(),
            enable_metrics: true,
        }
    }
}

impl Config {
    pub fn load(args: &Args) -> anyhow::Result<Self> {
        let config: Config = Self::figment(args).extract()?;
        config.validate()?;
        Ok(config)
    }

    fn figment(args: &Args) -> Figment {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Yaml::file(&args.config))
            .merge(Env::prefixed("LOYALTYCTL_").split("__"))
            .merge(Env::raw().only(&["DATABASE_URL"]).map(|_| "database_url".into()))
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.points.first_purchase_bonus < 0 {
            anyhow::bail!("points.first_purchase_bonus must not be negative");
        }
        if self.points.lock_timeout.is_zero() {
            anyhow::bail!("points.lock_timeout must be greater than zero");
        }
        if self.reconciler.batch_size <= 0 {
            anyhow::bail!("reconciler.batch_size must be positive");
        }
        if self.auth.proxy_header.enabled && self.auth.proxy_header.header_name.trim().is_empty() {
            anyhow::bail!("auth.proxy_header.header_name must be set when proxy header auth is enabled");
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    fn args() -> Args {
        Args {
            config: "config.yaml".to_string(),
            validate: false,
        }
    }

    #[test]
    fn test_defaults_without_file() {
        Jail::expect_with(|_jail| {
            let config = Config::load(&args()).expect("defaults should load");
            assert_eq!(config.port, 3001);
            assert_eq!(config.points.first_purchase_bonus, 100);
            assert!(!config.points.allow_negative_adjustments);
            assert_eq!(config.points.lock_timeout, Duration::from_secs(5));
            assert_eq!(config.auth.proxy_header.header_name, "x-loyalty-user");
            Ok(())
        });
    }

    #[test]
    fn test_yaml_then_env_layering() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "config.yaml",
                r#"
                port: 8080
                admin_email: owner@shop.test
                points:
                  first_purchase_bonus: 250
                  lock_timeout: 2s
                reconciler:
                  interval: 30s
                "#,
            )?;
            jail.set_env("LOYALTYCTL_POINTS__ALLOW_NEGATIVE_ADJUSTMENTS", "true");
            jail.set_env("DATABASE_URL", "postgres://db.internal/loyalty");

            let config = Config::load(&args()).expect("layered config should load");
            assert_eq!(config.port, 8080);
            assert_eq!(config.admin_email, "owner@shop.test");
            assert_eq!(config.points.first_purchase_bonus, 250);
            assert!(config.points.allow_negative_adjustments);
            assert_eq!(config.points.lock_timeout, Duration::from_secs(2));
            assert_eq!(config.reconciler.interval, Duration::from_secs(30));
            assert_eq!(config.database_url, "postgres://db.internal/loyalty");
            Ok(())
        });
    }

    #[test]
    fn test_negative_bonus_is_rejected() {
        Jail::expect_with(|jail| {
            jail.set_env("LOYALTYCTL_POINTS__FIRST_PURCHASE_BONUS", "-5");
            assert!(Config::load(&args()).is_err());
            Ok(())
        });
    }
}
