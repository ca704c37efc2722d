use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::str::FromStr;

use crate::models::SecurityLevel;
use crate::services::TimeoutTable;

#[derive(Debug, Clone, Deserialize)]
pub struct TrustConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub mongodb: MongoConfig,
    pub jwt: JwtConfig,
    pub timeouts: TimeoutTable,
    pub trusted_issuers: Vec<TrustedIssuer>,
    pub credentials: CredentialsConfig,
    pub migrations: MigrationConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MongoConfig {
    pub uri: String,
    pub database: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    /// `iss` claim of every token this service signs
    pub issuer: String,
    /// Application id of this service; its permissions form the self scope
    pub self_app_id: String,
    /// Signing keys; the first one signs, all of them verify
    pub keys: Vec<SigningKeyConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SigningKeyConfig {
    pub kid: String,
    pub private_key_path: String,
    pub public_key_path: String,
}

/// External issuer whose published keyset we accept tokens from.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TrustedIssuer {
    pub issuer: String,
    pub jwks_url: String,
}

/// One sub-config per credential provider, validated together.
#[derive(Debug, Clone, Deserialize)]
pub struct CredentialsConfig {
    pub password: PasswordProviderConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PasswordProviderConfig {
    pub enabled: bool,
    /// Level asserted by a successful password check
    pub security_level: SecurityLevel,
    pub lifetime_days: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MigrationConfig {
    /// How long a worker waits for another worker's migration step
    pub wait_seconds: u64,
    pub poll_interval_ms: u64,
}

impl TrustConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let config = TrustConfig {
            common: common_config,
            environment: environment.clone(),
            service_name: get_env("SERVICE_NAME", Some("trust-service"), is_prod)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|s| !s.is_empty()),
            mongodb: MongoConfig {
                uri: get_env("MONGODB_URI", Some("mongodb://localhost:27017"), is_prod)?,
                database: get_env("MONGODB_DATABASE", Some("trust"), is_prod)?,
            },
            jwt: JwtConfig {
                issuer: get_env("JWT_ISSUER", Some("http://localhost:8080"), is_prod)?,
                self_app_id: get_env("SELF_APP_ID", Some("self"), is_prod)?,
                keys: parse_signing_keys(&get_env(
                    "JWT_KEYS",
                    Some("dev-1:keys/private.pem:keys/public.pem"),
                    is_prod,
                )?)?,
            },
            timeouts: TimeoutTable {
                jwt: parse_level_table(
                    "TOKEN_TIMEOUTS",
                    &get_env("TOKEN_TIMEOUTS", Some("3600,1800,900,600,300"), is_prod)?,
                )?,
                refresh: parse_level_table(
                    "REFRESH_TIMEOUTS",
                    &get_env(
                        "REFRESH_TIMEOUTS",
                        Some("2592000,604800,86400,3600,900"),
                        is_prod,
                    )?,
                )?,
                session: parse_level_table(
                    "SESSION_TIMEOUTS",
                    &get_env(
                        "SESSION_TIMEOUTS",
                        Some("2592000,604800,86400,14400,3600"),
                        is_prod,
                    )?,
                )?,
                exchange_code: parse_value(
                    "EXCHANGE_CODE_TIMEOUT",
                    &get_env("EXCHANGE_CODE_TIMEOUT", Some("60"), is_prod)?,
                )?,
            },
            trusted_issuers: parse_trusted_issuers(
                &env::var("TRUSTED_ISSUERS").unwrap_or_default(),
            )?,
            credentials: CredentialsConfig {
                password: PasswordProviderConfig {
                    enabled: parse_value(
                        "PASSWORD_ENABLED",
                        &get_env("PASSWORD_ENABLED", Some("true"), is_prod)?,
                    )?,
                    security_level: SecurityLevel::new(parse_value(
                        "PASSWORD_SECURITY_LEVEL",
                        &get_env("PASSWORD_SECURITY_LEVEL", Some("1"), is_prod)?,
                    )?)
                    .map_err(|e| AppError::ConfigError(anyhow::anyhow!(e)))?,
                    lifetime_days: parse_value(
                        "PASSWORD_LIFETIME_DAYS",
                        &get_env("PASSWORD_LIFETIME_DAYS", Some("365"), is_prod)?,
                    )?,
                },
            },
            migrations: MigrationConfig {
                wait_seconds: parse_value(
                    "MIGRATION_WAIT_SECONDS",
                    &get_env("MIGRATION_WAIT_SECONDS", Some("30"), is_prod)?,
                )?,
                poll_interval_ms: parse_value(
                    "MIGRATION_POLL_INTERVAL_MS",
                    &get_env("MIGRATION_POLL_INTERVAL_MS", Some("500"), is_prod)?,
                )?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PORT must be greater than 0"
            )));
        }

        if self.jwt.keys.is_empty() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "JWT_KEYS must name at least one signing key"
            )));
        }

        if !crate::permission::is_valid_path(&format!("/{}", self.jwt.self_app_id)) {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "SELF_APP_ID must be a single path segment"
            )));
        }

        let tables = [
            ("TOKEN_TIMEOUTS", &self.timeouts.jwt),
            ("REFRESH_TIMEOUTS", &self.timeouts.refresh),
            ("SESSION_TIMEOUTS", &self.timeouts.session),
        ];
        for (name, table) in tables {
            if table.iter().any(|secs| *secs <= 0) {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} entries must be positive",
                    name
                )));
            }
        }

        if self.timeouts.exchange_code <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "EXCHANGE_CODE_TIMEOUT must be positive"
            )));
        }

        if self.credentials.password.enabled && self.credentials.password.lifetime_days <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PASSWORD_LIFETIME_DAYS must be positive"
            )));
        }

        if self.migrations.poll_interval_ms == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "MIGRATION_POLL_INTERVAL_MS must be greater than 0"
            )));
        }

        if self.environment == Environment::Prod
            && self
                .trusted_issuers
                .iter()
                .any(|t| !t.jwks_url.starts_with("https://"))
        {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "Trusted issuer keysets must be fetched over https in production"
            )));
        }

        Ok(())
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required in production but not set",
                    key
                ))))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required but not set",
                    key
                ))))
            }
        }
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e: T::Err| AppError::ConfigError(anyhow::anyhow!("{}: {}", key, e)))
}

/// `kid:private_path:public_path[,kid:private_path:public_path...]`
fn parse_signing_keys(raw: &str) -> Result<Vec<SigningKeyConfig>, AppError> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let parts: Vec<&str> = entry.split(':').map(str::trim).collect();
            match parts.as_slice() {
                [kid, private_key_path, public_key_path] if !kid.is_empty() => {
                    Ok(SigningKeyConfig {
                        kid: kid.to_string(),
                        private_key_path: private_key_path.to_string(),
                        public_key_path: public_key_path.to_string(),
                    })
                }
                _ => Err(AppError::ConfigError(anyhow::anyhow!(
                    "Invalid JWT_KEYS entry: {}",
                    entry
                ))),
            }
        })
        .collect()
}

/// Five comma-separated second counts, one per security level.
fn parse_level_table(key: &str, raw: &str) -> Result<[i64; 5], AppError> {
    let values = raw
        .split(',')
        .map(|v| parse_value::<i64>(key, v))
        .collect::<Result<Vec<_>, _>>()?;

    values.try_into().map_err(|v: Vec<i64>| {
        AppError::ConfigError(anyhow::anyhow!(
            "{} needs 5 entries, got {}",
            key,
            v.len()
        ))
    })
}

/// `issuer|jwks_url[,issuer|jwks_url...]`
fn parse_trusted_issuers(raw: &str) -> Result<Vec<TrustedIssuer>, AppError> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (issuer, jwks_url) = entry.split_once('|').ok_or_else(|| {
                AppError::ConfigError(anyhow::anyhow!("Invalid TRUSTED_ISSUERS entry: {}", entry))
            })?;
            Ok(TrustedIssuer {
                issuer: issuer.trim().to_string(),
                jwks_url: jwks_url.trim().to_string(),
            })
        })
        .collect()
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}
