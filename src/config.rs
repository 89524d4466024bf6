// src/config.rs - Configuration management
use anyhow::{Context, Result};
use rand::{distributions::Alphanumeric, thread_rng, Rng};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub security: SecurityConfig,
    pub logging: LoggingConfig,
    pub lab: LabConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: Option<usize>,
    pub keep_alive: u64,
    pub client_timeout: u64,
    pub client_shutdown: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout: u64,
    pub idle_timeout: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub token_expiration_hours: i64,
    pub bcrypt_cost: u32,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
    pub max_request_size: usize,
    pub require_https: bool,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub audit_retention_days: u32,
}

/// Laboratory conventions: record code prefixes and billing currency.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LabConfig {
    pub name: String,
    pub patient_code_prefix: String,
    pub sample_code_prefix: String,
    pub analysis_code_prefix: String,
    pub report_code_prefix: String,
    pub currency: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            workers: None,
            keep_alive: 30,
            client_timeout: 30,
            client_shutdown: 5,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:labo.db".to_string(),
            max_connections: 10,
            min_connections: 1,
            connect_timeout: 30,
            idle_timeout: 600,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            // Empty means "generate one at startup" outside production
            jwt_secret: String::new(),
            token_expiration_hours: 12,
            bcrypt_cost: bcrypt::DEFAULT_COST,
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec![
                "http://localhost:3000".to_string(),
                "http://127.0.0.1:3000".to_string(),
            ],
            max_request_size: 1024 * 1024,
            require_https: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            audit_retention_days: 90,
        }
    }
}

impl Default for LabConfig {
    fn default() -> Self {
        Self {
            name: "Laboratoire d'analyses médicales".to_string(),
            patient_code_prefix: "PAT".to_string(),
            sample_code_prefix: "ECH".to_string(),
            analysis_code_prefix: "ANA".to_string(),
            report_code_prefix: "RAP".to_string(),
            currency: "GNF".to_string(),
        }
    }
}

// Generate a random JWT secret
pub fn generate_jwt_secret() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(64)
        .map(char::from)
        .collect()
}

pub fn load_config() -> Result<Config> {
    load_env_file()?;

    let mut config = match env::var("CONFIG_FILE") {
        Ok(config_file) => load_config_file(Path::new(&config_file))?,
        Err(_) => Config::default(),
    };

    override_with(&mut config, |key| env::var(key).ok());

    if config.auth.jwt_secret.is_empty() && !config.is_production() {
        log::warn!("JWT_SECRET not set, using a random secret; tokens will not survive a restart");
        config.auth.jwt_secret = generate_jwt_secret();
    }

    config.validate()
        .context("Configuration validation failed")?;

    Ok(config)
}

pub fn load_config_file(path: &Path) -> Result<Config> {
    let config_str = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    toml::from_str(&config_str)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Apply overrides from a key lookup (the process environment in production).
pub fn override_with<F>(config: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    fn parsed<T: std::str::FromStr>(value: Option<String>) -> Option<T> {
        value.and_then(|v| v.trim().parse::<T>().ok())
    }

    if let Some(host) = lookup("BIND_ADDRESS") {
        config.server.host = host;
    }
    if let Some(port) = parsed::<u16>(lookup("LABO_PORT")) {
        config.server.port = port;
    }
    if let Some(workers) = parsed::<usize>(lookup("LABO_WORKERS")) {
        config.server.workers = Some(workers);
    }
    if let Some(url) = lookup("DATABASE_URL") {
        config.database.url = url;
    }
    if let Some(max_conn) = parsed::<u32>(lookup("DATABASE_MAX_CONNECTIONS")) {
        config.database.max_connections = max_conn;
    }
    if let Some(min_conn) = parsed::<u32>(lookup("DATABASE_MIN_CONNECTIONS")) {
        config.database.min_connections = min_conn;
    }
    if let Some(jwt_secret) = lookup("JWT_SECRET") {
        config.auth.jwt_secret = jwt_secret;
    }
    if let Some(hours) = parsed::<i64>(lookup("AUTH_TOKEN_EXPIRATION_HOURS")) {
        config.auth.token_expiration_hours = hours;
    }
    if let Some(cost) = parsed::<u32>(lookup("AUTH_BCRYPT_COST")) {
        config.auth.bcrypt_cost = cost;
    }
    if let Some(origins_str) = lookup("ALLOWED_ORIGINS") {
        config.security.allowed_origins = origins_str
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
    }
    if let Some(level) = lookup("RUST_LOG") {
        config.logging.level = level;
    }
    if let Some(prefix) = lookup("LABO_PATIENT_PREFIX") {
        config.lab.patient_code_prefix = prefix;
    }
    if let Some(prefix) = lookup("LABO_SAMPLE_PREFIX") {
        config.lab.sample_code_prefix = prefix;
    }
    if let Some(prefix) = lookup("LABO_ANALYSIS_PREFIX") {
        config.lab.analysis_code_prefix = prefix;
    }
    if let Some(prefix) = lookup("LABO_REPORT_PREFIX") {
        config.lab.report_code_prefix = prefix;
    }
    if let Some(currency) = lookup("LABO_CURRENCY") {
        config.lab.currency = currency;
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.auth.jwt_secret.len() < 32 {
            return Err(anyhow::anyhow!(
                "JWT_SECRET must be at least 32 characters long (current: {})",
                self.auth.jwt_secret.len()
            ));
        }

        if !(4..=31).contains(&self.auth.bcrypt_cost) {
            return Err(anyhow::anyhow!(
                "bcrypt cost must be between 4 and 31 (current: {})",
                self.auth.bcrypt_cost
            ));
        }

        if self.database.max_connections < self.database.min_connections {
            return Err(anyhow::anyhow!(
                "max_connections ({}) must be >= min_connections ({})",
                self.database.max_connections,
                self.database.min_connections
            ));
        }

        let prefixes = [
            ("patient", &self.lab.patient_code_prefix),
            ("sample", &self.lab.sample_code_prefix),
            ("analysis", &self.lab.analysis_code_prefix),
            ("report", &self.lab.report_code_prefix),
        ];
        for (name, prefix) in prefixes.iter() {
            if prefix.trim().is_empty() || !prefix.chars().all(|c| c.is_ascii_alphanumeric()) {
                return Err(anyhow::anyhow!(
                    "{} code prefix must be non-empty and alphanumeric (current: '{}')",
                    name, prefix
                ));
            }
        }

        Ok(())
    }

    pub fn is_production(&self) -> bool {
        env::var("LABO_ENV").map(|v| v == "production").unwrap_or(false)
    }

    pub fn print_startup_info(&self) {
        log::info!("Laboratory service starting: {}", self.lab.name);
        log::info!("Server: {}:{}", self.server.host, self.server.port);
        log::info!("Database: {}", self.database.url);
        log::info!("Auth: JWT ({}h expiration)", self.auth.token_expiration_hours);
        log::info!("Logging: {} level", self.logging.level);
        log::info!(
            "Codes: patients {}, samples {}, analyses {}, reports {}",
            self.lab.patient_code_prefix,
            self.lab.sample_code_prefix,
            self.lab.analysis_code_prefix,
            self.lab.report_code_prefix
        );

        if !self.is_production() {
            log::warn!("Running in development mode");
        }

        if self.security.require_https {
            log::info!("HTTPS enforcement enabled");
        } else if self.is_production() {
            log::warn!("HTTPS not required in production mode");
        }
    }
}

pub fn load_env_file() -> Result<()> {
    if let Ok(env_file) = env::var("ENV_FILE") {
        dotenvy::from_filename(&env_file)
            .with_context(|| format!("Failed to load environment file: {}", env_file))?;
    } else if Path::new(".env").exists() {
        dotenvy::dotenv().context("Failed to load .env file")?;
    }
    Ok(())
}
