use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub ingest: IngestConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(&var_or("APP_ENV", "development"));

        let host = var_or("APP_HOST", "127.0.0.1");
        let port = var_or("APP_PORT", "3000")
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = var_or("APP_LOG_LEVEL", "info");

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            ingest: IngestConfig::from_env()?,
        })
    }
}

fn var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Where the polling loop reads, stages, and archives files, and who owns them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestConfig {
    pub drop_dir: PathBuf,
    pub staging_dir: PathBuf,
    pub archive_dir: PathBuf,
    pub poll_interval: Duration,
    /// When set, the drop is an SFTP directory instead of `drop_dir`.
    pub sftp: Option<SftpSettings>,
    /// Department owning files that arrive in the drop without an upload.
    pub department: String,
    pub downstream_function: String,
}

impl IngestConfig {
    pub const DEFAULT_POLL_SECONDS: u64 = 15;

    fn from_env() -> Result<Self, ConfigError> {
        let raw_interval = var_or("INGEST_POLL_SECONDS", "15");
        let seconds = raw_interval
            .trim()
            .parse::<u64>()
            .ok()
            .filter(|seconds| *seconds > 0)
            .ok_or(ConfigError::InvalidPollInterval(raw_interval))?;

        Ok(Self {
            drop_dir: var_or("INGEST_DROP_DIR", "/srv/bank-intake/incoming").into(),
            staging_dir: var_or("INGEST_STAGING_DIR", "/tmp/bank-intake/staging").into(),
            archive_dir: var_or("INGEST_ARCHIVE_DIR", "/tmp/bank-intake/archive").into(),
            poll_interval: Duration::from_secs(seconds),
            sftp: SftpSettings::from_env()?,
            department: var_or("INGEST_DEPARTMENT", "OPERATIONS")
                .trim()
                .to_ascii_uppercase(),
            downstream_function: var_or("INGEST_DOWNSTREAM_FUNCTION", "Z_PROCESS_BANK_FILE"),
        })
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            drop_dir: PathBuf::from("/srv/bank-intake/incoming"),
            staging_dir: PathBuf::from("/tmp/bank-intake/staging"),
            archive_dir: PathBuf::from("/tmp/bank-intake/archive"),
            poll_interval: Duration::from_secs(Self::DEFAULT_POLL_SECONDS),
            sftp: None,
            department: "OPERATIONS".to_string(),
            downstream_function: "Z_PROCESS_BANK_FILE".to_string(),
        }
    }
}

/// Connection details for an SFTP drop.
#[derive(Clone, PartialEq, Eq)]
pub struct SftpSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub remote_dir: String,
}

impl SftpSettings {
    pub const DEFAULT_PORT: u16 = 22;

    /// `None` unless `INGEST_SFTP_HOST` is set.
    fn from_env() -> Result<Option<Self>, ConfigError> {
        let host = var_or("INGEST_SFTP_HOST", "");
        let host = host.trim();
        if host.is_empty() {
            return Ok(None);
        }

        let raw_port = var_or("INGEST_SFTP_PORT", "22");
        let port = raw_port
            .trim()
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidSftpPort(raw_port))?;

        Ok(Some(Self {
            host: host.to_string(),
            port,
            username: var_or("INGEST_SFTP_USER", "bank"),
            password: var_or("INGEST_SFTP_PASSWORD", ""),
            remote_dir: var_or("INGEST_SFTP_DIR", "/incoming"),
        }))
    }
}

impl fmt::Debug for SftpSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SftpSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("remote_dir", &self.remote_dir)
            .finish()
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidPollInterval(String),
    InvalidSftpPort(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidPollInterval(value) => write!(
                f,
                "INGEST_POLL_SECONDS must be a positive number of seconds, got '{value}'"
            ),
            ConfigError::InvalidSftpPort(value) => {
                write!(f, "INGEST_SFTP_PORT must be a valid u16, got '{value}'")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidPort
            | ConfigError::InvalidPollInterval(_)
            | ConfigError::InvalidSftpPort(_) => None,
            ConfigError::InvalidHost { source } => Some(source),
        }
    }
}
