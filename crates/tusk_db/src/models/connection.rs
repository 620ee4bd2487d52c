//! Connection configuration, SSL settings and connection status models.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

/// Database engine a connection targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineType {
    /// PostgreSQL
    Postgres,
    /// MySQL
    MySql,
    /// MariaDB
    MariaDb,
    /// SQLite (file based)
    Sqlite,
    /// ClickHouse
    ClickHouse,
    /// MongoDB
    MongoDb,
    /// Redis
    Redis,
}

impl EngineType {
    /// Convert to string representation for storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::MySql => "mysql",
            Self::MariaDb => "mariadb",
            Self::Sqlite => "sqlite",
            Self::ClickHouse => "clickhouse",
            Self::MongoDb => "mongodb",
            Self::Redis => "redis",
        }
    }

    /// Parse from string representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "postgres" | "postgresql" => Some(Self::Postgres),
            "mysql" => Some(Self::MySql),
            "mariadb" => Some(Self::MariaDb),
            "sqlite" | "sqlite3" => Some(Self::Sqlite),
            "clickhouse" => Some(Self::ClickHouse),
            "mongodb" | "mongo" => Some(Self::MongoDb),
            "redis" => Some(Self::Redis),
            _ => None,
        }
    }

    /// Default TCP port, or `None` for file-based engines.
    pub fn default_port(&self) -> Option<u16> {
        match self {
            Self::Postgres => Some(5432),
            Self::MySql | Self::MariaDb => Some(3306),
            Self::ClickHouse => Some(8123),
            Self::MongoDb => Some(27017),
            Self::Redis => Some(6379),
            Self::Sqlite => None,
        }
    }

    /// Whether the engine stores its data in a local file.
    pub fn is_file_based(&self) -> bool {
        matches!(self, Self::Sqlite)
    }

    /// Schema used when the caller does not name one.
    pub fn default_schema(&self) -> &'static str {
        match self {
            Self::Postgres => "public",
            Self::Sqlite => "main",
            _ => "default",
        }
    }
}

impl fmt::Display for EngineType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// SSL mode for database connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SslMode {
    /// No SSL
    Disable,
    /// Use SSL, fall back to plaintext on handshake failure when allowed
    #[default]
    Prefer,
    /// Require SSL
    Require,
    /// Require SSL, verify CA
    #[serde(rename = "verify-ca")]
    VerifyCa,
    /// Require SSL, verify CA and hostname
    #[serde(rename = "verify-full")]
    VerifyFull,
}

impl SslMode {
    /// Convert to string representation for storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disable => "disable",
            Self::Prefer => "prefer",
            Self::Require => "require",
            Self::VerifyCa => "verify-ca",
            Self::VerifyFull => "verify-full",
        }
    }

    /// Parse from string representation.
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "disable" => Self::Disable,
            "require" => Self::Require,
            "verify-ca" | "verify_ca" => Self::VerifyCa,
            "verify-full" | "verify_full" => Self::VerifyFull,
            _ => Self::Prefer,
        }
    }

    /// Whether a TLS handshake is attempted at all.
    pub fn uses_tls(&self) -> bool {
        !matches!(self, Self::Disable)
    }
}

/// Minimum TLS protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TlsVersion {
    /// TLS 1.0
    #[serde(rename = "TLSv1")]
    Tls10,
    /// TLS 1.1
    #[serde(rename = "TLSv1.1")]
    Tls11,
    /// TLS 1.2
    #[serde(rename = "TLSv1.2")]
    Tls12,
}

/// SSL settings for a connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SslConfig {
    /// Negotiation mode
    pub mode: SslMode,
    /// Path to a PEM CA certificate
    pub ca: Option<PathBuf>,
    /// Path to a PEM client certificate
    pub cert: Option<PathBuf>,
    /// Path to a PEM PKCS#8 client key
    pub key: Option<PathBuf>,
    /// Name to verify the server certificate against, instead of the host
    pub server_name: Option<String>,
    /// Minimum accepted protocol version
    pub min_version: Option<TlsVersion>,
    /// Whether invalid certificates are rejected
    pub reject_unauthorized: bool,
    /// Whether `Prefer` may retry in plaintext after a failed handshake
    pub allow_plaintext_fallback: bool,
}

impl Default for SslConfig {
    fn default() -> Self {
        Self {
            mode: SslMode::Prefer,
            ca: None,
            cert: None,
            key: None,
            server_name: None,
            min_version: None,
            reject_unauthorized: false,
            allow_plaintext_fallback: true,
        }
    }
}

impl SslConfig {
    /// SSL settings for a given mode.
    ///
    /// Verifying modes reject unauthorized certificates.
    pub fn with_mode(mode: SslMode) -> Self {
        Self {
            mode,
            reject_unauthorized: matches!(mode, SslMode::VerifyCa | SslMode::VerifyFull),
            ..Self::default()
        }
    }

    /// Disabled SSL.
    pub fn disabled() -> Self {
        Self::with_mode(SslMode::Disable)
    }
}

/// Additional connection options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionOptions {
    /// Connection timeout in seconds
    pub connect_timeout_secs: u32,
    /// Server-side statement timeout in seconds (None = no timeout)
    pub statement_timeout_secs: Option<u32>,
    /// Application name reported to the server
    pub application_name: String,
    /// Maximum pooled connections (at least two so cancellation has a side channel)
    pub pool_max_size: usize,
    /// How long to wait for a pooled connection
    pub pool_wait_timeout_secs: u32,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            statement_timeout_secs: None,
            application_name: "Tusk".to_string(),
            pool_max_size: 4,
            pool_wait_timeout_secs: 30,
        }
    }
}

/// Configuration for a database connection.
///
/// Immutable once handed to a driver; changing settings means building a new
/// driver from a new config.
#[derive(Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Unique identifier
    pub id: Uuid,
    /// Display name (1-255 chars)
    pub name: String,
    /// Target engine
    pub engine: EngineType,
    /// Server hostname or IP
    pub host: String,
    /// Server port
    pub port: u16,
    /// Database name
    pub database: String,
    /// Login username
    pub username: String,
    /// Login password
    pub password: Option<String>,
    /// Database file for file-based engines (`:memory:` allowed)
    pub filepath: Option<PathBuf>,
    /// Whether SSL is enabled at all
    pub ssl: bool,
    /// SSL settings, used when `ssl` is true
    pub ssl_config: SslConfig,
    /// Additional options
    pub options: ConnectionOptions,
}

impl ConnectionConfig {
    /// Create a configuration for a network engine.
    pub fn new(
        engine: EngineType,
        name: impl Into<String>,
        host: impl Into<String>,
        database: impl Into<String>,
        username: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            engine,
            host: host.into(),
            port: engine.default_port().unwrap_or(0),
            database: database.into(),
            username: username.into(),
            password: None,
            filepath: None,
            ssl: false,
            ssl_config: SslConfig::disabled(),
            options: ConnectionOptions::default(),
        }
    }

    /// Create a PostgreSQL configuration.
    pub fn postgres(
        name: impl Into<String>,
        host: impl Into<String>,
        database: impl Into<String>,
        username: impl Into<String>,
    ) -> Self {
        Self::new(EngineType::Postgres, name, host, database, username)
    }

    /// Create a SQLite configuration for a database file.
    pub fn sqlite(name: impl Into<String>, filepath: impl Into<PathBuf>) -> Self {
        let filepath = filepath.into();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            engine: EngineType::Sqlite,
            host: String::new(),
            port: 0,
            database: filepath.display().to_string(),
            username: String::new(),
            password: None,
            filepath: Some(filepath),
            ssl: false,
            ssl_config: SslConfig::disabled(),
            options: ConnectionOptions::default(),
        }
    }

    /// Create a builder for complex configurations.
    pub fn builder(engine: EngineType) -> ConnectionConfigBuilder {
        ConnectionConfigBuilder::new(engine)
    }

    /// The SSL mode that applies, taking the `ssl` switch into account.
    pub fn effective_ssl_mode(&self) -> SslMode {
        if self.ssl {
            self.ssl_config.mode
        } else {
            SslMode::Disable
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.is_empty() || self.name.len() > 255 {
            return Err("Name must be 1-255 characters".to_string());
        }
        if self.engine.is_file_based() {
            if self.filepath.as_ref().map_or(true, |p| p.as_os_str().is_empty()) {
                return Err("A database file path is required".to_string());
            }
            return Ok(());
        }
        if self.host.is_empty() {
            return Err("Host is required".to_string());
        }
        if self.port == 0 {
            return Err("Port must be between 1 and 65535".to_string());
        }
        if matches!(self.engine, EngineType::Postgres | EngineType::MySql | EngineType::MariaDb) {
            if self.database.is_empty() || self.database.len() > 63 {
                return Err("Database name must be 1-63 characters".to_string());
            }
            if self.username.is_empty() {
                return Err("Username is required".to_string());
            }
        }
        if self.ssl && self.ssl_config.cert.is_some() != self.ssl_config.key.is_some() {
            return Err("Client certificate and key must be provided together".to_string());
        }
        Ok(())
    }

    /// Get the display connection string (without password).
    pub fn display_url(&self) -> String {
        match &self.filepath {
            Some(path) if self.engine.is_file_based() => {
                format!("{}://{}", self.engine, path.display())
            }
            _ => format!(
                "{}://{}@{}:{}/{}",
                self.engine, self.username, self.host, self.port, self.database
            ),
        }
    }
}

// Passwords never reach Debug output
impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("engine", &self.engine)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "****"))
            .field("filepath", &self.filepath)
            .field("ssl", &self.ssl)
            .field("ssl_config", &self.ssl_config)
            .field("options", &self.options)
            .finish()
    }
}

/// Builder for ConnectionConfig.
#[derive(Debug)]
pub struct ConnectionConfigBuilder {
    engine: EngineType,
    name: Option<String>,
    host: Option<String>,
    port: u16,
    database: Option<String>,
    username: Option<String>,
    password: Option<String>,
    filepath: Option<PathBuf>,
    ssl_config: Option<SslConfig>,
    options: ConnectionOptions,
}

impl ConnectionConfigBuilder {
    fn new(engine: EngineType) -> Self {
        Self {
            engine,
            name: None,
            host: None,
            port: 0,
            database: None,
            username: None,
            password: None,
            filepath: None,
            ssl_config: None,
            options: ConnectionOptions::default(),
        }
    }

    /// Set the connection name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the host.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Set the port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the database name.
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Set the username.
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Set the password.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set the database file path.
    pub fn filepath(mut self, filepath: impl Into<PathBuf>) -> Self {
        self.filepath = Some(filepath.into());
        self
    }

    /// Enable SSL with the given settings.
    pub fn ssl(mut self, ssl_config: SslConfig) -> Self {
        self.ssl_config = Some(ssl_config);
        self
    }

    /// Set connection options.
    pub fn options(mut self, options: ConnectionOptions) -> Self {
        self.options = options;
        self
    }

    /// Set the connection timeout.
    pub fn connect_timeout_secs(mut self, secs: u32) -> Self {
        self.options.connect_timeout_secs = secs;
        self
    }

    /// Set the statement timeout.
    pub fn statement_timeout_secs(mut self, secs: u32) -> Self {
        self.options.statement_timeout_secs = Some(secs);
        self
    }

    /// Build the configuration.
    pub fn build(self) -> Result<ConnectionConfig, String> {
        let ssl = self.ssl_config.as_ref().is_some_and(|c| c.mode.uses_tls());
        let filepath = self.filepath;
        let database = match (&self.database, &filepath) {
            (Some(db), _) => db.clone(),
            (None, Some(path)) if self.engine.is_file_based() => path.display().to_string(),
            (None, _) => String::new(),
        };
        let config = ConnectionConfig {
            id: Uuid::new_v4(),
            name: self.name.ok_or("Name is required")?,
            engine: self.engine,
            host: self.host.unwrap_or_default(),
            port: if self.port == 0 { self.engine.default_port().unwrap_or(0) } else { self.port },
            database,
            username: self.username.unwrap_or_default(),
            password: self.password,
            filepath,
            ssl,
            ssl_config: self.ssl_config.unwrap_or_else(SslConfig::disabled),
            options: self.options,
        };
        config.validate()?;
        Ok(config)
    }
}

/// Current state of a connection handle.
///
/// ```text
/// Disconnected -> Connecting -> Connected | Error
/// Connected -> Reconnecting -> Connected | Error
/// any -> Disconnected
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", content = "message", rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// No active connection
    #[default]
    Disconnected,
    /// Connection in progress
    Connecting,
    /// Active, healthy connection
    Connected,
    /// Transport dropped, rebuilding it
    Reconnecting,
    /// Connection failed or lost
    Error(String),
}

impl ConnectionStatus {
    /// Create an error status.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(message.into())
    }

    /// Check if the connection is active.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Check if the connection is in an error state.
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// Check if the connection is disconnected.
    pub fn is_disconnected(&self) -> bool {
        matches!(self, Self::Disconnected)
    }

    /// Get the error message if in error state.
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Error(message) => Some(message),
            _ => None,
        }
    }
}

/// Transport security actually negotiated for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TlsState {
    /// No TLS (disabled, or not applicable to the engine)
    #[default]
    Plaintext,
    /// TLS handshake succeeded
    Encrypted,
    /// `Prefer` mode failed its handshake and fell back to plaintext
    DowngradedFromPrefer,
}

/// Connection pool status.
#[derive(Debug, Clone, Copy)]
pub struct PoolStatus {
    /// Maximum pool capacity
    pub max_size: usize,
    /// Current connections (idle + active)
    pub size: usize,
    /// Idle connections (can be negative during contention)
    pub available: isize,
    /// Tasks waiting for connections
    pub waiting: usize,
}

impl PoolStatus {
    /// Get the number of active (in-use) connections.
    pub fn active(&self) -> usize {
        self.size.saturating_sub(self.available.max(0) as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_applies_engine_default_port() {
        let config = ConnectionConfig::builder(EngineType::Postgres)
            .name("local")
            .host("localhost")
            .database("app")
            .username("postgres")
            .build()
            .unwrap();
        assert_eq!(config.port, 5432);
        assert!(!config.ssl);
        assert_eq!(config.effective_ssl_mode(), SslMode::Disable);
    }

    #[test]
    fn test_builder_enables_ssl_from_config() {
        let config = ConnectionConfig::builder(EngineType::Postgres)
            .name("prod")
            .host("db.example.com")
            .database("app")
            .username("app")
            .ssl(SslConfig::with_mode(SslMode::VerifyFull))
            .build()
            .unwrap();
        assert!(config.ssl);
        assert_eq!(config.effective_ssl_mode(), SslMode::VerifyFull);
        assert!(config.ssl_config.reject_unauthorized);
    }

    #[test]
    fn test_sqlite_requires_filepath() {
        let err = ConnectionConfig::builder(EngineType::Sqlite).name("local").build().unwrap_err();
        assert!(err.contains("file path"));

        let config = ConnectionConfig::sqlite("local", "/tmp/app.db");
        assert!(config.validate().is_ok());
        assert_eq!(config.display_url(), "sqlite:///tmp/app.db");
    }

    #[test]
    fn test_network_engine_requires_username() {
        let mut config = ConnectionConfig::postgres("local", "localhost", "app", "postgres");
        config.username.clear();
        assert_eq!(config.validate().unwrap_err(), "Username is required");
    }

    #[test]
    fn test_cert_and_key_must_be_paired() {
        let mut config = ConnectionConfig::postgres("local", "localhost", "app", "postgres");
        config.ssl = true;
        config.ssl_config = SslConfig::with_mode(SslMode::Require);
        config.ssl_config.cert = Some(PathBuf::from("/tmp/client.crt"));
        assert!(config.validate().unwrap_err().contains("together"));
    }

    #[test]
    fn test_debug_redacts_password() {
        let mut config = ConnectionConfig::postgres("local", "localhost", "app", "postgres");
        config.password = Some("hunter2".to_string());
        let debug = format!("{config:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("****"));
    }

    #[test]
    fn test_engine_parse_round_trip() {
        assert_eq!(EngineType::parse("PostgreSQL"), Some(EngineType::Postgres));
        assert_eq!(EngineType::parse("sqlite3"), Some(EngineType::Sqlite));
        assert_eq!(EngineType::parse("oracle"), None);
        assert_eq!(SslMode::parse("verify_full"), SslMode::VerifyFull);
        assert_eq!(SslMode::parse("garbage"), SslMode::Prefer);
    }
}
