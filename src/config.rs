//! Connection settings for the inspected PostgreSQL server.
//!
//! Settings follow the libpq environment conventions:
//! - PGHOST (default: localhost)
//! - PGPORT (default: 5432)
//! - PGUSER (default: $USER)
//! - PGPASSWORD (default: empty)
//! - PGDATABASE (default: same as PGUSER)
//! - PGSSLMODE (default: prefer)
//! - PGCONNECT_TIMEOUT (default: 10 seconds)

use std::fmt;
use std::time::Duration;

use clap::ValueEnum;

use crate::inspector::InspectError;

/// Reported to the server as `application_name`.
pub const APPLICATION_NAME: &str = "pginspect";

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 5432;
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_STATEMENT_TIMEOUT: Duration = Duration::from_secs(30);

/// TLS negotiation policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum SslMode {
    /// Plain TCP only.
    Disable,
    /// Try TLS, fall back to plain TCP.
    #[default]
    Prefer,
    /// Fail unless TLS is negotiated.
    Require,
}

impl SslMode {
    /// Parses a libpq `sslmode` value. Modes that verify certificates map to `Require`.
    pub fn from_libpq(value: &str) -> Option<Self> {
        match value.trim() {
            "disable" => Some(Self::Disable),
            "allow" | "prefer" => Some(Self::Prefer),
            "require" | "verify-ca" | "verify-full" => Some(Self::Require),
            _ => None,
        }
    }
}

impl From<SslMode> for postgres::config::SslMode {
    fn from(mode: SslMode) -> Self {
        match mode {
            SslMode::Disable => postgres::config::SslMode::Disable,
            SslMode::Prefer => postgres::config::SslMode::Prefer,
            SslMode::Require => postgres::config::SslMode::Require,
        }
    }
}

/// Everything needed to open one inspection session.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    pub dbname: String,
    pub ssl_mode: SslMode,
    /// Applied while establishing the connection.
    pub connect_timeout: Duration,
    /// Applied by the server to every statement of the session.
    pub statement_timeout: Duration,
}

impl ConnectionConfig {
    /// Creates a config for `user` with every other setting at its default.
    pub fn new(user: impl Into<String>) -> Self {
        let user = user.into();
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            dbname: user.clone(),
            user,
            password: None,
            ssl_mode: SslMode::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            statement_timeout: DEFAULT_STATEMENT_TIMEOUT,
        }
    }

    /// Creates a config from the standard libpq environment variables.
    ///
    /// Uses $USER as default if PGUSER is not set.
    pub fn from_env() -> Result<Self, InspectError> {
        let user = std::env::var("PGUSER")
            .or_else(|_| std::env::var("USER"))
            .map_err(|_| InspectError::connection("PGUSER or USER not set"))?;

        let mut config = Self::new(user);
        if let Ok(host) = std::env::var("PGHOST") {
            config.host = host;
        }
        if let Ok(port) = std::env::var("PGPORT") {
            config.port = port
                .parse()
                .map_err(|_| InspectError::connection(format!("invalid PGPORT '{}'", port)))?;
        }
        if let Ok(dbname) = std::env::var("PGDATABASE") {
            config.dbname = dbname;
        }
        config.password = std::env::var("PGPASSWORD").ok().filter(|p| !p.is_empty());
        if let Some(mode) = std::env::var("PGSSLMODE")
            .ok()
            .and_then(|v| SslMode::from_libpq(&v))
        {
            config.ssl_mode = mode;
        }
        if let Some(secs) = std::env::var("PGCONNECT_TIMEOUT")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
        {
            config.connect_timeout = Duration::from_secs(secs);
        }
        Ok(config)
    }

    pub fn with_statement_timeout(mut self, timeout: Duration) -> Self {
        self.statement_timeout = timeout;
        self
    }

    /// Startup `options` that make the session read-only and bound every statement.
    pub fn session_options(&self) -> String {
        format!(
            "-c default_transaction_read_only=on -c statement_timeout={}",
            self.statement_timeout.as_millis()
        )
    }

    /// Builds the driver configuration.
    pub fn to_pg_config(&self) -> postgres::Config {
        let mut config = postgres::Config::new();
        config
            .host(&self.host)
            .port(self.port)
            .user(&self.user)
            .dbname(&self.dbname)
            .application_name(APPLICATION_NAME)
            .options(&self.session_options())
            .connect_timeout(self.connect_timeout)
            .ssl_mode(self.ssl_mode.into());
        if let Some(ref password) = self.password {
            config.password(password);
        }
        config
    }

    /// Short `user@host:port/dbname` label for logs and error messages.
    pub fn describe(&self) -> String {
        format!("{}@{}:{}/{}", self.user, self.host, self.port, self.dbname)
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("dbname", &self.dbname)
            .field("ssl_mode", &self.ssl_mode)
            .field("connect_timeout", &self.connect_timeout)
            .field("statement_timeout", &self.statement_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_defaults_database_to_user() {
        let config = ConnectionConfig::new("app");
        assert_eq!(config.dbname, "app");
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 5432);
        assert_eq!(config.ssl_mode, SslMode::Prefer);
        assert!(config.password.is_none());
    }

    #[test]
    fn session_options_are_read_only_with_timeout() {
        let config =
            ConnectionConfig::new("app").with_statement_timeout(Duration::from_millis(2500));
        assert_eq!(
            config.session_options(),
            "-c default_transaction_read_only=on -c statement_timeout=2500"
        );
    }

    #[test]
    fn pg_config_carries_connection_parameters() {
        let mut config = ConnectionConfig::new("app");
        config.host = "db.internal".to_string();
        config.port = 6432;
        config.dbname = "orders".to_string();
        config.password = Some("secret".to_string());

        let pg = config.to_pg_config();
        assert_eq!(pg.get_user(), Some("app"));
        assert_eq!(pg.get_dbname(), Some("orders"));
        assert_eq!(pg.get_ports(), &[6432]);
        assert_eq!(pg.get_application_name(), Some(APPLICATION_NAME));
        assert_eq!(pg.get_password(), Some(&b"secret"[..]));
        assert_eq!(pg.get_connect_timeout(), Some(&DEFAULT_CONNECT_TIMEOUT));
    }

    #[test]
    fn debug_output_redacts_password() {
        let mut config = ConnectionConfig::new("app");
        config.password = Some("hunter2".to_string());
        let debug = format!("{:?}", config);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("***"));
    }

    #[test]
    fn sslmode_parses_libpq_values() {
        assert_eq!(SslMode::from_libpq("disable"), Some(SslMode::Disable));
        assert_eq!(SslMode::from_libpq("allow"), Some(SslMode::Prefer));
        assert_eq!(SslMode::from_libpq("verify-full"), Some(SslMode::Require));
        assert_eq!(SslMode::from_libpq("bogus"), None);
    }

    #[test]
    fn describe_omits_password() {
        let mut config = ConnectionConfig::new("app");
        config.password = Some("hunter2".to_string());
        assert_eq!(config.describe(), "app@localhost:5432/app");
    }
}
