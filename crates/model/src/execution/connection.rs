use crate::execution::errors::ConfigError;
use std::{fmt, str::FromStr, time::Duration};

pub const DEFAULT_PORT: u16 = 5432;
pub const DEFAULT_APPLICATION_NAME: &str = "table-transfer";

/// Requested encrypted-transport mode for an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SslPreference {
    Disable,
    #[default]
    Prefer,
    Require,
    VerifyFull,
}

impl SslPreference {
    pub fn as_str(&self) -> &'static str {
        match self {
            SslPreference::Disable => "disable",
            SslPreference::Prefer => "prefer",
            SslPreference::Require => "require",
            SslPreference::VerifyFull => "verify-full",
        }
    }

    pub fn requires_tls(&self) -> bool {
        matches!(self, SslPreference::Require | SslPreference::VerifyFull)
    }
}

impl FromStr for SslPreference {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "disable" | "" => Ok(SslPreference::Disable),
            "allow" | "prefer" => Ok(SslPreference::Prefer),
            "require" => Ok(SslPreference::Require),
            // Certificates are checked against the platform trust store, which
            // always includes the hostname.
            "verify-ca" | "verify-full" => Ok(SslPreference::VerifyFull),
            other => Err(ConfigError::Invalid {
                field: "ssl_mode",
                message: format!(
                    "unknown ssl mode '{other}' (expected disable, prefer, require, verify-ca or verify-full)"
                ),
            }),
        }
    }
}

impl fmt::Display for SslPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// TCP keepalive probing parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Keepalive {
    pub idle: Duration,
    pub interval: Duration,
    pub retries: u32,
}

impl Default for Keepalive {
    fn default() -> Self {
        Keepalive {
            idle: Duration::from_secs(30),
            interval: Duration::from_secs(10),
            retries: 5,
        }
    }
}

/// Everything needed to reach one database endpoint.
#[derive(Clone, PartialEq, Eq)]
pub struct EndpointConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    pub ssl_mode: SslPreference,
    /// Overrides the profile's connect timeout when set.
    pub connect_timeout: Option<Duration>,
    pub keepalive: Keepalive,
    pub application_name: String,
}

impl EndpointConfig {
    pub fn new(
        host: impl Into<String>,
        database: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        EndpointConfig {
            host: host.into(),
            port: DEFAULT_PORT,
            database: database.into(),
            user: user.into(),
            password: password.into(),
            ssl_mode: SslPreference::default(),
            connect_timeout: None,
            keepalive: Keepalive::default(),
            application_name: DEFAULT_APPLICATION_NAME.to_string(),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_ssl_mode(mut self, ssl_mode: SslPreference) -> Self {
        self.ssl_mode = ssl_mode;
        self
    }

    pub fn with_application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = name.into();
        self
    }

    /// `host:port/database`, never includes credentials.
    pub fn address(&self) -> String {
        format!("{}:{}/{}", self.host, self.port, self.database)
    }

    pub fn validate(&self, role: &'static str) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::Missing(format!("{role} host")));
        }
        if self.database.trim().is_empty() {
            return Err(ConfigError::Missing(format!("{role} database")));
        }
        if self.user.trim().is_empty() {
            return Err(ConfigError::Missing(format!("{role} user")));
        }
        Ok(())
    }
}

impl fmt::Debug for EndpointConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"***")
            .field("ssl_mode", &self.ssl_mode)
            .field("connect_timeout", &self.connect_timeout)
            .field("keepalive", &self.keepalive)
            .field("application_name", &self.application_name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_output_redacts_password() {
        let cfg = EndpointConfig::new("db.local", "warehouse", "loader", "hunter2");
        let rendered = format!("{cfg:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("***"));
        assert_eq!(cfg.address(), "db.local:5432/warehouse");
    }

    #[test]
    fn parses_ssl_modes() {
        assert_eq!("require".parse::<SslPreference>().unwrap(), SslPreference::Require);
        assert_eq!("verify-ca".parse::<SslPreference>().unwrap(), SslPreference::VerifyFull);
        assert!(SslPreference::VerifyFull.requires_tls());
        assert!(!SslPreference::Prefer.requires_tls());
        assert_eq!("PREFER".parse::<SslPreference>().unwrap(), SslPreference::Prefer);
        assert_eq!("disable".parse::<SslPreference>().unwrap(), SslPreference::Disable);
        assert!("sometimes".parse::<SslPreference>().is_err());
    }

    #[test]
    fn validation_reports_missing_fields() {
        let cfg = EndpointConfig::new("", "db", "user", "pw");
        let err = cfg.validate("source").unwrap_err();
        assert_eq!(err.to_string(), "Missing required setting: source host");
    }
}
