//! Application configuration management.
//!
//! Configuration is loaded from a YAML file with environment variable overrides. The configuration
//! file path defaults to `config.yaml` but can be specified via `-f` flag or `APPROVE_LINKS_CONFIG`
//! environment variable.
//!
//! ## Loading Priority
//!
//! 1. **YAML config file** - Base configuration (default: `config.yaml`)
//! 2. **Environment variables** - Variables prefixed with `APPROVE_LINKS_` override YAML values
//!
//! For nested config values, use double underscores in environment variables. For example,
//! `APPROVE_LINKS_THROTTLE__MAX_ATTEMPTS=5` sets the `throttle.max_attempts` field.
//!
//! ## Configuration Structure
//!
//! - **Server**: `host`, `port`
//! - **Signing**: `secret_key` - the only secret; rotating it invalidates every issued link
//! - **Links**: `public_url`, `links.path`, `links.max_length`
//! - **Dispatch**: `dispatch.timeout`, `dispatch.user_agent` - outbound callback requests
//! - **Authentication**: `auth.proxy_header`, `auth.admin_users`, `auth.admin_api_key`, `auth.cors`
//! - **Throttle**: `throttle.window`, `throttle.max_attempts`, `throttle.client_ip_header`
//! - **Features**: `enable_metrics`, `enable_otel_export`
//!
//! ## Environment Variable Examples
//!
//! ```bash
//! APPROVE_LINKS_SECRET_KEY="change-me"
//! APPROVE_LINKS_PUBLIC_URL="https://approvals.example.com"
//! APPROVE_LINKS_DISPATCH__TIMEOUT=10s
//! APPROVE_LINKS_AUTH__PROXY_HEADER__ENABLED=true
//! ```

use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use crate::approval::dispatcher::{DEFAULT_MAX_LINK_LENGTH, DEFAULT_USER_AGENT};
use crate::approval::error::LinkError;
use crate::errors::Error;

/// Simple CLI args - just for specifying config file
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "APPROVE_LINKS_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate configuration and exit without starting the server.
    #[arg(long)]
    pub validate: bool,
}

/// Main application configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server host to bind to (e.g., "0.0.0.0" for all interfaces)
    pub host: String,
    /// HTTP server port to bind to
    pub port: u16,
    /// Externally reachable base URL; generated links point here
    pub public_url: String,
    /// Secret used to sign approval links (required)
    #[serde(skip_serializing)]
    pub secret_key: Option<String>,
    pub links: LinksConfig,
    pub dispatch: DispatchConfig,
    pub auth: AuthConfig,
    pub throttle: ThrottleConfig,
    /// Enable Prometheus metrics endpoint at `/internal/metrics`
    pub enable_metrics: bool,
    /// Enable OpenTelemetry OTLP export for distributed tracing
    pub enable_otel_export: bool,
}

/// Generated link settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct LinksConfig {
    /// Path of the approval page, resolved against `public_url`
    pub path: String,
    /// Longest link that generation will return
    pub max_length: usize,
}

/// Outbound callback request settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct DispatchConfig {
    /// Time allowed for a callback to answer
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// `User-Agent` sent with every callback request
    pub user_agent: String,
}

/// Authentication configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuthConfig {
    /// Proxy header-based identity (for SSO integration)
    pub proxy_header: ProxyHeaderAuthConfig,
    /// Proxy header identities allowed to generate links
    pub admin_users: Vec<String>,
    /// Bearer token allowed to generate links, for service-to-service use
    #[serde(skip_serializing)]
    pub admin_api_key: Option<String>,
    /// CORS configuration for browser clients
    pub cors: CorsConfig,
}

/// Proxy header-based authentication configuration.
///
/// Reads user identity from an HTTP header set by a trusted upstream proxy (for example
/// oauth2-proxy or vouch). Never enable this unless the proxy strips the header from client
/// requests, otherwise anyone can claim any identity.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProxyHeaderAuthConfig {
    pub enabled: bool,
    /// The name of the HTTP header containing a unique user identifier.
    /// This is compared with the `userId` bound into a link.
    pub header_name: String,
}

/// CORS (Cross-Origin Resource Sharing) configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CorsConfig {
    /// Allowed origins for CORS requests
    pub allowed_origins: Vec<CorsOrigin>,
    /// Allow credentials (cookies) in CORS requests
    pub allow_credentials: bool,
    /// Cache preflight requests for this many seconds
    pub max_age: Option<u64>,
}

/// CORS origin specification.
///
/// Can be either a wildcard (`*`) to allow all origins, or a specific URL.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum CorsOrigin {
    /// Allow all origins (`*`)
    #[serde(deserialize_with = "parse_wildcard")]
    Wildcard,
    /// Specific origin URL (e.g., `https://app.example.com`)
    #[serde(deserialize_with = "parse_url")]
    Url(Url),
}

fn parse_wildcard<'de, D>(deserializer: D) -> Result<(), D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    if s == "*" {
        Ok(())
    } else {
        Err(serde::de::Error::custom("Expected '*'"))
    }
}

fn parse_url<'de, D>(deserializer: D) -> Result<Url, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    Url::parse(&s).map_err(serde::de::Error::custom)
}

/// Brute-force protection for signature checks.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ThrottleConfig {
    pub enabled: bool,
    /// How long a recorded failure counts against a client
    #[serde(with = "humantime_serde")]
    pub window: Duration,
    /// Failures per action and client before requests are refused
    pub max_attempts: u32,
    /// Header set by a trusted reverse proxy carrying the client address, first hop wins.
    /// Unset means the peer address of the connection is used; only set this behind a proxy
    /// that overwrites the header.
    pub client_ip_header: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            public_url: "http://localhost:3001".to_string(),
            secret_key: None,
            links: LinksConfig::default(),
            dispatch: DispatchConfig::default(),
            auth: AuthConfig::default(),
            throttle: ThrottleConfig::default(),
            enable_metrics: true,
            enable_otel_export: false,
        }
    }
}

impl Default for LinksConfig {
    fn default() -> Self {
        Self {
            path: "/link".to_string(),
            max_length: DEFAULT_MAX_LINK_LENGTH,
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl Default for ProxyHeaderAuthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            header_name: "x-approve-user".to_string(),
        }
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: Vec::new(),
            allow_credentials: false,
            max_age: Some(3600), // Cache preflight for 1 hour
        }
    }
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window: Duration::from_secs(30 * 60),
            max_attempts: 10,
            client_ip_header: None,
        }
    }
}

impl Config {
    #[allow(clippy::result_large_err)]
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let config: Self = Self::figment(args).extract()?;
        config.validate().map_err(|e| figment::Error::from(e.to_string()))?;
        Ok(config)
    }

    /// Validate the configuration for consistency and required fields
    pub fn validate(&self) -> Result<(), Error> {
        if self.secret_key.as_deref().is_none_or(str::is_empty) {
            return Err(Error::Internal {
                operation: "Config validation: secret_key is not configured. \
                     Please set APPROVE_LINKS_SECRET_KEY environment variable or add secret_key to config file."
                    .to_string(),
            });
        }

        let public_url = Url::parse(&self.public_url).map_err(|e| Error::Internal {
            operation: format!("Config validation: public_url '{}' is not a valid URL: {e}", self.public_url),
        })?;
        if !matches!(public_url.scheme(), "http" | "https") {
            return Err(Error::Internal {
                operation: format!("Config validation: public_url must use http or https, got '{}'", public_url.scheme()),
            });
        }

        if self.links.max_length == 0 {
            return Err(Error::Internal {
                operation: "Config validation: links.max_length must be positive".to_string(),
            });
        }

        if self.dispatch.timeout.is_zero() {
            return Err(Error::Internal {
                operation: "Config validation: dispatch.timeout must be positive".to_string(),
            });
        }

        if self.throttle.enabled && self.throttle.max_attempts == 0 {
            return Err(Error::Internal {
                operation: "Config validation: throttle.max_attempts must be positive when the throttle is enabled".to_string(),
            });
        }

        if !self.auth.admin_users.is_empty() && !self.auth.proxy_header.enabled {
            return Err(Error::Internal {
                operation: "Config validation: auth.admin_users requires auth.proxy_header.enabled".to_string(),
            });
        }

        // Validate that wildcard is not used with credentials
        let has_wildcard = self
            .auth
            .cors
            .allowed_origins
            .iter()
            .any(|origin| matches!(origin, CorsOrigin::Wildcard));
        if has_wildcard && self.auth.cors.allow_credentials {
            return Err(Error::Internal {
                operation: "Config validation: CORS cannot use wildcard origin '*' with allow_credentials=true. Specify explicit origins."
                    .to_string(),
            });
        }

        self.link_url().map_err(|e| Error::Internal {
            operation: format!("Config validation: {e}"),
        })?;

        Ok(())
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            // Load base config file
            .merge(Yaml::file(&args.config))
            // Environment variables can still override specific values
            .merge(Env::prefixed("APPROVE_LINKS_").split("__"))
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Path of `public_url` without a trailing slash; empty when the service is at the root.
    pub fn base_path(&self) -> String {
        Url::parse(&self.public_url)
            .map(|url| url.path().trim_end_matches('/').to_string())
            .unwrap_or_default()
    }

    /// Where the JSON API is mounted.
    pub fn api_base_path(&self) -> String {
        format!("{}/api/v1", self.base_path())
    }

    /// Absolute URL of the approval page.
    pub fn link_url(&self) -> Result<Url, LinkError> {
        Ok(Url::parse(&self.public_url)?.join(&self.links.path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    fn args(path: &str) -> Args {
        Args {
            config: path.to_string(),
            validate: false,
        }
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        Jail::expect_with(|jail| {
            jail.create_file("test.yaml", "secret_key: hello\n")?;

            let config = Config::load(&args("test.yaml"))?;

            assert_eq!(config.bind_address(), "0.0.0.0:3001");
            assert_eq!(config.links.max_length, 2000);
            assert_eq!(config.dispatch.timeout, Duration::from_secs(30));
            assert_eq!(config.dispatch.user_agent, "approve-links callback dispatcher");
            assert_eq!(config.throttle.window, Duration::from_secs(1800));
            assert_eq!(config.throttle.max_attempts, 10);
            assert_eq!(config.throttle.client_ip_header, None);
            assert!(!config.auth.proxy_header.enabled);
            assert_eq!(config.link_url().unwrap().as_str(), "http://localhost:3001/link");
            assert_eq!(config.api_base_path(), "/api/v1");

            Ok(())
        });
    }

    #[test]
    fn test_full_config() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "test.yaml",
                r#"
secret_key: "test-secret-key"
public_url: https://cloud.example.com/apps/approve/
links:
  path: link
  max_length: 1500
dispatch:
  timeout: 5s
  user_agent: custom-agent
auth:
  proxy_header:
    enabled: true
    header_name: x-remote-user
  admin_users: [admin]
  admin_api_key: key
  cors:
    allowed_origins: ["https://app.example.com"]
throttle:
  window: 10m
  max_attempts: 3
  client_ip_header: x-real-ip
"#,
            )?;

            let config = Config::load(&args("test.yaml"))?;

            assert_eq!(config.link_url().unwrap().as_str(), "https://cloud.example.com/apps/approve/link");
            assert_eq!(config.api_base_path(), "/apps/approve/api/v1");
            assert_eq!(config.links.max_length, 1500);
            assert_eq!(config.dispatch.timeout, Duration::from_secs(5));
            assert_eq!(config.dispatch.user_agent, "custom-agent");
            assert_eq!(config.auth.proxy_header.header_name, "x-remote-user");
            assert_eq!(config.auth.admin_users, vec!["admin".to_string()]);
            assert_eq!(config.auth.admin_api_key.as_deref(), Some("key"));
            assert_eq!(config.throttle.window, Duration::from_secs(600));
            assert_eq!(config.throttle.max_attempts, 3);
            assert_eq!(config.throttle.client_ip_header.as_deref(), Some("x-real-ip"));

            Ok(())
        });
    }

    #[test]
    fn test_env_override() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "test.yaml",
                r#"
secret_key: hello
dispatch:
  user_agent: from-yaml
"#,
            )?;

            jail.set_env("APPROVE_LINKS_HOST", "127.0.0.1");
            jail.set_env("APPROVE_LINKS_PORT", "8080");
            jail.set_env("APPROVE_LINKS_DISPATCH__TIMEOUT", "2s");

            let config = Config::load(&args("test.yaml"))?;

            // Env vars should override
            assert_eq!(config.host, "127.0.0.1");
            assert_eq!(config.port, 8080);
            assert_eq!(config.dispatch.timeout, Duration::from_secs(2));

            // YAML values should be preserved
            assert_eq!(config.dispatch.user_agent, "from-yaml");

            Ok(())
        });
    }

    #[test]
    fn test_secret_key_from_env_only() {
        Jail::expect_with(|jail| {
            jail.create_file("test.yaml", "port: 4000\n")?;
            jail.set_env("APPROVE_LINKS_SECRET_KEY", "from-env");

            let config = Config::load(&args("test.yaml"))?;
            assert_eq!(config.secret_key.as_deref(), Some("from-env"));

            Ok(())
        });
    }

    #[test]
    fn test_missing_secret_key_rejected() {
        Jail::expect_with(|jail| {
            jail.create_file("test.yaml", "port: 4000\n")?;

            let error = Config::load(&args("test.yaml")).unwrap_err();
            assert!(error.to_string().contains("secret_key"));

            Ok(())
        });
    }

    #[test]
    fn test_unknown_field_rejected() {
        Jail::expect_with(|jail| {
            jail.create_file("test.yaml", "secret_key: hello\nunknown_option: true\n")?;
            assert!(Config::load(&args("test.yaml")).is_err());
            Ok(())
        });
    }

    #[test]
    fn test_validation_rules() {
        let valid = Config {
            secret_key: Some("hello".to_string()),
            ..Default::default()
        };
        assert!(valid.validate().is_ok());

        let mut config = valid.clone();
        config.secret_key = Some(String::new());
        assert!(config.validate().is_err());

        let mut config = valid.clone();
        config.public_url = "ftp://example.com".to_string();
        assert!(config.validate().is_err());

        let mut config = valid.clone();
        config.public_url = "not a url".to_string();
        assert!(config.validate().is_err());

        let mut config = valid.clone();
        config.links.max_length = 0;
        assert!(config.validate().is_err());

        let mut config = valid.clone();
        config.throttle.max_attempts = 0;
        assert!(config.validate().is_err());
        config.throttle.enabled = false;
        assert!(config.validate().is_ok());

        let mut config = valid.clone();
        config.auth.admin_users = vec!["admin".to_string()];
        assert!(config.validate().is_err());
        config.auth.proxy_header.enabled = true;
        assert!(config.validate().is_ok());

        let mut config = valid;
        config.auth.cors.allowed_origins = vec![CorsOrigin::Wildcard];
        config.auth.cors.allow_credentials = true;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_secrets_not_serialized() {
        let config = Config {
            secret_key: Some("super-secret".to_string()),
            auth: AuthConfig {
                admin_api_key: Some("api-secret".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };

        let yaml = serde_json::to_string(&config).unwrap();
        assert!(!yaml.contains("super-secret"));
        assert!(!yaml.contains("api-secret"));
    }
}
