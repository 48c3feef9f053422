//! Process settings, read once from the environment at startup.

use ::config::{Config, ConfigError, Environment};
use serde::{Deserialize, Deserializer};

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default = "default_app_name")]
    pub app_name: String,
    #[serde(default)]
    pub debug: bool,

    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_workers")]
    pub workers: usize,

    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    #[serde(default = "default_true")]
    pub smtp_use_tls: bool,
    #[serde(default = "default_smtp_timeout")]
    pub smtp_timeout: u64,

    pub api_key: Option<String>,
    /// Comma separated in the environment.
    #[serde(
        default = "default_allowed_origins",
        deserialize_with = "comma_separated"
    )]
    pub allowed_origins: Vec<String>,

    #[serde(default = "default_log_level")]
    pub log_level: String,
    pub log_file: Option<String>,
}

fn default_app_name() -> String {
    "SMTP Bridge".into()
}

fn default_host() -> String {
    "127.0.0.1".into()
}

fn default_port() -> u16 {
    8000
}

fn default_workers() -> usize {
    4
}

fn default_smtp_port() -> u16 {
    587
}

fn default_true() -> bool {
    true
}

fn default_smtp_timeout() -> u64 {
    30
}

fn default_allowed_origins() -> Vec<String> {
    vec!["*".into()]
}

fn default_log_level() -> String {
    "INFO".into()
}

fn comma_separated<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    Ok(raw
        .split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .map(String::from)
        .collect())
}

/// Connection parameters shared by every send.
#[derive(Debug, Clone)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub use_tls: bool,
    pub timeout: u64,
}

impl SmtpSettings {
    /// Username and password, only when both are set and non-empty.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.username.as_deref(), self.password.as_deref()) {
            (Some(user), Some(pass)) if !user.is_empty() && !pass.is_empty() => Some((user, pass)),
            _ => None,
        }
    }
}

impl Settings {
    /// Loads `.env` if present, then reads the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_source(Environment::default())
    }

    /// Reads settings from an environment source. Keys are case-insensitive.
    /// Values are kept as text; only typed fields convert.
    pub fn from_source(env: Environment) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(env)
            .build()?
            .try_deserialize()
    }

    pub fn smtp(&self) -> SmtpSettings {
        SmtpSettings {
            host: self.smtp_host.clone(),
            port: self.smtp_port,
            username: self.smtp_username.clone(),
            password: self.smtp_password.clone(),
            use_tls: self.smtp_use_tls,
            timeout: self.smtp_timeout,
        }
    }

    /// The configured API key, `None` when authentication is disabled.
    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref().filter(|key| !key.is_empty())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Settings, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_source(Environment::default().source(Some(map)))
    }

    #[test]
    fn test_defaults() {
        let settings = load(&[("SMTP_HOST", "mail.example.com")]).unwrap();
        assert_eq!(settings.app_name, "SMTP Bridge");
        assert!(!settings.debug);
        assert_eq!(settings.bind_addr(), "127.0.0.1:8000");
        assert_eq!(settings.workers, 4);
        assert_eq!(settings.smtp_port, 587);
        assert!(settings.smtp_use_tls);
        assert_eq!(settings.smtp_timeout, 30);
        assert_eq!(settings.api_key(), None);
        assert_eq!(settings.allowed_origins, vec!["*".to_string()]);
        assert_eq!(settings.log_level, "INFO");
        assert!(settings.log_file.is_none());
    }

    #[test]
    fn test_smtp_host_required() {
        assert!(load(&[("SMTP_PORT", "25")]).is_err());
    }

    #[test]
    fn test_overrides() {
        let settings = load(&[
            ("SMTP_HOST", "mail.example.com"),
            ("SMTP_PORT", "465"),
            ("SMTP_USERNAME", "relay"),
            ("SMTP_PASSWORD", "hunter2"),
            ("SMTP_USE_TLS", "false"),
            ("SMTP_TIMEOUT", "5"),
            ("API_KEY", "secret"),
            ("ALLOWED_ORIGINS", "https://a.example,https://b.example"),
            ("PORT", "8081"),
        ])
        .unwrap();
        let smtp = settings.smtp();
        assert_eq!(smtp.port, 465);
        assert!(!smtp.use_tls);
        assert_eq!(smtp.timeout, 5);
        assert_eq!(smtp.credentials(), Some(("relay", "hunter2")));
        assert_eq!(settings.api_key(), Some("secret"));
        assert_eq!(
            settings.allowed_origins,
            vec!["https://a.example", "https://b.example"]
        );
        assert_eq!(settings.port, 8081);
    }

    #[test]
    fn test_blank_secrets_are_ignored() {
        let settings = load(&[
            ("SMTP_HOST", "mail.example.com"),
            ("SMTP_USERNAME", "relay"),
            ("SMTP_PASSWORD", ""),
            ("API_KEY", ""),
        ])
        .unwrap();
        assert_eq!(settings.smtp().credentials(), None);
        assert_eq!(settings.api_key(), None);
    }

    #[test]
    fn test_secrets_keep_their_text() {
        let settings = load(&[
            ("SMTP_HOST", "mail.example.com"),
            ("SMTP_USERNAME", "u"),
            ("SMTP_PASSWORD", "1.50"),
            ("API_KEY", "007"),
        ])
        .unwrap();
        assert_eq!(settings.api_key(), Some("007"));
        assert_eq!(settings.smtp().credentials(), Some(("u", "1.50")));

        let settings = load(&[("SMTP_HOST", "mail.example.com"), ("API_KEY", "TRUE")]).unwrap();
        assert_eq!(settings.api_key(), Some("TRUE"));
    }

    #[test]
    fn test_origins_are_trimmed() {
        let settings = load(&[
            ("SMTP_HOST", "mail.example.com"),
            ("ALLOWED_ORIGINS", " https://a.example , ,https://b.example"),
        ])
        .unwrap();
        assert_eq!(
            settings.allowed_origins,
            vec!["https://a.example", "https://b.example"]
        );
    }
}
