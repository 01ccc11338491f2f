use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

// Main configuration struct
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub smtp_port: u16,
    pub http_port: u16,
    pub bind_host: String,
    pub base_path: PathBuf,
    pub mail_user: String,
    pub mail_domain: String,
    pub log_level: String,
    pub max_message_size: usize,
    pub store_uid: Option<u32>,
    pub store_gid: Option<u32>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            smtp_port: 2525,
            http_port: 3000,
            bind_host: "0.0.0.0".to_string(),
            base_path: PathBuf::from("./data/mail"),
            mail_user: "catchall".to_string(),
            mail_domain: "localhost".to_string(),
            log_level: "info".to_string(),
            max_message_size: 25 * 1024 * 1024,
            store_uid: None,
            store_gid: None,
        }
    }
}

/// Catch-all SMTP sink with a JSON API over the stored mail.
#[derive(Debug, Default, Parser)]
#[command(version, about)]
pub struct Cli {
    /// YAML file with defaults for every option below
    #[arg(long, env = "MAILSINK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Port the SMTP ingress listens on
    #[arg(long, env = "SMTP_PORT")]
    pub smtp_port: Option<u16>,

    /// Port of the HTTP query API
    #[arg(long, env = "HTTP_PORT")]
    pub http_port: Option<u16>,

    #[arg(long, env = "BIND_HOST")]
    pub bind_host: Option<String>,

    /// Directory holding `<user>/Maildir`
    #[arg(long, env = "MAIL_BASE_PATH")]
    pub base_path: Option<PathBuf>,

    #[arg(long, env = "MAIL_USER")]
    pub mail_user: Option<String>,

    /// Used in the SMTP greeting and in stored filenames
    #[arg(long, env = "MAIL_DOMAIN")]
    pub mail_domain: Option<String>,

    /// error, warn, info, debug or trace
    #[arg(long, env = "LOG_LEVEL")]
    pub log_level: Option<String>,

    #[arg(long, env = "MAX_MESSAGE_SIZE")]
    pub max_message_size: Option<usize>,

    #[arg(long, env = "STORE_UID")]
    pub store_uid: Option<u32>,

    #[arg(long, env = "STORE_GID")]
    pub store_gid: Option<u32>,
}

pub fn load_settings() -> Result<Config> {
    resolve(Cli::parse())
}

/// File values first, then anything given on the command line or environment.
pub fn resolve(cli: Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => {
            let file = File::open(path)
                .with_context(|| format!("Cannot open settings file {}", path.display()))?;
            serde_yaml::from_reader(BufReader::new(file))
                .with_context(|| format!("Cannot deserialize settings from {}", path.display()))?
        }
        None => Config::default(),
    };

    if let Some(port) = cli.smtp_port {
        config.smtp_port = port;
    }
    if let Some(port) = cli.http_port {
        config.http_port = port;
    }
    if let Some(host) = cli.bind_host {
        config.bind_host = host;
    }
    if let Some(path) = cli.base_path {
        config.base_path = path;
    }
    if let Some(user) = cli.mail_user {
        config.mail_user = user;
    }
    if let Some(domain) = cli.mail_domain {
        config.mail_domain = domain;
    }
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }
    if let Some(size) = cli.max_message_size {
        config.max_message_size = size;
    }
    if cli.store_uid.is_some() {
        config.store_uid = cli.store_uid;
    }
    if cli.store_gid.is_some() {
        config.store_gid = cli.store_gid;
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_file_or_flags() {
        assert_eq!(resolve(Cli::default()).unwrap(), Config::default());
    }

    #[test]
    fn flags_override_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.yaml");
        std::fs::write(&path, "smtp_port: 25\nmail_user: dev\nlog_level: debug\n").unwrap();

        let config = resolve(Cli {
            config: Some(path),
            mail_user: Some("qa".to_string()),
            ..Default::default()
        })
        .unwrap();

        assert_eq!(config.smtp_port, 25);
        assert_eq!(config.mail_user, "qa");
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.http_port, 3000);
    }

    #[test]
    fn cli_parses_flags() {
        let cli = Cli::try_parse_from(["mailsink", "--smtp-port", "2526", "--mail-domain", "dev.test"]).unwrap();
        assert_eq!(cli.smtp_port, Some(2526));
        assert_eq!(cli.mail_domain.as_deref(), Some("dev.test"));
    }

    #[test]
    fn missing_file_is_an_error() {
        let result = resolve(Cli {
            config: Some(PathBuf::from("/definitely/not/here.yaml")),
            ..Default::default()
        });
        assert!(result.is_err());
    }
}
