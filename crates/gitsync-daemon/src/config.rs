//! Command line, environment and config file handling.
//!
//! Every flag can also be given through a `GITSYNC_*` environment variable or
//! the optional TOML file. Precedence: flag > environment > file > default.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use libgitsync_core::{RepositoryOptions, DEFAULT_REMOTE_NAME, MAX_PERIOD};
use serde::Deserialize;
use tracing::warn;

use crate::error::DaemonError;

pub const DEFAULT_BRANCH: &str = "master";
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Parser, Debug, Default)]
#[command(
    name = "gitsyncd",
    about = "Keep a local git clone in sync with a remote branch",
    version
)]
pub struct Cli {
    /// URL of the remote repository
    #[arg(long, env = "GITSYNC_REPOSITORY_URL")]
    pub repo_url: Option<String>,

    /// Branch to mirror [default: master]
    #[arg(long, env = "GITSYNC_REPOSITORY_BRANCH")]
    pub repo_branch: Option<String>,

    /// Username for the remote
    #[arg(long, env = "GITSYNC_REPOSITORY_USER")]
    pub repo_user: Option<String>,

    /// Access token for the remote
    #[arg(long, env = "GITSYNC_REPOSITORY_TOKEN", hide_env_values = true)]
    pub repo_token: Option<String>,

    /// Remote name [default: origin]
    #[arg(long, env = "GITSYNC_REPOSITORY_REMOTE")]
    pub repo_remote: Option<String>,

    /// Path of the local clone
    #[arg(long, env = "GITSYNC_LOCAL_PATH")]
    pub local_path: Option<PathBuf>,

    /// Time between periodic syncs, e.g. 500ms, 30s, 5m, 1h [default: 30s]
    #[arg(long, env = "GITSYNC_INTERVAL", value_parser = parse_duration)]
    pub sync_interval: Option<Duration>,

    /// HTTP server address (ip:port). No server is started when unset.
    #[arg(long, env = "GITSYNC_HTTP_SERVER_ADDR")]
    pub http_server_addr: Option<String>,

    /// Basic auth username for /metrics and /status
    #[arg(long, env = "GITSYNC_HTTP_AUTH_USERNAME")]
    pub http_auth_username: Option<String>,

    /// Basic auth password for /metrics and /status
    #[arg(long, env = "GITSYNC_HTTP_AUTH_PASSWORD", hide_env_values = true)]
    pub http_auth_password: Option<String>,

    /// Bearer token for /metrics and /status
    #[arg(long, env = "GITSYNC_HTTP_AUTH_TOKEN", hide_env_values = true)]
    pub http_auth_token: Option<String>,

    /// TOML config file
    #[arg(long, env = "GITSYNC_CONFIG")]
    pub config: Option<PathBuf>,

    /// PID file path
    #[arg(long)]
    pub pid_file: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// Contents of the `--config` file
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub repository: RepositorySection,
    pub sync: SyncSection,
    pub http: HttpSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RepositorySection {
    pub url: Option<String>,
    pub branch: Option<String>,
    pub user: Option<String>,
    pub token: Option<String>,
    pub remote: Option<String>,
    pub local_path: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncSection {
    /// Same syntax as `--sync-interval`
    pub interval: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HttpSection {
    pub addr: Option<String>,
    pub auth_username: Option<String>,
    pub auth_password: Option<String>,
    pub auth_token: Option<String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self, DaemonError> {
        let content = std::fs::read_to_string(path).map_err(|source| DaemonError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| DaemonError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Credentials protecting the monitoring endpoints
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpAuth {
    /// Username and password, only when both are set
    pub basic: Option<(String, String)>,
    pub bearer: Option<String>,
}

impl HttpAuth {
    pub fn is_enabled(&self) -> bool {
        self.basic.is_some() || self.bearer.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpSettings {
    pub addr: SocketAddr,
    pub auth: HttpAuth,
}

/// Validated settings the daemon runs with
#[derive(Debug, Clone)]
pub struct Settings {
    pub repository: RepositoryOptions,
    pub interval: Duration,
    pub http: Option<HttpSettings>,
}

impl Settings {
    /// Load the config file named by `cli` (if any) and merge it under `cli`
    pub fn load(cli: &Cli) -> Result<Self, DaemonError> {
        let file = match &cli.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        Self::merge(cli, file)
    }

    /// Merge flag/environment values over file values and validate the result
    pub fn merge(cli: &Cli, file: FileConfig) -> Result<Self, DaemonError> {
        let FileConfig {
            repository: repo,
            sync,
            http,
        } = file;

        let url = non_empty(cli.repo_url.clone().or(repo.url))
            .ok_or_else(|| DaemonError::Config("repository URL is not set".to_string()))?;
        let local_path = cli
            .local_path
            .clone()
            .or(repo.local_path)
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or_else(|| DaemonError::Config("local path is not set".to_string()))?;

        let branch = match non_empty(cli.repo_branch.clone().or(repo.branch)) {
            Some(branch) => branch,
            None => {
                warn!("branch is not set, using {}", DEFAULT_BRANCH);
                DEFAULT_BRANCH.to_string()
            }
        };
        let user = cli.repo_user.clone().or(repo.user).unwrap_or_default();
        if user.is_empty() {
            warn!("repository user is not set");
        }
        let token = cli.repo_token.clone().or(repo.token).unwrap_or_default();
        if token.is_empty() {
            warn!("repository token is not set");
        }
        let remote = non_empty(cli.repo_remote.clone().or(repo.remote))
            .unwrap_or_else(|| DEFAULT_REMOTE_NAME.to_string());

        let interval = match (cli.sync_interval, sync.interval) {
            (Some(interval), _) => interval,
            (None, Some(raw)) => parse_duration(&raw).map_err(DaemonError::Config)?,
            (None, None) => DEFAULT_INTERVAL,
        };
        if interval.is_zero() {
            return Err(DaemonError::Config(
                "sync interval must be greater than zero".to_string(),
            ));
        }
        if interval > MAX_PERIOD {
            return Err(DaemonError::Config(format!(
                "sync interval must be at most {}s",
                MAX_PERIOD.as_secs()
            )));
        }

        let http = match non_empty(cli.http_server_addr.clone().or(http.addr)) {
            Some(addr) => Some(HttpSettings {
                addr: parse_addr(&addr)?,
                auth: HttpAuth {
                    basic: match (
                        non_empty(cli.http_auth_username.clone().or(http.auth_username)),
                        non_empty(cli.http_auth_password.clone().or(http.auth_password)),
                    ) {
                        (Some(user), Some(password)) => Some((user, password)),
                        (None, None) => None,
                        _ => {
                            warn!("basic auth needs both username and password, disabled");
                            None
                        }
                    },
                    bearer: non_empty(cli.http_auth_token.clone().or(http.auth_token)),
                },
            }),
            None => None,
        };

        Ok(Self {
            repository: RepositoryOptions::new(url, branch, local_path, user, token)
                .with_remote_name(remote),
            interval,
            http,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn parse_addr(addr: &str) -> Result<SocketAddr, DaemonError> {
    let parsed: SocketAddr = addr
        .parse()
        .map_err(|_| DaemonError::Config(format!("invalid HTTP server address: {}", addr)))?;
    if parsed.port() == 0 {
        return Err(DaemonError::Config(format!(
            "HTTP server port must be between 1 and 65535: {}",
            addr
        )));
    }
    Ok(parsed)
}

/// Parse `500ms`, `30s`, `5m`, `1h` or a bare number of seconds
pub fn parse_duration(raw: &str) -> Result<Duration, String> {
    let raw = raw.trim();
    let split = raw
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(raw.len());
    let (digits, unit) = raw.split_at(split);
    let value: u64 = digits
        .parse()
        .map_err(|_| format!("invalid duration: {:?}", raw))?;

    let secs = |factor: u64| {
        value
            .checked_mul(factor)
            .map(Duration::from_secs)
            .ok_or_else(|| format!("duration out of range: {:?}", raw))
    };
    match unit.trim() {
        "" | "s" => secs(1),
        "ms" => Ok(Duration::from_millis(value)),
        "m" => secs(60),
        "h" => secs(3600),
        other => Err(format!("invalid duration unit {:?} in {:?}", other, raw)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tempfile::tempdir;

    fn cli(args: &[&str]) -> Cli {
        let mut argv = vec!["gitsyncd"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("45"), Ok(Duration::from_secs(45)));
        assert_eq!(parse_duration("30s"), Ok(Duration::from_secs(30)));
        assert_eq!(parse_duration("250ms"), Ok(Duration::from_millis(250)));
        assert_eq!(parse_duration("5m"), Ok(Duration::from_secs(300)));
        assert_eq!(parse_duration("2h"), Ok(Duration::from_secs(7200)));
        assert!(parse_duration("soon").is_err());
        assert!(parse_duration("10d").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn test_parse_duration_overflow() {
        assert!(parse_duration("6000000000000000h").is_err());
        assert!(parse_duration("400000000000000000m").is_err());
        assert_eq!(
            parse_duration("18446744073709551615s"),
            Ok(Duration::from_secs(u64::MAX))
        );
    }

    #[test]
    fn test_defaults_applied() {
        let settings = Settings::merge(
            &cli(&["--repo-url", "https://example.com/r.git", "--local-path", "/srv/r"]),
            FileConfig::default(),
        )
        .unwrap();

        assert_eq!(settings.repository.branch(), DEFAULT_BRANCH);
        assert_eq!(settings.repository.remote_name(), "origin");
        assert_eq!(settings.interval, DEFAULT_INTERVAL);
        assert!(settings.http.is_none());
    }

    #[test]
    fn test_missing_url_is_rejected() {
        let err = Settings::merge(&cli(&["--local-path", "/srv/r"]), FileConfig::default())
            .unwrap_err();
        assert!(err.to_string().contains("repository URL"));
    }

    #[test]
    fn test_missing_local_path_is_rejected() {
        let err = Settings::merge(&cli(&["--repo-url", "u"]), FileConfig::default()).unwrap_err();
        assert!(err.to_string().contains("local path"));
    }

    #[test]
    fn test_zero_interval_is_rejected() {
        let err = Settings::merge(
            &cli(&["--repo-url", "u", "--local-path", "/p", "--sync-interval", "0s"]),
            FileConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, DaemonError::Config(_)));
    }

    #[test]
    fn test_oversized_interval_is_rejected() {
        let err = Settings::merge(
            &cli(&[
                "--repo-url",
                "u",
                "--local-path",
                "/p",
                "--sync-interval",
                "18446744073709551615s",
            ]),
            FileConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, DaemonError::Config(_)));

        let settings = Settings::merge(
            &cli(&["--repo-url", "u", "--local-path", "/p", "--sync-interval", "168h"]),
            FileConfig::default(),
        )
        .unwrap();
        assert_eq!(settings.interval, MAX_PERIOD);
    }

    #[test]
    fn test_http_address_validation() {
        let base = ["--repo-url", "u", "--local-path", "/p", "--http-server-addr"];
        for bad in ["localhost", "127.0.0.1", "127.0.0.1:0", "127.0.0.1:70000"] {
            let mut args = base.to_vec();
            args.push(bad);
            assert!(
                Settings::merge(&cli(&args), FileConfig::default()).is_err(),
                "{} should be rejected",
                bad
            );
        }

        let mut args = base.to_vec();
        args.push("0.0.0.0:8080");
        let settings = Settings::merge(&cli(&args), FileConfig::default()).unwrap();
        let http = settings.http.unwrap();
        assert_eq!(http.addr.port(), 8080);
        assert!(!http.auth.is_enabled());
    }

    #[test]
    fn test_basic_auth_needs_both_parts() {
        let settings = Settings::merge(
            &cli(&[
                "--repo-url", "u", "--local-path", "/p",
                "--http-server-addr", "127.0.0.1:9000",
                "--http-auth-username", "admin",
                "--http-auth-token", "t",
            ]),
            FileConfig::default(),
        )
        .unwrap();
        let auth = settings.http.unwrap().auth;
        assert_eq!(auth.basic, None);
        assert_eq!(auth.bearer.as_deref(), Some("t"));
    }

    #[test]
    fn test_flags_override_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("gitsync.toml");
        std::fs::write(
            &path,
            r#"
[repository]
url = "https://file.example.com/site.git"
branch = "main"
remote = "upstream"
local_path = "/from/file"

[sync]
interval = "5m"

[http]
addr = "127.0.0.1:8081"
auth_username = "ops"
auth_password = "hunter2"
"#,
        )
        .unwrap();

        let cli = cli(&[
            "--config",
            path.to_str().unwrap(),
            "--local-path",
            "/from/flag",
        ]);
        let settings = Settings::load(&cli).unwrap();

        assert_eq!(settings.repository.url(), "https://file.example.com/site.git");
        assert_eq!(settings.repository.branch(), "main");
        assert_eq!(settings.repository.remote_name(), "upstream");
        assert_eq!(settings.repository.path(), Path::new("/from/flag"));
        assert_eq!(settings.interval, Duration::from_secs(300));

        let http = settings.http.unwrap();
        assert_eq!(http.addr, "127.0.0.1:8081".parse().unwrap());
        assert_eq!(
            http.auth.basic,
            Some(("ops".to_string(), "hunter2".to_string()))
        );
    }

    #[test]
    fn test_unknown_file_keys_are_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[repository]\nurl = \"u\"\nbranchh = \"typo\"\n").unwrap();

        let err = FileConfig::load(&path).unwrap_err();
        assert!(matches!(err, DaemonError::ConfigParse { .. }));
    }

    #[test]
    fn test_missing_file_is_reported() {
        let err = FileConfig::load(Path::new("/nonexistent/gitsync.toml")).unwrap_err();
        assert!(matches!(err, DaemonError::ConfigRead { .. }));
    }
}
