//! Configuration loading from file and environment variables.

use drydock_db::{LocalSettings, ResolverSettings, SqlBackend};
use drydock_watch::{CommandSpec, WorkflowSettings};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Config file used when neither `--config` nor `DRYDOCK_CONFIG_PATH` is set.
pub const DEFAULT_CONFIG_PATH: &str = "drydock.toml";

/// A configuration value that must not appear in logs.
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    /// Wraps a secret value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The secret itself.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Project layout and mode.
    #[serde(default)]
    pub project: ProjectConfig,

    /// HTTP listener settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Database settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Schema watch settings (development only).
    #[serde(default)]
    pub watch: WatchConfig,

    /// Key-value storage settings.
    #[serde(default)]
    pub kv: KvConfig,

    /// Session cookie settings.
    #[serde(default)]
    pub session: SessionConfig,

    /// OAuth provider settings.
    #[serde(default)]
    pub oauth: OAuthConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Project layout and mode.
#[derive(Debug, Clone, Deserialize)]
pub struct ProjectConfig {
    /// Project root. Relative paths elsewhere in the config resolve against it.
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// Development mode: local database fallback and schema watching.
    #[serde(default)]
    pub development: bool,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Local SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,

    /// SQLite busy timeout, in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Maximum number of pooled SQLite connections.
    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,

    /// Remote libSQL service URL.
    #[serde(default)]
    pub remote_url: Option<String>,

    /// Remote libSQL auth token.
    #[serde(default)]
    pub remote_token: Option<Secret>,

    /// Migrations directory.
    #[serde(default = "default_migrations_dir")]
    pub migrations: String,

    /// Schema source file.
    #[serde(default = "default_schema_path")]
    pub schema: String,
}

/// Schema watch configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct WatchConfig {
    /// Quiet window for coalescing edits, in milliseconds.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Migration generator, argv-style.
    #[serde(default = "default_generate_command")]
    pub generate_command: Vec<String>,

    /// Optional external migration apply command, argv-style. When unset,
    /// migrations are applied in-process from the journal.
    #[serde(default)]
    pub apply_command: Option<Vec<String>>,

    /// Kill external commands still running after this many seconds.
    #[serde(default)]
    pub command_timeout_secs: Option<u64>,

    /// File name of the migration tool config written at the project root.
    #[serde(default = "default_artifact")]
    pub artifact: String,
}

/// Key-value storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct KvConfig {
    /// Storage directory.
    #[serde(default = "default_kv_dir")]
    pub dir: String,
}

/// Session cookie configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Cookie name.
    #[serde(default = "default_session_name")]
    pub name: String,

    /// Cookie sealing password.
    #[serde(default)]
    pub password: Option<Secret>,
}

/// OAuth provider configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OAuthConfig {
    /// GitHub OAuth application.
    #[serde(default)]
    pub github: GithubOAuthConfig,
}

/// GitHub OAuth application settings.
#[derive(Debug, Clone, Deserialize)]
pub struct GithubOAuthConfig {
    /// OAuth client id.
    #[serde(default)]
    pub client_id: Option<String>,

    /// OAuth client secret.
    #[serde(default)]
    pub client_secret: Option<Secret>,

    /// Authorization endpoint.
    #[serde(default = "default_github_authorization_url")]
    pub authorization_url: String,

    /// Token endpoint.
    #[serde(default = "default_github_token_url")]
    pub token_url: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "drydock_watch=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    3000
}

fn default_db_path() -> String {
    "data/db.sqlite".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    LocalSettings::default().busy_timeout_ms
}

fn default_pool_max_size() -> u32 {
    LocalSettings::default().pool_max_size
}

fn default_migrations_dir() -> String {
    "server/db/migrations".to_string()
}

fn default_schema_path() -> String {
    "server/db/tables.ts".to_string()
}

fn default_debounce_ms() -> u64 {
    drydock_watch::DEFAULT_DEBOUNCE.as_millis() as u64
}

fn default_generate_command() -> Vec<String> {
    ["npx", "drizzle-kit", "generate:sqlite"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_artifact() -> String {
    "drizzle.config.json".to_string()
}

fn default_kv_dir() -> String {
    "data/kv".to_string()
}

fn default_session_name() -> String {
    "drydock-session".to_string()
}

fn default_github_authorization_url() -> String {
    "https://github.com/login/oauth/authorize".to_string()
}

fn default_github_token_url() -> String {
    "https://github.com/login/oauth/access_token".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            development: false,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            pool_max_size: default_pool_max_size(),
            remote_url: None,
            remote_token: None,
            migrations: default_migrations_dir(),
            schema: default_schema_path(),
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            generate_command: default_generate_command(),
            apply_command: None,
            command_timeout_secs: None,
            artifact: default_artifact(),
        }
    }
}

impl Default for KvConfig {
    fn default() -> Self {
        Self {
            dir: default_kv_dir(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            name: default_session_name(),
            password: None,
        }
    }
}

impl Default for GithubOAuthConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            authorization_url: default_github_authorization_url(),
            token_url: default_github_token_url(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    FileRead {
        /// The config file path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// An environment override could not be parsed.
    #[error("invalid value {value:?} for {name}")]
    InvalidEnv {
        /// Variable name.
        name: &'static str,
        /// The rejected value.
        value: String,
    },

    /// `watch.generate_command` is empty.
    #[error("watch.generate_command must name a program")]
    EmptyGenerateCommand,

    /// `watch.apply_command` is set but empty.
    #[error("watch.apply_command must name a program when set")]
    EmptyApplyCommand,
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim(), "true" | "1" | "yes")
}

/// Loads configuration from a TOML file, falling back to defaults, then
/// applies environment overrides from the process environment.
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed, or
/// an override is malformed.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    load_config_with(path, |name| std::env::var(name).ok())
}

/// Like [`load_config`], reading overrides through `env`.
///
/// Environment variable overrides:
/// - `DRYDOCK_HOST` overrides `server.host`
/// - `DRYDOCK_PORT` overrides `server.port`
/// - `DRYDOCK_DB_PATH` overrides `database.path`
/// - `TURSO_DB_URL` / `TURSO_DB_TOKEN` override `database.remote_url` / `database.remote_token`
/// - `DRYDOCK_DEV` overrides `project.development`
/// - `DRYDOCK_SESSION_NAME` / `DRYDOCK_SESSION_PASSWORD` override `session.*`
/// - `DRYDOCK_GITHUB_CLIENT_ID` / `DRYDOCK_GITHUB_CLIENT_SECRET` override `oauth.github.*`
/// - `DRYDOCK_LOG_LEVEL` overrides `logging.level`
/// - `DRYDOCK_LOG_JSON` overrides `logging.json` (set to "true" to enable)
///
/// # Errors
///
/// Same as [`load_config`].
pub fn load_config_with<F>(path: Option<&Path>, env: F) -> Result<Config, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Config::default(),
            Err(source) => {
                return Err(ConfigError::FileRead {
                    path: p.to_path_buf(),
                    source,
                })
            }
        },
        None => Config::default(),
    };

    if let Some(host) = env("DRYDOCK_HOST") {
        config.server.host = host.parse().map_err(|_| ConfigError::InvalidEnv {
            name: "DRYDOCK_HOST",
            value: host.clone(),
        })?;
    }
    if let Some(port) = env("DRYDOCK_PORT") {
        config.server.port = port.parse().map_err(|_| ConfigError::InvalidEnv {
            name: "DRYDOCK_PORT",
            value: port.clone(),
        })?;
    }
    if let Some(db_path) = env("DRYDOCK_DB_PATH") {
        config.database.path = db_path;
    }
    if let Some(url) = env("TURSO_DB_URL") {
        config.database.remote_url = Some(url);
    }
    if let Some(token) = env("TURSO_DB_TOKEN") {
        config.database.remote_token = Some(Secret(token));
    }
    if let Some(dev) = env("DRYDOCK_DEV") {
        config.project.development = parse_flag(&dev);
    }
    if let Some(name) = env("DRYDOCK_SESSION_NAME") {
        config.session.name = name;
    }
    if let Some(password) = env("DRYDOCK_SESSION_PASSWORD") {
        config.session.password = Some(Secret(password));
    }
    if let Some(id) = env("DRYDOCK_GITHUB_CLIENT_ID") {
        config.oauth.github.client_id = Some(id);
    }
    if let Some(secret) = env("DRYDOCK_GITHUB_CLIENT_SECRET") {
        config.oauth.github.client_secret = Some(Secret(secret));
    }
    if let Some(level) = env("DRYDOCK_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = env("DRYDOCK_LOG_JSON") {
        config.logging.json = parse_flag(&json);
    }

    Ok(config)
}

/// Generates a throwaway 32-character session password.
pub fn generate_session_password() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let salt: u64 = rand::random();

    let mut hasher = Sha256::new();
    hasher.update(nanos.to_le_bytes());
    hasher.update(salt.to_le_bytes());
    let mut password = hex::encode(hasher.finalize());
    password.truncate(32);
    password
}

impl Config {
    /// The project root.
    pub fn root(&self) -> &Path {
        &self.project.root
    }

    /// Resolves a configured path against the project root.
    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.project.root.join(path)
        }
    }

    /// The local database file.
    pub fn database_path(&self) -> PathBuf {
        if self.database.path == ":memory:" {
            return PathBuf::from(":memory:");
        }
        self.resolve(&self.database.path)
    }

    /// The schema source file.
    pub fn schema_path(&self) -> PathBuf {
        self.resolve(&self.database.schema)
    }

    /// The migrations directory.
    pub fn migrations_dir(&self) -> PathBuf {
        self.resolve(&self.database.migrations)
    }

    /// The key-value storage directory.
    pub fn kv_dir(&self) -> PathBuf {
        self.resolve(&self.kv.dir)
    }

    /// The address the HTTP server binds to.
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.server.host, self.server.port)
    }

    /// Timeout applied to external commands.
    pub fn command_timeout(&self) -> Option<Duration> {
        self.watch.command_timeout_secs.map(Duration::from_secs)
    }

    /// Fills in a random session password when running in development
    /// without one. Returns `true` if a password was generated.
    pub fn ensure_session_password(&mut self) -> bool {
        let missing = self
            .session
            .password
            .as_ref()
            .map_or(true, |p| p.expose().is_empty());
        if missing && self.project.development {
            self.session.password = Some(Secret(generate_session_password()));
            true
        } else {
            false
        }
    }

    /// The snapshot the backend resolver selects from.
    pub fn resolver_settings(&self, edge: Option<Arc<dyn SqlBackend>>) -> ResolverSettings {
        ResolverSettings {
            remote_url: self.database.remote_url.clone(),
            remote_token: self
                .database
                .remote_token
                .as_ref()
                .map(|token| token.expose().to_string()),
            edge,
            local_path: self.database_path(),
            local: LocalSettings {
                busy_timeout_ms: self.database.busy_timeout_ms,
                pool_max_size: self.database.pool_max_size,
            },
            development: self.project.development,
        }
    }

    /// Settings for the schema watch workflow.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::EmptyGenerateCommand` if no generator is named.
    pub fn workflow_settings(&self) -> Result<WorkflowSettings, ConfigError> {
        let generate = CommandSpec::from_argv(&self.watch.generate_command)
            .ok_or(ConfigError::EmptyGenerateCommand)?;
        Ok(WorkflowSettings {
            root: self.project.root.clone(),
            schema_path: self.schema_path(),
            migrations_dir: self.migrations_dir(),
            artifact_name: self.watch.artifact.clone(),
            debounce: Duration::from_millis(self.watch.debounce_ms),
            generate,
        })
    }

    /// The external apply command, if one is configured.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::EmptyApplyCommand` if it is set but empty.
    pub fn apply_command(&self) -> Result<Option<CommandSpec>, ConfigError> {
        match &self.watch.apply_command {
            None => Ok(None),
            Some(argv) => CommandSpec::from_argv(argv)
                .map(Some)
                .ok_or(ConfigError::EmptyApplyCommand),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn missing_file_uses_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config =
            load_config_with(Some(&dir.path().join("absent.toml")), env_of(&[])).expect("load");

        assert_eq!(config.bind_addr().to_string(), "127.0.0.1:3000");
        assert_eq!(config.database.path, "data/db.sqlite");
        assert_eq!(config.database.schema, "server/db/tables.ts");
        assert_eq!(config.database.migrations, "server/db/migrations");
        assert_eq!(config.watch.debounce_ms, 200);
        assert_eq!(
            config.watch.generate_command,
            vec!["npx", "drizzle-kit", "generate:sqlite"]
        );
        assert_eq!(config.kv.dir, "data/kv");
        assert_eq!(config.session.name, "drydock-session");
        assert_eq!(
            config.oauth.github.authorization_url,
            "https://github.com/login/oauth/authorize"
        );
        assert!(!config.project.development);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn file_values_are_read() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("drydock.toml");
        std::fs::write(
            &path,
            r#"
                [project]
                root = "/srv/app"
                development = true

                [server]
                port = 8080

                [database]
                path = "var/app.sqlite"
                remote_url = "libsql://app.turso.io"
                remote_token = "tok"

                [watch]
                debounce_ms = 50
                generate_command = ["make", "migrations"]
                apply_command = ["make", "migrate"]
                command_timeout_secs = 30
            "#,
        )
        .unwrap();

        let config = load_config_with(Some(&path), env_of(&[])).expect("load");
        assert_eq!(config.server.port, 8080);
        assert!(config.project.development);
        assert_eq!(config.database_path(), PathBuf::from("/srv/app/var/app.sqlite"));
        assert_eq!(config.command_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(
            config.apply_command().unwrap(),
            Some(CommandSpec::new("make", ["migrate"]))
        );

        let workflow = config.workflow_settings().expect("workflow settings");
        assert_eq!(workflow.generate, CommandSpec::new("make", ["migrations"]));
        assert_eq!(workflow.debounce, Duration::from_millis(50));
        assert_eq!(workflow.schema_path, PathBuf::from("/srv/app/server/db/tables.ts"));
    }

    #[test]
    fn env_overrides_file_values() {
        let config = load_config_with(
            None,
            env_of(&[
                ("DRYDOCK_PORT", "4000"),
                ("DRYDOCK_HOST", "0.0.0.0"),
                ("DRYDOCK_DB_PATH", "/tmp/x/db.sqlite"),
                ("TURSO_DB_URL", "libsql://db.example"),
                ("TURSO_DB_TOKEN", "secret"),
                ("DRYDOCK_DEV", "true"),
                ("DRYDOCK_LOG_JSON", "1"),
            ]),
        )
        .expect("load");

        assert_eq!(config.bind_addr().to_string(), "0.0.0.0:4000");
        assert_eq!(config.database_path(), PathBuf::from("/tmp/x/db.sqlite"));
        assert!(config.project.development);
        assert!(config.logging.json);

        let settings = config.resolver_settings(None);
        assert_eq!(settings.remote_url.as_deref(), Some("libsql://db.example"));
        assert_eq!(settings.remote_token.as_deref(), Some("secret"));
    }

    #[test]
    fn malformed_port_is_rejected() {
        let err = load_config_with(None, env_of(&[("DRYDOCK_PORT", "eighty")]))
            .expect_err("should fail");
        assert!(matches!(err, ConfigError::InvalidEnv { name: "DRYDOCK_PORT", .. }));
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("drydock.toml");
        std::fs::write(&path, "[server\nport = ").unwrap();
        let err = load_config_with(Some(&path), env_of(&[])).expect_err("should fail");
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn secrets_are_redacted_in_debug_output() {
        let config = load_config_with(
            None,
            env_of(&[
                ("TURSO_DB_TOKEN", "hunter2"),
                ("DRYDOCK_SESSION_PASSWORD", "hunter3"),
            ]),
        )
        .expect("load");
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("hunter3"));
    }

    #[test]
    fn session_password_is_generated_only_in_development() {
        let mut production = Config::default();
        assert!(!production.ensure_session_password());
        assert!(production.session.password.is_none());

        let mut development = Config::default();
        development.project.development = true;
        assert!(development.ensure_session_password());
        let password = development.session.password.clone().expect("generated");
        assert_eq!(password.expose().len(), 32);
        assert!(password.expose().chars().all(|c| c.is_ascii_hexdigit()));

        assert!(!development.ensure_session_password(), "kept once set");
        assert_eq!(development.session.password, Some(password));
    }

    #[test]
    fn empty_commands_are_rejected() {
        let mut config = Config::default();
        config.watch.generate_command.clear();
        assert!(matches!(
            config.workflow_settings(),
            Err(ConfigError::EmptyGenerateCommand)
        ));

        config.watch.apply_command = Some(Vec::new());
        assert!(matches!(
            config.apply_command(),
            Err(ConfigError::EmptyApplyCommand)
        ));
    }
}
