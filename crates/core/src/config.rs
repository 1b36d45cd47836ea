use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub slack: SlackConfig,
    pub lookup: LookupConfig,
    pub session: SessionConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
    pub persist_sessions: bool,
}

#[derive(Clone, Debug)]
pub struct SlackConfig {
    pub bot_token: SecretString,
    pub signing_secret: Option<SecretString>,
    pub api_base_url: String,
}

impl SlackConfig {
    pub fn has_bot_token(&self) -> bool {
        !self.bot_token.expose_secret().trim().is_empty()
    }
}

#[derive(Clone, Debug)]
pub struct LookupConfig {
    pub endpoint_url: String,
    pub api_key: Option<SecretString>,
    pub page_size: u32,
    pub timeout_secs: u64,
    pub cache_ttl_secs: u64,
    pub require_city: bool,
}

impl LookupConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub idle_timeout_secs: u64,
    pub turn_timeout_secs: u64,
    pub shards: usize,
    pub sweep_interval_secs: u64,
}

impl SessionConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn turn_timeout(&self) -> Duration {
        Duration::from_secs(self.turn_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub persist_sessions: Option<bool>,
    pub log_level: Option<String>,
    pub slack_bot_token: Option<String>,
    pub lookup_endpoint_url: Option<String>,
    pub server_port: Option<u16>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://cabbot.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
                persist_sessions: false,
            },
            slack: SlackConfig {
                bot_token: String::new().into(),
                signing_secret: None,
                api_base_url: "https://slack.com/api".to_string(),
            },
            lookup: LookupConfig {
                endpoint_url: "http://localhost:8090/drivers".to_string(),
                api_key: None,
                page_size: 5,
                timeout_secs: 20,
                cache_ttl_secs: 300,
                require_city: true,
            },
            session: SessionConfig {
                idle_timeout_secs: 1800,
                turn_timeout_secs: 45,
                shards: 16,
                sweep_interval_secs: 60,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("cabbot.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
            if let Some(persist_sessions) = database.persist_sessions {
                self.database.persist_sessions = persist_sessions;
            }
        }

        if let Some(slack) = patch.slack {
            if let Some(bot_token) = slack.bot_token {
                self.slack.bot_token = secret_value(bot_token);
            }
            if let Some(signing_secret) = slack.signing_secret {
                self.slack.signing_secret = Some(secret_value(signing_secret));
            }
            if let Some(api_base_url) = slack.api_base_url {
                self.slack.api_base_url = api_base_url;
            }
        }

        if let Some(lookup) = patch.lookup {
            if let Some(endpoint_url) = lookup.endpoint_url {
                self.lookup.endpoint_url = endpoint_url;
            }
            if let Some(api_key) = lookup.api_key {
                self.lookup.api_key = Some(secret_value(api_key));
            }
            if let Some(page_size) = lookup.page_size {
                self.lookup.page_size = page_size;
            }
            if let Some(timeout_secs) = lookup.timeout_secs {
                self.lookup.timeout_secs = timeout_secs;
            }
            if let Some(cache_ttl_secs) = lookup.cache_ttl_secs {
                self.lookup.cache_ttl_secs = cache_ttl_secs;
            }
            if let Some(require_city) = lookup.require_city {
                self.lookup.require_city = require_city;
            }
        }

        if let Some(session) = patch.session {
            if let Some(idle_timeout_secs) = session.idle_timeout_secs {
                self.session.idle_timeout_secs = idle_timeout_secs;
            }
            if let Some(turn_timeout_secs) = session.turn_timeout_secs {
                self.session.turn_timeout_secs = turn_timeout_secs;
            }
            if let Some(shards) = session.shards {
                self.session.shards = shards;
            }
            if let Some(sweep_interval_secs) = session.sweep_interval_secs {
                self.session.sweep_interval_secs = sweep_interval_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("CABBOT_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("CABBOT_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("CABBOT_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("CABBOT_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("CABBOT_DATABASE_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("CABBOT_DATABASE_PERSIST_SESSIONS") {
            self.database.persist_sessions =
                parse_bool("CABBOT_DATABASE_PERSIST_SESSIONS", &value)?;
        }

        let bot_token = read_env("CABBOT_SLACK_BOT_TOKEN").or_else(|| read_env("SLACK_BOT_TOKEN"));
        if let Some(value) = bot_token {
            self.slack.bot_token = secret_value(value);
        }
        let signing_secret =
            read_env("CABBOT_SLACK_SIGNING_SECRET").or_else(|| read_env("SLACK_SIGNING_SECRET"));
        if let Some(value) = signing_secret {
            self.slack.signing_secret = Some(secret_value(value));
        }
        if let Some(value) = read_env("CABBOT_SLACK_API_BASE_URL") {
            self.slack.api_base_url = value;
        }

        if let Some(value) = read_env("CABBOT_LOOKUP_ENDPOINT_URL") {
            self.lookup.endpoint_url = value;
        }
        if let Some(value) = read_env("CABBOT_LOOKUP_API_KEY") {
            self.lookup.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("CABBOT_LOOKUP_PAGE_SIZE") {
            self.lookup.page_size = parse_u32("CABBOT_LOOKUP_PAGE_SIZE", &value)?;
        }
        if let Some(value) = read_env("CABBOT_LOOKUP_TIMEOUT_SECS") {
            self.lookup.timeout_secs = parse_u64("CABBOT_LOOKUP_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("CABBOT_LOOKUP_CACHE_TTL_SECS") {
            self.lookup.cache_ttl_secs = parse_u64("CABBOT_LOOKUP_CACHE_TTL_SECS", &value)?;
        }
        if let Some(value) = read_env("CABBOT_LOOKUP_REQUIRE_CITY") {
            self.lookup.require_city = parse_bool("CABBOT_LOOKUP_REQUIRE_CITY", &value)?;
        }

        if let Some(value) = read_env("CABBOT_SESSION_IDLE_TIMEOUT_SECS") {
            self.session.idle_timeout_secs =
                parse_u64("CABBOT_SESSION_IDLE_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("CABBOT_SESSION_TURN_TIMEOUT_SECS") {
            self.session.turn_timeout_secs =
                parse_u64("CABBOT_SESSION_TURN_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("CABBOT_SESSION_SHARDS") {
            self.session.shards = parse_u32("CABBOT_SESSION_SHARDS", &value)? as usize;
        }
        if let Some(value) = read_env("CABBOT_SESSION_SWEEP_INTERVAL_SECS") {
            self.session.sweep_interval_secs =
                parse_u64("CABBOT_SESSION_SWEEP_INTERVAL_SECS", &value)?;
        }

        if let Some(value) = read_env("CABBOT_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("CABBOT_SERVER_PORT") {
            self.server.port = parse_u16("CABBOT_SERVER_PORT", &value)?;
        } else if let Some(value) = read_env("PORT") {
            self.server.port = parse_u16("PORT", &value)?;
        }
        if let Some(value) = read_env("CABBOT_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("CABBOT_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level = read_env("CABBOT_LOGGING_LEVEL").or_else(|| read_env("CABBOT_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("CABBOT_LOGGING_FORMAT").or_else(|| read_env("CABBOT_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(persist_sessions) = overrides.persist_sessions {
            self.database.persist_sessions = persist_sessions;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(slack_bot_token) = overrides.slack_bot_token {
            self.slack.bot_token = secret_value(slack_bot_token);
        }
        if let Some(endpoint_url) = overrides.lookup_endpoint_url {
            self.lookup.endpoint_url = endpoint_url;
        }
        if let Some(port) = overrides.server_port {
            self.server.port = port;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_slack(&self.slack)?;
        validate_lookup(&self.lookup)?;
        validate_session(&self.session, &self.lookup)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("cabbot.toml"), PathBuf::from("config/cabbot.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_slack(slack: &SlackConfig) -> Result<(), ConfigError> {
    // An empty bot token is allowed: replies then only flow through the HTTP responses.
    let bot_token = slack.bot_token.expose_secret();
    if !bot_token.is_empty() && !bot_token.starts_with("xoxb-") {
        let hint = if bot_token.starts_with("xapp-") {
            " (hint: you may have used an app-level token instead of the bot token)"
        } else {
            ""
        };
        return Err(ConfigError::Validation(format!(
            "slack.bot_token must start with `xoxb-`{hint}. Get it from https://api.slack.com/apps > Your App > OAuth & Permissions"
        )));
    }

    if let Some(signing_secret) = &slack.signing_secret {
        if signing_secret.expose_secret().trim().is_empty() {
            return Err(ConfigError::Validation(
                "slack.signing_secret must not be blank when set".to_string(),
            ));
        }
    }

    if !is_http_url(&slack.api_base_url) {
        return Err(ConfigError::Validation(
            "slack.api_base_url must start with http:// or https://".to_string(),
        ));
    }

    Ok(())
}

fn validate_lookup(lookup: &LookupConfig) -> Result<(), ConfigError> {
    if !is_http_url(&lookup.endpoint_url) {
        return Err(ConfigError::Validation(
            "lookup.endpoint_url must start with http:// or https://".to_string(),
        ));
    }

    if lookup.page_size == 0 || lookup.page_size > 50 {
        return Err(ConfigError::Validation("lookup.page_size must be in range 1..=50".to_string()));
    }

    if lookup.timeout_secs == 0 || lookup.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "lookup.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_session(session: &SessionConfig, lookup: &LookupConfig) -> Result<(), ConfigError> {
    if session.idle_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "session.idle_timeout_secs must be greater than zero".to_string(),
        ));
    }

    if session.turn_timeout_secs < lookup.timeout_secs {
        return Err(ConfigError::Validation(format!(
            "session.turn_timeout_secs ({}) must be at least lookup.timeout_secs ({})",
            session.turn_timeout_secs, lookup.timeout_secs
        )));
    }

    if session.shards == 0 || session.shards > 256 {
        return Err(ConfigError::Validation("session.shards must be in range 1..=256".to_string()));
    }

    if session.sweep_interval_secs == 0 {
        return Err(ConfigError::Validation(
            "session.sweep_interval_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    slack: Option<SlackPatch>,
    lookup: Option<LookupPatch>,
    session: Option<SessionPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
    persist_sessions: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct SlackPatch {
    bot_token: Option<String>,
    signing_secret: Option<String>,
    api_base_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LookupPatch {
    endpoint_url: Option<String>,
    api_key: Option<String>,
    page_size: Option<u32>,
    timeout_secs: Option<u64>,
    cache_ttl_secs: Option<u64>,
    require_city: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct SessionPatch {
    idle_timeout_secs: Option<u64>,
    turn_timeout_secs: Option<u64>,
    shards: Option<usize>,
    sweep_interval_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
