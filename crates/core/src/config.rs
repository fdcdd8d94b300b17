use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub nlu: NluConfig,
    pub channel: ChannelConfig,
    pub conversation: ConversationConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct NluConfig {
    pub provider: NluProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ChannelConfig {
    pub webhook_secret: Option<SecretString>,
    pub outbound_url: Option<String>,
    pub idle_worker_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ConversationConfig {
    /// Newest turns scanned when looking for a pending draft.
    pub draft_recovery_window: usize,
    pub currency_symbol: String,
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
pub enum NluProvider {
    #[serde(rename = "openai")]
    OpenAi,
    Ollama,
}

impl NluProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Ollama => "ollama",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            Self::OpenAi => "https://api.openai.com",
            Self::Ollama => "http://localhost:11434",
        }
    }
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
    pub log_level: Option<String>,
    pub nlu_provider: Option<NluProvider>,
    pub nlu_model: Option<String>,
    pub nlu_api_key: Option<String>,
    pub channel_webhook_secret: Option<String>,
    pub channel_outbound_url: Option<String>,
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
                url: "sqlite://pedido.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            nlu: NluConfig {
                provider: NluProvider::Ollama,
                api_key: None,
                base_url: Some(NluProvider::Ollama.default_base_url().to_string()),
                model: "llama3.1".to_string(),
                timeout_secs: 30,
            },
            channel: ChannelConfig {
                webhook_secret: None,
                outbound_url: None,
                idle_worker_secs: 300,
            },
            conversation: ConversationConfig {
                draft_recovery_window: 200,
                currency_symbol: "$".to_string(),
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

impl std::str::FromStr for NluProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported nlu provider `{other}` (expected openai|ollama)"
            ))),
        }
    }
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
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("pedido.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    /// Base URL the NLU client talks to, falling back to the provider default.
    pub fn nlu_base_url(&self) -> String {
        self.nlu
            .base_url
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(self.nlu.provider.default_base_url())
            .trim_end_matches('/')
            .to_string()
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
        }

        if let Some(nlu) = patch.nlu {
            if let Some(provider) = nlu.provider {
                self.nlu.provider = provider;
            }
            if let Some(api_key) = nlu.api_key {
                self.nlu.api_key = Some(secret_value(api_key));
            }
            if let Some(base_url) = nlu.base_url {
                self.nlu.base_url = Some(base_url);
            }
            if let Some(model) = nlu.model {
                self.nlu.model = model;
            }
            if let Some(timeout_secs) = nlu.timeout_secs {
                self.nlu.timeout_secs = timeout_secs;
            }
        }

        if let Some(channel) = patch.channel {
            if let Some(webhook_secret) = channel.webhook_secret {
                self.channel.webhook_secret = Some(secret_value(webhook_secret));
            }
            if let Some(outbound_url) = channel.outbound_url {
                self.channel.outbound_url = Some(outbound_url);
            }
            if let Some(idle_worker_secs) = channel.idle_worker_secs {
                self.channel.idle_worker_secs = idle_worker_secs;
            }
        }

        if let Some(conversation) = patch.conversation {
            if let Some(window) = conversation.draft_recovery_window {
                self.conversation.draft_recovery_window = window;
            }
            if let Some(currency_symbol) = conversation.currency_symbol {
                self.conversation.currency_symbol = currency_symbol;
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
        if let Some(value) = read_env("PEDIDO_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("PEDIDO_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("PEDIDO_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("PEDIDO_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("PEDIDO_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("PEDIDO_NLU_PROVIDER") {
            self.nlu.provider = value.parse()?;
        }
        if let Some(value) = read_env("PEDIDO_NLU_API_KEY") {
            self.nlu.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("PEDIDO_NLU_BASE_URL") {
            self.nlu.base_url = Some(value);
        }
        if let Some(value) = read_env("PEDIDO_NLU_MODEL") {
            self.nlu.model = value;
        }
        if let Some(value) = read_env("PEDIDO_NLU_TIMEOUT_SECS") {
            self.nlu.timeout_secs = parse_u64("PEDIDO_NLU_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("PEDIDO_CHANNEL_WEBHOOK_SECRET") {
            self.channel.webhook_secret = Some(secret_value(value));
        }
        if let Some(value) = read_env("PEDIDO_CHANNEL_OUTBOUND_URL") {
            self.channel.outbound_url = Some(value);
        }
        if let Some(value) = read_env("PEDIDO_CHANNEL_IDLE_WORKER_SECS") {
            self.channel.idle_worker_secs = parse_u64("PEDIDO_CHANNEL_IDLE_WORKER_SECS", &value)?;
        }

        if let Some(value) = read_env("PEDIDO_CONVERSATION_DRAFT_RECOVERY_WINDOW") {
            self.conversation.draft_recovery_window =
                parse_usize("PEDIDO_CONVERSATION_DRAFT_RECOVERY_WINDOW", &value)?;
        }
        if let Some(value) = read_env("PEDIDO_CONVERSATION_CURRENCY_SYMBOL") {
            self.conversation.currency_symbol = value;
        }

        if let Some(value) = read_env("PEDIDO_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("PEDIDO_SERVER_PORT") {
            self.server.port = parse_u16("PEDIDO_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("PEDIDO_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("PEDIDO_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level = read_env("PEDIDO_LOGGING_LEVEL").or_else(|| read_env("PEDIDO_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("PEDIDO_LOGGING_FORMAT").or_else(|| read_env("PEDIDO_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(provider) = overrides.nlu_provider {
            self.nlu.provider = provider;
        }
        if let Some(model) = overrides.nlu_model {
            self.nlu.model = model;
        }
        if let Some(api_key) = overrides.nlu_api_key {
            self.nlu.api_key = Some(secret_value(api_key));
        }
        if let Some(webhook_secret) = overrides.channel_webhook_secret {
            self.channel.webhook_secret = Some(secret_value(webhook_secret));
        }
        if let Some(outbound_url) = overrides.channel_outbound_url {
            self.channel.outbound_url = Some(outbound_url);
        }
        if let Some(port) = overrides.server_port {
            self.server.port = port;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_nlu(&self.nlu)?;
        validate_channel(&self.channel)?;
        validate_conversation(&self.conversation)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("pedido.toml"), PathBuf::from("config/pedido.toml")]
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

fn validate_nlu(nlu: &NluConfig) -> Result<(), ConfigError> {
    if nlu.timeout_secs == 0 || nlu.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "nlu.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if nlu.model.trim().is_empty() {
        return Err(ConfigError::Validation("nlu.model must not be empty".to_string()));
    }

    match nlu.provider {
        NluProvider::OpenAi => {
            let missing = nlu
                .api_key
                .as_ref()
                .map(|value| value.expose_secret().trim().is_empty())
                .unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "nlu.api_key is required for the openai provider".to_string(),
                ));
            }
        }
        NluProvider::Ollama => {
            let missing =
                nlu.base_url.as_ref().map(|value| value.trim().is_empty()).unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "nlu.base_url is required for the ollama provider".to_string(),
                ));
            }
        }
    }

    if let Some(base_url) = &nlu.base_url {
        require_http_url("nlu.base_url", base_url)?;
    }

    Ok(())
}

fn validate_channel(channel: &ChannelConfig) -> Result<(), ConfigError> {
    if channel.idle_worker_secs == 0 {
        return Err(ConfigError::Validation(
            "channel.idle_worker_secs must be greater than zero".to_string(),
        ));
    }

    if let Some(outbound_url) = &channel.outbound_url {
        require_http_url("channel.outbound_url", outbound_url)?;
    }

    if let Some(secret) = &channel.webhook_secret {
        if secret.expose_secret().trim().is_empty() {
            return Err(ConfigError::Validation(
                "channel.webhook_secret must not be blank when set".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_conversation(conversation: &ConversationConfig) -> Result<(), ConfigError> {
    if conversation.draft_recovery_window == 0 {
        return Err(ConfigError::Validation(
            "conversation.draft_recovery_window must be at least 1".to_string(),
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

fn require_http_url(key: &str, value: &str) -> Result<(), ConfigError> {
    let value = value.trim();
    if value.starts_with("http://") || value.starts_with("https://") {
        Ok(())
    } else {
        Err(ConfigError::Validation(format!("{key} must start with http:// or https://")))
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

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.parse::<usize>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    nlu: Option<NluPatch>,
    channel: Option<ChannelPatch>,
    conversation: Option<ConversationPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct NluPatch {
    provider: Option<NluProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ChannelPatch {
    webhook_secret: Option<String>,
    outbound_url: Option<String>,
    idle_worker_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ConversationPatch {
    draft_recovery_window: Option<usize>,
    currency_symbol: Option<String>,
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

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat, NluProvider};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn defaults_load_without_file_or_env() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let config = AppConfig::load(LoadOptions {
            config_path: Some("does-not-exist.toml".into()),
            ..LoadOptions::default()
        })
        .map_err(|err| format!("config load failed: {err}"))?;

        ensure(config.nlu.provider == NluProvider::Ollama, "default provider is ollama")?;
        ensure(config.nlu_base_url() == "http://localhost:11434", "ollama default base url")?;
        ensure(config.conversation.draft_recovery_window == 200, "default recovery window")?;
        ensure(config.conversation.currency_symbol == "$", "default currency symbol")?;
        ensure(config.channel.outbound_url.is_none(), "no outbound url by default")?;
        ensure(matches!(config.logging.format, LogFormat::Compact), "compact logging by default")
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_PEDIDO_NLU_KEY", "sk-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("pedido.toml");
            fs::write(
                &path,
                r#"
[nlu]
provider = "openai"
api_key = "${TEST_PEDIDO_NLU_KEY}"
model = "gpt-4o-mini"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.nlu.provider == NluProvider::OpenAi, "provider should come from file")?;
            ensure(
                config
                    .nlu
                    .api_key
                    .as_ref()
                    .map(|key| key.expose_secret() == "sk-from-env")
                    .unwrap_or(false),
                "api key should be interpolated from environment",
            )?;
            ensure(config.nlu.model == "gpt-4o-mini", "model should come from file")?;
            Ok(())
        })();

        clear_vars(&["TEST_PEDIDO_NLU_KEY"]);
        result
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("PEDIDO_LOG_LEVEL", "warn");
        env::set_var("PEDIDO_LOG_FORMAT", "json");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Json),
                "json logging format should be set from env var",
            )?;
            Ok(())
        })();

        clear_vars(&["PEDIDO_LOG_LEVEL", "PEDIDO_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("PEDIDO_DATABASE_URL", "sqlite://from-env.db");
        env::set_var("PEDIDO_CONVERSATION_DRAFT_RECOVERY_WINDOW", "50");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("pedido.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://from-file.db"

[conversation]
draft_recovery_window = 10
currency_symbol = "ARS "

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    database_url: Some("sqlite://from-override.db".to_string()),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://from-override.db",
                "override database url should win",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(
                config.conversation.draft_recovery_window == 50,
                "env recovery window should win over file",
            )?;
            ensure(
                config.conversation.currency_symbol == "ARS ",
                "file currency symbol should win over defaults",
            )?;
            Ok(())
        })();

        clear_vars(&["PEDIDO_DATABASE_URL", "PEDIDO_CONVERSATION_DRAFT_RECOVERY_WINDOW"]);
        result
    }

    #[test]
    fn openai_without_api_key_fails_validation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("PEDIDO_NLU_PROVIDER", "openai");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("nlu.api_key")
            );
            ensure(has_message, "validation failure should mention nlu.api_key")
        })();

        clear_vars(&["PEDIDO_NLU_PROVIDER"]);
        result
    }

    #[test]
    fn invalid_numeric_env_override_is_reported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("PEDIDO_CHANNEL_IDLE_WORKER_SECS", "soon");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => return Err("expected override failure".to_string()),
                Err(error) => error,
            };
            ensure(
                matches!(
                    error,
                    ConfigError::InvalidEnvOverride { ref key, .. }
                        if key == "PEDIDO_CHANNEL_IDLE_WORKER_SECS"
                ),
                "error should name the offending variable",
            )
        })();

        clear_vars(&["PEDIDO_CHANNEL_IDLE_WORKER_SECS"]);
        result
    }

    #[test]
    fn zero_recovery_window_and_bad_outbound_url_are_rejected() -> Result<(), String> {
        let mut config = AppConfig::default();
        config.conversation.draft_recovery_window = 0;
        ensure(config.validate().is_err(), "zero window must be rejected")?;

        let mut config = AppConfig::default();
        config.channel.outbound_url = Some("ftp://example.com/send".to_string());
        let rejected = matches!(
            config.validate(),
            Err(ConfigError::Validation(ref message)) if message.contains("channel.outbound_url")
        );
        ensure(rejected, "non-http outbound url must be rejected")
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("PEDIDO_NLU_API_KEY", "sk-secret-value");
        env::set_var("PEDIDO_CHANNEL_WEBHOOK_SECRET", "whsec-secret-value");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(!debug.contains("sk-secret-value"), "debug output should not contain api key")?;
            ensure(
                !debug.contains("whsec-secret-value"),
                "debug output should not contain webhook secret",
            )?;
            Ok(())
        })();

        clear_vars(&["PEDIDO_NLU_API_KEY", "PEDIDO_CHANNEL_WEBHOOK_SECRET"]);
        result
    }
}
