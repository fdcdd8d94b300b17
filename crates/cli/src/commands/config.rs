use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use pedido_core::config::{AppConfig, LoadOptions};
use secrecy::{ExposeSecret, SecretString};
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let sources = Sources { doc: config_file_doc.as_ref(), path: config_file_path.as_deref() };

    let fields: Vec<(&str, &str, String)> = vec![
        ("database.url", "PEDIDO_DATABASE_URL", config.database.url.clone()),
        (
            "database.max_connections",
            "PEDIDO_DATABASE_MAX_CONNECTIONS",
            config.database.max_connections.to_string(),
        ),
        (
            "database.timeout_secs",
            "PEDIDO_DATABASE_TIMEOUT_SECS",
            config.database.timeout_secs.to_string(),
        ),
        ("nlu.provider", "PEDIDO_NLU_PROVIDER", config.nlu.provider.as_str().to_string()),
        ("nlu.model", "PEDIDO_NLU_MODEL", config.nlu.model.clone()),
        (
            "nlu.base_url",
            "PEDIDO_NLU_BASE_URL",
            config.nlu.base_url.clone().unwrap_or_else(|| "<unset>".to_string()),
        ),
        ("nlu.api_key", "PEDIDO_NLU_API_KEY", redact_secret(config.nlu.api_key.as_ref())),
        ("nlu.timeout_secs", "PEDIDO_NLU_TIMEOUT_SECS", config.nlu.timeout_secs.to_string()),
        (
            "channel.webhook_secret",
            "PEDIDO_CHANNEL_WEBHOOK_SECRET",
            redact_secret(config.channel.webhook_secret.as_ref()),
        ),
        (
            "channel.outbound_url",
            "PEDIDO_CHANNEL_OUTBOUND_URL",
            config.channel.outbound_url.clone().unwrap_or_else(|| "<log only>".to_string()),
        ),
        (
            "channel.idle_worker_secs",
            "PEDIDO_CHANNEL_IDLE_WORKER_SECS",
            config.channel.idle_worker_secs.to_string(),
        ),
        (
            "conversation.draft_recovery_window",
            "PEDIDO_CONVERSATION_DRAFT_RECOVERY_WINDOW",
            config.conversation.draft_recovery_window.to_string(),
        ),
        (
            "conversation.currency_symbol",
            "PEDIDO_CONVERSATION_CURRENCY_SYMBOL",
            config.conversation.currency_symbol.clone(),
        ),
        ("server.bind_address", "PEDIDO_SERVER_BIND_ADDRESS", config.server.bind_address.clone()),
        ("server.port", "PEDIDO_SERVER_PORT", config.server.port.to_string()),
        (
            "server.graceful_shutdown_secs",
            "PEDIDO_SERVER_GRACEFUL_SHUTDOWN_SECS",
            config.server.graceful_shutdown_secs.to_string(),
        ),
        ("logging.level", "PEDIDO_LOGGING_LEVEL", config.logging.level.clone()),
        ("logging.format", "PEDIDO_LOGGING_FORMAT", format!("{:?}", config.logging.format)),
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    lines.extend(
        fields
            .into_iter()
            .map(|(key, env_key, value)| render_line(key, &value, sources.of(key, env_key))),
    );
    lines.join("\n")
}

struct Sources<'a> {
    doc: Option<&'a Value>,
    path: Option<&'a Path>,
}

impl Sources<'_> {
    fn of(&self, key_path: &str, env_key: &str) -> String {
        if env::var_os(env_key).is_some() {
            return format!("env ({env_key})");
        }

        if let Some(doc) = self.doc {
            if contains_path(doc, key_path) {
                let file_path = self
                    .path
                    .map(|path| path.display().to_string())
                    .unwrap_or_else(|| "config file".to_string());
                return format!("file ({file_path})");
            }
        }

        "default".to_string()
    }
}

fn detect_config_path() -> Option<PathBuf> {
    ["pedido.toml", "config/pedido.toml"].into_iter().map(PathBuf::from).find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let raw = fs::read_to_string(path?).ok()?;
    raw.parse::<Value>().ok()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

fn redact_secret(secret: Option<&SecretString>) -> String {
    match secret {
        None => "<unset>".to_string(),
        Some(secret) if secret.expose_secret().trim().is_empty() => "<empty>".to_string(),
        Some(_) => "<redacted>".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;

    use super::{contains_path, redact_secret};

    #[test]
    fn secrets_never_render_their_value() {
        let secret = SecretString::from("sk-live-123".to_string());
        assert_eq!(redact_secret(Some(&secret)), "<redacted>");
        assert_eq!(redact_secret(None), "<unset>");
        assert_eq!(redact_secret(Some(&SecretString::from(" ".to_string()))), "<empty>");
    }

    #[test]
    fn nested_keys_are_found_in_the_file_document() {
        let doc: toml::Value = "[nlu]\nmodel = \"llama3.1\"\n".parse().expect("toml");
        assert!(contains_path(&doc, "nlu.model"));
        assert!(!contains_path(&doc, "nlu.api_key"));
        assert!(!contains_path(&doc, "server.port"));
    }
}
