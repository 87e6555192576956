use std::env;
use std::fs;
use std::path::Path;

use secrecy::ExposeSecret;
use shopkeep_core::config::{resolve_config_path, AppConfig, LoadOptions};
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = resolve_config_path(None);
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for entry in effective_values(&config) {
        let source = field_source(
            entry.key,
            entry.env_keys,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(entry.key, &entry.value, source));
    }

    lines.join("\n")
}

struct ConfigEntry {
    key: &'static str,
    env_keys: &'static [&'static str],
    value: String,
}

fn entry(key: &'static str, env_keys: &'static [&'static str], value: String) -> ConfigEntry {
    ConfigEntry { key, env_keys, value }
}

fn effective_values(config: &AppConfig) -> Vec<ConfigEntry> {
    let api_key = config
        .llm
        .api_key
        .as_ref()
        .map(|key| redact_token(key.expose_secret()))
        .unwrap_or_else(|| "<unset>".to_string());

    vec![
        entry("database.url", &["SHOPKEEP_DATABASE_URL"], config.database.url.clone()),
        entry(
            "database.max_connections",
            &["SHOPKEEP_DATABASE_MAX_CONNECTIONS"],
            config.database.max_connections.to_string(),
        ),
        entry(
            "database.timeout_secs",
            &["SHOPKEEP_DATABASE_TIMEOUT_SECS"],
            config.database.timeout_secs.to_string(),
        ),
        entry("llm.provider", &["SHOPKEEP_LLM_PROVIDER"], config.llm.provider.as_str().to_string()),
        entry("llm.model", &["SHOPKEEP_LLM_MODEL"], config.llm.model.clone()),
        entry("llm.base_url", &["SHOPKEEP_LLM_BASE_URL"], config.llm_base_url().to_string()),
        entry("llm.api_key", &["SHOPKEEP_LLM_API_KEY"], api_key),
        entry("llm.temperature", &["SHOPKEEP_LLM_TEMPERATURE"], config.llm.temperature.to_string()),
        entry(
            "llm.timeout_secs",
            &["SHOPKEEP_LLM_TIMEOUT_SECS"],
            config.llm.timeout_secs.to_string(),
        ),
        entry(
            "agent.max_reasoner_attempts",
            &["SHOPKEEP_AGENT_MAX_REASONER_ATTEMPTS"],
            config.agent.max_reasoner_attempts.to_string(),
        ),
        entry(
            "agent.max_graph_steps",
            &["SHOPKEEP_AGENT_MAX_GRAPH_STEPS"],
            config.agent.max_graph_steps.to_string(),
        ),
        entry(
            "agent.default_customer_id",
            &["SHOPKEEP_AGENT_DEFAULT_CUSTOMER_ID"],
            config.agent.default_customer_id.clone(),
        ),
        entry(
            "server.bind_address",
            &["SHOPKEEP_SERVER_BIND_ADDRESS"],
            config.server.bind_address.clone(),
        ),
        entry("server.port", &["SHOPKEEP_SERVER_PORT"], config.server.port.to_string()),
        entry(
            "server.graceful_shutdown_secs",
            &["SHOPKEEP_SERVER_GRACEFUL_SHUTDOWN_SECS"],
            config.server.graceful_shutdown_secs.to_string(),
        ),
        entry(
            "logging.level",
            &["SHOPKEEP_LOGGING_LEVEL", "SHOPKEEP_LOG_LEVEL"],
            config.logging.level.clone(),
        ),
        entry(
            "logging.format",
            &["SHOPKEEP_LOGGING_FORMAT", "SHOPKEEP_LOG_FORMAT"],
            format!("{:?}", config.logging.format).to_ascii_lowercase(),
        ),
    ]
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(Path::display)
                .map(|path| path.to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
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

fn redact_token(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Some((prefix, _)) = trimmed.split_once('-') {
        return format!("{prefix}-***");
    }

    "<redacted>".to_string()
}
