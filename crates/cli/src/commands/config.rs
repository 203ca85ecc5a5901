use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use tally_core::config::{AppConfig, LoadOptions};
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let source = |key_path: &str, env_key: Option<&str>| {
        field_source(key_path, env_key, config_file_doc.as_ref(), config_file_path.as_deref())
    };

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];

    lines.push(render_line(
        "llm.base_url",
        &config.llm.base_url,
        source("llm.base_url", Some("TALLY_LLM_BASE_URL")),
    ));
    lines.push(render_line(
        "llm.model",
        &config.llm.model,
        source("llm.model", Some("TALLY_LLM_MODEL")),
    ));

    lines.push(render_line(
        "governor.per_call_timeout_secs",
        &config.governor.per_call_timeout_secs.to_string(),
        source("governor.per_call_timeout_secs", Some("TALLY_GOVERNOR_PER_CALL_TIMEOUT_SECS")),
    ));
    lines.push(render_line(
        "governor.window_secs",
        &config.governor.window_secs.to_string(),
        source("governor.window_secs", Some("TALLY_GOVERNOR_WINDOW_SECS")),
    ));
    lines.push(render_line(
        "governor.tenant_requests_per_window",
        &config.governor.tenant_requests_per_window.to_string(),
        source(
            "governor.tenant_requests_per_window",
            Some("TALLY_GOVERNOR_TENANT_REQUESTS_PER_WINDOW"),
        ),
    ));
    lines.push(render_line(
        "governor.user_requests_per_window",
        &config.governor.user_requests_per_window.to_string(),
        source(
            "governor.user_requests_per_window",
            Some("TALLY_GOVERNOR_USER_REQUESTS_PER_WINDOW"),
        ),
    ));
    lines.push(render_line(
        "governor.cache_ttl_secs",
        &config.governor.cache_ttl_secs.to_string(),
        source("governor.cache_ttl_secs", Some("TALLY_GOVERNOR_CACHE_TTL_SECS")),
    ));
    lines.push(render_line(
        "governor.cache_capacity",
        &config.governor.cache_capacity.to_string(),
        source("governor.cache_capacity", None),
    ));
    lines.push(render_line(
        "governor.breaker_failure_threshold",
        &config.governor.breaker_failure_threshold.to_string(),
        source("governor.breaker_failure_threshold", None),
    ));
    lines.push(render_line(
        "governor.breaker_cooldown_secs",
        &config.governor.breaker_cooldown_secs.to_string(),
        source("governor.breaker_cooldown_secs", None),
    ));

    lines.push(render_line(
        "pipeline.run_budget_secs",
        &config.pipeline.run_budget_secs.to_string(),
        source("pipeline.run_budget_secs", Some("TALLY_PIPELINE_RUN_BUDGET_SECS")),
    ));
    lines.push(render_line(
        "pipeline.max_refinements",
        &config.pipeline.max_refinements.to_string(),
        source("pipeline.max_refinements", Some("TALLY_PIPELINE_MAX_REFINEMENTS")),
    ));
    lines.push(render_line(
        "pipeline.retriever_timeout_secs",
        &config.pipeline.retriever_timeout_secs.to_string(),
        source("pipeline.retriever_timeout_secs", None),
    ));
    lines.push(render_line(
        "pipeline.criterion_timeout_secs",
        &config.pipeline.criterion_timeout_secs.to_string(),
        source("pipeline.criterion_timeout_secs", None),
    ));

    for (name, rule) in [
        ("sms", &config.channels.sms),
        ("chat", &config.channels.chat),
        ("email", &config.channels.email),
    ] {
        let ceiling = rule
            .max_chars
            .map(|ceiling| ceiling.to_string())
            .unwrap_or_else(|| "<none>".to_string());
        lines.push(render_line(
            &format!("channels.{name}"),
            &format!("markup={:?} max_chars={ceiling}", rule.markup),
            source(&format!("channels.{name}"), None),
        ));
    }

    for tenant in &config.tenants {
        lines.push(render_line(
            &format!("tenants.{}", tenant.id),
            "api_key=<redacted>",
            source("tenants", None),
        ));
    }
    if config.tenants.is_empty() {
        lines.push(render_line("tenants", "<none configured>", "default".to_string()));
    }

    lines.push(render_line(
        "logging.level",
        &config.logging.level,
        source("logging.level", Some("TALLY_LOGGING_LEVEL")),
    ));
    lines.push(render_line(
        "logging.format",
        &format!("{:?}", config.logging.format),
        source("logging.format", Some("TALLY_LOGGING_FORMAT")),
    ));

    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    let root = PathBuf::from("tally.toml");
    if root.exists() {
        return Some(root);
    }

    let nested = PathBuf::from("config/tally.toml");
    if nested.exists() {
        return Some(nested);
    }

    None
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: Option<&str>,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_key {
        if env::var_os(env_key).is_some() {
            return format!("env ({env_key})");
        }
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(doc: &Value, key_path: &str) -> bool {
    let mut cursor = doc;
    for segment in key_path.split('.') {
        match cursor.get(segment) {
            Some(next) => cursor = next,
            None => return false,
        }
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("  {key} = {value}  [{source}]")
}
