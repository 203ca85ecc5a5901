use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::request::Channel;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub governor: GovernorConfig,
    pub pipeline: PipelineConfig,
    pub channels: ChannelsConfig,
    pub tenants: Vec<TenantCredentialConfig>,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    /// OpenAI-compatible chat completions endpoint base.
    pub base_url: String,
    pub model: String,
}

#[derive(Clone, Debug)]
pub struct GovernorConfig {
    pub per_call_timeout_secs: u64,
    pub window_secs: u64,
    pub tenant_requests_per_window: u32,
    pub user_requests_per_window: u32,
    pub cache_ttl_secs: u64,
    pub cache_capacity: usize,
    pub breaker_failure_threshold: u32,
    pub breaker_success_threshold: u32,
    pub breaker_cooldown_secs: u64,
    /// Micro-USD per 1K tokens, keyed by model name. Unknown models record
    /// zero cost rather than failing the call.
    pub model_costs: BTreeMap<String, ModelCostConfig>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelCostConfig {
    pub prompt_micro_usd_per_1k: u64,
    pub completion_micro_usd_per_1k: u64,
}

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// End-to-end wall-clock budget for one run, checked at stage boundaries.
    pub run_budget_secs: u64,
    /// Fixed at 1 by design; exposed as configuration per the external
    /// interface contract.
    pub max_refinements: u32,
    pub retriever_timeout_secs: u64,
    pub criterion_timeout_secs: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkupPolicy {
    /// Remove all markup (plain-text channels).
    Strip,
    /// Keep emphasis only, strip everything else.
    Reduced,
    /// Keep structural markup untouched.
    Preserve,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelRuleConfig {
    pub markup: MarkupPolicy,
    /// Character ceiling per part. Splitting never breaks mid-sentence, so a
    /// single oversize sentence may exceed this.
    pub max_chars: Option<usize>,
}

#[derive(Clone, Debug)]
pub struct ChannelsConfig {
    pub sms: ChannelRuleConfig,
    pub chat: ChannelRuleConfig,
    pub email: ChannelRuleConfig,
}

impl Default for ChannelsConfig {
    fn default() -> Self {
        Self {
            sms: ChannelRuleConfig { markup: MarkupPolicy::Strip, max_chars: Some(160) },
            chat: ChannelRuleConfig { markup: MarkupPolicy::Reduced, max_chars: None },
            email: ChannelRuleConfig { markup: MarkupPolicy::Preserve, max_chars: None },
        }
    }
}

impl ChannelsConfig {
    pub fn rule_for(&self, channel: Channel) -> &ChannelRuleConfig {
        match channel {
            Channel::Sms => &self.sms,
            Channel::Chat => &self.chat,
            Channel::Email => &self.email,
        }
    }
}

#[derive(Clone, Debug)]
pub struct TenantCredentialConfig {
    pub id: String,
    pub api_key: SecretString,
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
    pub llm_base_url: Option<String>,
    pub llm_model: Option<String>,
    pub run_budget_secs: Option<u64>,
    pub max_refinements: Option<u32>,
    pub log_level: Option<String>,
    /// (tenant id, api key) pairs; replaces the configured tenant set when
    /// non-empty.
    pub tenant_credentials: Vec<(String, String)>,
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
            llm: LlmConfig {
                base_url: "http://localhost:11434/v1".to_string(),
                model: "llama3.1".to_string(),
            },
            governor: GovernorConfig {
                per_call_timeout_secs: 20,
                window_secs: 60,
                tenant_requests_per_window: 60,
                user_requests_per_window: 20,
                cache_ttl_secs: 300,
                cache_capacity: 512,
                breaker_failure_threshold: 5,
                breaker_success_threshold: 2,
                breaker_cooldown_secs: 30,
                model_costs: BTreeMap::new(),
            },
            pipeline: PipelineConfig {
                run_budget_secs: 30,
                max_refinements: 1,
                retriever_timeout_secs: 10,
                criterion_timeout_secs: 8,
            },
            channels: ChannelsConfig::default(),
            tenants: Vec::new(),
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

impl std::str::FromStr for MarkupPolicy {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "strip" => Ok(Self::Strip),
            "reduced" => Ok(Self::Reduced),
            "preserve" => Ok(Self::Preserve),
            other => Err(ConfigError::Validation(format!(
                "unsupported markup policy `{other}` (expected strip|reduced|preserve)"
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
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("tally.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(llm) = patch.llm {
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = base_url;
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
        }

        if let Some(governor) = patch.governor {
            if let Some(per_call_timeout_secs) = governor.per_call_timeout_secs {
                self.governor.per_call_timeout_secs = per_call_timeout_secs;
            }
            if let Some(window_secs) = governor.window_secs {
                self.governor.window_secs = window_secs;
            }
            if let Some(tenant_requests_per_window) = governor.tenant_requests_per_window {
                self.governor.tenant_requests_per_window = tenant_requests_per_window;
            }
            if let Some(user_requests_per_window) = governor.user_requests_per_window {
                self.governor.user_requests_per_window = user_requests_per_window;
            }
            if let Some(cache_ttl_secs) = governor.cache_ttl_secs {
                self.governor.cache_ttl_secs = cache_ttl_secs;
            }
            if let Some(cache_capacity) = governor.cache_capacity {
                self.governor.cache_capacity = cache_capacity;
            }
            if let Some(breaker_failure_threshold) = governor.breaker_failure_threshold {
                self.governor.breaker_failure_threshold = breaker_failure_threshold;
            }
            if let Some(breaker_success_threshold) = governor.breaker_success_threshold {
                self.governor.breaker_success_threshold = breaker_success_threshold;
            }
            if let Some(breaker_cooldown_secs) = governor.breaker_cooldown_secs {
                self.governor.breaker_cooldown_secs = breaker_cooldown_secs;
            }
            if let Some(model_costs) = governor.model_costs {
                self.governor.model_costs = model_costs;
            }
        }

        if let Some(pipeline) = patch.pipeline {
            if let Some(run_budget_secs) = pipeline.run_budget_secs {
                self.pipeline.run_budget_secs = run_budget_secs;
            }
            if let Some(max_refinements) = pipeline.max_refinements {
                self.pipeline.max_refinements = max_refinements;
            }
            if let Some(retriever_timeout_secs) = pipeline.retriever_timeout_secs {
                self.pipeline.retriever_timeout_secs = retriever_timeout_secs;
            }
            if let Some(criterion_timeout_secs) = pipeline.criterion_timeout_secs {
                self.pipeline.criterion_timeout_secs = criterion_timeout_secs;
            }
        }

        if let Some(channels) = patch.channels {
            apply_channel_patch(&mut self.channels.sms, channels.sms);
            apply_channel_patch(&mut self.channels.chat, channels.chat);
            apply_channel_patch(&mut self.channels.email, channels.email);
        }

        if let Some(tenants) = patch.tenants {
            self.tenants = tenants
                .into_iter()
                .map(|tenant| TenantCredentialConfig {
                    id: tenant.id,
                    api_key: secret_value(tenant.api_key),
                })
                .collect();
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
        if let Some(value) = read_env("TALLY_LLM_BASE_URL") {
            self.llm.base_url = value;
        }
        if let Some(value) = read_env("TALLY_LLM_MODEL") {
            self.llm.model = value;
        }

        if let Some(value) = read_env("TALLY_GOVERNOR_PER_CALL_TIMEOUT_SECS") {
            self.governor.per_call_timeout_secs =
                parse_u64("TALLY_GOVERNOR_PER_CALL_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("TALLY_GOVERNOR_WINDOW_SECS") {
            self.governor.window_secs = parse_u64("TALLY_GOVERNOR_WINDOW_SECS", &value)?;
        }
        if let Some(value) = read_env("TALLY_GOVERNOR_TENANT_REQUESTS_PER_WINDOW") {
            self.governor.tenant_requests_per_window =
                parse_u32("TALLY_GOVERNOR_TENANT_REQUESTS_PER_WINDOW", &value)?;
        }
        if let Some(value) = read_env("TALLY_GOVERNOR_USER_REQUESTS_PER_WINDOW") {
            self.governor.user_requests_per_window =
                parse_u32("TALLY_GOVERNOR_USER_REQUESTS_PER_WINDOW", &value)?;
        }
        if let Some(value) = read_env("TALLY_GOVERNOR_CACHE_TTL_SECS") {
            self.governor.cache_ttl_secs = parse_u64("TALLY_GOVERNOR_CACHE_TTL_SECS", &value)?;
        }

        if let Some(value) = read_env("TALLY_PIPELINE_RUN_BUDGET_SECS") {
            self.pipeline.run_budget_secs = parse_u64("TALLY_PIPELINE_RUN_BUDGET_SECS", &value)?;
        }
        if let Some(value) = read_env("TALLY_PIPELINE_MAX_REFINEMENTS") {
            self.pipeline.max_refinements = parse_u32("TALLY_PIPELINE_MAX_REFINEMENTS", &value)?;
        }

        if let Some(value) = read_env("TALLY_CHANNELS_SMS_MAX_CHARS") {
            self.channels.sms.max_chars =
                Some(parse_usize("TALLY_CHANNELS_SMS_MAX_CHARS", &value)?);
        }

        let log_level = read_env("TALLY_LOGGING_LEVEL").or_else(|| read_env("TALLY_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format = read_env("TALLY_LOGGING_FORMAT").or_else(|| read_env("TALLY_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(llm_base_url) = overrides.llm_base_url {
            self.llm.base_url = llm_base_url;
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(run_budget_secs) = overrides.run_budget_secs {
            self.pipeline.run_budget_secs = run_budget_secs;
        }
        if let Some(max_refinements) = overrides.max_refinements {
            self.pipeline.max_refinements = max_refinements;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if !overrides.tenant_credentials.is_empty() {
            self.tenants = overrides
                .tenant_credentials
                .into_iter()
                .map(|(id, api_key)| TenantCredentialConfig {
                    id,
                    api_key: secret_value(api_key),
                })
                .collect();
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_llm(&self.llm)?;
        validate_governor(&self.governor)?;
        validate_pipeline(&self.pipeline)?;
        validate_channels(&self.channels)?;
        validate_tenants(&self.tenants)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn apply_channel_patch(rule: &mut ChannelRuleConfig, patch: Option<ChannelRulePatch>) {
    let Some(patch) = patch else {
        return;
    };
    if let Some(markup) = patch.markup {
        rule.markup = markup;
    }
    if let Some(max_chars) = patch.max_chars {
        rule.max_chars = Some(max_chars);
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("tally.toml"), PathBuf::from("config/tally.toml")]
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

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    let base_url = llm.base_url.trim();
    if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
        return Err(ConfigError::Validation(
            "llm.base_url must start with http:// or https://".to_string(),
        ));
    }

    if llm.model.trim().is_empty() {
        return Err(ConfigError::Validation("llm.model must not be empty".to_string()));
    }

    Ok(())
}

fn validate_governor(governor: &GovernorConfig) -> Result<(), ConfigError> {
    if governor.per_call_timeout_secs == 0 || governor.per_call_timeout_secs > 120 {
        return Err(ConfigError::Validation(
            "governor.per_call_timeout_secs must be in range 1..=120".to_string(),
        ));
    }

    if governor.window_secs == 0 || governor.window_secs > 3600 {
        return Err(ConfigError::Validation(
            "governor.window_secs must be in range 1..=3600".to_string(),
        ));
    }

    if governor.tenant_requests_per_window == 0 || governor.user_requests_per_window == 0 {
        return Err(ConfigError::Validation(
            "governor rate-limit budgets must be greater than zero".to_string(),
        ));
    }

    if governor.user_requests_per_window > governor.tenant_requests_per_window {
        return Err(ConfigError::Validation(
            "governor.user_requests_per_window must not exceed the tenant budget".to_string(),
        ));
    }

    if governor.cache_capacity == 0 {
        return Err(ConfigError::Validation(
            "governor.cache_capacity must be greater than zero".to_string(),
        ));
    }

    if governor.breaker_failure_threshold == 0 || governor.breaker_success_threshold == 0 {
        return Err(ConfigError::Validation(
            "governor breaker thresholds must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_pipeline(pipeline: &PipelineConfig) -> Result<(), ConfigError> {
    if pipeline.run_budget_secs == 0 || pipeline.run_budget_secs > 300 {
        return Err(ConfigError::Validation(
            "pipeline.run_budget_secs must be in range 1..=300".to_string(),
        ));
    }

    if pipeline.max_refinements > 3 {
        return Err(ConfigError::Validation(
            "pipeline.max_refinements must be at most 3".to_string(),
        ));
    }

    if pipeline.retriever_timeout_secs == 0 || pipeline.criterion_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "pipeline stage timeouts must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_channels(channels: &ChannelsConfig) -> Result<(), ConfigError> {
    if channels.sms.markup != MarkupPolicy::Strip {
        return Err(ConfigError::Validation(
            "channels.sms.markup must be `strip` (plain-text transport)".to_string(),
        ));
    }

    match channels.sms.max_chars {
        Some(ceiling) if ceiling >= 40 => {}
        Some(_) => {
            return Err(ConfigError::Validation(
                "channels.sms.max_chars must be at least 40".to_string(),
            ));
        }
        None => {
            return Err(ConfigError::Validation(
                "channels.sms.max_chars is required for the plain-text channel".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_tenants(tenants: &[TenantCredentialConfig]) -> Result<(), ConfigError> {
    let mut seen = std::collections::BTreeSet::new();
    for tenant in tenants {
        if tenant.id.trim().is_empty() {
            return Err(ConfigError::Validation("tenants[].id must not be empty".to_string()));
        }
        if !seen.insert(tenant.id.as_str()) {
            return Err(ConfigError::Validation(format!(
                "duplicate tenant id `{}` in tenants",
                tenant.id
            )));
        }
        if tenant.api_key.expose_secret().trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "tenants[].api_key must not be empty (tenant `{}`)",
                tenant.id
            )));
        }
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
    llm: Option<LlmPatch>,
    governor: Option<GovernorPatch>,
    pipeline: Option<PipelinePatch>,
    channels: Option<ChannelsPatch>,
    tenants: Option<Vec<TenantPatch>>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    base_url: Option<String>,
    model: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct GovernorPatch {
    per_call_timeout_secs: Option<u64>,
    window_secs: Option<u64>,
    tenant_requests_per_window: Option<u32>,
    user_requests_per_window: Option<u32>,
    cache_ttl_secs: Option<u64>,
    cache_capacity: Option<usize>,
    breaker_failure_threshold: Option<u32>,
    breaker_success_threshold: Option<u32>,
    breaker_cooldown_secs: Option<u64>,
    model_costs: Option<BTreeMap<String, ModelCostConfig>>,
}

#[derive(Debug, Default, Deserialize)]
struct PipelinePatch {
    run_budget_secs: Option<u64>,
    max_refinements: Option<u32>,
    retriever_timeout_secs: Option<u64>,
    criterion_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ChannelsPatch {
    sms: Option<ChannelRulePatch>,
    chat: Option<ChannelRulePatch>,
    email: Option<ChannelRulePatch>,
}

#[derive(Debug, Default, Deserialize)]
struct ChannelRulePatch {
    markup: Option<MarkupPolicy>,
    max_chars: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct TenantPatch {
    id: String,
    api_key: String,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use secrecy::ExposeSecret;

    use super::{AppConfig, ConfigOverrides, LoadOptions, MarkupPolicy};
    use crate::domain::request::Channel;

    fn load_from_toml(contents: &str) -> Result<AppConfig, super::ConfigError> {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(contents.as_bytes()).expect("write config");
        AppConfig::load(LoadOptions {
            config_path: Some(file.path().to_path_buf()),
            require_file: true,
            ..LoadOptions::default()
        })
    }

    #[test]
    fn defaults_validate() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.pipeline.max_refinements, 1);
        assert_eq!(config.channels.rule_for(Channel::Sms).max_chars, Some(160));
    }

    #[test]
    fn toml_patch_overrides_defaults() {
        let config = load_from_toml(
            r#"
            [llm]
            model = "tally-chat-1"

            [pipeline]
            run_budget_secs = 45

            [channels.sms]
            max_chars = 300

            [[tenants]]
            id = "acme"
            api_key = "sk-test-acme"
            "#,
        )
        .expect("config should load");

        assert_eq!(config.llm.model, "tally-chat-1");
        assert_eq!(config.pipeline.run_budget_secs, 45);
        assert_eq!(config.channels.sms.max_chars, Some(300));
        assert_eq!(config.tenants.len(), 1);
        assert_eq!(config.tenants[0].api_key.expose_secret(), "sk-test-acme");
    }

    #[test]
    fn sms_channel_must_stay_plain_text() {
        let result = load_from_toml(
            r#"
            [channels.sms]
            markup = "preserve"
            "#,
        );
        let message = result.err().expect("validation error").to_string();
        assert!(message.contains("channels.sms.markup"));
    }

    #[test]
    fn duplicate_tenants_are_rejected() {
        let result = load_from_toml(
            r#"
            [[tenants]]
            id = "acme"
            api_key = "sk-1"

            [[tenants]]
            id = "acme"
            api_key = "sk-2"
            "#,
        );
        let message = result.err().expect("validation error").to_string();
        assert!(message.contains("duplicate tenant id"));
    }

    #[test]
    fn user_budget_cannot_exceed_tenant_budget() {
        let result = load_from_toml(
            r#"
            [governor]
            tenant_requests_per_window = 10
            user_requests_per_window = 20
            "#,
        );
        let message = result.err().expect("validation error").to_string();
        assert!(message.contains("user_requests_per_window"));
    }

    #[test]
    fn programmatic_overrides_win_over_file_values() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(b"[llm]\nmodel = \"from-file\"\n").expect("write config");

        let config = AppConfig::load(LoadOptions {
            config_path: Some(file.path().to_path_buf()),
            require_file: true,
            overrides: ConfigOverrides {
                llm_model: Some("from-override".to_string()),
                tenant_credentials: vec![("acme".to_string(), "sk-acme".to_string())],
                ..ConfigOverrides::default()
            },
        })
        .expect("config should load");

        assert_eq!(config.llm.model, "from-override");
        assert_eq!(config.tenants[0].id, "acme");
    }

    #[test]
    fn missing_required_file_is_an_error() {
        let result = AppConfig::load(LoadOptions {
            config_path: Some(std::path::PathBuf::from("/nonexistent/tally.toml")),
            require_file: true,
            ..LoadOptions::default()
        });
        assert!(matches!(result, Err(super::ConfigError::MissingConfigFile(_))));
    }

    #[test]
    fn markup_policy_round_trips_from_str() {
        assert_eq!("reduced".parse::<MarkupPolicy>().unwrap(), MarkupPolicy::Reduced);
        assert!("loud".parse::<MarkupPolicy>().is_err());
    }
}
