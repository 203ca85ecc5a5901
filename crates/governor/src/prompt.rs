use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use tally_core::TenantId;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".to_string(), content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".to_string(), content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: "assistant".to_string(), content: content.into() }
    }
}

/// The unit of work handed to the governor: messages plus sampling
/// parameters. Identical prompts (per tenant and model) normalize to the
/// same cache key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatPrompt {
    pub messages: Vec<ChatMessage>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
}

impl ChatPrompt {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self { messages, temperature: None, max_tokens: None }
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Stable cache key: sha256 over a length-prefixed serialization of the
    /// messages, parameters, model, and tenant. Tenants never share cached
    /// completions, even for byte-identical prompts.
    pub fn cache_key(&self, model: &str, tenant_id: &TenantId) -> String {
        let mut hasher = Sha256::new();
        hasher.update(tenant_id.0.as_bytes());
        hasher.update([0x1f]);
        hasher.update(model.as_bytes());
        hasher.update([0x1f]);
        for message in &self.messages {
            hasher.update((message.role.len() as u64).to_be_bytes());
            hasher.update(message.role.as_bytes());
            hasher.update((message.content.len() as u64).to_be_bytes());
            hasher.update(message.content.as_bytes());
        }
        match self.temperature {
            Some(temperature) => hasher.update(temperature.to_be_bytes()),
            None => hasher.update([0xff]),
        }
        match self.max_tokens {
            Some(max_tokens) => hasher.update(u64::from(max_tokens).to_be_bytes()),
            None => hasher.update([0xfe]),
        }

        let digest = hasher.finalize();
        let mut key = String::with_capacity(digest.len() * 2);
        for byte in digest {
            key.push_str(&format!("{byte:02x}"));
        }
        key
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// A governed completion as seen by the stages.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub content: String,
    pub usage: TokenUsage,
    /// True when served from the response cache without a backend call.
    pub cached: bool,
}

#[cfg(test)]
mod tests {
    use super::{ChatMessage, ChatPrompt};
    use tally_core::TenantId;

    #[test]
    fn identical_prompts_share_a_key_within_a_tenant() {
        let prompt = ChatPrompt::new(vec![ChatMessage::user("hours this week?")]);
        let a = prompt.cache_key("m1", &TenantId("acme".into()));
        let b = prompt.cache_key("m1", &TenantId("acme".into()));
        assert_eq!(a, b);
    }

    #[test]
    fn tenant_model_and_parameters_partition_the_key_space() {
        let prompt = ChatPrompt::new(vec![ChatMessage::user("hours this week?")]);
        let base = prompt.cache_key("m1", &TenantId("acme".into()));

        assert_ne!(base, prompt.cache_key("m1", &TenantId("globex".into())));
        assert_ne!(base, prompt.cache_key("m2", &TenantId("acme".into())));
        assert_ne!(
            base,
            prompt.clone().with_temperature(0.7).cache_key("m1", &TenantId("acme".into()))
        );
    }

    #[test]
    fn message_boundaries_do_not_collide() {
        // "ab" + "c" must not hash like "a" + "bc".
        let left = ChatPrompt::new(vec![ChatMessage::user("ab"), ChatMessage::user("c")]);
        let right = ChatPrompt::new(vec![ChatMessage::user("a"), ChatMessage::user("bc")]);
        let tenant = TenantId("acme".into());
        assert_ne!(left.cache_key("m1", &tenant), right.cache_key("m1", &tenant));
    }
}
