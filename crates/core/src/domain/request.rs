use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TenantId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub String);

/// Delivery channel the reply must be formatted for.
///
/// Formatting rules per channel come from configuration, never from stage
/// logic (`ChannelRuleConfig`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// Plain text with a hard character ceiling, no markup.
    Sms,
    /// Constrained markup subset (emphasis only by default).
    Chat,
    /// Rich text, structural markup preserved, no ceiling.
    Email,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sms => "sms",
            Self::Chat => "chat",
            Self::Email => "email",
        }
    }
}

impl std::str::FromStr for Channel {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sms" => Ok(Self::Sms),
            "chat" => Ok(Self::Chat),
            "email" => Ok(Self::Email),
            other => Err(format!("unsupported channel `{other}` (expected sms|chat|email)")),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryTurn {
    pub role: Role,
    pub text: String,
}

impl HistoryTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self { role: Role::User, text: text.into() }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self { role: Role::Assistant, text: text.into() }
    }
}

/// Immutable inbound request. Created once per pipeline run, never mutated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Request {
    pub id: RequestId,
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub channel: Channel,
    pub text: String,
    pub history: Vec<HistoryTurn>,
}

impl Request {
    pub fn new(
        tenant_id: impl Into<String>,
        user_id: impl Into<String>,
        channel: Channel,
        text: impl Into<String>,
    ) -> Self {
        Self {
            id: RequestId::generate(),
            tenant_id: TenantId(tenant_id.into()),
            user_id: UserId(user_id.into()),
            channel,
            text: text.into(),
            history: Vec::new(),
        }
    }

    pub fn with_history(mut self, history: Vec<HistoryTurn>) -> Self {
        self.history = history;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::{Channel, Request};

    #[test]
    fn channel_parses_case_insensitively() {
        assert_eq!("SMS".parse::<Channel>().unwrap(), Channel::Sms);
        assert_eq!(" email ".parse::<Channel>().unwrap(), Channel::Email);
        assert!("pager".parse::<Channel>().is_err());
    }

    #[test]
    fn requests_get_distinct_ids() {
        let a = Request::new("acme", "u-1", Channel::Sms, "hours this week?");
        let b = Request::new("acme", "u-1", Channel::Sms, "hours this week?");
        assert_ne!(a.id, b.id);
    }
}
