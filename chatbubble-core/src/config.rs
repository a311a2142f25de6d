use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

pub const DEFAULT_WEBHOOK_URL: &str = "http://localhost:5678/webhook/chat";

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct WidgetConfig {
    pub service: ServiceConfig,
    pub webhook: WebhookConfig,
    pub appearance: AppearanceConfig,
    pub session: SessionConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ServiceConfig {
    pub log_level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct WebhookConfig {
    pub url: String,
    /// Sent as `userAgent` in every envelope
    pub user_agent: String,
    /// Sent as `pageUrl`; identifies where the bubble is embedded
    pub page_url: String,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_WEBHOOK_URL.to_string(),
            user_agent: format!("chatbubble/{}", env!("CARGO_PKG_VERSION")),
            page_url: String::new(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BubblePosition {
    Left,
    #[default]
    Right,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ColorScheme {
    pub primary: String,
    pub background: String,
    pub text: String,
    pub user_bubble: String,
    pub assistant_bubble: String,
}

impl Default for ColorScheme {
    fn default() -> Self {
        Self {
            primary: "#4f46e5".to_string(),
            background: "#ffffff".to_string(),
            text: "#1f2937".to_string(),
            user_bubble: "#4f46e5".to_string(),
            assistant_bubble: "#f3f4f6".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct AppearanceConfig {
    pub position: BubblePosition,
    pub colors: ColorScheme,
    pub assistant_name: String,
    pub assistant_title: String,
    pub avatar_url: Option<String>,
    pub welcome_text: String,
}

impl Default for AppearanceConfig {
    fn default() -> Self {
        Self {
            position: BubblePosition::default(),
            colors: ColorScheme::default(),
            assistant_name: "Assistant".to_string(),
            assistant_title: "Online".to_string(),
            avatar_url: None,
            welcome_text: "Hi there! How can I help you today?".to_string(),
        }
    }
}

/// Versioned widget profile. The two releases differ in where the session
/// identifier lives and in whether the envelope carries a `source` field.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    /// Local store only, no `source`.
    V1,
    /// Cookie first with local store fallback, one-year cookie, `source` set.
    #[default]
    V2,
}

impl Profile {
    pub fn source(self) -> Option<&'static str> {
        match self {
            Profile::V1 => None,
            Profile::V2 => Some("chat-bubble-widget"),
        }
    }

    pub fn uses_cookie(self) -> bool {
        matches!(self, Profile::V2)
    }

    /// Lifetime written into the session cookie, if the profile keeps one.
    pub fn cookie_lifetime(self) -> Option<chrono::Duration> {
        self.uses_cookie().then(|| chrono::Duration::days(365))
    }
}

impl std::str::FromStr for Profile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "v1" => Ok(Profile::V1),
            "v2" => Ok(Profile::V2),
            other => Err(format!("unknown profile '{}' (expected v1 or v2)", other)),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct SessionConfig {
    pub profile: Profile,
    pub cookie_path: String,
    pub local_store_path: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            profile: Profile::default(),
            cookie_path: "~/.chatbubble/cookies.txt".to_string(),
            local_store_path: "~/.chatbubble/local_store.json".to_string(),
        }
    }
}

impl WidgetConfig {
    /// Load from an optional TOML file, then `CHAT_BUBBLE_*` environment
    /// overrides (e.g. `CHAT_BUBBLE_WEBHOOK__URL`).
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(
                Environment::with_prefix("CHAT_BUBBLE")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;
        s.try_deserialize()
    }
}
