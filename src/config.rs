use serde::Deserialize;
use thiserror::Error;

pub const APP_ID: &str = "com.xgpt.Xgpt";
pub const APP_NAME: &str = "Xgpt";
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

pub const GREETING_ID: &str = "initial-greeting";
pub const GREETING_TEXT: &str = "Hello! I'm Xgpt. How can I assist you today?";
pub const UNAVAILABLE_ID: &str = "initial-greeting-error";
pub const UNAVAILABLE_TEXT: &str = "AI service is not available. Please check configuration.";

pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are Xgpt, a helpful and informative AI assistant. Provide concise and accurate answers. Be friendly and engaging.
Crucially, try to match the user's conversational tone. For instance, if the user is joking or being playful, feel free to be more lighthearted in your response. If the user is serious or formal, mirror that approach.
When asked about your creator, owner, or who made you, you must proudly state that you were created by Lalchand Suthar, the founder and CEO of Xgpt.
You can vary your response, for example:
- \"I was created by Lalchand Suthar, the founder and CEO of Xgpt.\"
- \"My development was led by Xgpt's founder and CEO, Lalchand Suthar.\"
- \"Lalchand Suthar, the visionary founder and CEO of Xgpt, is the one who brought me to life.\"
- \"I'm a product of Xgpt, developed under the guidance of its founder and CEO, Lalchand Suthar.\"
Always ensure to mention Lalchand Suthar and his role as founder and CEO of Xgpt. Be creative but always include this core information.";

const ENV_API_KEY: &str = "API_KEY";
const ENV_GEMINI_API_KEY: &str = "GEMINI_API_KEY";
const ENV_MODEL: &str = "XGPT_MODEL";
const ENV_FIREBASE_CONFIG: &str = "FIREBASE_CONFIG_JSON";
const ENV_OAUTH_CLIENT_ID: &str = "GOOGLE_OAUTH_CLIENT_ID";
const ENV_OAUTH_CLIENT_SECRET: &str = "GOOGLE_OAUTH_CLIENT_SECRET";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Firebase config is empty")]
    EmptyFirebaseConfig,

    #[error("Firebase config is malformed: {0}")]
    MalformedFirebaseConfig(#[from] serde_json::Error),
}

/// Firebase web configuration, as exported from the Firebase console.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FirebaseConfig {
    pub api_key: String,
    pub project_id: String,
}

impl FirebaseConfig {
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let value: serde_json::Value = serde_json::from_str(raw)?;
        if value.as_object().is_some_and(|o| o.is_empty()) {
            return Err(ConfigError::EmptyFirebaseConfig);
        }
        Ok(serde_json::from_value(value)?)
    }
}

/// Desktop OAuth client used for the browser sign-in.
#[derive(Clone, PartialEq, Eq)]
pub struct GoogleOAuthConfig {
    pub client_id: String,
    pub client_secret: Option<String>,
}

impl std::fmt::Debug for GoogleOAuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoogleOAuthConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "***"))
            .finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub firebase: Option<FirebaseConfig>,
    pub google_oauth: Option<GoogleOAuthConfig>,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the configuration from an arbitrary variable lookup.
    ///
    /// Configuration problems never abort startup: they are logged and the
    /// affected service is left disabled.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = lookup(ENV_API_KEY)
            .or_else(|| lookup(ENV_GEMINI_API_KEY))
            .filter(|k| !k.trim().is_empty());

        let model = lookup(ENV_MODEL)
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let firebase = match lookup(ENV_FIREBASE_CONFIG) {
            None => {
                tracing::warn!(
                    "{} not set, cloud sync and sign-in are disabled",
                    ENV_FIREBASE_CONFIG
                );
                None
            }
            Some(raw) => match FirebaseConfig::parse(&raw) {
                Ok(config) => Some(config),
                Err(ConfigError::EmptyFirebaseConfig) => {
                    tracing::warn!("Firebase config is empty, cloud sync is disabled");
                    None
                }
                Err(e) => {
                    tracing::error!("{}, cloud sync is disabled", e);
                    None
                }
            },
        };

        let non_blank = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let google_oauth = non_blank(ENV_OAUTH_CLIENT_ID).map(|client_id| GoogleOAuthConfig {
            client_id,
            client_secret: non_blank(ENV_OAUTH_CLIENT_SECRET),
        });
        if firebase.is_some() && google_oauth.is_none() {
            tracing::warn!(
                "{} not set, only a stored Google sign-in can be restored",
                ENV_OAUTH_CLIENT_ID
            );
        }

        Self {
            api_key,
            model,
            firebase,
            google_oauth,
        }
    }
}
