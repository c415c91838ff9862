//! Settings types. Every struct deserializes with per-field defaults, so a
//! settings file only needs the keys it changes.

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use chorus_core::provider::SchedulerFallback;

/// Root settings document (`~/.chorus/settings.json`).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChorusSettings {
    pub server: ServerSettings,
    pub orchestrator: OrchestratorSettings,
    pub messages: MessageSettings,
    pub logging: LoggingSettings,
}

/// Chat backend connection.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Base URL the persona and scheduler routes hang off.
    pub base_url: String,
    /// Bearer token sent with every call.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,
    pub connect_timeout_ms: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000".to_string(),
            api_token: None,
            connect_timeout_ms: 10_000,
        }
    }
}

impl ServerSettings {
    pub fn api_token(&self) -> Option<SecretString> {
        self.api_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .map(|t| SecretString::from(t.to_string()))
    }
}

/// Turn pacing and failure policy.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OrchestratorSettings {
    /// Longest silence between two reads of a persona stream.
    pub read_timeout_ms: u64,
    /// Pause between consecutive personas.
    pub pacing_ms: u64,
    pub scheduler_fallback: SchedulerFallback,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            read_timeout_ms: 10_000,
            pacing_ms: 1_000,
            scheduler_fallback: SchedulerFallback::FullRoster,
        }
    }
}

/// User-visible texts and transcript labels.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MessageSettings {
    /// Shown when a persona says nothing.
    pub fallback_text: String,
    /// Shown when a persona call fails; `{error}` is replaced by the cause.
    pub error_template: String,
    /// Label of the human's lines in the transcript.
    pub user_label: String,
    /// Display name of the human when the roster names none.
    pub user_display_name: String,
}

impl Default for MessageSettings {
    fn default() -> Self {
        Self {
            fallback_text: "Sorry, I lost my train of thought and the connection dropped."
                .to_string(),
            error_template: "Sorry, something went wrong on my side (error: {error}).".to_string(),
            user_label: "user".to_string(),
            user_display_name: "me".to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level filter (`RUST_LOG` wins when set).
    pub level: String,
    /// Emit json lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn wire_names_are_camel_case() {
        let json = serde_json::to_value(ChorusSettings::default()).unwrap();
        assert_eq!(json["server"]["baseUrl"], "http://127.0.0.1:8000");
        assert_eq!(json["orchestrator"]["readTimeoutMs"], 10_000);
        assert_eq!(json["orchestrator"]["schedulerFallback"], "fullRoster");
        assert_eq!(json["messages"]["userLabel"], "user");
        assert!(json["server"].get("apiToken").is_none());
    }

    #[test]
    fn blank_token_is_no_token() {
        let mut server = ServerSettings::default();
        assert!(server.api_token().is_none());
        server.api_token = Some(String::new());
        assert!(server.api_token().is_none());
        server.api_token = Some("abc".into());
        assert_eq!(server.api_token().unwrap().expose_secret(), "abc");
    }

    #[test]
    fn default_error_template_has_placeholder() {
        assert!(MessageSettings::default().error_template.contains("{error}"));
    }
}
