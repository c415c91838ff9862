use std::time::Duration;

use chorus_core::provider::SchedulerFallback;

pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_PACING: Duration = Duration::from_secs(1);
pub const DEFAULT_FALLBACK_TEXT: &str = "Sorry, I lost my train of thought and the connection dropped.";
pub const DEFAULT_ERROR_TEMPLATE: &str = "Sorry, something went wrong on my side (error: {error}).";
pub const DEFAULT_USER_LABEL: &str = "user";

/// Tunables of a conversation turn.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Longest silence tolerated between two reads of one persona stream.
    pub read_timeout: Duration,
    /// Pause between consecutive personas of a turn.
    pub pacing: Duration,
    pub scheduler_fallback: SchedulerFallback,
    /// Shown when a persona produced no text before its stream ended.
    pub fallback_text: String,
    /// Shown when a persona call failed. `{error}` is replaced by the cause.
    pub error_template: String,
    /// Label of the human's lines in the transcript.
    pub user_label: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            read_timeout: DEFAULT_READ_TIMEOUT,
            pacing: DEFAULT_PACING,
            scheduler_fallback: SchedulerFallback::default(),
            fallback_text: DEFAULT_FALLBACK_TEXT.to_string(),
            error_template: DEFAULT_ERROR_TEMPLATE.to_string(),
            user_label: DEFAULT_USER_LABEL.to_string(),
        }
    }
}

impl EngineConfig {
    pub fn error_text(&self, cause: &str) -> String {
        self.error_template.replace("{error}", cause)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_text_substitutes_cause() {
        let config = EngineConfig::default();
        let text = config.error_text("stream interrupted: reset");
        assert!(text.contains("(error: stream interrupted: reset)"));
        assert!(!text.contains("{error}"));
    }

    #[test]
    fn template_without_placeholder_is_used_verbatim() {
        let config = EngineConfig {
            error_template: "offline".into(),
            ..EngineConfig::default()
        };
        assert_eq!(config.error_text("boom"), "offline");
    }
}
