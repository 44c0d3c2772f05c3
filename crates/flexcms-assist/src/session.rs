//! Per-field generation session state

use chrono::{DateTime, Utc};
use flexcms_stream::{ContextMetadata, FieldType};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Lifecycle of a generation session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Idle,
    Connecting,
    Streaming,
    Complete,
    Errored,
    Cancelled,
}

impl SessionStatus {
    /// Frames are still expected
    pub fn is_active(&self) -> bool {
        matches!(self, SessionStatus::Connecting | SessionStatus::Streaming)
    }

    /// The stream has finished one way or another
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Complete | SessionStatus::Errored | SessionStatus::Cancelled
        )
    }
}

/// State of one in-flight or finished generation for a field
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamSession {
    pub id: Uuid,
    pub status: SessionStatus,
    pub field_type: FieldType,
    /// Streamed text; only ever appended to while a stream is live
    pub accumulated_text: String,
    /// Progress notices in arrival order
    pub info_log: Vec<String>,
    pub last_error: Option<String>,
    /// Present only once the session is complete
    pub metadata: Option<ContextMetadata>,
    pub generated_value: Option<Value>,
    pub started_at: Option<DateTime<Utc>>,
}

impl StreamSession {
    /// A fresh idle session
    pub fn new(field_type: FieldType) -> Self {
        Self {
            id: Uuid::new_v4(),
            status: SessionStatus::Idle,
            field_type,
            accumulated_text: String::new(),
            info_log: Vec::new(),
            last_error: None,
            metadata: None,
            generated_value: None,
            started_at: None,
        }
    }

    /// Reset for a new (or repeated) generation
    pub(crate) fn begin(&mut self, field_type: FieldType) {
        *self = Self::new(field_type);
        self.status = SessionStatus::Connecting;
        self.started_at = Some(Utc::now());
    }

    /// Back to idle with nothing retained
    pub(crate) fn clear(&mut self) {
        *self = Self::new(self.field_type);
    }

    pub(crate) fn mark_streaming(&mut self) {
        if self.status == SessionStatus::Connecting {
            self.status = SessionStatus::Streaming;
        }
    }

    pub(crate) fn push_info(&mut self, message: String) {
        self.accumulated_text.push_str(&format_info(&message));
        self.info_log.push(message);
    }

    pub(crate) fn push_content(&mut self, text: &str) {
        self.mark_streaming();
        self.accumulated_text.push_str(text);
    }

    pub(crate) fn complete(&mut self, generated_value: Option<Value>, metadata: Option<ContextMetadata>) {
        self.status = SessionStatus::Complete;
        self.generated_value = generated_value;
        self.metadata = metadata;
    }

    pub(crate) fn fail(&mut self, message: String) {
        self.status = SessionStatus::Errored;
        self.last_error = Some(message);
    }

    /// Elapsed time since the session started, if it has
    pub fn elapsed(&self) -> Option<chrono::Duration> {
        self.started_at.map(|t| Utc::now() - t)
    }
}

/// Inline rendering of a progress notice
pub fn format_info(message: &str) -> String {
    format!("\n\n[INFO: {message}]\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_resets_everything() {
        let mut session = StreamSession::new(FieldType::ShortText);
        session.begin(FieldType::ShortText);
        session.push_content("hello");
        session.fail("boom".into());
        let old_id = session.id;

        session.begin(FieldType::StructuredJson);
        assert_eq!(session.status, SessionStatus::Connecting);
        assert_eq!(session.field_type, FieldType::StructuredJson);
        assert!(session.accumulated_text.is_empty());
        assert!(session.last_error.is_none());
        assert!(session.started_at.is_some());
        assert_ne!(session.id, old_id);
    }

    #[test]
    fn test_info_is_inlined_and_logged() {
        let mut session = StreamSession::new(FieldType::LongText);
        session.begin(FieldType::LongText);
        session.push_content("a");
        session.push_info("Retrying (attempt 2)".into());
        session.push_content("b");
        assert_eq!(session.accumulated_text, "a\n\n[INFO: Retrying (attempt 2)]\n\nb");
        assert_eq!(session.info_log, vec!["Retrying (attempt 2)".to_string()]);
    }

    #[test]
    fn test_content_moves_connecting_to_streaming() {
        let mut session = StreamSession::new(FieldType::LongText);
        session.begin(FieldType::LongText);
        session.push_content("x");
        assert_eq!(session.status, SessionStatus::Streaming);
    }

    #[test]
    fn test_status_classes() {
        assert!(SessionStatus::Connecting.is_active());
        assert!(SessionStatus::Streaming.is_active());
        assert!(!SessionStatus::Complete.is_active());
        assert!(SessionStatus::Cancelled.is_terminal());
        assert!(!SessionStatus::Idle.is_terminal());
    }
}
