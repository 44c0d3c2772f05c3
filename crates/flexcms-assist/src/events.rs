//! Field-assist event types

use flexcms_stream::ContextMetadata;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::controller::AcceptMode;

/// Events published while a field is being generated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AssistEvent {
    /// A generation was requested
    Started { session_id: Uuid },

    /// The backend accepted the request and began streaming
    Streaming { session_id: Uuid },

    /// Progress notice
    Info { message: String },

    /// Text appended to the session
    Content { text: String },

    /// Generation finished successfully
    Completed { metadata: Option<ContextMetadata> },

    /// Generation failed; any text received so far is kept
    Failed { message: String },

    /// Generation was cancelled by the user or a timer
    Cancelled,

    /// Generated text was written into the field
    Accepted {
        mode: AcceptMode,
        value: String,
        warning: Option<String>,
    },

    /// Generated text was thrown away
    Discarded,
}

impl AssistEvent {
    /// Check if this event ends the stream
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AssistEvent::Completed { .. } | AssistEvent::Failed { .. } | AssistEvent::Cancelled
        )
    }
}
