//! Field-assist controller: one generation session bound to one form field

use flexcms_stream::{
    CancelToken, ContextMetadata, FieldType, FrameSource, GenerationRequest, StreamHandlers,
    open_stream,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::{
    error::{Error, Result},
    events::AssistEvent,
    extract::extract_structured_payload,
    handle::AssistHandle,
    session::{SessionStatus, StreamSession},
};

/// Separator placed between the previous value and appended text
const APPEND_SEPARATOR: &str = "\n\n";

/// How generated text is written into the field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcceptMode {
    /// Replace the field value (structured fields get the extracted JSON)
    Replace,
    /// Append the raw text after the current value
    Append,
}

/// Outcome of an accept action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acceptance {
    pub mode: AcceptMode,
    /// The field's new value
    pub value: String,
    /// Set when a structured field received text that is not JSON
    pub warning: Option<String>,
}

/// The form field a controller is bound to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldBinding {
    pub name: String,
    pub field_type: FieldType,
    /// Value before generation
    pub value: String,
}

impl FieldBinding {
    pub fn new(name: impl Into<String>, field_type: FieldType, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field_type,
            value: value.into(),
        }
    }
}

/// State shared between the controller, its handle, and stream handlers
pub(crate) struct Shared {
    pub(crate) session: StreamSession,
    /// Bumped whenever the live session is superseded, cancelled or reset.
    /// Handlers of older generations leave the session alone.
    pub(crate) generation: u64,
    pub(crate) cancel: Option<CancelToken>,
    /// Interrupts `start` while it waits for the response headers
    pub(crate) connecting: Option<CancellationToken>,
    pub(crate) last_request: Option<GenerationRequest>,
    pub(crate) value: String,
}

/// Drives generation for a single form field
pub struct FieldAssist {
    source: Arc<dyn FrameSource>,
    field_name: String,
    shared: Arc<Mutex<Shared>>,
    events: broadcast::Sender<AssistEvent>,
}

impl FieldAssist {
    /// Create a controller for a field
    pub fn new(source: Arc<dyn FrameSource>, field: FieldBinding) -> Self {
        let (events, _) = broadcast::channel(1024);
        Self {
            source,
            field_name: field.name,
            shared: Arc::new(Mutex::new(Shared {
                session: StreamSession::new(field.field_type),
                generation: 0,
                cancel: None,
                connecting: None,
                last_request: None,
                value: field.value,
            })),
            events,
        }
    }

    /// Subscribe to assist events
    pub fn subscribe(&self) -> broadcast::Receiver<AssistEvent> {
        self.events.subscribe()
    }

    /// A cloneable handle that can cancel from other tasks
    pub fn handle(&self) -> AssistHandle {
        AssistHandle {
            shared: Arc::clone(&self.shared),
            events: self.events.clone(),
        }
    }

    pub fn field_name(&self) -> &str {
        &self.field_name
    }

    /// Snapshot of the current session
    pub fn session(&self) -> StreamSession {
        self.shared.lock().session.clone()
    }

    pub fn status(&self) -> SessionStatus {
        self.shared.lock().session.status
    }

    pub fn accumulated_text(&self) -> String {
        self.shared.lock().session.accumulated_text.clone()
    }

    /// Current value of the bound field
    pub fn value(&self) -> String {
        self.shared.lock().value.clone()
    }

    /// Start generating. A live session is cancelled first.
    ///
    /// Connection failures do not return an error: they move the session to
    /// `Errored` and publish `AssistEvent::Failed`, like any stream error.
    /// Returns once the stream is open, or as soon as the session is
    /// cancelled, discarded or superseded while connecting.
    pub async fn start(&self, request: GenerationRequest) {
        let connecting = CancellationToken::new();
        let (generation, previous, previous_connect, session_id) = {
            let mut shared = self.shared.lock();
            if shared.session.status.is_active() {
                tracing::debug!(
                    "Superseding live generation {} for field '{}'",
                    shared.session.id,
                    self.field_name
                );
            }
            let previous = shared.cancel.take();
            let previous_connect = shared.connecting.replace(connecting.clone());
            shared.generation += 1;
            shared.session.begin(request.field_type);
            shared.last_request = Some(request.clone());
            (shared.generation, previous, previous_connect, shared.session.id)
        };

        if let Some(previous_connect) = previous_connect {
            previous_connect.cancel();
        }
        if let Some(previous) = previous {
            previous.cancel();
        }
        tracing::debug!(
            "Generation {} started for field '{}' with agent '{}'",
            session_id,
            self.field_name,
            request.agent_id
        );
        let _ = self.events.send(AssistEvent::Started { session_id });

        let token = tokio::select! {
            biased;
            _ = connecting.cancelled() => {
                tracing::debug!("Generation {} stopped while connecting", session_id);
                return;
            }
            token = open_stream(self.source.as_ref(), &request, self.handlers(generation)) => token,
        };

        // Keep the token only if this session is still the live one
        let stale = {
            let mut shared = self.shared.lock();
            if shared.generation == generation {
                shared.connecting = None;
            }
            if shared.generation == generation && shared.session.status.is_active() {
                shared.cancel = Some(token);
                None
            } else {
                Some(token)
            }
        };
        if let Some(token) = stale {
            token.cancel();
        }
    }

    /// Start over with the last request
    pub async fn restart(&self) -> Result<()> {
        let request = self
            .shared
            .lock()
            .last_request
            .clone()
            .ok_or(Error::NothingToRestart)?;
        self.start(request).await;
        Ok(())
    }

    /// Cancel the live generation; see [`AssistHandle::cancel`]
    pub fn cancel(&self) -> bool {
        self.handle().cancel()
    }

    /// Write the generated text into the field and reset the session.
    ///
    /// Partial text from an errored or cancelled session can be accepted.
    pub fn accept(&self, mode: AcceptMode) -> Result<Acceptance> {
        let acceptance = {
            let mut shared = self.shared.lock();
            match shared.session.status {
                status if status.is_active() => return Err(Error::StillStreaming),
                SessionStatus::Idle => return Err(Error::NothingToAccept),
                _ => {}
            }

            let text = std::mem::take(&mut shared.session.accumulated_text);
            let (value, warning) = match mode {
                AcceptMode::Replace if shared.session.field_type.is_structured() => {
                    let extraction = extract_structured_payload(&text);
                    let warning = extraction.warning().map(str::to_string);
                    (extraction.payload, warning)
                }
                AcceptMode::Replace => (text, None),
                AcceptMode::Append => (append_text(&shared.value, &text), None),
            };

            shared.value = value.clone();
            shared.session.clear();
            shared.cancel = None;
            shared.connecting = None;
            Acceptance {
                mode,
                value,
                warning,
            }
        };

        if let Some(ref warning) = acceptance.warning {
            tracing::warn!("Field '{}': {}", self.field_name, warning);
        }
        let _ = self.events.send(AssistEvent::Accepted {
            mode: acceptance.mode,
            value: acceptance.value.clone(),
            warning: acceptance.warning.clone(),
        });
        Ok(acceptance)
    }

    /// Throw the generated text away without touching the field
    pub fn discard(&self) {
        let (token, connecting) = {
            let mut shared = self.shared.lock();
            shared.generation += 1;
            shared.session.clear();
            (shared.cancel.take(), shared.connecting.take())
        };
        if let Some(connecting) = connecting {
            connecting.cancel();
        }
        if let Some(token) = token {
            token.cancel();
        }
        let _ = self.events.send(AssistEvent::Discarded);
    }

    fn handlers(&self, generation: u64) -> StreamHandlers {
        let live = LiveSession {
            shared: Arc::clone(&self.shared),
            events: self.events.clone(),
            generation,
        };
        let (on_start, on_info, on_content, on_done, on_error, on_end) = (
            live.clone(),
            live.clone(),
            live.clone(),
            live.clone(),
            live.clone(),
            live,
        );

        StreamHandlers::new()
            .on_start(move || {
                on_start.update(|session| {
                    session.mark_streaming();
                    Some(AssistEvent::Streaming {
                        session_id: session.id,
                    })
                })
            })
            .on_info(move |message| {
                on_info.update(|session| {
                    session.push_info(message.clone());
                    Some(AssistEvent::Info { message })
                })
            })
            .on_content(move |text| {
                on_content.update(|session| {
                    session.push_content(&text);
                    Some(AssistEvent::Content { text })
                })
            })
            .on_done(move |generated_value, metadata| {
                on_done.update(|session| {
                    session.complete(Some(generated_value), metadata.clone());
                    Some(AssistEvent::Completed { metadata })
                })
            })
            .on_error(move |message| {
                on_error.update(|session| {
                    tracing::warn!("Generation {} failed: {}", session.id, message);
                    session.fail(message.clone());
                    Some(AssistEvent::Failed { message })
                })
            })
            .on_end(move || {
                on_end.update(|session| {
                    session.complete(None, None);
                    Some(AssistEvent::Completed { metadata: None })
                })
            })
    }
}

/// Handler-side view of one session generation
#[derive(Clone)]
struct LiveSession {
    shared: Arc<Mutex<Shared>>,
    events: broadcast::Sender<AssistEvent>,
    generation: u64,
}

impl LiveSession {
    /// Apply `f` if this generation is still live, then publish its event
    fn update(&self, f: impl FnOnce(&mut StreamSession) -> Option<AssistEvent>) {
        let event = {
            let mut shared = self.shared.lock();
            if shared.generation != self.generation || !shared.session.status.is_active() {
                tracing::trace!("Dropping frame for superseded generation {}", self.generation);
                return;
            }
            f(&mut shared.session)
        };
        if let Some(event) = event {
            let _ = self.events.send(event);
        }
    }
}

fn append_text(current: &str, generated: &str) -> String {
    if current.is_empty() {
        generated.to_string()
    } else {
        format!("{current}{APPEND_SEPARATOR}{generated}")
    }
}

/// Value to store in a JSON form document for an accepted field
pub fn form_value(field_type: FieldType, accepted: &str) -> Value {
    if field_type.is_structured() {
        if let Ok(value) = serde_json::from_str(accepted) {
            return value;
        }
    }
    Value::String(accepted.to_string())
}

/// Metadata summary suitable for a status line
pub fn describe_metadata(metadata: &ContextMetadata) -> String {
    format!(
        "used {} content instance(s) and {} knowledge file(s)",
        metadata.total_instances, metadata.total_knowledge_files
    )
}
