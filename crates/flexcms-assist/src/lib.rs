//! flexcms-assist: Field-assist controller
//!
//! This crate binds one streamed generation session to one form field,
//! accumulates the generated text, and reconciles it back into the field
//! with replace, append or discard semantics.

pub mod controller;
pub mod error;
pub mod events;
pub mod extract;
pub mod handle;
pub mod session;

pub use controller::{AcceptMode, Acceptance, FieldAssist, FieldBinding};
pub use error::{Error, Result};
pub use events::AssistEvent;
pub use extract::{Extraction, PayloadSource, extract_structured_payload};
pub use handle::AssistHandle;
pub use session::{SessionStatus, StreamSession};
