//! A cloneable handle for stopping a generation from outside the controller.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::controller::Shared;
use crate::events::AssistEvent;
use crate::session::SessionStatus;

/// A cloneable handle for poking the field-assist controller from timers,
/// signal handlers or other tasks.
///
/// All fields are `Arc`-wrapped, so cloning is cheap.
#[derive(Clone)]
pub struct AssistHandle {
    pub(crate) shared: Arc<Mutex<Shared>>,
    pub(crate) events: broadcast::Sender<AssistEvent>,
}

impl AssistHandle {
    /// Cancel the live generation, if any.
    ///
    /// Returns `false` when nothing was streaming. Once this returns, no
    /// frame of the cancelled session touches the session state.
    pub fn cancel(&self) -> bool {
        let (token, connecting, session_id) = {
            let mut shared = self.shared.lock();
            if !shared.session.status.is_active() {
                return false;
            }
            shared.generation += 1;
            shared.session.status = SessionStatus::Cancelled;
            (
                shared.cancel.take(),
                shared.connecting.take(),
                shared.session.id,
            )
        };

        if let Some(connecting) = connecting {
            connecting.cancel();
        }
        // The session lock is released first: the dispatch gate is taken
        // before the session lock on the frame path.
        if let Some(token) = token {
            token.cancel();
        }
        tracing::debug!("Generation {} cancelled", session_id);
        let _ = self.events.send(AssistEvent::Cancelled);
        true
    }

    /// Whether a generation is connecting or streaming
    pub fn is_streaming(&self) -> bool {
        self.shared.lock().session.status.is_active()
    }

    /// Current session status
    pub fn status(&self) -> SessionStatus {
        self.shared.lock().session.status
    }
}
