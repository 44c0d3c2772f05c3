//! Handler-based frame dispatch with cancellation

use futures::StreamExt;
use parking_lot::{Mutex, MutexGuard};
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::{
    client::FrameSource,
    frame::{ContextMetadata, StreamFrame},
    request::GenerationRequest,
};

type TextHandler = Box<dyn FnMut(String) + Send>;
type SignalHandler = Box<dyn FnMut() + Send>;
type DoneHandler = Box<dyn FnMut(Value, Option<ContextMetadata>) + Send>;

/// Caller-supplied callbacks, one per frame type. All are optional.
#[derive(Default)]
pub struct StreamHandlers {
    on_start: Option<SignalHandler>,
    on_info: Option<TextHandler>,
    on_content: Option<TextHandler>,
    on_done: Option<DoneHandler>,
    on_error: Option<TextHandler>,
    on_end: Option<SignalHandler>,
}

impl StreamHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_start(mut self, f: impl FnMut() + Send + 'static) -> Self {
        self.on_start = Some(Box::new(f));
        self
    }

    pub fn on_info(mut self, f: impl FnMut(String) + Send + 'static) -> Self {
        self.on_info = Some(Box::new(f));
        self
    }

    pub fn on_content(mut self, f: impl FnMut(String) + Send + 'static) -> Self {
        self.on_content = Some(Box::new(f));
        self
    }

    pub fn on_done(
        mut self,
        f: impl FnMut(Value, Option<ContextMetadata>) + Send + 'static,
    ) -> Self {
        self.on_done = Some(Box::new(f));
        self
    }

    pub fn on_error(mut self, f: impl FnMut(String) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }

    /// Called once when input ends without a `done` or `error` frame
    pub fn on_end(mut self, f: impl FnMut() + Send + 'static) -> Self {
        self.on_end = Some(Box::new(f));
        self
    }

    /// Route one frame to its handler, if any
    pub fn dispatch(&mut self, frame: StreamFrame) {
        match frame {
            StreamFrame::Start => {
                if let Some(f) = self.on_start.as_mut() {
                    f();
                }
            }
            StreamFrame::Info { message } => {
                if let Some(f) = self.on_info.as_mut() {
                    f(message);
                }
            }
            StreamFrame::Content { text } => {
                if let Some(f) = self.on_content.as_mut() {
                    f(text);
                }
            }
            StreamFrame::Done {
                generated_value,
                metadata,
            } => {
                if let Some(f) = self.on_done.as_mut() {
                    f(generated_value, metadata);
                }
            }
            StreamFrame::Error { message } => self.error(message),
        }
    }

    fn error(&mut self, message: String) {
        // A stream reports at most one error
        if let Some(mut f) = self.on_error.take() {
            f(message);
        }
    }

    fn end(&mut self) {
        if let Some(mut f) = self.on_end.take() {
            f();
        }
    }
}

/// Stops a stream opened with [`open_stream`].
///
/// Dispatch of every frame happens under the token's gate, and `cancel`
/// takes the same gate: once `cancel` returns, no handler is running and
/// none will run again.
#[derive(Clone)]
pub struct CancelToken {
    token: CancellationToken,
    gate: Arc<Mutex<()>>,
}

impl CancelToken {
    fn new(token: CancellationToken) -> Self {
        Self {
            token,
            gate: Arc::new(Mutex::new(())),
        }
    }

    /// A token for a stream that never started
    pub fn noop() -> Self {
        Self::new(CancellationToken::new())
    }

    /// Close the transport and suppress all further handler calls.
    ///
    /// Must not be called from inside a handler of the same stream.
    pub fn cancel(&self) {
        let _gate = self.gate.lock();
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    fn enter(&self) -> Option<MutexGuard<'_, ()>> {
        let guard = self.gate.lock();
        if self.token.is_cancelled() {
            None
        } else {
            Some(guard)
        }
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Open a generation stream and feed its frames to `handlers`.
///
/// If the stream cannot be opened, `on_error` runs before this returns and
/// the returned token does nothing. Otherwise frames are dispatched in wire
/// order from a spawned task until a terminal frame, end of input, or
/// cancellation.
pub async fn open_stream<S>(
    source: &S,
    request: &GenerationRequest,
    mut handlers: StreamHandlers,
) -> CancelToken
where
    S: FrameSource + ?Sized,
{
    let mut frames = match source.connect(request).await {
        Ok(frames) => frames,
        Err(e) => {
            tracing::warn!("Failed to open generation stream: {}", e);
            handlers.error(e.to_string());
            return CancelToken::noop();
        }
    };

    let cancel = CancelToken::new(frames.cancel_token());
    let gate = cancel.clone();

    tokio::spawn(async move {
        while let Some(frame) = frames.next().await {
            let Some(_guard) = gate.enter() else {
                return;
            };
            let terminal = frame.is_terminal();
            handlers.dispatch(frame);
            if terminal {
                return;
            }
        }

        if let Some(_guard) = gate.enter() {
            tracing::debug!("Generation stream ended without a terminal frame");
            handlers.end();
        }
    });

    cancel
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::FrameStream;
    use crate::error::{Error, Result};
    use crate::request::FieldType;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio_stream::wrappers::UnboundedReceiverStream;

    type Chunk = std::result::Result<Vec<u8>, std::io::Error>;

    /// Source whose body is fed by the test through a channel
    struct ChannelSource {
        body: Mutex<Option<mpsc::UnboundedReceiver<Chunk>>>,
    }

    impl ChannelSource {
        fn new() -> (Self, mpsc::UnboundedSender<Chunk>) {
            let (tx, rx) = mpsc::unbounded_channel();
            (
                Self {
                    body: Mutex::new(Some(rx)),
                },
                tx,
            )
        }

        fn refusing() -> Self {
            Self {
                body: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl FrameSource for ChannelSource {
        async fn connect(&self, _request: &GenerationRequest) -> Result<FrameStream> {
            let rx = self
                .body
                .lock()
                .take()
                .ok_or_else(|| Error::status(503, ""))?;
            Ok(FrameStream::new(UnboundedReceiverStream::new(rx)))
        }
    }

    fn request() -> GenerationRequest {
        GenerationRequest::for_instance("1", "summary", "writer", FieldType::LongText)
    }

    fn chunk(s: &str) -> Chunk {
        Ok(s.as_bytes().to_vec())
    }

    /// Handlers that report every call as a string on a channel
    fn recording_handlers() -> (StreamHandlers, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (t1, t2, t3, t4, t5, t6) = (
            tx.clone(),
            tx.clone(),
            tx.clone(),
            tx.clone(),
            tx.clone(),
            tx,
        );
        let handlers = StreamHandlers::new()
            .on_start(move || {
                let _ = t1.send("start".to_string());
            })
            .on_info(move |m| {
                let _ = t2.send(format!("info:{m}"));
            })
            .on_content(move |t| {
                let _ = t3.send(format!("content:{t}"));
            })
            .on_done(move |v, _| {
                let _ = t4.send(format!("done:{v}"));
            })
            .on_error(move |m| {
                let _ = t5.send(format!("error:{m}"));
            })
            .on_end(move || {
                let _ = t6.send("end".to_string());
            });
        (handlers, rx)
    }

    async fn next_call(rx: &mut mpsc::UnboundedReceiver<String>) -> String {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for handler")
            .expect("handler channel closed")
    }

    async fn drain(rx: &mut mpsc::UnboundedReceiver<String>) -> Vec<String> {
        let mut calls = Vec::new();
        while let Ok(Some(call)) =
            tokio::time::timeout(Duration::from_millis(200), rx.recv()).await
        {
            calls.push(call);
        }
        calls
    }

    #[tokio::test]
    async fn test_frames_dispatched_in_order() {
        let (source, tx) = ChannelSource::new();
        let (handlers, mut calls) = recording_handlers();
        let _token = open_stream(&source, &request(), handlers).await;

        tx.send(chunk("data: {\"type\":\"start\"}\n\ndata: {\"type\":\"info\",\"message\":\"retrying\"}\n"))
            .unwrap();
        tx.send(chunk("\ndata: {\"type\":\"content\",\"text\":\"Hi\"}\n\n")).unwrap();
        tx.send(chunk("data: {\"type\":\"done\",\"generated_value\":\"Hi\"}\n\n")).unwrap();

        assert_eq!(next_call(&mut calls).await, "start");
        assert_eq!(next_call(&mut calls).await, "info:retrying");
        assert_eq!(next_call(&mut calls).await, "content:Hi");
        assert_eq!(next_call(&mut calls).await, "done:\"Hi\"");
        assert!(drain(&mut calls).await.is_empty());
    }

    #[tokio::test]
    async fn test_connect_failure_reports_error_once() {
        let source = ChannelSource::refusing();
        let (handlers, mut calls) = recording_handlers();
        let token = open_stream(&source, &request(), handlers).await;

        let calls = drain(&mut calls).await;
        assert_eq!(calls.len(), 1);
        assert!(calls[0].starts_with("error:"), "got: {:?}", calls);
        assert!(calls[0].contains("HTTP 503"));
        token.cancel();
    }

    #[tokio::test]
    async fn test_malformed_frame_does_not_trigger_error() {
        let (source, tx) = ChannelSource::new();
        let (handlers, mut calls) = recording_handlers();
        let _token = open_stream(&source, &request(), handlers).await;

        tx.send(chunk(concat!(
            "data: {not json\n",
            "data: {\"type\":\"content\",\"text\":\"ok\"}\n",
            "data: {\"type\":\"done\"}\n",
        )))
        .unwrap();

        assert_eq!(drain(&mut calls).await, vec!["content:ok", "done:null"]);
    }

    #[tokio::test]
    async fn test_no_handler_after_cancel() {
        let (source, tx) = ChannelSource::new();
        let (handlers, mut calls) = recording_handlers();
        let token = open_stream(&source, &request(), handlers).await;

        tx.send(chunk("data: {\"type\":\"content\",\"text\":\"a\"}\n")).unwrap();
        assert_eq!(next_call(&mut calls).await, "content:a");

        token.cancel();
        assert!(token.is_cancelled());
        let _ = tx.send(chunk("data: {\"type\":\"content\",\"text\":\"b\"}\n"));
        let _ = tx.send(chunk("data: {\"type\":\"done\"}\n"));

        assert!(drain(&mut calls).await.is_empty());
    }

    #[tokio::test]
    async fn test_read_failures_report_single_error() {
        let (source, tx) = ChannelSource::new();
        let (handlers, mut calls) = recording_handlers();
        let _token = open_stream(&source, &request(), handlers).await;

        tx.send(chunk("data: {\"type\":\"content\",\"text\":\"part\"}\n")).unwrap();
        tx.send(Err(std::io::Error::other("connection reset"))).unwrap();
        let _ = tx.send(Err(std::io::Error::other("connection reset again")));

        let calls = drain(&mut calls).await;
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0], "content:part");
        assert_eq!(calls[1], "error:Stream read failed: connection reset");
    }

    #[tokio::test]
    async fn test_end_without_terminal_frame() {
        let (source, tx) = ChannelSource::new();
        let (handlers, mut calls) = recording_handlers();
        let _token = open_stream(&source, &request(), handlers).await;

        tx.send(chunk("data: {\"type\":\"content\",\"text\":\"x\"}\n")).unwrap();
        drop(tx);

        assert_eq!(drain(&mut calls).await, vec!["content:x", "end"]);
    }

    #[tokio::test]
    async fn test_legacy_error_is_terminal() {
        let (source, tx) = ChannelSource::new();
        let (handlers, mut calls) = recording_handlers();
        let _token = open_stream(&source, &request(), handlers).await;

        tx.send(chunk(concat!(
            "data: {\"error\":\"Quota exceeded\"}\n",
            "data: {\"type\":\"content\",\"text\":\"late\"}\n",
        )))
        .unwrap();
        drop(tx);

        assert_eq!(drain(&mut calls).await, vec!["error:Quota exceeded"]);
    }
}
