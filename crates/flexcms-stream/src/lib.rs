//! flexcms-stream: Server-sent event client for agent generation streams
//!
//! This crate turns the HTTP response of a flexible CMS generation endpoint
//! into typed [`StreamFrame`]s, either as an async stream or dispatched to a
//! set of caller-supplied handlers.

pub mod client;
pub mod decoder;
pub mod dispatch;
pub mod error;
pub mod frame;
pub mod request;

pub use client::{
    CredentialProvider, Endpoints, EnvCredentials, FrameSource, FrameStream, StaticCredentials,
    StreamClient,
};
pub use decoder::FrameDecoder;
pub use dispatch::{CancelToken, StreamHandlers, open_stream};
pub use error::{Error, Result};
pub use frame::{ContextMetadata, StreamFrame};
pub use request::{FieldType, GenerationRequest, GenerationTarget, TaskContext};
