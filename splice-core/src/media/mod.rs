//! Seams between the engine and whatever actually decodes media.
//!
//! A [`MediaRuntime`] hands out [`StreamContainer`]s (a media-source style
//! object the element can be bound to), each of which owns per-track
//! [`AppendBuffer`]s. The engine never decodes anything itself.

pub mod delegate;
pub mod headless;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

pub use delegate::{
    DelegateAction, DelegateFactory, DelegateFault, FaultClass, LiveDelegate, StreamingDelegate,
};
pub use headless::{HeadlessDelegateFactory, HeadlessElement, HeadlessRuntime};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MediaError {
    #[error("container type {mime} is not supported")]
    Unsupported { mime: String },
    #[error("container is not open ({state})")]
    InvalidState { state: String },
    #[error("segment append failed: {reason}")]
    Append { reason: String },
    #[error("append started while the previous one was still pending")]
    AppendCollision,
    #[error("container failed to open: {reason}")]
    Open { reason: String },
    #[error("{protocol} delegate could not start: {reason}")]
    Delegate { protocol: String, reason: String },
}

pub type MediaResult<T> = Result<T, MediaError>;

/// Capability check plus container factory.
pub trait MediaRuntime {
    fn is_type_supported(&self, mime: &str) -> bool;

    fn create_container(&self) -> MediaResult<Box<dyn StreamContainer>>;
}

#[async_trait(?Send)]
pub trait StreamContainer {
    /// URL the playable element is pointed at to consume this container.
    fn binding_url(&self) -> &str;

    /// Resolves once the container accepts buffers. Must be awaited after the
    /// element has been bound to [`binding_url`](Self::binding_url).
    async fn wait_open(&mut self) -> MediaResult<()>;

    fn add_buffer(&mut self, mime: &str) -> MediaResult<Box<dyn AppendBuffer>>;

    fn is_open(&self) -> bool;

    fn set_duration(&mut self, seconds: f64) -> MediaResult<()>;

    fn end_of_stream(&mut self) -> MediaResult<()>;

    /// Revokes the binding and frees runtime resources. Safe to call twice.
    fn release(&mut self);
}

#[async_trait(?Send)]
pub trait AppendBuffer {
    fn mime(&self) -> &str;

    /// Appends one chunk and resolves when the runtime acknowledges it.
    async fn append(&mut self, chunk: Bytes) -> MediaResult<()>;

    /// End of the last buffered range in seconds, 0 when nothing is buffered.
    fn buffered_end(&self) -> f64;
}

/// The element that ends up playing whatever the engine resolved.
pub trait PlaybackElement {
    fn set_source(&mut self, url: &str);

    /// Pause, drop the source and reload, leaving the element idle.
    fn clear_source(&mut self);

    /// Optimistic start; failures are not reported.
    fn play(&mut self);

    fn current_source(&self) -> Option<String>;
}
