use serde::Serialize;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    Info,
    Success,
    Error,
}

/// Everything the engine reports to its host, in emission order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    Status { message: String },
    Notice { level: NoticeLevel, message: String },
    Source { url: Option<String> },
    Position { current_ms: u64 },
    Duration { duration_ms: u64 },
    Playing { playing: bool },
    Buffering { buffering: bool },
}

/// Fire-and-forget writer for [`EngineEvent`]s. Sending never blocks and a
/// closed receiver is not an error.
#[derive(Debug, Clone, Default)]
pub struct FeedbackSink {
    tx: Option<UnboundedSender<EngineEvent>>,
}

impl FeedbackSink {
    pub fn channel() -> (Self, UnboundedReceiver<EngineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A sink that drops everything.
    pub fn discard() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: EngineEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }

    pub fn status(&self, message: impl Into<String>) {
        self.emit(EngineEvent::Status {
            message: message.into(),
        });
    }

    pub fn notice(&self, level: NoticeLevel, message: impl Into<String>) {
        self.emit(EngineEvent::Notice {
            level,
            message: message.into(),
        });
    }

    /// Surfaces a failure on both streams.
    pub fn error(&self, message: impl Into<String>) {
        let message = message.into();
        self.status(message.clone());
        self.notice(NoticeLevel::Error, message);
    }

    pub fn source(&self, url: Option<String>) {
        self.emit(EngineEvent::Source { url });
    }

    /// Resets position, duration and the playing/buffering flags.
    pub fn reset_playback(&self, duration_ms: u64) {
        self.emit(EngineEvent::Position { current_ms: 0 });
        self.emit(EngineEvent::Duration { duration_ms });
        self.idle();
    }

    pub fn idle(&self) {
        self.emit(EngineEvent::Playing { playing: false });
        self.emit(EngineEvent::Buffering { buffering: false });
    }
}
