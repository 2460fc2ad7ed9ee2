use std::fmt;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::FaultSection;

/// Media error codes as reported by playable elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultCode {
    Aborted,
    Network,
    Decode,
    SourceNotSupported,
    Unknown(u16),
}

impl FaultCode {
    pub fn from_code(code: u16) -> Self {
        match code {
            1 => FaultCode::Aborted,
            2 => FaultCode::Network,
            3 => FaultCode::Decode,
            4 => FaultCode::SourceNotSupported,
            other => FaultCode::Unknown(other),
        }
    }

    pub fn code(&self) -> u16 {
        match self {
            FaultCode::Aborted => 1,
            FaultCode::Network => 2,
            FaultCode::Decode => 3,
            FaultCode::SourceNotSupported => 4,
            FaultCode::Unknown(code) => *code,
        }
    }

    pub fn reason(&self, local_binding: bool) -> &'static str {
        match self {
            FaultCode::Aborted => "playback was aborted (the source may have been switched)",
            FaultCode::Network => "network error: the media request failed, check that the link is reachable",
            FaultCode::Decode => "decode failed: the media encoding may not be supported",
            FaultCode::SourceNotSupported if local_binding => {
                "the local media could not be loaded: the assembled data is unsupported or the binding was revoked"
            }
            FaultCode::SourceNotSupported => {
                "source not supported: the format is unsupported or blocked by cross-origin policy"
            }
            FaultCode::Unknown(0) => "unknown media error, check the link and network",
            FaultCode::Unknown(_) => "media failed to load, check the format, link or cross-origin settings",
        }
    }
}

/// A raw error notification from the playable element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaultSignal {
    pub source: Option<String>,
    pub code: u16,
}

impl FaultSignal {
    pub fn new(source: impl Into<String>, code: u16) -> Self {
        Self {
            source: Some(source.into()),
            code,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptPhase {
    Idle,
    Applying,
    Settled,
    Faulted,
    Replaced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    Suppressed,
    NoSource,
    UnexpectedSource,
    AlreadyFaulted,
    Duplicate,
}

impl fmt::Display for IgnoreReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            IgnoreReason::Suppressed => "inside suppression window",
            IgnoreReason::NoSource => "element has no source",
            IgnoreReason::UnexpectedSource => "source is not the expected one",
            IgnoreReason::AlreadyFaulted => "source already faulted",
            IgnoreReason::Duplicate => "repeat of the previous fault",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaultDecision {
    Ignored(IgnoreReason),
    RetryWithFallback { url: String },
    Surface { message: String },
}

#[derive(Debug, Clone)]
struct FaultRecord {
    source: String,
    code: u16,
    observed_at: Instant,
}

fn scheme(url: &str) -> &str {
    url.split(':').next().filter(|scheme| !scheme.is_empty()).unwrap_or("unknown")
}

pub fn is_local_binding(url: &str) -> bool {
    matches!(
        scheme(url).to_ascii_lowercase().as_str(),
        "blob" | "file" | "data"
    )
}

/// Decides what a raw playback fault means for the current attempt: noise
/// to drop, a one-shot fallback retry, or an error to show once.
#[derive(Debug)]
pub struct FaultController {
    timing: FaultSection,
    phase: AttemptPhase,
    suppress_until: Option<Instant>,
    expected_source: Option<String>,
    fallback: Option<String>,
    retried: bool,
    last: Option<FaultRecord>,
    faulted_source: Option<String>,
}

impl FaultController {
    pub fn new(timing: FaultSection) -> Self {
        Self {
            timing,
            phase: AttemptPhase::Idle,
            suppress_until: None,
            expected_source: None,
            fallback: None,
            retried: false,
            last: None,
            faulted_source: None,
        }
    }

    pub fn phase(&self) -> AttemptPhase {
        self.phase
    }

    pub fn expected_source(&self) -> Option<&str> {
        self.expected_source.as_deref()
    }

    /// Starts a new attempt, replacing the previous one and clearing every
    /// record it left behind.
    pub fn begin_attempt(&mut self, fallback: Option<String>) {
        if self.phase != AttemptPhase::Idle {
            debug!(previous = ?self.phase, "replacing playback attempt");
            self.phase = AttemptPhase::Replaced;
        }
        self.fallback = fallback.filter(|url| !url.trim().is_empty());
        self.retried = false;
        self.last = None;
        self.faulted_source = None;
        self.expected_source = None;
        self.suppress_until = Some(Instant::now() + self.timing.suppression());
        self.phase = AttemptPhase::Applying;
    }

    pub fn expect_source(&mut self, source: impl Into<String>) {
        self.expected_source = Some(source.into());
    }

    pub fn settle(&mut self) {
        if self.phase == AttemptPhase::Applying {
            self.phase = AttemptPhase::Settled;
        }
    }

    pub fn observe(&mut self, signal: &FaultSignal) -> FaultDecision {
        let now = Instant::now();
        if self.suppress_until.is_some_and(|until| now < until) {
            return FaultDecision::Ignored(IgnoreReason::Suppressed);
        }
        let Some(source) = signal
            .source
            .as_deref()
            .filter(|source| !source.is_empty() && *source != "about:blank")
        else {
            return FaultDecision::Ignored(IgnoreReason::NoSource);
        };
        if self.expected_source.as_deref() != Some(source) {
            return FaultDecision::Ignored(IgnoreReason::UnexpectedSource);
        }
        if self.faulted_source.as_deref() == Some(source) {
            return FaultDecision::Ignored(IgnoreReason::AlreadyFaulted);
        }
        let repeated = self.last.as_ref().is_some_and(|last| {
            last.source == source
                && last.code == signal.code
                && now.duration_since(last.observed_at) < self.timing.repeat_window()
        });
        if repeated {
            return FaultDecision::Ignored(IgnoreReason::Duplicate);
        }
        self.last = Some(FaultRecord {
            source: source.to_string(),
            code: signal.code,
            observed_at: now,
        });

        let code = FaultCode::from_code(signal.code);
        let local = is_local_binding(source);
        if code == FaultCode::SourceNotSupported && local && !self.retried {
            if let Some(url) = self.fallback.take() {
                self.retried = true;
                info!(source, fallback = %url, "local binding unsupported, retrying with fallback");
                return FaultDecision::RetryWithFallback { url };
            }
        }

        let mut message = format!("playback failed: {}", code.reason(local));
        if local {
            message.push_str(&format!(" (code={}, protocol={}", signal.code, scheme(source)));
            if let Some(expected) = &self.expected_source {
                message.push_str(&format!(", expected={}", scheme(expected)));
            }
            message.push(')');
        }
        warn!(source, code = signal.code, "surfacing playback fault");

        self.faulted_source = Some(source.to_string());
        self.suppress_until = Some(now + self.timing.faulted_cooldown());
        self.phase = AttemptPhase::Faulted;
        FaultDecision::Surface { message }
    }
}
