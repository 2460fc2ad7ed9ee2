use std::fmt;

use tracing::{info, warn};

use super::{MediaResult, PlaybackElement};
use crate::source::AdaptiveProtocol;

/// Error category reported by an adaptive-streaming runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultClass {
    Media,
    Network,
    Other,
}

impl fmt::Display for FaultClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FaultClass::Media => "mediaError",
            FaultClass::Network => "networkError",
            FaultClass::Other => "otherError",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelegateFault {
    pub fatal: bool,
    pub class: FaultClass,
    pub details: String,
}

impl DelegateFault {
    pub fn fatal(class: FaultClass, details: impl Into<String>) -> Self {
        Self {
            fatal: true,
            class,
            details: details.into(),
        }
    }
}

/// A running adaptive-streaming player attached to the element.
pub trait StreamingDelegate {
    fn recover_media_error(&mut self);

    fn destroy(&mut self);
}

pub trait DelegateFactory {
    fn protocol(&self) -> AdaptiveProtocol;

    /// Whether the underlying runtime can run in this environment at all.
    fn is_supported(&self) -> bool;

    /// Attaches a new delegate to `element` and starts loading `manifest_url`.
    fn create(
        &self,
        element: &mut dyn PlaybackElement,
        manifest_url: &str,
    ) -> MediaResult<Box<dyn StreamingDelegate>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DelegateAction {
    Ignored,
    /// Relayed to the user; the delegate keeps running.
    Relayed { reason: String },
    Recovered { reason: String },
    Destroyed { reason: String },
}

/// The delegate owned by the current session, plus its recovery state.
pub struct LiveDelegate {
    protocol: AdaptiveProtocol,
    inner: Box<dyn StreamingDelegate>,
    recovered: bool,
    destroyed: bool,
}

impl LiveDelegate {
    pub fn new(protocol: AdaptiveProtocol, inner: Box<dyn StreamingDelegate>) -> Self {
        Self {
            protocol,
            inner,
            recovered: false,
            destroyed: false,
        }
    }

    pub fn protocol(&self) -> AdaptiveProtocol {
        self.protocol
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// HLS gets a single media-error recovery before it is torn down; any
    /// other fatal class tears it down at once. DASH errors are only relayed.
    pub fn handle_fault(&mut self, fault: &DelegateFault) -> DelegateAction {
        if !fault.fatal || self.destroyed {
            return DelegateAction::Ignored;
        }
        let reason = match self.protocol {
            AdaptiveProtocol::Hls => format!("HLS fatal error: {} ({})", fault.class, fault.details),
            AdaptiveProtocol::Dash => format!("DASH error: {}", fault.details),
        };
        match self.protocol {
            AdaptiveProtocol::Dash => {
                warn!(protocol = %self.protocol, details = %fault.details, "delegate reported an error");
                DelegateAction::Relayed { reason }
            }
            AdaptiveProtocol::Hls if fault.class == FaultClass::Media && !self.recovered => {
                self.recovered = true;
                info!(details = %fault.details, "attempting HLS media error recovery");
                self.inner.recover_media_error();
                DelegateAction::Recovered { reason }
            }
            AdaptiveProtocol::Hls => {
                warn!(class = %fault.class, details = %fault.details, "tearing down HLS delegate");
                self.destroy();
                DelegateAction::Destroyed { reason }
            }
        }
    }

    pub fn destroy(&mut self) {
        if !self.destroyed {
            self.destroyed = true;
            self.inner.destroy();
        }
    }
}

impl Drop for LiveDelegate {
    fn drop(&mut self) {
        self.destroy();
    }
}
