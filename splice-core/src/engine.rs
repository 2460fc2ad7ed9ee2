use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::Arc;

use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};

use crate::assembly::{AssembledStream, Assembler, AssemblyResult};
use crate::config::{CodecSection, SpliceConfig};
use crate::fault::{FaultController, FaultDecision, FaultSignal};
use crate::feedback::{FeedbackSink, NoticeLevel};
use crate::fetch::MediaFetcher;
use crate::media::{
    DelegateAction, DelegateFactory, DelegateFault, LiveDelegate, MediaError, MediaResult,
    MediaRuntime, PlaybackElement,
};
use crate::source::{
    classify, local_source, parse_source_input, AdaptiveProtocol, ParsedSourceInput,
    PlaybackStrategy, TrackDescriptor,
};

/// What became of one `apply_source` call. Failures have already been
/// reported through the feedback sink when this is returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Attached {
        strategy: &'static str,
        label: String,
    },
    /// The input itself was unusable; nothing was torn down.
    Rejected { reason: String },
    Failed { reason: String },
}

impl ApplyOutcome {
    pub fn is_attached(&self) -> bool {
        matches!(self, ApplyOutcome::Attached { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineCommand {
    Apply {
        input: String,
        fallback: Option<String>,
    },
    Fault(FaultSignal),
    DelegateFault(DelegateFault),
    Release,
}

/// Everything owned by the attempt currently bound to the element.
struct AssemblySession {
    stream: Option<AssembledStream>,
    delegate: Option<LiveDelegate>,
}

enum Interrupt {
    Completed,
    Superseded(EngineCommand),
    Closed,
}

pub struct SourceEngine {
    runtime: Rc<dyn MediaRuntime>,
    element: Box<dyn PlaybackElement>,
    fetcher: Arc<dyn MediaFetcher>,
    delegates: Vec<Box<dyn DelegateFactory>>,
    sink: FeedbackSink,
    faults: FaultController,
    codecs: CodecSection,
    session: Option<AssemblySession>,
}

impl SourceEngine {
    pub fn new(
        runtime: Rc<dyn MediaRuntime>,
        element: Box<dyn PlaybackElement>,
        fetcher: Arc<dyn MediaFetcher>,
        sink: FeedbackSink,
        config: &SpliceConfig,
    ) -> Self {
        Self {
            runtime,
            element,
            fetcher,
            delegates: Vec::new(),
            sink,
            faults: FaultController::new(config.faults.clone()),
            codecs: config.codecs.clone(),
            session: None,
        }
    }

    pub fn with_delegate(mut self, factory: Box<dyn DelegateFactory>) -> Self {
        self.delegates.push(factory);
        self
    }

    pub fn element(&self) -> &dyn PlaybackElement {
        self.element.as_ref()
    }

    pub fn faults(&self) -> &FaultController {
        &self.faults
    }

    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    fn delegate_factory(&self, protocol: AdaptiveProtocol) -> Option<&dyn DelegateFactory> {
        self.delegates
            .iter()
            .find(|factory| factory.protocol() == protocol)
            .map(|factory| factory.as_ref())
    }

    /// Drops the current session (destroying its delegate and releasing its
    /// container) and leaves the element without a source.
    fn teardown(&mut self) {
        if self.session.take().is_some() {
            debug!("tore down assembly session");
        }
        self.element.clear_source();
    }

    /// Host-side teardown, e.g. when the player goes away.
    pub fn release(&mut self) {
        self.teardown();
    }

    /// Resolves `input` into something playable and binds it to the element.
    /// Never fails: problems are reported through the sink and the outcome.
    /// Unusable input leaves the current attempt and its fault state alone.
    pub async fn apply_source(&mut self, input: &str, fallback: Option<String>) -> ApplyOutcome {
        if let Some(url) = local_source(input) {
            let url = url.to_string();
            info!(url = %url, "attaching local source");
            self.faults.begin_attempt(fallback);
            self.teardown();
            self.element.set_source(&url);
            self.faults.expect_source(url.clone());
            self.publish(&url, &ParsedSourceInput::default(), true);
            self.faults.settle();
            return ApplyOutcome::Attached {
                strategy: "local",
                label: url,
            };
        }

        let parsed = parse_source_input(input);
        if parsed.is_empty() {
            let reason = "no playable source was found in the input".to_string();
            self.sink.error(&reason);
            return ApplyOutcome::Rejected { reason };
        }

        let strategy = match classify(&parsed.entries) {
            Ok(strategy) => self.resolve_delegate_support(strategy),
            Err(err) => {
                warn!(error = %err, entries = parsed.entries.len(), "source input rejected");
                let reason = err.to_string();
                self.sink.error(&reason);
                return ApplyOutcome::Rejected { reason };
            }
        };
        info!(strategy = strategy.name(), entries = parsed.entries.len(), "applying source");

        self.faults.begin_attempt(fallback);
        self.teardown();
        let attached = match &strategy {
            PlaybackStrategy::Local { url }
            | PlaybackStrategy::Direct {
                entry: TrackDescriptor { url, .. },
            } => {
                self.element.set_source(url);
                self.faults.expect_source(url.clone());
                Ok(())
            }
            PlaybackStrategy::MultiSegment { video, audio } => self
                .load_segments(video, audio)
                .await
                .map_err(|err| format!("m4s load failed: {err}")),
            PlaybackStrategy::DualDirect { video, audio } => {
                self.sink.status("separate video and audio links detected, merging them");
                self.sink
                    .notice(NoticeLevel::Info, "merging separate video and audio links");
                self.load_direct_pair(video, audio)
                    .await
                    .map_err(|err| format!("dual direct merge failed: {err}"))
            }
            PlaybackStrategy::Adaptive { protocol, entry } => self
                .attach_delegate(*protocol, &entry.url)
                .map_err(|err| err.to_string()),
        };

        if let Err(reason) = attached {
            warn!(reason = %reason, strategy = strategy.name(), "source failed to load");
            self.teardown();
            self.sink.error(&reason);
            return ApplyOutcome::Failed { reason };
        }

        let label = strategy.display_label();
        let assembled = matches!(strategy, PlaybackStrategy::MultiSegment { .. });
        self.publish(&label, &parsed, !assembled);
        self.faults.settle();
        ApplyOutcome::Attached {
            strategy: strategy.name(),
            label,
        }
    }

    /// An HLS manifest plays as a plain source when no usable HLS runtime is
    /// registered; the element may support it natively.
    fn resolve_delegate_support(&self, strategy: PlaybackStrategy) -> PlaybackStrategy {
        match strategy {
            PlaybackStrategy::Adaptive {
                protocol: AdaptiveProtocol::Hls,
                entry,
            } if !self
                .delegate_factory(AdaptiveProtocol::Hls)
                .is_some_and(|factory| factory.is_supported()) =>
            {
                debug!(url = %entry.url, "HLS runtime unavailable, attaching directly");
                PlaybackStrategy::Direct { entry }
            }
            other => other,
        }
    }

    async fn load_segments(
        &mut self,
        video: &[TrackDescriptor],
        audio: &[TrackDescriptor],
    ) -> AssemblyResult<()> {
        let assembler = Assembler {
            runtime: self.runtime.as_ref(),
            fetcher: self.fetcher.as_ref(),
            sink: &self.sink,
            codecs: &self.codecs,
        };
        let stream = assembler
            .prime_segments(self.element.as_mut(), video, audio)
            .await?;
        self.faults.expect_source(stream.binding_url());
        let session = self.session.insert(AssemblySession {
            stream: Some(stream),
            delegate: None,
        });
        if let Some(stream) = session.stream.as_mut() {
            assembler.stream_segments(stream, video, audio).await?;
        }
        Ok(())
    }

    async fn load_direct_pair(
        &mut self,
        video: &TrackDescriptor,
        audio: &TrackDescriptor,
    ) -> AssemblyResult<()> {
        let assembler = Assembler {
            runtime: self.runtime.as_ref(),
            fetcher: self.fetcher.as_ref(),
            sink: &self.sink,
            codecs: &self.codecs,
        };
        let stream = assembler
            .assemble_direct(self.element.as_mut(), video, audio)
            .await?;
        self.faults.expect_source(stream.binding_url());
        self.session = Some(AssemblySession {
            stream: Some(stream),
            delegate: None,
        });
        Ok(())
    }

    fn attach_delegate(&mut self, protocol: AdaptiveProtocol, url: &str) -> MediaResult<()> {
        let Some(factory) = self
            .delegates
            .iter()
            .find(|factory| factory.protocol() == protocol && factory.is_supported())
        else {
            return Err(MediaError::Delegate {
                protocol: protocol.to_string(),
                reason: format!("no supported runtime is registered for {url}"),
            });
        };
        let delegate = factory.create(self.element.as_mut(), url)?;
        let expected = self
            .element
            .current_source()
            .unwrap_or_else(|| url.to_string());
        self.faults.expect_source(expected);
        self.session = Some(AssemblySession {
            stream: None,
            delegate: Some(LiveDelegate::new(protocol, delegate)),
        });
        let name = protocol.to_string().to_uppercase();
        self.sink.status(format!("{name} stream attached"));
        self.sink
            .notice(NoticeLevel::Info, format!("loading {name} stream"));
        Ok(())
    }

    fn publish(&self, label: &str, parsed: &ParsedSourceInput, announce: bool) {
        self.sink.source(Some(label.to_string()));
        let duration_ms = parsed
            .duration_seconds
            .map(|seconds| (seconds * 1000.0).round() as u64)
            .unwrap_or(0);
        self.sink.reset_playback(duration_ms);
        if !announce {
            return;
        }
        let status = match (&parsed.title, parsed.from_structured_manifest) {
            (Some(title), true) => format!("source loaded from manifest: {title}"),
            (None, true) => "source loaded from manifest".to_string(),
            _ => "source loaded".to_string(),
        };
        self.sink.status(status);
        self.sink.notice(NoticeLevel::Success, "source loaded");
    }

    /// Classifies a fault and applies everything except a fallback re-apply,
    /// which is left to the caller.
    fn observe_fault(&mut self, signal: &FaultSignal) -> FaultDecision {
        let decision = self.faults.observe(signal);
        match &decision {
            FaultDecision::Ignored(reason) => {
                debug!(reason = %reason, code = signal.code, "ignoring playback fault");
            }
            FaultDecision::RetryWithFallback { .. } => {
                self.sink
                    .status("local media could not be played, retrying with the original link");
                self.sink
                    .notice(NoticeLevel::Info, "retrying with the original link");
            }
            FaultDecision::Surface { message } => {
                self.sink.error(message);
                self.teardown();
                self.sink.idle();
            }
        }
        decision
    }

    pub async fn handle_fault(&mut self, signal: FaultSignal) -> FaultDecision {
        let decision = self.observe_fault(&signal);
        if let FaultDecision::RetryWithFallback { url } = &decision {
            self.apply_source(url, None).await;
        }
        decision
    }

    pub fn handle_delegate_fault(&mut self, fault: &DelegateFault) -> DelegateAction {
        let Some(delegate) = self
            .session
            .as_mut()
            .and_then(|session| session.delegate.as_mut())
        else {
            return DelegateAction::Ignored;
        };
        let action = delegate.handle_fault(fault);
        match &action {
            DelegateAction::Ignored => {}
            DelegateAction::Relayed { reason } | DelegateAction::Recovered { reason } => {
                self.sink.error(format!("playback failed: {reason}"));
            }
            DelegateAction::Destroyed { reason } => {
                self.sink.error(format!("playback failed: {reason}"));
                if let Some(session) = self.session.as_mut() {
                    session.delegate = None;
                }
            }
        }
        action
    }

    /// Runs `apply_source` while listening for commands. A new apply or a
    /// release drops the in-flight one; faults are held until it finishes.
    async fn apply_interruptible(
        &mut self,
        input: &str,
        fallback: Option<String>,
        commands: &mut UnboundedReceiver<EngineCommand>,
    ) -> (Interrupt, Vec<EngineCommand>) {
        let mut deferred = Vec::new();
        let apply = self.apply_source(input, fallback);
        tokio::pin!(apply);
        loop {
            tokio::select! {
                _ = &mut apply => return (Interrupt::Completed, deferred),
                incoming = commands.recv() => match incoming {
                    Some(command @ (EngineCommand::Apply { .. } | EngineCommand::Release)) => {
                        return (Interrupt::Superseded(command), deferred);
                    }
                    Some(command) => deferred.push(command),
                    None => {
                        (&mut apply).await;
                        return (Interrupt::Closed, deferred);
                    }
                },
            }
        }
    }

    /// Drives the engine from a command channel until it closes.
    pub async fn run(&mut self, mut commands: UnboundedReceiver<EngineCommand>) {
        let mut backlog: VecDeque<EngineCommand> = VecDeque::new();
        let mut closed = false;
        loop {
            let command = match backlog.pop_front() {
                Some(command) => command,
                None if closed => break,
                None => match commands.recv().await {
                    Some(command) => command,
                    None => break,
                },
            };

            match command {
                EngineCommand::Apply { input, fallback } => {
                    let (interrupt, deferred) =
                        self.apply_interruptible(&input, fallback, &mut commands).await;
                    match interrupt {
                        Interrupt::Completed => backlog.extend(deferred),
                        Interrupt::Superseded(next) => {
                            info!("source apply superseded before it finished");
                            backlog.push_front(next);
                        }
                        Interrupt::Closed => {
                            backlog.extend(deferred);
                            closed = true;
                        }
                    }
                }
                EngineCommand::Fault(signal) => {
                    if let FaultDecision::RetryWithFallback { url } = self.observe_fault(&signal) {
                        backlog.push_front(EngineCommand::Apply {
                            input: url,
                            fallback: None,
                        });
                    }
                }
                EngineCommand::DelegateFault(fault) => {
                    self.handle_delegate_fault(&fault);
                }
                EngineCommand::Release => self.release(),
            }
        }
        debug!("engine command channel closed");
    }
}
