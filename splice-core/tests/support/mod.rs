#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use splice_core::media::{DelegateFactory, StreamingDelegate};
use splice_core::{
    AdaptiveProtocol, AppendBuffer, EngineEvent, FeedbackSink, FetchError, FetchRequest,
    FetchResult, MediaError, MediaFetcher, MediaResult, MediaRuntime, PlaybackElement,
    SourceEngine, SpliceConfig, StreamContainer,
};
use tokio::sync::mpsc::UnboundedReceiver;

/// Ordered record of everything the media side was asked to do.
#[derive(Debug, Default)]
pub struct Journal {
    pub events: Vec<String>,
    pub live: usize,
    pub max_live: usize,
    pub created: usize,
}

pub type SharedJournal = Rc<RefCell<Journal>>;

fn log(journal: &SharedJournal, event: impl Into<String>) {
    journal.borrow_mut().events.push(event.into());
}

pub struct MockRuntime {
    journal: SharedJournal,
    unsupported: Vec<String>,
    require_codecs: bool,
    append_delay: Duration,
}

impl MockRuntime {
    pub fn new(journal: SharedJournal) -> Self {
        Self {
            journal,
            unsupported: Vec::new(),
            require_codecs: false,
            append_delay: Duration::from_millis(10),
        }
    }

    /// Makes `is_type_supported` reject every mime containing `token`.
    pub fn without(mut self, token: &str) -> Self {
        self.unsupported.push(token.to_string());
        self
    }

    /// Reports bare container types without a codecs parameter as unsupported.
    pub fn require_codecs(mut self) -> Self {
        self.require_codecs = true;
        self
    }
}

impl MediaRuntime for MockRuntime {
    fn is_type_supported(&self, mime: &str) -> bool {
        if self.require_codecs && !mime.contains("codecs") {
            return false;
        }
        !self.unsupported.iter().any(|token| mime.contains(token.as_str()))
    }

    fn create_container(&self) -> MediaResult<Box<dyn StreamContainer>> {
        let id = {
            let mut journal = self.journal.borrow_mut();
            journal.created += 1;
            journal.live += 1;
            journal.max_live = journal.max_live.max(journal.live);
            journal.created
        };
        log(&self.journal, format!("container:create:{id}"));
        Ok(Box::new(MockContainer {
            id,
            binding: format!("blob:mock/{id}"),
            open: false,
            released: false,
            journal: self.journal.clone(),
            append_delay: self.append_delay,
        }))
    }
}

struct MockContainer {
    id: usize,
    binding: String,
    open: bool,
    released: bool,
    journal: SharedJournal,
    append_delay: Duration,
}

#[async_trait(?Send)]
impl StreamContainer for MockContainer {
    fn binding_url(&self) -> &str {
        &self.binding
    }

    async fn wait_open(&mut self) -> MediaResult<()> {
        self.open = true;
        Ok(())
    }

    fn add_buffer(&mut self, mime: &str) -> MediaResult<Box<dyn AppendBuffer>> {
        log(&self.journal, format!("buffer:add:{}:{mime}", self.id));
        Ok(Box::new(MockBuffer {
            mime: mime.to_string(),
            journal: self.journal.clone(),
            delay: self.append_delay,
            buffered: 0.0,
        }))
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn set_duration(&mut self, seconds: f64) -> MediaResult<()> {
        log(&self.journal, format!("container:duration:{}:{seconds}", self.id));
        Ok(())
    }

    fn end_of_stream(&mut self) -> MediaResult<()> {
        self.open = false;
        log(&self.journal, format!("container:eos:{}", self.id));
        Ok(())
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.open = false;
        self.journal.borrow_mut().live -= 1;
        log(&self.journal, format!("container:release:{}", self.id));
    }
}

/// Accepts a chunk named `<codec>#<n>` only when its mime names that codec
/// or carries no codecs parameter at all.
struct MockBuffer {
    mime: String,
    journal: SharedJournal,
    delay: Duration,
    buffered: f64,
}

#[async_trait(?Send)]
impl AppendBuffer for MockBuffer {
    fn mime(&self) -> &str {
        &self.mime
    }

    async fn append(&mut self, chunk: Bytes) -> MediaResult<()> {
        let name = String::from_utf8_lossy(&chunk).to_string();
        let codec = name.split('#').next().unwrap_or_default().to_string();
        if self.mime.contains("codecs") && !self.mime.contains(&codec) {
            log(&self.journal, format!("append:reject:{name}"));
            return Err(MediaError::Append {
                reason: format!("{name} is not {}", self.mime),
            });
        }
        log(&self.journal, format!("append:begin:{name}"));
        tokio::time::sleep(self.delay).await;
        self.buffered += 2.0;
        log(&self.journal, format!("append:end:{name}"));
        Ok(())
    }

    fn buffered_end(&self) -> f64 {
        self.buffered
    }
}

pub struct MockElement {
    journal: SharedJournal,
    source: Option<String>,
}

impl MockElement {
    pub fn new(journal: SharedJournal) -> Self {
        Self {
            journal,
            source: None,
        }
    }
}

impl PlaybackElement for MockElement {
    fn set_source(&mut self, url: &str) {
        self.source = Some(url.to_string());
        log(&self.journal, format!("element:set:{url}"));
    }

    fn clear_source(&mut self) {
        self.source = None;
        log(&self.journal, "element:clear");
    }

    fn play(&mut self) {
        log(&self.journal, "element:play");
    }

    fn current_source(&self) -> Option<String> {
        self.source.clone()
    }
}

#[derive(Clone)]
enum Reply {
    Body(Bytes),
    Status(u16),
    Broken(String),
}

/// Serves canned bodies per URL and records request order.
#[derive(Clone, Default)]
pub struct MockFetcher {
    replies: Arc<Mutex<HashMap<String, (Reply, Duration)>>>,
    pub calls: Arc<Mutex<Vec<String>>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn serve(&self, url: &str, body: &str) -> &Self {
        self.reply(url, Reply::Body(Bytes::from(body.to_string())), Duration::ZERO)
    }

    pub fn serve_after(&self, url: &str, body: &str, delay: Duration) -> &Self {
        self.reply(url, Reply::Body(Bytes::from(body.to_string())), delay)
    }

    pub fn fail(&self, url: &str, status: u16) -> &Self {
        self.reply(url, Reply::Status(status), Duration::ZERO)
    }

    pub fn break_connection(&self, url: &str, message: &str) -> &Self {
        self.reply(url, Reply::Broken(message.to_string()), Duration::ZERO)
    }

    fn reply(&self, url: &str, reply: Reply, delay: Duration) -> &Self {
        self.replies
            .lock()
            .unwrap()
            .insert(url.to_string(), (reply, delay));
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl MediaFetcher for MockFetcher {
    async fn fetch(&self, request: &FetchRequest) -> FetchResult<Bytes> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("start:{}", request.url));
        let reply = self.replies.lock().unwrap().get(&request.url).cloned();
        let (reply, delay) = reply.unwrap_or((Reply::Status(404), Duration::ZERO));
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.calls
            .lock()
            .unwrap()
            .push(format!("end:{}", request.url));
        match reply {
            Reply::Body(body) => Ok(body),
            Reply::Status(status) => Err(FetchError::Status {
                url: request.url.clone(),
                status,
            }),
            Reply::Broken(message) => Err(FetchError::Transport {
                url: request.url.clone(),
                message,
            }),
        }
    }
}

pub struct MockDelegateFactory {
    pub protocol: AdaptiveProtocol,
    pub supported: bool,
    pub journal: SharedJournal,
}

impl DelegateFactory for MockDelegateFactory {
    fn protocol(&self) -> AdaptiveProtocol {
        self.protocol
    }

    fn is_supported(&self) -> bool {
        self.supported
    }

    fn create(
        &self,
        element: &mut dyn PlaybackElement,
        manifest_url: &str,
    ) -> MediaResult<Box<dyn StreamingDelegate>> {
        element.set_source(&format!("blob:{}/{manifest_url}", self.protocol));
        log(&self.journal, format!("delegate:create:{manifest_url}"));
        Ok(Box::new(MockDelegate {
            journal: self.journal.clone(),
        }))
    }
}

struct MockDelegate {
    journal: SharedJournal,
}

impl StreamingDelegate for MockDelegate {
    fn recover_media_error(&mut self) {
        log(&self.journal, "delegate:recover");
    }

    fn destroy(&mut self) {
        log(&self.journal, "delegate:destroy");
    }
}

pub struct Harness {
    pub engine: SourceEngine,
    pub journal: SharedJournal,
    pub fetcher: MockFetcher,
    pub events: UnboundedReceiver<EngineEvent>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_runtime(MockRuntime::new)
    }

    pub fn with_runtime(build: impl FnOnce(SharedJournal) -> MockRuntime) -> Self {
        Self::build(build, true, true)
    }

    /// Registers both delegate factories, reporting the given support.
    pub fn with_delegate_support(hls: bool, dash: bool) -> Self {
        Self::build(MockRuntime::new, hls, dash)
    }

    fn build(
        runtime: impl FnOnce(SharedJournal) -> MockRuntime,
        hls: bool,
        dash: bool,
    ) -> Self {
        let journal: SharedJournal = Rc::new(RefCell::new(Journal::default()));
        let fetcher = MockFetcher::new();
        let (sink, events) = FeedbackSink::channel();
        let engine = SourceEngine::new(
            Rc::new(runtime(journal.clone())),
            Box::new(MockElement::new(journal.clone())),
            Arc::new(fetcher.clone()),
            sink,
            &SpliceConfig::default(),
        )
        .with_delegate(Box::new(MockDelegateFactory {
            protocol: AdaptiveProtocol::Hls,
            supported: hls,
            journal: journal.clone(),
        }))
        .with_delegate(Box::new(MockDelegateFactory {
            protocol: AdaptiveProtocol::Dash,
            supported: dash,
            journal: journal.clone(),
        }));
        Self {
            engine,
            journal,
            fetcher,
            events,
        }
    }

    pub fn drain(&mut self) -> Vec<EngineEvent> {
        let mut drained = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            drained.push(event);
        }
        drained
    }

    pub fn media_events(&self) -> Vec<String> {
        self.journal.borrow().events.clone()
    }

    pub fn live_containers(&self) -> usize {
        self.journal.borrow().live
    }
}

pub fn position(events: &[String], needle: &str) -> usize {
    events
        .iter()
        .position(|event| event == needle)
        .unwrap_or_else(|| panic!("missing event {needle} in {events:#?}"))
}

pub fn errors(events: &[EngineEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match event {
            EngineEvent::Notice {
                level: splice_core::NoticeLevel::Error,
                message,
            } => Some(message.clone()),
            _ => None,
        })
        .collect()
}
