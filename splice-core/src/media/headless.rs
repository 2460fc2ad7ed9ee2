//! In-process media runtime used by `splicectl assemble` and the tests.
//! Nothing is decoded: chunks are sniffed for their container and codec
//! family, then written to one file per track.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};
use url::Url;

use super::delegate::{DelegateFactory, StreamingDelegate};
use super::{AppendBuffer, MediaError, MediaResult, MediaRuntime, PlaybackElement, StreamContainer};
use crate::config::HeadlessSection;
use crate::fault::{FaultCode, FaultSignal};
use crate::source::AdaptiveProtocol;

const BINDING_PREFIX: &str = "blob:splice-headless/";
const EBML_MAGIC: [u8; 4] = [0x1A, 0x45, 0xDF, 0xA3];
const MATROSKA_SEGMENT: [u8; 4] = [0x18, 0x53, 0x80, 0x67];
const MATROSKA_CLUSTER: [u8; 4] = [0x1F, 0x43, 0xB6, 0x75];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContainerFormat {
    Mp4,
    WebM,
}

impl ContainerFormat {
    fn from_mime(mime: &str) -> Option<Self> {
        match base_type(mime).split('/').nth(1) {
            Some("mp4") => Some(ContainerFormat::Mp4),
            Some("webm") => Some(ContainerFormat::WebM),
            _ => None,
        }
    }

    fn extension(&self) -> &'static str {
        match self {
            ContainerFormat::Mp4 => "mp4",
            ContainerFormat::WebM => "webm",
        }
    }
}

struct Sniffed {
    format: ContainerFormat,
    init: bool,
}

fn sniff(chunk: &[u8]) -> Option<Sniffed> {
    let head: [u8; 4] = chunk.get(..4)?.try_into().ok()?;
    match head {
        EBML_MAGIC => {
            return Some(Sniffed {
                format: ContainerFormat::WebM,
                init: true,
            })
        }
        MATROSKA_SEGMENT | MATROSKA_CLUSTER => {
            return Some(Sniffed {
                format: ContainerFormat::WebM,
                init: false,
            })
        }
        _ => {}
    }
    let init = match chunk.get(4..8)? {
        b"ftyp" | b"moov" => true,
        b"styp" | b"moof" | b"sidx" | b"emsg" | b"prft" | b"mdat" | b"free" | b"skip" => false,
        _ => return None,
    };
    Some(Sniffed {
        format: ContainerFormat::Mp4,
        init,
    })
}

fn base_type(mime: &str) -> String {
    mime.split(';').next().unwrap_or_default().trim().to_ascii_lowercase()
}

fn codec_family(mime: &str) -> Option<String> {
    let params = mime.split(';').skip(1);
    for param in params {
        let Some((key, value)) = param.split_once('=') else {
            continue;
        };
        if key.trim().eq_ignore_ascii_case("codecs") {
            let value = value.trim().trim_matches('"');
            let first = value.split(',').next().unwrap_or_default().trim();
            let family = first.split('.').next().unwrap_or_default();
            return Some(family.to_ascii_lowercase());
        }
    }
    None
}

/// Sample entry or codec ID that an init segment must contain for the
/// declared codec family.
fn codec_markers(format: ContainerFormat, family: &str) -> Option<&'static [&'static str]> {
    let markers: &'static [&'static str] = match (format, family) {
        (ContainerFormat::Mp4, "avc1" | "avc3") => &["avc1", "avc3"],
        (ContainerFormat::Mp4, "hev1") => &["hev1"],
        (ContainerFormat::Mp4, "hvc1") => &["hvc1"],
        (ContainerFormat::Mp4, "av01") => &["av01"],
        (ContainerFormat::Mp4, "vp09") => &["vp09"],
        (ContainerFormat::Mp4, "mp4a") => &["mp4a"],
        (ContainerFormat::Mp4, "opus") => &["Opus"],
        (ContainerFormat::WebM, "vp9" | "vp09") => &["V_VP9"],
        (ContainerFormat::WebM, "vp8") => &["V_VP8"],
        (ContainerFormat::WebM, "av1" | "av01") => &["V_AV1"],
        (ContainerFormat::WebM, "opus") => &["A_OPUS"],
        (ContainerFormat::WebM, "vorbis") => &["A_VORBIS"],
        _ => return None,
    };
    Some(markers)
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|window| window == needle)
}

pub struct HeadlessRuntime {
    containers: Vec<String>,
    output_dir: PathBuf,
    live: Arc<AtomicUsize>,
    next_id: AtomicUsize,
}

impl HeadlessRuntime {
    pub fn new(section: &HeadlessSection) -> Self {
        Self {
            containers: section
                .containers
                .iter()
                .map(|mime| base_type(mime))
                .collect(),
            output_dir: section.output_path(),
            live: Arc::new(AtomicUsize::new(0)),
            next_id: AtomicUsize::new(1),
        }
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Containers created and not yet released.
    pub fn live_containers(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

impl MediaRuntime for HeadlessRuntime {
    fn is_type_supported(&self, mime: &str) -> bool {
        let base = base_type(mime);
        if !self.containers.contains(&base) {
            return false;
        }
        match (ContainerFormat::from_mime(&base), codec_family(mime)) {
            (Some(_), None) => true,
            (Some(format), Some(family)) => codec_markers(format, &family).is_some(),
            (None, _) => false,
        }
    }

    fn create_container(&self) -> MediaResult<Box<dyn StreamContainer>> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.live.fetch_add(1, Ordering::SeqCst);
        debug!(id, "created headless container");
        Ok(Box::new(HeadlessContainer {
            binding_url: format!("{BINDING_PREFIX}{id}"),
            state: ContainerState::Closed,
            released: false,
            duration: None,
            output_dir: self.output_dir.clone(),
            live: self.live.clone(),
        }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContainerState {
    Closed,
    Open,
    Ended,
}

impl ContainerState {
    fn name(&self) -> &'static str {
        match self {
            ContainerState::Closed => "closed",
            ContainerState::Open => "open",
            ContainerState::Ended => "ended",
        }
    }
}

struct HeadlessContainer {
    binding_url: String,
    state: ContainerState,
    released: bool,
    duration: Option<f64>,
    output_dir: PathBuf,
    live: Arc<AtomicUsize>,
}

impl HeadlessContainer {
    fn require_open(&self) -> MediaResult<()> {
        if self.state == ContainerState::Open {
            Ok(())
        } else {
            Err(MediaError::InvalidState {
                state: self.state.name().into(),
            })
        }
    }
}

#[async_trait(?Send)]
impl StreamContainer for HeadlessContainer {
    fn binding_url(&self) -> &str {
        &self.binding_url
    }

    async fn wait_open(&mut self) -> MediaResult<()> {
        if self.released {
            return Err(MediaError::Open {
                reason: "container was released".into(),
            });
        }
        self.state = ContainerState::Open;
        Ok(())
    }

    fn add_buffer(&mut self, mime: &str) -> MediaResult<Box<dyn AppendBuffer>> {
        self.require_open()?;
        let format = ContainerFormat::from_mime(mime).ok_or_else(|| MediaError::Unsupported {
            mime: mime.into(),
        })?;
        let markers = match codec_family(mime) {
            Some(family) => Some(codec_markers(format, &family).ok_or_else(|| {
                MediaError::Unsupported { mime: mime.into() }
            })?),
            None => None,
        };
        let track = if base_type(mime).starts_with("audio/") {
            "audio"
        } else {
            "video"
        };
        let path = self
            .output_dir
            .join(format!("{track}.{}", format.extension()));
        Ok(Box::new(HeadlessBuffer {
            mime: mime.into(),
            format,
            markers,
            path,
            file: None,
            initialized: false,
            updating: false,
        }))
    }

    fn is_open(&self) -> bool {
        self.state == ContainerState::Open
    }

    fn set_duration(&mut self, seconds: f64) -> MediaResult<()> {
        self.require_open()?;
        self.duration = Some(seconds);
        Ok(())
    }

    fn end_of_stream(&mut self) -> MediaResult<()> {
        self.require_open()?;
        self.state = ContainerState::Ended;
        info!(binding = %self.binding_url, duration = ?self.duration, "headless stream ended");
        Ok(())
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.state = ContainerState::Closed;
        self.live.fetch_sub(1, Ordering::SeqCst);
        debug!(binding = %self.binding_url, "released headless container");
    }
}

impl Drop for HeadlessContainer {
    fn drop(&mut self) {
        self.release();
    }
}

struct HeadlessBuffer {
    mime: String,
    format: ContainerFormat,
    markers: Option<&'static [&'static str]>,
    path: PathBuf,
    file: Option<File>,
    initialized: bool,
    updating: bool,
}

impl HeadlessBuffer {
    fn validate(&self, chunk: &[u8]) -> MediaResult<()> {
        let sniffed = sniff(chunk).ok_or_else(|| MediaError::Append {
            reason: "unrecognised container data".into(),
        })?;
        if sniffed.format != self.format {
            return Err(MediaError::Append {
                reason: format!("{} cannot accept {:?} data", self.mime, sniffed.format),
            });
        }
        if !self.initialized && !sniffed.init {
            return Err(MediaError::Append {
                reason: "first chunk is not an initialization segment".into(),
            });
        }
        if sniffed.init {
            if let Some(markers) = self.markers {
                if !markers.iter().any(|marker| contains(chunk, marker.as_bytes())) {
                    return Err(MediaError::Append {
                        reason: format!("initialization segment does not match {}", self.mime),
                    });
                }
            }
        }
        Ok(())
    }

    async fn write(&mut self, chunk: &[u8]) -> std::io::Result<()> {
        if self.file.is_none() {
            if let Some(parent) = self.path.parent() {
                fs::create_dir_all(parent).await?;
            }
            self.file = Some(File::create(&self.path).await?);
        }
        if let Some(file) = self.file.as_mut() {
            file.write_all(chunk).await?;
            file.flush().await?;
        }
        Ok(())
    }
}

#[async_trait(?Send)]
impl AppendBuffer for HeadlessBuffer {
    fn mime(&self) -> &str {
        &self.mime
    }

    async fn append(&mut self, chunk: Bytes) -> MediaResult<()> {
        // Still set when a previous append future was dropped mid-write.
        if self.updating {
            return Err(MediaError::AppendCollision);
        }
        self.validate(&chunk)?;
        self.updating = true;
        let written = self.write(&chunk).await;
        self.updating = false;
        written.map_err(|err| MediaError::Append {
            reason: format!("{}: {err}", self.path.display()),
        })?;
        self.initialized = true;
        debug!(path = %self.path.display(), bytes = chunk.len(), "appended chunk");
        Ok(())
    }

    fn buffered_end(&self) -> f64 {
        0.0
    }
}

/// Local bindings the headless element can open: its own container
/// bindings, inline `data:` payloads and `file:` targets that exist.
fn is_playable_local(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    if lower.starts_with("file:") {
        return Url::parse(url)
            .ok()
            .and_then(|parsed| parsed.to_file_path().ok())
            .is_some_and(|path| path.exists());
    }
    !lower.starts_with("blob:") || lower.starts_with(BINDING_PREFIX)
}

#[derive(Debug, Default)]
pub struct HeadlessElement {
    source: Option<String>,
    playing: bool,
    history: Vec<String>,
    faults: Option<UnboundedSender<FaultSignal>>,
}

impl HeadlessElement {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports a source-not-supported fault on `faults` whenever the element
    /// is pointed at a local binding it cannot open. Reports are sent as
    /// soon as the source is set.
    pub fn with_fault_reports(mut self, faults: UnboundedSender<FaultSignal>) -> Self {
        self.faults = Some(faults);
        self
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    /// Every source the element was pointed at, oldest first.
    pub fn history(&self) -> &[String] {
        &self.history
    }
}

impl PlaybackElement for HeadlessElement {
    fn set_source(&mut self, url: &str) {
        self.source = Some(url.to_string());
        self.history.push(url.to_string());
        if is_playable_local(url) {
            return;
        }
        warn!(url, "headless element cannot open local binding");
        if let Some(faults) = &self.faults {
            let _ = faults.send(FaultSignal::new(url, FaultCode::SourceNotSupported.code()));
        }
    }

    fn clear_source(&mut self) {
        self.source = None;
        self.playing = false;
    }

    fn play(&mut self) {
        self.playing = self.source.is_some();
    }

    fn current_source(&self) -> Option<String> {
        self.source.clone()
    }
}

/// Stands in for an adaptive-streaming runtime: it points the element at
/// the manifest and logs, but never fetches segments.
pub struct HeadlessDelegateFactory {
    protocol: AdaptiveProtocol,
}

impl HeadlessDelegateFactory {
    pub fn new(protocol: AdaptiveProtocol) -> Self {
        Self { protocol }
    }
}

impl DelegateFactory for HeadlessDelegateFactory {
    fn protocol(&self) -> AdaptiveProtocol {
        self.protocol
    }

    fn is_supported(&self) -> bool {
        true
    }

    fn create(
        &self,
        element: &mut dyn PlaybackElement,
        manifest_url: &str,
    ) -> MediaResult<Box<dyn StreamingDelegate>> {
        element.set_source(manifest_url);
        info!(protocol = %self.protocol, url = manifest_url, "attached headless delegate");
        Ok(Box::new(HeadlessDelegate {
            protocol: self.protocol,
            manifest_url: manifest_url.to_string(),
        }))
    }
}

struct HeadlessDelegate {
    protocol: AdaptiveProtocol,
    manifest_url: String,
}

impl StreamingDelegate for HeadlessDelegate {
    fn recover_media_error(&mut self) {
        info!(protocol = %self.protocol, url = %self.manifest_url, "headless delegate recovery requested");
    }

    fn destroy(&mut self) {
        debug!(protocol = %self.protocol, url = %self.manifest_url, "headless delegate destroyed");
    }
}
