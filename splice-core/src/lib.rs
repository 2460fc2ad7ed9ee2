pub mod assembly;
pub mod config;
pub mod engine;
pub mod error;
pub mod fault;
pub mod feedback;
pub mod fetch;
pub mod headers;
pub mod media;
pub mod source;

pub use assembly::{AssembledStream, Assembler, AssemblyError, AssemblyResult, CodecChoice};
pub use config::{
    load_splice_config, CodecSection, FaultSection, FetchSection, HeaderSection, HeadlessSection,
    SpliceConfig,
};
pub use engine::{ApplyOutcome, EngineCommand, SourceEngine};
pub use error::{ConfigError, ConfigResult};
pub use fault::{FaultCode, FaultController, FaultDecision, FaultSignal, IgnoreReason};
pub use feedback::{EngineEvent, FeedbackSink, NoticeLevel};
pub use fetch::{FetchError, FetchRequest, FetchResult, HttpFetcher, MediaFetcher};
pub use headers::{HeaderRegistration, HeaderRegistry};
pub use media::{
    AppendBuffer, DelegateFactory, DelegateFault, FaultClass, MediaError, MediaResult,
    MediaRuntime, PlaybackElement, StreamContainer, StreamingDelegate,
};
pub use source::{
    classify, local_source, parse_source_input, AdaptiveProtocol, ClassifyError, ParsedSourceInput,
    PlaybackStrategy, TrackDescriptor, TrackKind,
};
