use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use splice_core::media::{HeadlessDelegateFactory, HeadlessElement, HeadlessRuntime};
use splice_core::{
    classify, load_splice_config, local_source, parse_source_input, AdaptiveProtocol,
    ApplyOutcome, ClassifyError, EngineCommand, EngineEvent, FaultSignal, FeedbackSink,
    HeaderRegistry, HttpFetcher, NoticeLevel, ParsedSourceInput, PlaybackStrategy, SourceEngine,
    SpliceConfig,
};
use thiserror::Error;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::{debug, info};

pub type Result<T> = std::result::Result<T, AppError>;

const DEFAULT_CONFIG: &str = "configs/splice.toml";

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] splice_core::ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("fetch setup failed: {0}")]
    Fetch(#[from] splice_core::FetchError),
    #[error("{0}")]
    Classify(#[from] ClassifyError),
    #[error("no input given: pass it as an argument, with --file, or as - for stdin")]
    MissingInput,
    #[error("playback not attached: {0}")]
    Playback(String),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Resolve and assemble media sources from the command line", long_about = None)]
pub struct Cli {
    /// Path to splice.toml (defaults apply when configs/splice.toml is absent)
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long, short)]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show the track descriptors found in the input
    Parse(InputArgs),
    /// Show which playback strategy the input resolves to
    Classify(InputArgs),
    /// Run the engine headlessly and write assembled tracks to disk
    Assemble(AssembleArgs),
}

#[derive(Args, Debug, Clone)]
pub struct InputArgs {
    /// Source text: a link, several lines, or a JSON manifest. Use - for stdin
    #[arg(value_name = "INPUT")]
    pub input: Option<String>,
    /// Read the source text from a file
    #[arg(long, value_name = "PATH", conflicts_with = "input")]
    pub file: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct AssembleArgs {
    #[command(flatten)]
    pub source: InputArgs,
    /// Directory for the assembled track files
    #[arg(long, value_name = "DIR")]
    pub out: Option<PathBuf>,
    /// Link to retry with when a local binding cannot be played
    #[arg(long, value_name = "URL")]
    pub fallback: Option<String>,
}

pub fn run(cli: Cli) -> Result<()> {
    match &cli.command {
        Commands::Parse(args) => {
            let input = read_input(args)?;
            render(&parse_source_input(&input), cli.format)?;
        }
        Commands::Classify(args) => {
            let input = read_input(args)?;
            let report = classify_report(&input)?;
            render(&report, cli.format)?;
        }
        Commands::Assemble(args) => {
            let input = read_input(&args.source)?;
            let config = load_config(cli.config.as_deref())?;
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;
            let report = runtime.block_on(assemble(&config, &input, args))?;
            render(&report, cli.format)?;
            if !report.attached {
                return Err(AppError::Playback(report.detail.clone()));
            }
        }
    }
    Ok(())
}

fn read_input(args: &InputArgs) -> Result<String> {
    match (&args.input, &args.file) {
        (_, Some(path)) => Ok(fs::read_to_string(path)?),
        (Some(input), None) if input == "-" => {
            let mut buffer = String::new();
            io::stdin().read_to_string(&mut buffer)?;
            Ok(buffer)
        }
        (Some(input), None) => Ok(input.clone()),
        (None, None) => Err(AppError::MissingInput),
    }
}

fn load_config(path: Option<&Path>) -> Result<SpliceConfig> {
    match path {
        Some(path) => Ok(load_splice_config(path)?),
        None if Path::new(DEFAULT_CONFIG).exists() => Ok(load_splice_config(DEFAULT_CONFIG)?),
        None => {
            debug!("no config file found, using defaults");
            Ok(SpliceConfig::default())
        }
    }
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

trait DisplayFallback {
    fn display(&self) -> String;
}

impl DisplayFallback for ParsedSourceInput {
    fn display(&self) -> String {
        if self.entries.is_empty() {
            return "no links found".to_string();
        }
        let mut lines = Vec::new();
        if let Some(title) = &self.title {
            lines.push(format!("title: {title}"));
        }
        if let Some(seconds) = self.duration_seconds {
            lines.push(format!("duration: {seconds:.1}s"));
        }
        for entry in &self.entries {
            let headers = entry
                .request_headers
                .as_ref()
                .map(|headers| format!(" headers={}", headers.len()))
                .unwrap_or_default();
            lines.push(format!("{:<5} {}{headers}", entry.track.as_str(), entry.url));
        }
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct ClassifyReport {
    pub label: String,
    #[serde(flatten)]
    pub strategy: PlaybackStrategy,
}

fn resolve_strategy(input: &str) -> std::result::Result<PlaybackStrategy, ClassifyError> {
    if let Some(url) = local_source(input) {
        return Ok(PlaybackStrategy::Local {
            url: url.to_string(),
        });
    }
    classify(&parse_source_input(input).entries)
}

fn classify_report(input: &str) -> Result<ClassifyReport> {
    let strategy = resolve_strategy(input)?;
    Ok(ClassifyReport {
        label: strategy.display_label(),
        strategy,
    })
}

impl DisplayFallback for ClassifyReport {
    fn display(&self) -> String {
        format!("{} -> {}", self.strategy.name(), self.label)
    }
}

#[derive(Debug, Serialize)]
pub struct AssembleReport {
    pub attached: bool,
    pub strategy: Option<&'static str>,
    pub detail: String,
    pub output_dir: PathBuf,
    pub headers_registered: usize,
    pub events: Vec<EngineEvent>,
}

async fn assemble(config: &SpliceConfig, input: &str, args: &AssembleArgs) -> Result<AssembleReport> {
    let registry = Arc::new(HeaderRegistry::new(config.headers.ttl()));
    let headers_registered = registry.register_descriptors(&parse_source_input(input).entries);
    let fetcher = HttpFetcher::new(&config.fetch, registry)?;

    let mut media = HeadlessRuntime::new(&config.headless);
    if let Some(out) = &args.out {
        media = media.with_output_dir(out);
    }
    let media = Rc::new(media);
    let (sink, mut events) = FeedbackSink::channel();
    let (fault_reports, faults) = mpsc::unbounded_channel();
    let mut engine = SourceEngine::new(
        media.clone(),
        Box::new(HeadlessElement::new().with_fault_reports(fault_reports)),
        Arc::new(fetcher),
        sink,
        config,
    )
    .with_delegate(Box::new(HeadlessDelegateFactory::new(AdaptiveProtocol::Hls)))
    .with_delegate(Box::new(HeadlessDelegateFactory::new(AdaptiveProtocol::Dash)));

    let outcome = engine.apply_source(input, args.fallback.clone()).await;
    let faulted = forward_faults(&mut engine, faults, config.faults.suppression()).await;
    let current = engine.element().current_source();
    info!(?outcome, ?current, live = media.live_containers(), "headless assembly finished");
    engine.release();

    let mut collected = Vec::new();
    while let Ok(event) = events.try_recv() {
        collected.push(event);
    }
    let (attached, strategy, detail) = match outcome {
        ApplyOutcome::Attached { .. } if !faulted.is_empty() => {
            match current.filter(|url| !faulted.contains(url)) {
                Some(url) => {
                    let strategy = resolve_strategy(&url).ok().map(|strategy| strategy.name());
                    (true, strategy, url)
                }
                None => (false, None, last_error(&collected)),
            }
        }
        ApplyOutcome::Attached { strategy, label } => (true, Some(strategy), label),
        ApplyOutcome::Rejected { reason } | ApplyOutcome::Failed { reason } => (false, None, reason),
    };
    Ok(AssembleReport {
        attached,
        strategy,
        detail,
        output_dir: media.output_dir().to_path_buf(),
        headers_registered,
        events: collected,
    })
}

/// Hands the element's fault reports to the engine's run loop. The headless
/// element reports as soon as a source is set, so each report is held past
/// the swap suppression window. Returns the sources that faulted.
async fn forward_faults(
    engine: &mut SourceEngine,
    mut reports: UnboundedReceiver<FaultSignal>,
    window: Duration,
) -> Vec<String> {
    let (commands, queue) = mpsc::unbounded_channel();
    let driver = async move {
        let mut faulted = Vec::new();
        let mut next = reports.try_recv().ok();
        while let Some(signal) = next {
            tokio::time::sleep(window).await;
            debug!(source = ?signal.source, code = signal.code, "forwarding element fault");
            faulted.extend(signal.source.clone());
            if commands.send(EngineCommand::Fault(signal)).is_err() {
                break;
            }
            // Any fallback is applied meanwhile; its own reports are queued by then.
            tokio::time::sleep(window).await;
            next = reports.try_recv().ok();
        }
        faulted
    };
    let ((), faulted) = tokio::join!(engine.run(queue), driver);
    faulted
}

fn last_error(events: &[EngineEvent]) -> String {
    events
        .iter()
        .rev()
        .find_map(|event| match event {
            EngineEvent::Notice {
                level: NoticeLevel::Error,
                message,
            } => Some(message.clone()),
            _ => None,
        })
        .unwrap_or_else(|| "playback failed".to_string())
}

fn describe(event: &EngineEvent) -> Option<String> {
    match event {
        EngineEvent::Status { message } => Some(format!("status   {message}")),
        EngineEvent::Notice { level, message } => {
            let tag = match level {
                NoticeLevel::Info => "info",
                NoticeLevel::Success => "ok",
                NoticeLevel::Error => "error",
            };
            Some(format!("{tag:<8} {message}"))
        }
        EngineEvent::Source { url: Some(url) } => Some(format!("source   {url}")),
        EngineEvent::Duration { duration_ms } if *duration_ms > 0 => {
            Some(format!("duration {duration_ms}ms"))
        }
        _ => None,
    }
}

impl DisplayFallback for AssembleReport {
    fn display(&self) -> String {
        let mut lines = vec![match self.strategy {
            Some(strategy) => format!("attached via {strategy}: {}", self.detail),
            None => format!("not attached: {}", self.detail),
        }];
        if self.strategy == Some("multi_segment") || self.strategy == Some("dual_direct") {
            lines.push(format!("tracks written to {}", self.output_dir.display()));
        }
        if self.headers_registered > 0 {
            lines.push(format!("header overrides registered: {}", self.headers_registered));
        }
        lines.extend(self.events.iter().filter_map(describe));
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn assemble_args(input: &str, out: &Path) -> AssembleArgs {
        AssembleArgs {
            source: InputArgs {
                input: Some(input.to_string()),
                file: None,
            },
            out: Some(out.to_path_buf()),
            fallback: None,
        }
    }

    #[test]
    fn cli_parses_assemble_flags() {
        let cli = Cli::try_parse_from([
            "splicectl",
            "--format",
            "json",
            "assemble",
            "https://x/a.m4s",
            "--out",
            "/tmp/out",
            "--fallback",
            "https://x/v.mp4",
        ])
        .unwrap();
        assert!(matches!(cli.format, OutputFormat::Json));
        match cli.command {
            Commands::Assemble(args) => {
                assert_eq!(args.source.input.as_deref(), Some("https://x/a.m4s"));
                assert_eq!(args.out, Some(PathBuf::from("/tmp/out")));
                assert_eq!(args.fallback.as_deref(), Some("https://x/v.mp4"));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn input_and_file_conflict() {
        let err = Cli::try_parse_from(["splicectl", "parse", "x", "--file", "input.txt"]);
        assert!(err.is_err());
    }

    #[test]
    fn reads_input_from_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("links.txt");
        fs::write(&path, "https://x/a.m4s\nhttps://x/b.m4s\n").unwrap();
        let args = InputArgs {
            input: None,
            file: Some(path),
        };
        let input = read_input(&args).unwrap();
        let report = classify_report(&input).unwrap();
        assert_eq!(report.label, "m4s://merged(2)");
    }

    #[test]
    fn missing_input_is_an_error() {
        let args = InputArgs {
            input: None,
            file: None,
        };
        assert!(matches!(read_input(&args), Err(AppError::MissingInput)));
    }

    #[test]
    fn classify_errors_surface_their_message() {
        let err = classify_report("https://x/a.mp4\nhttps://x/b.mp4\nhttps://x/c.mp4").unwrap_err();
        assert!(matches!(err, AppError::Classify(_)));
    }

    #[test]
    fn classify_report_serializes_flat() {
        let report = classify_report("https://x/live.m3u8").unwrap();
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["strategy"], "adaptive");
        assert_eq!(json["protocol"], "hls");
        assert_eq!(json["label"], "https://x/live.m3u8");
    }

    #[test]
    fn local_bindings_classify_as_local() {
        let report = classify_report("  blob:https://app/1 ").unwrap();
        assert!(matches!(report.strategy, PlaybackStrategy::Local { .. }));
        assert_eq!(report.label, "blob:https://app/1");
        assert_eq!(report.display(), "local -> blob:https://app/1");
    }

    #[test]
    fn explicit_config_must_exist() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("missing.toml");
        let err = load_config(Some(path.as_path())).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    fn quick_faults() -> SpliceConfig {
        let mut config = SpliceConfig::default();
        config.faults.suppression_ms = 20;
        config
    }

    fn file_url(path: &Path) -> String {
        format!("file://{}", path.display())
    }

    #[tokio::test]
    async fn assemble_attaches_local_binding_without_fetching() {
        let temp = TempDir::new().unwrap();
        let clip = temp.path().join("clip.mp4");
        fs::write(&clip, b"clip").unwrap();
        let input = file_url(&clip);
        let args = assemble_args(&input, temp.path());
        let report = assemble(&SpliceConfig::default(), &input, &args)
            .await
            .unwrap();
        assert!(report.attached);
        assert_eq!(report.strategy, Some("local"));
        assert!(report.events.contains(&EngineEvent::Source {
            url: Some(input.clone())
        }));
        assert!(report.display().starts_with("attached via local"));
    }

    #[tokio::test]
    async fn missing_local_file_falls_back_to_the_original_link() {
        let temp = TempDir::new().unwrap();
        let input = file_url(&temp.path().join("gone.mp4"));
        let mut args = assemble_args(&input, temp.path());
        args.fallback = Some("https://x/v.mp4".into());
        let report = assemble(&quick_faults(), &input, &args).await.unwrap();
        assert!(report.attached);
        assert_eq!(report.strategy, Some("direct"));
        assert_eq!(report.detail, "https://x/v.mp4");
        assert!(report.events.contains(&EngineEvent::Source {
            url: Some("https://x/v.mp4".into())
        }));
    }

    #[tokio::test]
    async fn missing_local_file_without_fallback_is_not_attached() {
        let temp = TempDir::new().unwrap();
        let input = file_url(&temp.path().join("gone.mp4"));
        let args = assemble_args(&input, temp.path());
        let report = assemble(&quick_faults(), &input, &args).await.unwrap();
        assert!(!report.attached);
        assert!(report.detail.contains("the local media could not be loaded"));
        assert!(report.detail.contains("protocol=file"));
    }

    #[tokio::test]
    async fn failing_fallback_surfaces_the_second_fault() {
        let temp = TempDir::new().unwrap();
        let input = file_url(&temp.path().join("gone.mp4"));
        let mut args = assemble_args(&input, temp.path());
        args.fallback = Some(file_url(&temp.path().join("also-gone.mp4")));
        let report = assemble(&quick_faults(), &input, &args).await.unwrap();
        assert!(!report.attached);
        assert!(report.detail.contains("code=4"));
    }

    #[tokio::test]
    async fn assemble_reports_unusable_input() {
        let temp = TempDir::new().unwrap();
        let args = assemble_args("nothing here", temp.path());
        let report = assemble(&SpliceConfig::default(), "nothing here", &args)
            .await
            .unwrap();
        assert!(!report.attached);
        assert_eq!(report.detail, "no playable source was found in the input");
        assert!(report.display().contains("error    no playable source"));
    }

    #[tokio::test]
    async fn assemble_attaches_hls_through_the_headless_delegate() {
        let temp = TempDir::new().unwrap();
        let input = r#"{"sources":[{"url":"https://x/live.m3u8","headers":{"Referer":"https://x/"}}]}"#;
        let args = assemble_args(input, temp.path());
        let report = assemble(&SpliceConfig::default(), input, &args).await.unwrap();
        assert_eq!(report.strategy, Some("adaptive"));
        assert_eq!(report.headers_registered, 1);
    }
}
