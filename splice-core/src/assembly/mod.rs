//! Codec negotiation and ordered segment appends for streams the engine
//! builds itself (raw segments and dual direct links).

mod error;
mod negotiate;

use bytes::Bytes;
use futures::future::try_join_all;
use tracing::{debug, info};

pub use error::{AssemblyError, AssemblyResult};
pub use negotiate::{combinations, negotiate, supported_candidates, CodecChoice, TrackProbe};

use crate::config::CodecSection;
use crate::feedback::{FeedbackSink, NoticeLevel};
use crate::fetch::{FetchRequest, MediaFetcher};
use crate::media::{AppendBuffer, MediaRuntime, PlaybackElement, StreamContainer};
use crate::source::{TrackDescriptor, TrackKind};

pub struct TrackBuffer {
    pub track: TrackKind,
    pub buffer: Box<dyn AppendBuffer>,
}

/// A negotiated container and its buffers. Dropping it releases the
/// container, so a failed or replaced attempt cannot leak handles.
pub struct AssembledStream {
    container: Box<dyn StreamContainer>,
    buffers: Vec<TrackBuffer>,
}

impl AssembledStream {
    fn new(container: Box<dyn StreamContainer>) -> Self {
        Self {
            container,
            buffers: Vec::new(),
        }
    }

    pub fn binding_url(&self) -> &str {
        self.container.binding_url()
    }

    pub fn choices(&self) -> Vec<CodecChoice> {
        self.buffers
            .iter()
            .map(|slot| CodecChoice {
                track: slot.track,
                container_mime: slot.buffer.mime().to_string(),
                succeeded: true,
            })
            .collect()
    }

    fn mime_of(&self, track: TrackKind) -> String {
        self.buffers
            .iter()
            .find(|slot| slot.track == track)
            .map(|slot| slot.buffer.mime().to_string())
            .unwrap_or_default()
    }

    /// Declares the assembled duration (the furthest buffered end across
    /// tracks) and signals end of stream, both only while the container is
    /// still open.
    pub fn finalize(&mut self) -> AssemblyResult<()> {
        let duration = self
            .buffers
            .iter()
            .map(|slot| slot.buffer.buffered_end())
            .fold(0.0_f64, f64::max);
        if self.container.is_open() && duration.is_finite() && duration > 0.0 {
            self.container.set_duration(duration)?;
        }
        if self.container.is_open() {
            self.container.end_of_stream()?;
        }
        Ok(())
    }
}

impl Drop for AssembledStream {
    fn drop(&mut self) {
        self.container.release();
    }
}

async fn fetch_segment(
    fetcher: &dyn MediaFetcher,
    track: TrackKind,
    ordinal: usize,
    segment: &TrackDescriptor,
) -> AssemblyResult<Bytes> {
    fetcher
        .fetch(&FetchRequest::from(segment))
        .await
        .map_err(|err| AssemblyError::segment(track, ordinal, err))
}

/// Appends segments 2..n of one track, each only after the previous append
/// was acknowledged.
async fn append_track(
    fetcher: &dyn MediaFetcher,
    sink: &FeedbackSink,
    track: TrackKind,
    buffer: &mut dyn AppendBuffer,
    segments: &[TrackDescriptor],
) -> AssemblyResult<()> {
    let total = segments.len();
    for (index, segment) in segments.iter().enumerate().skip(1) {
        let ordinal = index + 1;
        sink.status(format!("downloading {track} segment {ordinal}/{total}"));
        let chunk = fetch_segment(fetcher, track, ordinal, segment).await?;
        buffer
            .append(chunk)
            .await
            .map_err(|source| AssemblyError::Append {
                track,
                ordinal,
                source,
            })?;
    }
    debug!(%track, total, "track fully appended");
    Ok(())
}

/// Borrowed collaborators for one assembly run.
pub struct Assembler<'a> {
    pub runtime: &'a dyn MediaRuntime,
    pub fetcher: &'a dyn MediaFetcher,
    pub sink: &'a FeedbackSink,
    pub codecs: &'a CodecSection,
}

impl<'a> Assembler<'a> {
    /// Downloads the first segment of each track, negotiates codecs against
    /// it and starts playback. Remaining segments are appended by
    /// [`stream_segments`](Self::stream_segments).
    pub async fn prime_segments(
        &self,
        element: &mut dyn PlaybackElement,
        video: &[TrackDescriptor],
        audio: &[TrackDescriptor],
    ) -> AssemblyResult<AssembledStream> {
        let Some(first_video) = video.first() else {
            return Err(AssemblyError::MissingTrack {
                track: TrackKind::Video,
            });
        };

        let mut probes = Vec::with_capacity(2);
        let label = match audio.first() {
            None => {
                self.sink.notice(
                    NoticeLevel::Info,
                    format!("streaming {} m4s segments...", video.len()),
                );
                let chunk = fetch_segment(self.fetcher, TrackKind::Video, 1, first_video).await?;
                probes.push(TrackProbe {
                    track: TrackKind::Video,
                    candidates: supported_candidates(
                        self.runtime,
                        TrackKind::Video,
                        &self.codecs.segment_video,
                    )?,
                    first_chunk: chunk,
                });
                "could not identify the single-track m4s codec"
            }
            Some(first_audio) => {
                self.sink.notice(
                    NoticeLevel::Info,
                    format!(
                        "loading dual-track segments (video {}, audio {})...",
                        video.len(),
                        audio.len()
                    ),
                );
                let (video_chunk, audio_chunk) = tokio::join!(
                    fetch_segment(self.fetcher, TrackKind::Video, 1, first_video),
                    fetch_segment(self.fetcher, TrackKind::Audio, 1, first_audio),
                );
                let (video_chunk, audio_chunk) = (video_chunk?, audio_chunk?);
                let video_candidates =
                    supported_candidates(self.runtime, TrackKind::Video, &self.codecs.segment_video)?;
                let audio_candidates =
                    supported_candidates(self.runtime, TrackKind::Audio, &self.codecs.segment_audio)?;
                probes.push(TrackProbe {
                    track: TrackKind::Video,
                    candidates: video_candidates,
                    first_chunk: video_chunk,
                });
                probes.push(TrackProbe {
                    track: TrackKind::Audio,
                    candidates: audio_candidates,
                    first_chunk: audio_chunk,
                });
                "dual-track m4s decoding failed"
            }
        };

        let stream = negotiate(self.runtime, element, &probes, label).await?;
        element.play();
        info!(binding = stream.binding_url(), choices = ?stream.choices(), "segment stream negotiated");
        Ok(stream)
    }

    /// Appends the remaining segments of every track, the two tracks
    /// progressing independently, then finalizes the stream.
    pub async fn stream_segments(
        &self,
        stream: &mut AssembledStream,
        video: &[TrackDescriptor],
        audio: &[TrackDescriptor],
    ) -> AssemblyResult<()> {
        let jobs = stream.buffers.iter_mut().map(|slot| {
            let segments = if slot.track.is_audio() { audio } else { video };
            append_track(
                self.fetcher,
                self.sink,
                slot.track,
                slot.buffer.as_mut(),
                segments,
            )
        });
        try_join_all(jobs).await?;
        stream.finalize()?;

        if audio.is_empty() {
            let mime = stream.mime_of(TrackKind::Video);
            self.sink.status(format!(
                "m4s streaming complete ({} segments, {mime})",
                video.len()
            ));
            self.sink.notice(
                NoticeLevel::Success,
                format!("m4s streaming complete ({} segments)", video.len()),
            );
        } else {
            self.sink.status(format!(
                "dual-track m4s loaded (video {}, audio {})",
                video.len(),
                audio.len()
            ));
            self.sink.notice(
                NoticeLevel::Success,
                format!(
                    "dual-track m4s loaded ({} / {})",
                    stream.mime_of(TrackKind::Video),
                    stream.mime_of(TrackKind::Audio)
                ),
            );
        }
        Ok(())
    }

    /// Merges one video and one audio resource. Both downloads run
    /// concurrently and must both succeed before any buffer is created.
    pub async fn assemble_direct(
        &self,
        element: &mut dyn PlaybackElement,
        video: &TrackDescriptor,
        audio: &TrackDescriptor,
    ) -> AssemblyResult<AssembledStream> {
        self.sink
            .notice(NoticeLevel::Info, "loading separate video and audio links...");

        let video_request = FetchRequest::from(video);
        let audio_request = FetchRequest::from(audio);
        let (video_bytes, audio_bytes) = tokio::join!(
            self.fetcher.fetch(&video_request),
            self.fetcher.fetch(&audio_request),
        );
        let video_bytes = video_bytes.map_err(|err| AssemblyError::direct(TrackKind::Video, err))?;
        let audio_bytes = audio_bytes.map_err(|err| AssemblyError::direct(TrackKind::Audio, err))?;

        let probes = [
            TrackProbe {
                track: TrackKind::Video,
                candidates: supported_candidates(
                    self.runtime,
                    TrackKind::Video,
                    &self.codecs.direct_video,
                )?,
                first_chunk: video_bytes,
            },
            TrackProbe {
                track: TrackKind::Audio,
                candidates: supported_candidates(
                    self.runtime,
                    TrackKind::Audio,
                    &self.codecs.direct_audio,
                )?,
                first_chunk: audio_bytes,
            },
        ];
        let mut stream = negotiate(self.runtime, element, &probes, "dual direct merge failed").await?;
        stream.finalize()?;
        element.play();

        self.sink.status("separate video and audio links merged");
        self.sink.notice(
            NoticeLevel::Success,
            format!(
                "merged video and audio ({} / {})",
                stream.mime_of(TrackKind::Video),
                stream.mime_of(TrackKind::Audio)
            ),
        );
        Ok(stream)
    }
}
