use bytes::Bytes;
use tracing::debug;

use super::error::{AssemblyError, AssemblyResult};
use super::{AssembledStream, TrackBuffer};
use crate::media::{MediaRuntime, PlaybackElement};
use crate::source::TrackKind;

/// One track taking part in negotiation: its supported candidates, most
/// specific first, and the chunk used to probe them.
#[derive(Debug, Clone)]
pub struct TrackProbe {
    pub track: TrackKind,
    pub candidates: Vec<String>,
    pub first_chunk: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecChoice {
    pub track: TrackKind,
    pub container_mime: String,
    pub succeeded: bool,
}

/// Keeps the candidates the runtime claims to support, in order.
pub fn supported_candidates(
    runtime: &dyn MediaRuntime,
    track: TrackKind,
    candidates: &[String],
) -> AssemblyResult<Vec<String>> {
    let supported: Vec<String> = candidates
        .iter()
        .filter(|mime| runtime.is_type_supported(mime))
        .cloned()
        .collect();
    if supported.is_empty() {
        return Err(AssemblyError::NoSupportedCodec { track });
    }
    Ok(supported)
}

/// Every pick of one candidate per list, earlier lists varying slowest.
pub fn combinations(lists: &[Vec<String>]) -> Vec<Vec<String>> {
    lists.iter().fold(vec![Vec::new()], |picks, list| {
        picks
            .iter()
            .flat_map(|prefix| {
                list.iter().map(move |candidate| {
                    let mut pick = prefix.clone();
                    pick.push(candidate.clone());
                    pick
                })
            })
            .collect()
    })
}

/// Builds a container for one candidate combination and appends each
/// track's first chunk. The returned guard releases the container on every
/// early return.
async fn attempt(
    runtime: &dyn MediaRuntime,
    element: &mut dyn PlaybackElement,
    probes: &[TrackProbe],
    mimes: &[String],
) -> AssemblyResult<AssembledStream> {
    let container = runtime.create_container()?;
    element.set_source(container.binding_url());
    let mut stream = AssembledStream::new(container);
    stream.container.wait_open().await?;

    for (probe, mime) in probes.iter().zip(mimes) {
        let buffer = stream.container.add_buffer(mime)?;
        stream.buffers.push(TrackBuffer {
            track: probe.track,
            buffer,
        });
    }
    for (probe, slot) in probes.iter().zip(stream.buffers.iter_mut()) {
        slot.buffer
            .append(probe.first_chunk.clone())
            .await
            .map_err(|source| AssemblyError::Append {
                track: probe.track,
                ordinal: 1,
                source,
            })?;
    }
    Ok(stream)
}

/// Tries every candidate combination in order and keeps the first one whose
/// probe appends succeed. Failed attempts are released before the next one.
pub async fn negotiate(
    runtime: &dyn MediaRuntime,
    element: &mut dyn PlaybackElement,
    probes: &[TrackProbe],
    label: &str,
) -> AssemblyResult<AssembledStream> {
    let lists: Vec<Vec<String>> = probes.iter().map(|probe| probe.candidates.clone()).collect();
    let mut last = None;

    for mimes in combinations(&lists) {
        match attempt(runtime, element, probes, &mimes).await {
            Ok(stream) => {
                debug!(mimes = ?mimes, "codec negotiation succeeded");
                return Ok(stream);
            }
            Err(err) => {
                let rejected: Vec<CodecChoice> = probes
                    .iter()
                    .zip(&mimes)
                    .map(|(probe, mime)| CodecChoice {
                        track: probe.track,
                        container_mime: mime.clone(),
                        succeeded: false,
                    })
                    .collect();
                debug!(?rejected, error = %err, "codec candidate rejected");
                last = Some(err.to_string());
            }
        }
    }

    Err(AssemblyError::NegotiationExhausted {
        label: label.to_string(),
        last,
    })
}
