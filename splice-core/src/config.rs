use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{ConfigError, ConfigResult};

const SEGMENT_VIDEO_CANDIDATES: &[&str] = &[
    "video/mp4; codecs=\"avc1.64001e\"",
    "video/mp4; codecs=\"avc1.4d401f\"",
    "video/mp4; codecs=\"avc1.4d401e\"",
    "video/mp4; codecs=\"avc1.42e01e\"",
    "video/mp4; codecs=\"hev1.1.6.L120.90\"",
    "video/mp4; codecs=\"hvc1.1.6.L120.90\"",
    "video/mp4; codecs=\"av01.0.08M.08\"",
    "video/mp4; codecs=\"vp09.00.10.08\"",
    "video/mp4",
];

const SEGMENT_AUDIO_CANDIDATES: &[&str] = &[
    "audio/mp4; codecs=\"mp4a.40.2\"",
    "audio/mp4; codecs=\"mp4a.40.5\"",
    "audio/mp4; codecs=\"opus\"",
    "audio/mp4",
];

const DIRECT_VIDEO_CANDIDATES: &[&str] = &[
    "video/mp4; codecs=\"avc1.64001e\"",
    "video/mp4; codecs=\"avc1.4d401f\"",
    "video/mp4; codecs=\"avc1.4d401e\"",
    "video/mp4; codecs=\"hev1.1.6.L120.90\"",
    "video/mp4; codecs=\"hvc1.1.6.L120.90\"",
    "video/mp4; codecs=\"av01.0.08M.08\"",
    "video/mp4; codecs=\"vp09.00.10.08\"",
    "video/mp4",
    "video/webm; codecs=\"vp9\"",
    "video/webm; codecs=\"vp8\"",
    "video/webm; codecs=\"av1\"",
    "video/webm",
];

const DIRECT_AUDIO_CANDIDATES: &[&str] = &[
    "audio/mp4; codecs=\"mp4a.40.2\"",
    "audio/mp4; codecs=\"mp4a.40.5\"",
    "audio/mp4; codecs=\"opus\"",
    "audio/mp4",
    "audio/webm; codecs=\"opus\"",
    "audio/webm; codecs=\"vorbis\"",
    "audio/webm",
];

fn owned(list: &[&str]) -> Vec<String> {
    list.iter().map(|item| item.to_string()).collect()
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct SpliceConfig {
    pub fetch: FetchSection,
    pub headers: HeaderSection,
    pub faults: FaultSection,
    pub codecs: CodecSection,
    pub headless: HeadlessSection,
}

impl SpliceConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.headers.ttl_seconds == 0 {
            return Err(ConfigError::Invalid {
                field: "headers.ttl_seconds",
                reason: "must be greater than zero".into(),
            });
        }
        let lists = [
            ("codecs.segment_video", &self.codecs.segment_video),
            ("codecs.segment_audio", &self.codecs.segment_audio),
            ("codecs.direct_video", &self.codecs.direct_video),
            ("codecs.direct_audio", &self.codecs.direct_audio),
        ];
        for (field, list) in lists {
            if list.iter().all(|mime| mime.trim().is_empty()) {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "candidate list is empty".into(),
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchSection {
    pub user_agent: String,
}

impl Default for FetchSection {
    fn default() -> Self {
        Self {
            user_agent: "splice/0.1".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HeaderSection {
    pub ttl_seconds: u64,
}

impl HeaderSection {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

impl Default for HeaderSection {
    fn default() -> Self {
        Self { ttl_seconds: 900 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FaultSection {
    pub suppression_ms: u64,
    pub repeat_window_ms: u64,
    pub faulted_cooldown_ms: u64,
}

impl FaultSection {
    pub fn suppression(&self) -> Duration {
        Duration::from_millis(self.suppression_ms)
    }

    pub fn repeat_window(&self) -> Duration {
        Duration::from_millis(self.repeat_window_ms)
    }

    pub fn faulted_cooldown(&self) -> Duration {
        Duration::from_millis(self.faulted_cooldown_ms)
    }
}

impl Default for FaultSection {
    fn default() -> Self {
        Self {
            suppression_ms: 1200,
            repeat_window_ms: 1800,
            faulted_cooldown_ms: 3000,
        }
    }
}

/// Ordered container/codec candidates, most specific first.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CodecSection {
    pub segment_video: Vec<String>,
    pub segment_audio: Vec<String>,
    pub direct_video: Vec<String>,
    pub direct_audio: Vec<String>,
}

impl Default for CodecSection {
    fn default() -> Self {
        Self {
            segment_video: owned(SEGMENT_VIDEO_CANDIDATES),
            segment_audio: owned(SEGMENT_AUDIO_CANDIDATES),
            direct_video: owned(DIRECT_VIDEO_CANDIDATES),
            direct_audio: owned(DIRECT_AUDIO_CANDIDATES),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HeadlessSection {
    pub output_dir: String,
    pub containers: Vec<String>,
}

impl HeadlessSection {
    pub fn output_path(&self) -> PathBuf {
        PathBuf::from(&self.output_dir)
    }
}

impl Default for HeadlessSection {
    fn default() -> Self {
        Self {
            output_dir: "assembled".into(),
            containers: vec![
                "video/mp4".into(),
                "audio/mp4".into(),
                "video/webm".into(),
                "audio/webm".into(),
            ],
        }
    }
}

pub fn load_splice_config<P: AsRef<Path>>(path: P) -> ConfigResult<SpliceConfig> {
    let config: SpliceConfig = load_toml(path)?;
    config.validate()?;
    Ok(config)
}

fn load_toml<T, P>(path: P) -> ConfigResult<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_fixture_config() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../configs/splice.toml");
        let config = load_splice_config(path).expect("fixture config should parse");
        assert_eq!(config.headers.ttl_seconds, 900);
        assert_eq!(config.faults.suppression(), Duration::from_millis(1200));
        assert_eq!(config.faults.repeat_window(), Duration::from_millis(1800));
        assert_eq!(config.codecs.segment_video.last().map(String::as_str), Some("video/mp4"));
        assert!(config.codecs.direct_audio.iter().any(|mime| mime.starts_with("audio/webm")));
    }

    #[test]
    fn missing_sections_fall_back_to_defaults() {
        let config: SpliceConfig = toml::from_str("[faults]\nsuppression_ms = 500\n").unwrap();
        assert_eq!(config.faults.suppression_ms, 500);
        assert_eq!(config.faults.repeat_window_ms, 1800);
        assert_eq!(config.codecs.segment_audio.len(), 4);
        assert_eq!(config.headers.ttl(), Duration::from_secs(900));
    }

    #[test]
    fn rejects_empty_candidate_list() {
        let config: SpliceConfig = toml::from_str("[codecs]\nsegment_audio = []\n").unwrap();
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "codecs.segment_audio",
                ..
            }
        ));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = load_splice_config("/definitely/not/here.toml").unwrap_err();
        assert!(err.to_string().contains("/definitely/not/here.toml"));
    }
}
