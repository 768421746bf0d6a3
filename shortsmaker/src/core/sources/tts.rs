//! TikTok text-to-speech
//!
//! Text is split into chunks of at most [`TTS_CHUNK_CHARS`] characters on
//! word boundaries. Each chunk is posted to a TTS endpoint which answers with
//! base64 MP3 data; the decoded chunks are concatenated and transcoded to WAV
//! with FFmpeg. Endpoints are tried in order until one serves every chunk.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::Engine;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::AudioSynthesizer;
use crate::core::ffmpeg::FFmpegRunner;
use crate::core::fs::prepare_output_path;
use crate::core::settings::TtsSettings;
use crate::core::{CoreError, CoreResult};

/// Maximum characters the endpoints accept per request
pub const TTS_CHUNK_CHARS: usize = 250;

const TTS_USER_AGENT: &str = "com.zhiliaoapp.musically/2022600030 (Linux; U; Android 7.1.2; es_ES; SM-G988N; Build/NRD90M;tt-ok/3.12.13.1)";

/// One TTS endpoint and the JSON field holding its base64 audio
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TtsEndpoint {
    pub url: String,
    pub response: String,
}

/// Splits text into chunks of at most `max_chars`, never inside a word.
///
/// A single word longer than `max_chars` becomes its own chunk.
pub fn split_tts_text(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        if !current.is_empty()
            && current.chars().count() + 1 + word.chars().count() > max_chars
        {
            chunks.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[derive(Serialize)]
struct TtsRequest<'a> {
    text: &'a str,
    voice: &'a str,
}

/// [`AudioSynthesizer`] backed by public TikTok TTS proxies
pub struct TikTokTts {
    client: reqwest::blocking::Client,
    endpoints: Vec<TtsEndpoint>,
    voice: String,
    runner: FFmpegRunner,
}

impl TikTokTts {
    pub fn new(settings: &TtsSettings, runner: FFmpegRunner, seed: Option<u64>) -> CoreResult<Self> {
        let voice = match &settings.voice {
            Some(voice) => voice.clone(),
            None => {
                let mut rng = match seed {
                    Some(seed) => StdRng::seed_from_u64(seed),
                    None => StdRng::from_entropy(),
                };
                settings
                    .voices
                    .choose(&mut rng)
                    .cloned()
                    .ok_or_else(|| CoreError::Config("audio.voices is empty".to_string()))?
            }
        };
        if !settings.voices.contains(&voice) {
            return Err(CoreError::Config(format!("unknown TTS voice '{}'", voice)));
        }

        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .user_agent(TTS_USER_AGENT)
            .build()
            .map_err(|e| CoreError::Config(format!("Failed to create HTTP client: {}", e)))?;

        info!("Using TTS voice {}", voice);
        Ok(Self {
            client,
            endpoints: settings.endpoints.clone(),
            voice,
            runner,
        })
    }

    pub fn voice(&self) -> &str {
        &self.voice
    }

    fn request_chunk(&self, endpoint: &TtsEndpoint, chunk: &str) -> CoreResult<Vec<u8>> {
        let response = self
            .client
            .post(&endpoint.url)
            .json(&TtsRequest {
                text: chunk,
                voice: &self.voice,
            })
            .send()
            .map_err(|e| CoreError::Collaborator(format!("TTS request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(CoreError::Collaborator(format!(
                "HTTP {} from {}",
                response.status(),
                endpoint.url
            )));
        }

        let body: serde_json::Value = response
            .json()
            .map_err(|e| CoreError::Collaborator(format!("TTS response is not JSON: {}", e)))?;
        let encoded = body
            .get(&endpoint.response)
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                CoreError::Collaborator(format!(
                    "TTS response from {} has no '{}' field",
                    endpoint.url, endpoint.response
                ))
            })?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| CoreError::Collaborator(format!("TTS audio is not base64: {}", e)))
    }

    fn synthesize_with(&self, endpoint: &TtsEndpoint, chunks: &[String]) -> CoreResult<Vec<u8>> {
        let mut audio = Vec::new();
        for (i, chunk) in chunks.iter().enumerate() {
            debug!("TTS chunk {}/{} via {}", i + 1, chunks.len(), endpoint.url);
            audio.extend(self.request_chunk(endpoint, chunk)?);
        }
        Ok(audio)
    }
}

impl AudioSynthesizer for TikTokTts {
    fn synthesize(&mut self, text: &str, output: &Path) -> CoreResult<PathBuf> {
        let chunks = split_tts_text(text, TTS_CHUNK_CHARS);
        if chunks.is_empty() {
            return Err(CoreError::Input("narration text is empty".to_string()));
        }
        info!("Synthesizing {} chunk(s)", chunks.len());

        let mut last_err = None;
        let mut audio = None;
        for endpoint in &self.endpoints {
            match self.synthesize_with(endpoint, &chunks) {
                Ok(bytes) => {
                    audio = Some(bytes);
                    break;
                }
                Err(e) => {
                    warn!("TTS endpoint {} unusable: {}", endpoint.url, e);
                    last_err = Some(e);
                }
            }
        }
        let audio = match (audio, last_err) {
            (Some(audio), _) => audio,
            (None, Some(err)) => return Err(err),
            (None, None) => {
                return Err(CoreError::Config("no TTS endpoints configured".to_string()))
            }
        };

        prepare_output_path(output)?;
        let mp3 = output.with_extension("tts.mp3");
        std::fs::write(&mp3, &audio)?;
        let args: Vec<OsString> = vec![
            "-i".into(),
            mp3.clone().into(),
            "-y".into(),
            output.into(),
        ];
        let result = self.runner.run(&args);
        let _ = std::fs::remove_file(&mp3);
        result.map_err(|e| CoreError::Collaborator(format!("TTS transcode failed: {}", e)))?;

        Ok(output.to_path_buf())
    }
}
