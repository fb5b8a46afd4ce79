//! Speech-to-text adapter for voice notes.
//!
//! Uploads the audio bytes to an OpenAI-compatible transcription endpoint
//! and returns the recognized text. Fallible by design: a failed
//! transcription is reported to the submitter and the voice note is
//! dropped, the session stays viable.

use anyhow::{bail, Result};
use std::time::Duration;

use crate::config::TranscriptionConfig;

const OPENAI_TRANSCRIPTION_URL: &str = "https://api.openai.com/v1/audio/transcriptions";

/// Transcribe a voice note.
///
/// `format` is the MIME type reported by the transport (e.g. `audio/ogg`);
/// it only influences the filename the provider sees.
pub async fn transcribe(config: &TranscriptionConfig, bytes: Vec<u8>, format: &str) -> Result<String> {
    match config.provider.as_str() {
        "openai" => transcribe_openai(config, bytes, format).await,
        "disabled" => bail!("Transcription provider is disabled"),
        other => bail!("Unknown transcription provider: {}", other),
    }
}

async fn transcribe_openai(
    config: &TranscriptionConfig,
    bytes: Vec<u8>,
    format: &str,
) -> Result<String> {
    let api_key =
        std::env::var("OPENAI_API_KEY").map_err(|_| anyhow::anyhow!("OPENAI_API_KEY not set"))?;

    let model = config
        .model
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("transcription.model required"))?;

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;

    let filename = format!("voice.{}", audio_extension(format));
    let mut last_err = None;

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        let part = reqwest::multipart::Part::bytes(bytes.clone()).file_name(filename.clone());
        let form = reqwest::multipart::Form::new()
            .text("model", model.clone())
            .part("file", part);

        let resp = client
            .post(OPENAI_TRANSCRIPTION_URL)
            .header("Authorization", format!("Bearer {}", api_key))
            .multipart(form)
            .send()
            .await;

        match resp {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    let json: serde_json::Value = response.json().await?;
                    let text = json
                        .get("text")
                        .and_then(|t| t.as_str())
                        .ok_or_else(|| {
                            anyhow::anyhow!("Invalid transcription response: missing text")
                        })?;
                    return Ok(text.trim().to_string());
                }

                if status.as_u16() == 429 || status.is_server_error() {
                    let body_text = response.text().await.unwrap_or_default();
                    last_err = Some(anyhow::anyhow!(
                        "Transcription API error {}: {}",
                        status,
                        body_text
                    ));
                    continue;
                }

                let body_text = response.text().await.unwrap_or_default();
                bail!("Transcription API error {}: {}", status, body_text);
            }
            Err(e) => {
                last_err = Some(e.into());
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Transcription failed after retries")))
}

fn audio_extension(mime: &str) -> &'static str {
    match mime {
        "audio/ogg" | "audio/opus" => "ogg",
        "audio/mpeg" | "audio/mp3" => "mp3",
        "audio/mp4" | "audio/m4a" | "audio/x-m4a" => "m4a",
        "audio/wav" | "audio/x-wav" => "wav",
        "audio/webm" => "webm",
        _ => "ogg",
    }
}
