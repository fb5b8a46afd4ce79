//! Content-expansion adapter.
//!
//! Turns the combined draft text plus contextual hints (capture date,
//! location, media counts) into a structured three-field narrative via an
//! OpenRouter-compatible chat-completions endpoint. The call is fallible
//! and the caller degrades to [`fallback_content`] when it fails; an
//! adapter error never aborts the session.
//!
//! # Retry Strategy
//!
//! Transient errors use exponential backoff, as elsewhere in the pipeline:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, ... (capped at 2^5)

use anyhow::{bail, Result};
use std::time::Duration;

use crate::config::ExpansionConfig;
use crate::models::{truncate_chars, GeneratedContent};

const OPENROUTER_API_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

/// Contextual hints handed to the expansion provider alongside the text.
#[derive(Debug, Clone, Default)]
pub struct ExpandContext {
    /// Resolved capture date, `DD.MM.YYYY`.
    pub date: String,
    pub location: Option<String>,
    pub image_count: usize,
    pub video_count: usize,
}

/// Degraded rendering used when the expansion provider is unavailable:
/// truncations of the combined input, with the full body verbatim.
pub fn fallback_content(text: &str) -> GeneratedContent {
    GeneratedContent {
        title: truncate_chars(text, 50),
        short_summary: truncate_chars(text, 200),
        full_body: text.to_string(),
    }
}

/// Expand the combined draft text into a structured narrative.
///
/// # Errors
///
/// - `"disabled"` provider: always returns an error.
/// - `"openrouter"` provider: returns an error if the API key is missing,
///   the API returns a non-retryable error, or all retries are exhausted.
pub async fn expand_text(
    config: &ExpansionConfig,
    text: &str,
    context: &ExpandContext,
) -> Result<GeneratedContent> {
    match config.provider.as_str() {
        "openrouter" => expand_openrouter(config, text, context).await,
        "disabled" => bail!("Expansion provider is disabled"),
        other => bail!("Unknown expansion provider: {}", other),
    }
}

async fn expand_openrouter(
    config: &ExpansionConfig,
    text: &str,
    context: &ExpandContext,
) -> Result<GeneratedContent> {
    let api_key = std::env::var("OPENROUTER_API_KEY")
        .map_err(|_| anyhow::anyhow!("OPENROUTER_API_KEY not set"))?;

    let model = config
        .model
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("expansion.model required"))?;

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;

    let body = serde_json::json!({
        "model": model,
        "messages": [
            { "role": "system", "content": system_prompt() },
            { "role": "user", "content": user_prompt(text, context) },
        ],
        "temperature": 0.8,
        "max_tokens": 2000,
    });

    let mut last_err = None;

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        let resp = client
            .post(OPENROUTER_API_URL)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await;

        match resp {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    let json: serde_json::Value = response.json().await?;
                    let content = json
                        .get("choices")
                        .and_then(|c| c.get(0))
                        .and_then(|c| c.get("message"))
                        .and_then(|m| m.get("content"))
                        .and_then(|c| c.as_str())
                        .ok_or_else(|| {
                            anyhow::anyhow!("Invalid expansion response: missing content")
                        })?;
                    return Ok(parse_expansion(content, text));
                }

                // Rate limited or server error — retry
                if status.as_u16() == 429 || status.is_server_error() {
                    let body_text = response.text().await.unwrap_or_default();
                    last_err = Some(anyhow::anyhow!(
                        "Expansion API error {}: {}",
                        status,
                        body_text
                    ));
                    continue;
                }

                // Client error (not 429) — don't retry
                let body_text = response.text().await.unwrap_or_default();
                bail!("Expansion API error {}: {}", status, body_text);
            }
            Err(e) => {
                last_err = Some(e.into());
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Expansion failed after retries")))
}

fn system_prompt() -> String {
    "You are a professional newsroom editor. Expand a terse event note into a \
     publishable news item. Respond with strict JSON only:\n\
     {\n\
       \"title\": \"concise, informative headline, 5-10 words\",\n\
       \"short\": \"one or two sentences, at most 200 characters\",\n\
       \"full\": \"the full story, three to five paragraphs\"\n\
     }\n\
     Keep every factual detail from the note, do not invent names or dates, \
     and write in the language of the note."
        .to_string()
}

fn user_prompt(text: &str, context: &ExpandContext) -> String {
    let mut hints = Vec::new();
    if !context.date.is_empty() {
        hints.push(format!("Event date: {}", context.date));
    }
    if let Some(location) = &context.location {
        hints.push(format!("Location: {}", location));
    }
    if context.image_count > 0 {
        hints.push(format!("Photos attached: {}", context.image_count));
    }
    if context.video_count > 0 {
        hints.push(format!("Videos attached: {}", context.video_count));
    }

    if hints.is_empty() {
        format!("Event note:\n\"{}\"", text)
    } else {
        format!("Event note:\n\"{}\"\n\nContext:\n{}", text, hints.join("\n"))
    }
}

/// Parse the provider's reply. Tolerates markdown code fences around the
/// JSON; a reply that fails to parse degrades to a line-based split rather
/// than an error, and blank fields fall back to truncations of the input.
fn parse_expansion(content: &str, source_text: &str) -> GeneratedContent {
    let cleaned = content
        .replace("```json", "")
        .replace("```", "")
        .trim()
        .to_string();

    #[derive(serde::Deserialize)]
    struct Wire {
        title: Option<String>,
        short: Option<String>,
        full: Option<String>,
    }

    let parsed = match serde_json::from_str::<Wire>(&cleaned) {
        Ok(wire) => (wire.title, wire.short, wire.full),
        Err(_) => {
            let lines: Vec<&str> = cleaned.lines().filter(|l| !l.trim().is_empty()).collect();
            let title = lines
                .first()
                .map(|l| truncate_chars(l.trim_start_matches('#').trim(), 100));
            let short = if lines.len() > 1 {
                Some(truncate_chars(&lines[..2].join(" "), 200))
            } else {
                None
            };
            let full = if cleaned.is_empty() {
                None
            } else {
                Some(cleaned.clone())
            };
            (title, short, full)
        }
    };

    let fallback = fallback_content(source_text);
    GeneratedContent {
        title: non_blank(parsed.0).unwrap_or(fallback.title),
        short_summary: non_blank(parsed.1).unwrap_or(fallback.short_summary),
        full_body: non_blank(parsed.2).unwrap_or(fallback.full_body),
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
