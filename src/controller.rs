//! Draft assembly controller.
//!
//! Drives a session through its lifecycle in response to inbound events:
//! accumulate in `Collecting`, enrich and render in `Generating`, let the
//! submitter approve / edit / regenerate in `Previewing` and `Editing`,
//! and hand over to the persistence committer in `Committing`. Every
//! failure that is not an explicitly best-effort send produces a
//! human-readable message back to the triggering actor.

use anyhow::Result;
use chrono::{NaiveDate, Utc};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{info, warn};

use crate::approval::{decode_token, ApprovalRouter};
use crate::batch::{BatchQuiet, MediaGroupBuffer};
use crate::commit::{CommitError, Committer};
use crate::config::{Config, ExpansionConfig, TranscriptionConfig};
use crate::expand::{self, ExpandContext};
use crate::metadata;
use crate::models::{ActorId, Command, InboundEvent, truncate_chars};
use crate::session::{EditField, ManualLocation, MediaItem, SessionState, SessionStore};
use crate::transcribe;
use crate::transport::{ActionButton, Transport};

/// Everything the controller needs besides its collaborators.
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub media_root: PathBuf,
    pub category: String,
    pub site_url: String,
    pub reviewer: ActorId,
    pub batch_window: Duration,
    pub expansion: ExpansionConfig,
    pub transcription: TranscriptionConfig,
}

impl ControllerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            media_root: config.media.root.clone(),
            category: config.intake.category.clone(),
            site_url: config.intake.site_url.clone(),
            reviewer: config.transport.reviewer_chat_id,
            batch_window: Duration::from_secs(config.intake.batch_window_secs),
            expansion: config.expansion.clone(),
            transcription: config.transcription.clone(),
        }
    }
}

pub struct Controller {
    sessions: SessionStore,
    transport: Arc<dyn Transport>,
    batches: MediaGroupBuffer,
    committer: Committer,
    router: ApprovalRouter,
    expansion: ExpansionConfig,
    transcription: TranscriptionConfig,
}

impl Controller {
    pub fn new(
        pool: SqlitePool,
        transport: Arc<dyn Transport>,
        settings: ControllerSettings,
        quiet_tx: UnboundedSender<BatchQuiet>,
    ) -> Self {
        let committer = Committer::new(
            pool.clone(),
            transport.clone(),
            settings.media_root.clone(),
            settings.category.clone(),
        );
        let router = ApprovalRouter::new(
            pool,
            transport.clone(),
            settings.reviewer,
            settings.site_url.clone(),
        );
        Self {
            sessions: SessionStore::new(),
            transport,
            batches: MediaGroupBuffer::new(settings.batch_window, quiet_tx),
            committer,
            router,
            expansion: settings.expansion,
            transcription: settings.transcription,
        }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Process one inbound event. Events for the same actor arrive
    /// serialized; different actors run concurrently.
    pub async fn handle(&self, event: InboundEvent) -> Result<()> {
        match event {
            InboundEvent::Text { actor, text } => self.on_text(actor, &text).await,
            InboundEvent::Photo {
                actor,
                file_ref,
                group,
                caption,
            } => self.on_media(actor, file_ref, group, caption, true).await,
            InboundEvent::Video {
                actor,
                file_ref,
                group,
                caption,
            } => self.on_media(actor, file_ref, group, caption, false).await,
            InboundEvent::Voice { actor, file_ref, mime } => {
                self.on_voice(actor, &file_ref, mime.as_deref()).await
            }
            InboundEvent::Command { actor, command } => self.on_command(actor, command).await,
            InboundEvent::Action { actor, data } => self.on_action(actor, &data).await,
            InboundEvent::BatchQuiet { actor, count } => self.on_batch_quiet(actor, count).await,
        }
    }

    async fn on_text(&self, actor: ActorId, text: &str) -> Result<()> {
        let state = self.sessions.with(actor, |s| s.state);

        match state {
            Some(SessionState::Editing) => {
                let applied = self.sessions.with(actor, |s| {
                    let Some(field) = s.awaiting_edit.take() else {
                        return false;
                    };
                    let Some(generated) = s.generated.as_mut() else {
                        return false;
                    };
                    match field {
                        EditField::Title => generated.title = text.to_string(),
                        EditField::Short => generated.short_summary = text.to_string(),
                        EditField::Full => generated.full_body = text.to_string(),
                    }
                    s.state = SessionState::Previewing;
                    true
                });
                if applied == Some(true) {
                    self.send_preview(actor).await
                } else {
                    self.transport
                        .send_text(actor, "Nothing is being edited right now.")
                        .await
                }
            }
            Some(SessionState::Previewing) => {
                self.transport
                    .send_text(
                        actor,
                        "A rendering is waiting for review. Use the buttons: approve, edit, regenerate, or cancel.",
                    )
                    .await
            }
            Some(SessionState::Generating) | Some(SessionState::Committing) => {
                self.transport
                    .send_text(actor, "Still working on the draft, one moment.")
                    .await
            }
            _ => {
                let created = self.sessions.open(actor, Utc::now());
                self.sessions.with(actor, |s| s.append_text(text));
                let reply = if created {
                    "Started a new draft. Send more text, photos, videos, or voice notes; /done to finish, /cancel to discard."
                } else {
                    "Text added. Send more, or /done to finish."
                };
                self.transport.send_text(actor, reply).await
            }
        }
    }

    async fn on_media(
        &self,
        actor: ActorId,
        file_ref: String,
        group: Option<String>,
        caption: Option<String>,
        is_image: bool,
    ) -> Result<()> {
        if self.reject_if_past_collecting(actor).await? {
            return Ok(());
        }

        self.sessions.open(actor, Utc::now());
        let total = self.sessions.with(actor, |s| {
            if let Some(caption) = &caption {
                s.append_text(caption);
            }
            if is_image {
                s.images.push(MediaItem::new(&file_ref));
                s.images.len()
            } else {
                s.videos.push(MediaItem::new(&file_ref));
                s.videos.len()
            }
        });

        match group {
            // Part of a multi-file upload: stay quiet until the whole
            // batch has arrived.
            Some(group) => {
                self.batches.note(actor, &group);
                Ok(())
            }
            None => {
                let noun = if is_image { "Photo" } else { "Video" };
                self.transport
                    .send_text(
                        actor,
                        &format!(
                            "{} added (total: {}). Send more, or /done to finish.",
                            noun,
                            total.unwrap_or(0)
                        ),
                    )
                    .await
            }
        }
    }

    async fn on_voice(&self, actor: ActorId, file_ref: &str, mime: Option<&str>) -> Result<()> {
        if self.reject_if_past_collecting(actor).await? {
            return Ok(());
        }

        self.sessions.open(actor, Utc::now());

        let bytes = match self.transport.download(file_ref).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(actor, "voice download failed: {e:#}");
                return self
                    .transport
                    .send_text(actor, "Couldn't fetch the voice note, please try again.")
                    .await;
            }
        };

        let mime = mime.unwrap_or("audio/ogg");
        match transcribe::transcribe(&self.transcription, bytes, mime).await {
            Ok(text) if !text.is_empty() => {
                self.sessions
                    .with(actor, |s| s.voice_transcripts.push(text.clone()));
                self.transport
                    .send_text(actor, &format!("Voice note transcribed: \"{}\"", truncate_chars(&text, 120)))
                    .await
            }
            Ok(_) => {
                self.transport
                    .send_text(actor, "The voice note came back empty, it was not added.")
                    .await
            }
            Err(e) => {
                warn!(actor, "transcription failed: {e:#}");
                self.transport
                    .send_text(
                        actor,
                        "Couldn't transcribe the voice note. Send the text directly, or try again.",
                    )
                    .await
            }
        }
    }

    async fn on_command(&self, actor: ActorId, command: Command) -> Result<()> {
        match command {
            Command::Start => {
                self.transport
                    .send_text(
                        actor,
                        "This bot assembles news drafts.\n\n\
                         Send text, photos, videos, or voice notes.\n\
                         /date DD.MM.YYYY sets the event date\n\
                         /location lat,lon or an address sets the place\n\
                         /done finishes and generates a draft\n\
                         /cancel discards it\n\
                         /list shows recent records",
                    )
                    .await
            }
            Command::Finish => self.finish(actor).await,
            Command::Cancel => self.cancel(actor).await,
            Command::List => self.router.send_list_page(actor, 0).await,
            Command::SetDate(arg) => self.set_date(actor, &arg).await,
            Command::SetLocation(arg) => self.set_location(actor, &arg).await,
        }
    }

    async fn on_action(&self, actor: ActorId, data: &str) -> Result<()> {
        match data {
            "finish" => return self.finish(actor).await,
            "cancel" => return self.cancel(actor).await,
            "approve" => return self.commit(actor).await,
            "regen" => return self.regenerate(actor).await,
            "edit:title" => return self.begin_edit(actor, EditField::Title).await,
            "edit:short" => return self.begin_edit(actor, EditField::Short).await,
            "edit:full" => return self.begin_edit(actor, EditField::Full).await,
            _ => {}
        }

        if let Some((action, fragment)) = decode_token(data) {
            return self.router.handle_token(actor, action, fragment).await;
        }

        warn!(actor, data, "unrecognized action data");
        Ok(())
    }

    async fn on_batch_quiet(&self, actor: ActorId, count: usize) -> Result<()> {
        if !self.sessions.contains(actor) {
            return Ok(());
        }
        self.transport
            .send_actions(
                actor,
                &format!("Received a batch of {} files. Send more, or finish the draft.", count),
                vec![vec![
                    ActionButton::callback("Finish", "finish"),
                    ActionButton::callback("Cancel", "cancel"),
                ]],
            )
            .await
    }

    /// Attachments are only merged while collecting; during preview or
    /// editing they get a corrective message instead.
    async fn reject_if_past_collecting(&self, actor: ActorId) -> Result<bool> {
        let state = self.sessions.with(actor, |s| s.state);
        match state {
            Some(SessionState::Previewing) | Some(SessionState::Editing) => {
                self.transport
                    .send_text(
                        actor,
                        "A rendering is waiting for review. Approve or cancel it before adding more files.",
                    )
                    .await?;
                Ok(true)
            }
            Some(SessionState::Generating) | Some(SessionState::Committing) => {
                self.transport
                    .send_text(actor, "Still working on the draft, one moment.")
                    .await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_date(&self, actor: ActorId, arg: &str) -> Result<()> {
        if !self.sessions.contains(actor) {
            return self
                .transport
                .send_text(actor, "No active draft. Send some content first.")
                .await;
        }

        match NaiveDate::parse_from_str(arg, "%d.%m.%Y") {
            Ok(date) => {
                self.sessions.with(actor, |s| {
                    s.manual_date = Some(date);
                    s.resolve(Utc::now());
                });
                self.transport
                    .send_text(actor, &format!("Event date set to {}.", date.format("%d.%m.%Y")))
                    .await
            }
            Err(_) => {
                self.transport
                    .send_text(actor, "Couldn't read that date. Use /date DD.MM.YYYY, e.g. /date 15.02.2026.")
                    .await
            }
        }
    }

    async fn set_location(&self, actor: ActorId, arg: &str) -> Result<()> {
        if !self.sessions.contains(actor) {
            return self
                .transport
                .send_text(actor, "No active draft. Send some content first.")
                .await;
        }

        let arg = arg.trim();
        if arg.is_empty() {
            return self
                .transport
                .send_text(
                    actor,
                    "Send /location lat,lon (e.g. /location 55.751244,37.618423) or a plain address.",
                )
                .await;
        }

        let location = match parse_coordinates(arg) {
            Some((lat, lon)) => ManualLocation::Coordinates { lat, lon },
            None => ManualLocation::Label(arg.to_string()),
        };

        self.sessions.with(actor, |s| {
            s.manual_location = Some(location);
            s.resolve(Utc::now());
        });
        self.transport
            .send_text(actor, "Location saved.")
            .await
    }

    async fn finish(&self, actor: ActorId) -> Result<()> {
        let state = self.sessions.with(actor, |s| s.state);
        match state {
            None => {
                return self
                    .transport
                    .send_text(actor, "No active draft. Send some content first.")
                    .await;
            }
            Some(SessionState::Collecting) => {}
            Some(SessionState::Previewing) | Some(SessionState::Editing) => {
                return self
                    .transport
                    .send_text(actor, "A rendering already exists. Use the preview buttons.")
                    .await;
            }
            Some(SessionState::Generating) | Some(SessionState::Committing) => {
                return self
                    .transport
                    .send_text(actor, "Still working on the draft, one moment.")
                    .await;
            }
        }

        let has_content = self.sessions.with(actor, |s| s.has_content()).unwrap_or(false);
        if !has_content {
            // The finish command is rejected; the session stays in
            // Collecting.
            return self
                .transport
                .send_text(actor, "The draft is empty. Add text or media before finishing.")
                .await;
        }

        self.sessions.with(actor, |s| s.state = SessionState::Generating);
        self.transport
            .send_text(actor, "Generating the draft...")
            .await?;
        self.generate(actor).await
    }

    /// Run metadata extraction and content expansion, then move to
    /// `Previewing`. Adapter failures degrade to a raw-text rendering
    /// rather than failing the session.
    async fn generate(&self, actor: ActorId) -> Result<()> {
        let Some(snapshot) = self.sessions.snapshot(actor) else {
            return Ok(());
        };

        // Capture metadata comes from the first image, once per session.
        if snapshot.extracted.is_none() {
            if let Some(first) = snapshot.images.first() {
                match self.transport.download(&first.external_ref).await {
                    Ok(bytes) => {
                        let meta = metadata::extract(&bytes, Utc::now());
                        self.sessions.with(actor, |s| {
                            s.extracted = Some(meta);
                            s.resolve(Utc::now());
                        });
                    }
                    Err(e) => {
                        warn!(actor, "first-image download failed, keeping fallback date: {e:#}");
                    }
                }
            }
        }

        let Some(snapshot) = self.sessions.snapshot(actor) else {
            return Ok(());
        };

        let combined = snapshot.combined_text();
        let source_text = if combined.trim().is_empty() {
            "New event".to_string()
        } else {
            combined
        };

        let context = ExpandContext {
            date: snapshot.resolved.date.format("%d.%m.%Y").to_string(),
            location: snapshot.resolved.location.clone(),
            image_count: snapshot.images.len(),
            video_count: snapshot.videos.len(),
        };

        let content = match expand::expand_text(&self.expansion, &source_text, &context).await {
            Ok(content) => content,
            Err(e) => {
                // Graceful degradation: the raw combined text becomes the
                // rendering and the flow continues to preview.
                info!(actor, "expansion unavailable, using raw text: {e:#}");
                expand::fallback_content(&source_text)
            }
        };

        self.sessions.with(actor, |s| {
            s.generated = Some(content);
            s.awaiting_edit = None;
            s.state = SessionState::Previewing;
        });

        self.send_preview(actor).await
    }

    async fn send_preview(&self, actor: ActorId) -> Result<()> {
        let Some(generated) = self.sessions.with(actor, |s| s.generated.clone()).flatten() else {
            return Ok(());
        };

        let text = format!(
            "Draft preview\n\nTitle: {}\n\nSummary: {}\n\n{}",
            generated.title,
            generated.short_summary,
            truncate_chars(&generated.full_body, 900)
        );

        self.transport
            .send_actions(
                actor,
                &text,
                vec![
                    vec![ActionButton::callback("Approve and save", "approve")],
                    vec![
                        ActionButton::callback("Edit title", "edit:title"),
                        ActionButton::callback("Edit summary", "edit:short"),
                        ActionButton::callback("Edit body", "edit:full"),
                    ],
                    vec![
                        ActionButton::callback("Regenerate", "regen"),
                        ActionButton::callback("Cancel", "cancel"),
                    ],
                ],
            )
            .await
    }

    async fn begin_edit(&self, actor: ActorId, field: EditField) -> Result<()> {
        let ok = self.sessions.with(actor, |s| {
            if s.state == SessionState::Previewing {
                s.state = SessionState::Editing;
                s.awaiting_edit = Some(field);
                true
            } else {
                false
            }
        });

        if ok == Some(true) {
            let prompt = match field {
                EditField::Title => "Send the new title:",
                EditField::Short => "Send the new summary:",
                EditField::Full => "Send the new body text:",
            };
            self.transport.send_text(actor, prompt).await
        } else {
            self.transport
                .send_text(actor, "There is no rendering to edit right now.")
                .await
        }
    }

    async fn regenerate(&self, actor: ActorId) -> Result<()> {
        let ok = self.sessions.with(actor, |s| {
            if s.state == SessionState::Previewing {
                s.state = SessionState::Generating;
                s.generated = None;
                true
            } else {
                false
            }
        });

        if ok == Some(true) {
            self.transport
                .send_text(actor, "Regenerating the draft...")
                .await?;
            self.generate(actor).await
        } else {
            self.transport
                .send_text(actor, "There is no rendering to regenerate right now.")
                .await
        }
    }

    async fn commit(&self, actor: ActorId) -> Result<()> {
        let ok = self.sessions.with(actor, |s| {
            if s.state == SessionState::Previewing {
                s.state = SessionState::Committing;
                true
            } else {
                false
            }
        });
        if ok != Some(true) {
            return self
                .transport
                .send_text(actor, "There is no approved rendering to save.")
                .await;
        }

        let Some(snapshot) = self.sessions.snapshot(actor) else {
            return Ok(());
        };

        match self.committer.commit(&snapshot).await {
            Ok(draft) => {
                // Exactly once, best-effort: announcement failures are
                // logged inside the router and never undo the commit.
                self.router.announce_draft(&draft).await;
                self.sessions.remove(actor);
                self.batches.clear_actor(actor);
                self.transport
                    .send_text(
                        actor,
                        &format!(
                            "Draft saved.\n\nTitle: {}\n{}\n\nIt will appear once the reviewer approves it.",
                            draft.title,
                            truncate_chars(&draft.short_summary, 100)
                        ),
                    )
                    .await
            }
            Err(CommitError::Duplicate(id)) => {
                self.sessions.with(actor, |s| s.state = SessionState::Previewing);
                self.transport
                    .send_text(
                        actor,
                        &format!(
                            "A record with this title and date already exists ({}). Edit the title and try again.",
                            id
                        ),
                    )
                    .await
            }
            Err(CommitError::Store(e)) => {
                warn!(actor, "commit failed: {e:#}");
                self.sessions.with(actor, |s| s.state = SessionState::Previewing);
                self.transport
                    .send_text(actor, "Saving failed and nothing was written. Please try again.")
                    .await
            }
        }
    }

    async fn cancel(&self, actor: ActorId) -> Result<()> {
        let state = self.sessions.with(actor, |s| s.state);
        match state {
            None => {
                self.transport
                    .send_text(actor, "Nothing to cancel.")
                    .await
            }
            Some(SessionState::Committing) => {
                // A commit in flight is not interruptible.
                self.transport
                    .send_text(actor, "The draft is being saved and can no longer be cancelled.")
                    .await
            }
            Some(_) => {
                self.batches.clear_actor(actor);
                self.sessions.remove(actor);
                self.transport
                    .send_text(actor, "Draft discarded.")
                    .await
            }
        }
    }
}

fn parse_coordinates(arg: &str) -> Option<(f64, f64)> {
    let (lat, lon) = arg.split_once(',')?;
    let lat: f64 = lat.trim().parse().ok()?;
    let lon: f64 = lon.trim().parse().ok()?;
    if (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon) {
        Some((lat, lon))
    } else {
        None
    }
}
