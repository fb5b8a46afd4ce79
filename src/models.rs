//! Core data models used throughout newsdesk.
//!
//! These types represent the events, draft content, and persisted records
//! that flow through the intake and approval pipeline.

/// Identity of a conversation. One draft session exists per actor at a time.
pub type ActorId = i64;

/// A discrete message or command received from the messaging transport.
#[derive(Debug, Clone)]
pub enum InboundEvent {
    /// Plain text. Appended to the draft, or consumed as a field edit
    /// while an edit is pending.
    Text { actor: ActorId, text: String },
    /// A photo attachment, optionally tagged with a media-group id when
    /// it is part of a multi-file upload.
    Photo {
        actor: ActorId,
        file_ref: String,
        group: Option<String>,
        caption: Option<String>,
    },
    /// A video attachment.
    Video {
        actor: ActorId,
        file_ref: String,
        group: Option<String>,
        caption: Option<String>,
    },
    /// A voice note, transcribed on arrival.
    Voice {
        actor: ActorId,
        file_ref: String,
        mime: Option<String>,
    },
    /// An explicit command (`/done`, `/cancel`, ...).
    Command { actor: ActorId, command: Command },
    /// An action-button press carrying either a fixed preview action or
    /// an encoded token (see [`crate::approval`]).
    Action { actor: ActorId, data: String },
    /// Synthetic event emitted when a media group has gone quiet
    /// (see [`crate::batch`]).
    BatchQuiet { actor: ActorId, count: usize },
}

impl InboundEvent {
    /// The actor this event belongs to. Events for the same actor are
    /// processed in arrival order.
    pub fn actor(&self) -> ActorId {
        match self {
            InboundEvent::Text { actor, .. }
            | InboundEvent::Photo { actor, .. }
            | InboundEvent::Video { actor, .. }
            | InboundEvent::Voice { actor, .. }
            | InboundEvent::Command { actor, .. }
            | InboundEvent::Action { actor, .. }
            | InboundEvent::BatchQuiet { actor, .. } => *actor,
        }
    }
}

/// Explicit conversational commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Greeting / workflow description.
    Start,
    /// Close collection and generate the draft rendering.
    Finish,
    /// Discard the current session.
    Cancel,
    /// List recent records from the content store.
    List,
    /// Manual capture-date override, raw `DD.MM.YYYY` argument.
    SetDate(String),
    /// Manual location override, raw `lat,lon` or free-text argument.
    SetLocation(String),
}

/// The AI-produced (or degraded-fallback) rendering of a draft.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedContent {
    pub title: String,
    pub short_summary: String,
    pub full_body: String,
}

/// Durable parent record written to the content store at commit time.
#[derive(Debug, Clone)]
pub struct NewsRecord {
    /// Deterministic id: `YYYY.MM.DD-<slug>`.
    pub id: String,
    pub title: String,
    pub short_description: String,
    pub full_description: String,
    /// Display date string, `DD.MM.YYYY`.
    pub date: String,
    pub year: String,
    pub category: String,
    /// `draft` until approved, then `published`.
    pub status: String,
    /// Free-text location, `lat, lon` or a label.
    pub location: Option<String>,
    /// Actor that submitted the draft; notified after approval/rejection.
    pub submitted_by: ActorId,
}

/// Summary row used for listings and token resolution.
#[derive(Debug, Clone)]
pub struct NewsSummary {
    pub id: String,
    pub title: String,
    pub date: String,
    pub status: String,
    pub submitted_by: ActorId,
}

/// Truncate a string to at most `max` characters (not bytes), so that
/// multi-byte titles degrade without splitting a character.
pub fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}
