//! Draft sessions and the process-wide session store.
//!
//! A [`DraftSession`] is the per-actor mutable state accumulated while a
//! draft is being assembled; the [`SessionStore`] is the only shared
//! mutable resource in the pipeline. Access is explicit (create, mutate
//! under the lock, snapshot for work across await points, remove) and the
//! lock is never held across an adapter call.

use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::metadata::ImageMetadata;
use crate::models::{ActorId, GeneratedContent};

/// Lifecycle position of a draft session. The terminal outcomes
/// (completed, cancelled) are expressed by removing the session from the
/// store rather than by a stored state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Accumulating text, media, and voice events.
    Collecting,
    /// Running metadata extraction and content expansion.
    Generating,
    /// Waiting for the submitter to approve, edit, or regenerate.
    Previewing,
    /// The next plain-text event overwrites one generated field.
    Editing,
    /// The persistence committer is running; cancel is rejected here.
    Committing,
}

/// Which generated field the next plain-text event replaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditField {
    Title,
    Short,
    Full,
}

/// Manual location override supplied by an explicit command.
#[derive(Debug, Clone, PartialEq)]
pub enum ManualLocation {
    Coordinates { lat: f64, lon: f64 },
    Label(String),
}

/// One attached media item. `stored_path` is populated only after a
/// successful download + store at commit time.
#[derive(Debug, Clone)]
pub struct MediaItem {
    pub external_ref: String,
    pub stored_path: Option<String>,
}

impl MediaItem {
    pub fn new(external_ref: impl Into<String>) -> Self {
        Self {
            external_ref: external_ref.into(),
            stored_path: None,
        }
    }
}

/// Resolved capture date and location for a draft, cached on the session
/// and recomputed on every mutation that can affect it, so generation and
/// commit always read the same values.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureContext {
    pub date: NaiveDate,
    pub location: Option<String>,
}

/// Per-actor in-progress draft.
#[derive(Debug, Clone)]
pub struct DraftSession {
    pub actor: ActorId,
    pub state: SessionState,
    /// Accumulated free text, newline-joined across messages.
    pub raw_text: String,
    /// Transcribed voice notes, in arrival order.
    pub voice_transcripts: Vec<String>,
    pub images: Vec<MediaItem>,
    pub videos: Vec<MediaItem>,
    pub manual_date: Option<NaiveDate>,
    pub manual_location: Option<ManualLocation>,
    /// Metadata extracted from the first image, populated at generation.
    pub extracted: Option<ImageMetadata>,
    /// Cached output of [`resolve_capture`].
    pub resolved: CaptureContext,
    pub generated: Option<GeneratedContent>,
    pub awaiting_edit: Option<EditField>,
    pub started_at: DateTime<Utc>,
}

impl DraftSession {
    pub fn new(actor: ActorId, now: DateTime<Utc>) -> Self {
        Self {
            actor,
            state: SessionState::Collecting,
            raw_text: String::new(),
            voice_transcripts: Vec::new(),
            images: Vec::new(),
            videos: Vec::new(),
            manual_date: None,
            manual_location: None,
            extracted: None,
            resolved: resolve_capture(None, None, None, now),
            generated: None,
            awaiting_edit: None,
            started_at: now,
        }
    }

    /// Append a plain-text message to the accumulated draft text.
    pub fn append_text(&mut self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        if self.raw_text.is_empty() {
            self.raw_text = text.to_string();
        } else {
            self.raw_text.push('\n');
            self.raw_text.push_str(text);
        }
    }

    /// A draft is committable once it has any text, image, or video.
    pub fn has_content(&self) -> bool {
        !self.raw_text.trim().is_empty()
            || !self.voice_transcripts.is_empty()
            || !self.images.is_empty()
            || !self.videos.is_empty()
    }

    /// Combined input for content expansion: transcripts in arrival order,
    /// then raw text, joined by blank lines.
    pub fn combined_text(&self) -> String {
        let mut parts: Vec<&str> = self
            .voice_transcripts
            .iter()
            .map(|s| s.as_str())
            .collect();
        if !self.raw_text.trim().is_empty() {
            parts.push(self.raw_text.as_str());
        }
        parts.join("\n\n")
    }

    /// Recompute the cached capture resolution after a mutation.
    pub fn resolve(&mut self, now: DateTime<Utc>) {
        self.resolved = resolve_capture(
            self.manual_date,
            self.manual_location.as_ref(),
            self.extracted.as_ref(),
            now,
        );
    }
}

/// Resolve the capture date and location for a draft.
///
/// Priority: manual override, then metadata extracted from the first
/// image, then the current wall clock for the date (the location stays
/// absent). This is the single resolution path; callers cache the result
/// on the session.
pub fn resolve_capture(
    manual_date: Option<NaiveDate>,
    manual_location: Option<&ManualLocation>,
    extracted: Option<&ImageMetadata>,
    now: DateTime<Utc>,
) -> CaptureContext {
    let date = manual_date
        .or_else(|| extracted.and_then(|m| m.capture_date))
        .unwrap_or_else(|| now.date_naive());

    let location = match manual_location {
        Some(ManualLocation::Coordinates { lat, lon }) => Some(format_coordinates(*lat, *lon)),
        Some(ManualLocation::Label(label)) => Some(label.clone()),
        None => extracted
            .and_then(|m| m.coordinates())
            .map(|(lat, lon)| format_coordinates(lat, lon)),
    };

    CaptureContext { date, location }
}

fn format_coordinates(lat: f64, lon: f64) -> String {
    format!("{:.6}, {:.6}", lat, lon)
}

/// Process-wide table of in-progress drafts, keyed by actor id.
///
/// The mutex guards the whole map; each actor's events arrive serialized,
/// so per-key locking is unnecessary. Handlers snapshot the session before
/// awaiting on adapters and write results back afterwards.
#[derive(Clone, Default)]
pub struct SessionStore {
    inner: Arc<Mutex<HashMap<ActorId, DraftSession>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a session for the actor if none exists. Returns true when a
    /// new session was started.
    pub fn open(&self, actor: ActorId, now: DateTime<Utc>) -> bool {
        let mut map = self.inner.lock().unwrap();
        if map.contains_key(&actor) {
            false
        } else {
            map.insert(actor, DraftSession::new(actor, now));
            true
        }
    }

    /// Run a closure against the actor's session under the lock.
    pub fn with<R>(&self, actor: ActorId, f: impl FnOnce(&mut DraftSession) -> R) -> Option<R> {
        let mut map = self.inner.lock().unwrap();
        map.get_mut(&actor).map(f)
    }

    /// Clone the actor's session for use across await points.
    pub fn snapshot(&self, actor: ActorId) -> Option<DraftSession> {
        self.inner.lock().unwrap().get(&actor).cloned()
    }

    /// Remove the actor's session (cancel or successful commit).
    pub fn remove(&self, actor: ActorId) -> Option<DraftSession> {
        self.inner.lock().unwrap().remove(&actor)
    }

    pub fn contains(&self, actor: ActorId) -> bool {
        self.inner.lock().unwrap().contains_key(&actor)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }
}
