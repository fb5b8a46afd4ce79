//! Approval routing and the action-token codec.
//!
//! Every reviewer-facing action travels as a compact opaque token,
//! `<tag>:<truncatedId>`, bounded by the transport's 64-byte action-data
//! ceiling. The codec is a pure encoding contract: ids are truncated by
//! characters, the result is measured in encoded bytes (multi-byte ids
//! count per byte, not per character), and shrunk further if still over
//! budget. Decoding splits on the first separator and resolves the
//! possibly-truncated id against the content store by prefix.
//!
//! State transitions driven by token receipt:
//! `draft --approve--> published`, `draft --reject--> deleted` (parent
//! and children). Result notifications are best-effort and never unwind
//! a completed transition.

use anyhow::Result;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::warn;

use crate::commit::CommittedDraft;
use crate::models::{ActorId, NewsSummary};
use crate::store;
use crate::transport::{ActionButton, Transport};

/// Hard byte ceiling the transport enforces on action data.
pub const TOKEN_BYTE_CEILING: usize = 64;

/// Character budget for the id part of a token. Generous enough to make
/// prefixes unique in practice, small enough that even an all-multibyte
/// id stays under the byte ceiling.
const TOKEN_ID_CHARS: usize = 20;

/// Records per page in listings.
const PAGE_SIZE: usize = 10;

/// Reviewer- and curation-facing actions carried by tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenAction {
    /// `draft -> published`.
    Publish,
    /// `draft -> deleted`, with a rejection notice.
    Reject,
    /// Open the per-record action menu.
    Select,
    /// `published -> draft`.
    Unpublish,
    /// Delete any record.
    Delete,
    /// List-page navigation; the payload is a page number.
    Page,
}

impl TokenAction {
    fn tag(&self) -> &'static str {
        match self {
            TokenAction::Publish => "p",
            TokenAction::Reject => "r",
            TokenAction::Select => "s",
            TokenAction::Unpublish => "u",
            TokenAction::Delete => "d",
            TokenAction::Page => "g",
        }
    }

    fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "p" => Some(TokenAction::Publish),
            "r" => Some(TokenAction::Reject),
            "s" => Some(TokenAction::Select),
            "u" => Some(TokenAction::Unpublish),
            "d" => Some(TokenAction::Delete),
            "g" => Some(TokenAction::Page),
            _ => None,
        }
    }
}

/// Encode an action token, guaranteed to fit the byte ceiling.
pub fn encode_token(action: TokenAction, id: &str) -> String {
    let mut truncated: String = id.chars().take(TOKEN_ID_CHARS).collect();
    let mut token = format!("{}:{}", action.tag(), truncated);
    // Byte length, not character count: multi-byte ids shrink further.
    while token.len() > TOKEN_BYTE_CEILING {
        truncated.pop();
        token = format!("{}:{}", action.tag(), truncated);
    }
    token
}

/// Decode an action token. Returns the action and the (possibly
/// truncated) id fragment.
pub fn decode_token(data: &str) -> Option<(TokenAction, &str)> {
    let (tag, fragment) = data.split_once(':')?;
    let action = TokenAction::from_tag(tag)?;
    Some((action, fragment))
}

/// Routes committed drafts to the fixed reviewer and applies the status
/// transitions their tokens trigger.
pub struct ApprovalRouter {
    pool: SqlitePool,
    transport: Arc<dyn Transport>,
    reviewer: ActorId,
    site_url: String,
}

impl ApprovalRouter {
    pub fn new(
        pool: SqlitePool,
        transport: Arc<dyn Transport>,
        reviewer: ActorId,
        site_url: String,
    ) -> Self {
        Self {
            pool,
            transport,
            reviewer,
            site_url,
        }
    }

    /// Notify the reviewer about a freshly committed draft. Best-effort:
    /// a delivery failure is logged and never undoes the commit.
    pub async fn announce_draft(&self, draft: &CommittedDraft) {
        let text = format!(
            "New draft awaiting review\n\nid: {}\ntitle: {}\n{}\nphotos: {}, videos: {}",
            draft.id, draft.title, draft.short_summary, draft.image_count, draft.video_count
        );
        let rows = vec![
            vec![
                ActionButton::callback("Publish", encode_token(TokenAction::Publish, &draft.id)),
                ActionButton::callback("Reject", encode_token(TokenAction::Reject, &draft.id)),
            ],
            vec![ActionButton::link("View", self.record_url(&draft.id))],
        ];
        if let Err(e) = self.transport.send_actions(self.reviewer, &text, rows).await {
            warn!(id = %draft.id, "reviewer announcement failed: {e:#}");
        }
    }

    /// Apply a decoded token. `actor` is the chat the button was pressed
    /// in; record mutations are accepted from the reviewer only.
    pub async fn handle_token(
        &self,
        actor: ActorId,
        action: TokenAction,
        fragment: &str,
    ) -> Result<()> {
        if action == TokenAction::Page {
            let page = fragment.parse::<usize>().unwrap_or(0);
            return self.send_list_page(actor, page).await;
        }

        if actor != self.reviewer {
            self.transport
                .send_text(actor, "Only the reviewer can act on records.")
                .await?;
            return Ok(());
        }

        let Some(record) = store::resolve_id(&self.pool, fragment).await? else {
            self.transport
                .send_text(actor, "Record not found. It may have been removed already.")
                .await?;
            return Ok(());
        };

        match action {
            TokenAction::Publish => {
                store::set_status(&self.pool, &record.id, "published").await?;
                self.transport
                    .send_text(actor, &format!("Published: {}", record.id))
                    .await?;
                self.notify_submitter(
                    &record,
                    &format!("Your draft \"{}\" has been published.", record.title),
                )
                .await;
            }
            TokenAction::Unpublish => {
                store::set_status(&self.pool, &record.id, "draft").await?;
                self.transport
                    .send_text(actor, &format!("Returned to draft: {}", record.id))
                    .await?;
            }
            TokenAction::Reject => {
                store::delete_record(&self.pool, &record.id).await?;
                self.transport
                    .send_text(actor, &format!("Rejected and removed: {}", record.id))
                    .await?;
                self.notify_submitter(
                    &record,
                    &format!("Your draft \"{}\" was rejected by the reviewer.", record.title),
                )
                .await;
            }
            TokenAction::Delete => {
                store::delete_record(&self.pool, &record.id).await?;
                self.transport
                    .send_text(actor, &format!("Removed: {}", record.id))
                    .await?;
            }
            TokenAction::Select => {
                self.send_record_menu(actor, &record).await?;
            }
            TokenAction::Page => unreachable!("handled above"),
        }

        Ok(())
    }

    /// Render one page of the recent-records listing with select buttons
    /// and page navigation.
    pub async fn send_list_page(&self, actor: ActorId, page: usize) -> Result<()> {
        let records = store::list_recent(&self.pool, 50).await?;
        if records.is_empty() {
            self.transport.send_text(actor, "No records yet.").await?;
            return Ok(());
        }

        let pages = records.chunks(PAGE_SIZE).count();
        let page = page.min(pages - 1);
        let slice = &records[page * PAGE_SIZE..(page * PAGE_SIZE + PAGE_SIZE).min(records.len())];

        let mut text = format!("Records (page {}/{})\n", page + 1, pages);
        let mut rows = Vec::new();
        for record in slice {
            let marker = if record.status == "draft" { "[draft]" } else { "[live]" };
            text.push_str(&format!("\n{} {}  {}", marker, record.date, record.title));
            rows.push(vec![ActionButton::callback(
                format!("{} {}", marker, crate::models::truncate_chars(&record.title, 30)),
                encode_token(TokenAction::Select, &record.id),
            )]);
        }

        let mut nav = Vec::new();
        if page > 0 {
            nav.push(ActionButton::callback(
                "Previous",
                encode_token(TokenAction::Page, &(page - 1).to_string()),
            ));
        }
        if page + 1 < pages {
            nav.push(ActionButton::callback(
                "Next",
                encode_token(TokenAction::Page, &(page + 1).to_string()),
            ));
        }
        if !nav.is_empty() {
            rows.push(nav);
        }

        self.transport.send_actions(actor, &text, rows).await
    }

    /// Per-record curation menu: publish or unpublish depending on the
    /// current status, delete, back to the listing.
    async fn send_record_menu(&self, actor: ActorId, record: &NewsSummary) -> Result<()> {
        let images = store::list_images(&self.pool, &record.id).await?;
        let videos = store::list_videos(&self.pool, &record.id).await?;
        let text = format!(
            "{}\n\nid: {}\ndate: {}\nstatus: {}\nphotos: {}, videos: {}",
            record.title,
            record.id,
            record.date,
            record.status,
            images.len(),
            videos.len()
        );

        let toggle = if record.status == "draft" {
            ActionButton::callback("Publish", encode_token(TokenAction::Publish, &record.id))
        } else {
            ActionButton::callback("Unpublish", encode_token(TokenAction::Unpublish, &record.id))
        };

        let rows = vec![
            vec![toggle],
            vec![ActionButton::callback(
                "Delete",
                encode_token(TokenAction::Delete, &record.id),
            )],
            vec![
                ActionButton::callback("Back to list", encode_token(TokenAction::Page, "0")),
                ActionButton::link("View", self.record_url(&record.id)),
            ],
        ];

        self.transport.send_actions(actor, &text, rows).await
    }

    /// Best-effort message to the actor that submitted the record.
    async fn notify_submitter(&self, record: &NewsSummary, text: &str) {
        if record.submitted_by == 0 || record.submitted_by == self.reviewer {
            return;
        }
        if let Err(e) = self.transport.send_text(record.submitted_by, text).await {
            warn!(id = %record.id, "submitter notification failed: {e:#}");
        }
    }

    fn record_url(&self, id: &str) -> String {
        format!("{}/news/{}", self.site_url.trim_end_matches('/'), id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let id = "2024.05.12-clinic-opens-new-wing";
        let token = encode_token(TokenAction::Publish, id);
        let (action, fragment) = decode_token(&token).unwrap();
        assert_eq!(action, TokenAction::Publish);
        assert!(id.starts_with(fragment));
        assert!(token.len() <= TOKEN_BYTE_CEILING);
    }

    #[test]
    fn test_round_trip_all_tags() {
        for action in [
            TokenAction::Publish,
            TokenAction::Reject,
            TokenAction::Select,
            TokenAction::Unpublish,
            TokenAction::Delete,
            TokenAction::Page,
        ] {
            let token = encode_token(action, "abc");
            let (decoded, fragment) = decode_token(&token).unwrap();
            assert_eq!(decoded, action);
            assert_eq!(fragment, "abc");
        }
    }

    #[test]
    fn test_multibyte_id_measured_in_bytes() {
        // Cyrillic characters weigh two bytes each; the token must stay
        // within the ceiling and remain a prefix of the original.
        let id = "2024.05.12-мастер-класс-по-вакуумной-биопсии";
        let token = encode_token(TokenAction::Reject, id);
        assert!(token.len() <= TOKEN_BYTE_CEILING);
        let (_, fragment) = decode_token(&token).unwrap();
        assert!(id.starts_with(fragment));
        assert_eq!(fragment.chars().count(), 20);
    }

    #[test]
    fn test_id_at_ceiling_and_one_over() {
        // Ids whose raw length sits exactly at the ceiling, and one byte
        // over it, both come out bounded and prefix-preserving.
        for len in [TOKEN_BYTE_CEILING, TOKEN_BYTE_CEILING + 1] {
            let id = "x".repeat(len);
            let token = encode_token(TokenAction::Publish, &id);
            assert!(token.len() <= TOKEN_BYTE_CEILING);
            let (_, fragment) = decode_token(&token).unwrap();
            assert!(id.starts_with(fragment));
        }
    }

    #[test]
    fn test_wide_chars_trigger_the_shrink_loop() {
        // Twenty 4-byte characters survive the char-budget cut but weigh
        // 80 bytes; the byte check must shrink the fragment further.
        let id: String = std::iter::repeat('🦀').take(20).collect();
        let token = encode_token(TokenAction::Publish, &id);
        assert!(token.len() <= TOKEN_BYTE_CEILING);
        let (_, fragment) = decode_token(&token).unwrap();
        assert!(id.starts_with(fragment));
        assert!(!fragment.is_empty());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_token("no-separator").is_none());
        assert!(decode_token("z:unknown-tag").is_none());
        assert!(decode_token("").is_none());
    }

    #[test]
    fn test_decode_keeps_id_colons() {
        // Only the first separator splits; the id may contain colons.
        let (_, fragment) = decode_token("p:a:b:c").unwrap();
        assert_eq!(fragment, "a:b:c");
    }
}
