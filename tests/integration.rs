//! End-to-end flows over a temporary SQLite store with a recording mock
//! transport: batch debounce, degraded generation, commit, duplicate
//! identity, partial media failure, rejection cascade, and field editing.

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc::{self, UnboundedReceiver};

use newsdesk::approval::{encode_token, TokenAction};
use newsdesk::batch::BatchQuiet;
use newsdesk::commit::news_id;
use newsdesk::config::{
    Config, DbConfig, ExpansionConfig, IntakeConfig, MediaConfig, TranscriptionConfig,
    TransportConfig,
};
use newsdesk::controller::{Controller, ControllerSettings};
use newsdesk::models::{ActorId, Command, InboundEvent};
use newsdesk::session::SessionState;
use newsdesk::transport::{ActionButton, Transport};
use newsdesk::{db, migrate, store};

const SUBMITTER: ActorId = 7;
const REVIEWER: ActorId = 999;

/// Records outbound messages; downloads succeed with synthetic bytes
/// unless the reference starts with `bad`.
#[derive(Default)]
struct MockTransport {
    sent: Mutex<Vec<(ActorId, String)>>,
    keyboards: Mutex<Vec<(ActorId, String, Vec<Vec<ActionButton>>)>>,
}

impl MockTransport {
    fn messages_for(&self, chat: ActorId) -> Vec<String> {
        let mut out: Vec<String> = self
            .sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(c, _)| *c == chat)
            .map(|(_, t)| t.clone())
            .collect();
        out.extend(
            self.keyboards
                .lock()
                .unwrap()
                .iter()
                .filter(|(c, _, _)| *c == chat)
                .map(|(_, t, _)| t.clone()),
        );
        out
    }

    fn keyboards_for(&self, chat: ActorId) -> Vec<Vec<Vec<ActionButton>>> {
        self.keyboards
            .lock()
            .unwrap()
            .iter()
            .filter(|(c, _, _)| *c == chat)
            .map(|(_, _, rows)| rows.clone())
            .collect()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send_text(&self, chat: ActorId, text: &str) -> Result<()> {
        self.sent.lock().unwrap().push((chat, text.to_string()));
        Ok(())
    }

    async fn send_actions(
        &self,
        chat: ActorId,
        text: &str,
        rows: Vec<Vec<ActionButton>>,
    ) -> Result<()> {
        self.keyboards
            .lock()
            .unwrap()
            .push((chat, text.to_string(), rows));
        Ok(())
    }

    async fn download(&self, file_ref: &str) -> Result<Vec<u8>> {
        if file_ref.starts_with("bad") {
            bail!("synthetic download failure for {}", file_ref);
        }
        Ok(format!("bytes:{}", file_ref).into_bytes())
    }
}

struct Harness {
    _tmp: TempDir,
    controller: Controller,
    transport: Arc<MockTransport>,
    pool: sqlx::SqlitePool,
    quiet_rx: UnboundedReceiver<BatchQuiet>,
}

fn test_config(root: &Path) -> Config {
    Config {
        db: DbConfig {
            path: root.join("data/newsdesk.sqlite"),
        },
        media: MediaConfig {
            root: root.join("media"),
        },
        intake: IntakeConfig::default(),
        expansion: ExpansionConfig::default(),
        transcription: TranscriptionConfig::default(),
        transport: TransportConfig {
            reviewer_chat_id: REVIEWER,
            poll_timeout_secs: 30,
        },
    }
}

async fn setup() -> Harness {
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path());
    migrate::run_migrations(&config).await.unwrap();
    let pool = db::connect(&config).await.unwrap();

    let transport = Arc::new(MockTransport::default());
    let (quiet_tx, quiet_rx) = mpsc::unbounded_channel();

    let settings = ControllerSettings {
        media_root: config.media.root.clone(),
        category: "events".to_string(),
        site_url: "http://localhost:3000".to_string(),
        reviewer: REVIEWER,
        batch_window: Duration::from_secs(2),
        expansion: ExpansionConfig::default(),
        transcription: TranscriptionConfig::default(),
    };

    let controller = Controller::new(pool.clone(), transport.clone(), settings, quiet_tx);

    Harness {
        _tmp: tmp,
        controller,
        transport,
        pool,
        quiet_rx,
    }
}

fn photo(actor: ActorId, file_ref: &str, group: Option<&str>) -> InboundEvent {
    InboundEvent::Photo {
        actor,
        file_ref: file_ref.to_string(),
        group: group.map(|g| g.to_string()),
        caption: None,
    }
}

fn text(actor: ActorId, text: &str) -> InboundEvent {
    InboundEvent::Text {
        actor,
        text: text.to_string(),
    }
}

fn command(actor: ActorId, command: Command) -> InboundEvent {
    InboundEvent::Command { actor, command }
}

fn action(actor: ActorId, data: &str) -> InboundEvent {
    InboundEvent::Action {
        actor,
        data: data.to_string(),
    }
}

/// Drive a session through text → finish → approve and return the id the
/// committed record must have.
async fn commit_simple_draft(harness: &mut Harness, title: &str, date_arg: &str) -> String {
    harness.controller.handle(text(SUBMITTER, title)).await.unwrap();
    harness
        .controller
        .handle(command(SUBMITTER, Command::SetDate(date_arg.to_string())))
        .await
        .unwrap();
    harness
        .controller
        .handle(command(SUBMITTER, Command::Finish))
        .await
        .unwrap();
    harness.controller.handle(action(SUBMITTER, "approve")).await.unwrap();

    let date = chrono::NaiveDate::parse_from_str(date_arg, "%d.%m.%Y").unwrap();
    news_id(title, date)
}

#[tokio::test]
async fn test_batch_then_degraded_generation_and_commit() {
    let mut harness = setup().await;

    harness
        .controller
        .handle(text(SUBMITTER, "Мастер-класс"))
        .await
        .unwrap();

    for i in 0..3 {
        harness
            .controller
            .handle(photo(SUBMITTER, &format!("img{}", i), Some("g1")))
            .await
            .unwrap();
    }

    // Grouped attachments stay quiet until the debounce window closes;
    // then exactly one completion reports the whole batch.
    let quiet = harness.quiet_rx.recv().await.unwrap();
    assert_eq!(quiet.count, 3);
    assert!(harness.quiet_rx.try_recv().is_err());

    harness
        .controller
        .handle(InboundEvent::BatchQuiet {
            actor: SUBMITTER,
            count: quiet.count,
        })
        .await
        .unwrap();

    let batch_prompts: Vec<String> = harness
        .transport
        .messages_for(SUBMITTER)
        .into_iter()
        .filter(|m| m.contains("batch of"))
        .collect();
    assert_eq!(batch_prompts.len(), 1);
    assert!(batch_prompts[0].contains('3'));

    harness
        .controller
        .handle(command(SUBMITTER, Command::Finish))
        .await
        .unwrap();

    // The expansion provider is disabled, so the rendering degrades to
    // the raw combined text and the session still reaches Previewing.
    let session = harness.controller.sessions().snapshot(SUBMITTER).unwrap();
    assert_eq!(session.state, SessionState::Previewing);
    let generated = session.generated.unwrap();
    assert_eq!(generated.title, "Мастер-класс");
    assert_eq!(generated.full_body, "Мастер-класс");

    harness.controller.handle(action(SUBMITTER, "approve")).await.unwrap();

    // Session is gone, the record and its ordered children exist.
    assert!(!harness.controller.sessions().contains(SUBMITTER));
    let expected_id = news_id("Мастер-класс", Utc::now().date_naive());
    let record = store::resolve_id(&harness.pool, &expected_id)
        .await
        .unwrap()
        .expect("committed record");
    assert_eq!(record.status, "draft");
    assert_eq!(record.submitted_by, SUBMITTER);

    let images = store::list_images(&harness.pool, &expected_id).await.unwrap();
    assert_eq!(images.len(), 3);
    let orders: Vec<i64> = images.iter().map(|(_, ord)| *ord).collect();
    assert_eq!(orders, vec![0, 1, 2]);

    // The reviewer got exactly one announcement with approve/reject
    // tokens and a passive view link.
    let keyboards = harness.transport.keyboards_for(REVIEWER);
    assert_eq!(keyboards.len(), 1);
    let buttons: Vec<ActionButton> = keyboards[0].iter().flatten().cloned().collect();
    assert!(buttons
        .iter()
        .any(|b| matches!(b, ActionButton::Callback { data, .. } if data.starts_with("p:"))));
    assert!(buttons
        .iter()
        .any(|b| matches!(b, ActionButton::Callback { data, .. } if data.starts_with("r:"))));
    assert!(buttons
        .iter()
        .any(|b| matches!(b, ActionButton::Link { url, .. } if url.contains(&expected_id))));
}

#[tokio::test]
async fn test_finish_on_empty_session_is_rejected() {
    let mut harness = setup().await;

    // A failed voice transcription opens a session but adds no content.
    harness
        .controller
        .handle(InboundEvent::Voice {
            actor: SUBMITTER,
            file_ref: "voice1".to_string(),
            mime: Some("audio/ogg".to_string()),
        })
        .await
        .unwrap();
    assert!(harness.controller.sessions().contains(SUBMITTER));

    harness
        .controller
        .handle(command(SUBMITTER, Command::Finish))
        .await
        .unwrap();

    let state = harness
        .controller
        .sessions()
        .with(SUBMITTER, |s| s.state)
        .unwrap();
    assert_eq!(state, SessionState::Collecting);
    assert!(harness
        .transport
        .messages_for(SUBMITTER)
        .iter()
        .any(|m| m.contains("empty")));
}

#[tokio::test]
async fn test_finish_without_session_is_rejected() {
    let mut harness = setup().await;
    harness
        .controller
        .handle(command(SUBMITTER, Command::Finish))
        .await
        .unwrap();
    assert!(!harness.controller.sessions().contains(SUBMITTER));
    assert!(!harness.transport.messages_for(SUBMITTER).is_empty());
}

#[tokio::test]
async fn test_duplicate_identity_aborts_second_commit() {
    let mut harness = setup().await;

    let id = commit_simple_draft(&mut harness, "Annual Conference", "15.02.2026").await;
    let first = store::resolve_id(&harness.pool, &id).await.unwrap().unwrap();

    // Same title and capture date: the deterministic id collides.
    harness
        .controller
        .handle(text(SUBMITTER, "Annual Conference"))
        .await
        .unwrap();
    harness
        .controller
        .handle(command(SUBMITTER, Command::SetDate("15.02.2026".to_string())))
        .await
        .unwrap();
    harness
        .controller
        .handle(command(SUBMITTER, Command::Finish))
        .await
        .unwrap();
    harness.controller.handle(action(SUBMITTER, "approve")).await.unwrap();

    // Surfaced as the named duplicate condition, session retryable.
    let state = harness
        .controller
        .sessions()
        .with(SUBMITTER, |s| s.state)
        .unwrap();
    assert_eq!(state, SessionState::Previewing);
    assert!(harness
        .transport
        .messages_for(SUBMITTER)
        .iter()
        .any(|m| m.contains("already exists")));

    // The first record is untouched.
    let records = store::list_recent(&harness.pool, 10).await.unwrap();
    assert_eq!(records.len(), 1);
    let unchanged = store::resolve_id(&harness.pool, &id).await.unwrap().unwrap();
    assert_eq!(unchanged.title, first.title);
    assert_eq!(unchanged.status, first.status);
}

#[tokio::test]
async fn test_partial_media_failure_keeps_gapless_order() {
    let mut harness = setup().await;

    harness
        .controller
        .handle(text(SUBMITTER, "Open day at the clinic"))
        .await
        .unwrap();
    for file_ref in ["ok1", "bad2", "ok3", "bad4"] {
        harness
            .controller
            .handle(photo(SUBMITTER, file_ref, None))
            .await
            .unwrap();
    }
    harness
        .controller
        .handle(command(SUBMITTER, Command::Finish))
        .await
        .unwrap();
    harness.controller.handle(action(SUBMITTER, "approve")).await.unwrap();

    let id = news_id("Open day at the clinic", Utc::now().date_naive());
    let images = store::list_images(&harness.pool, &id).await.unwrap();

    // Two of four downloads failed: exactly the survivors are recorded,
    // renumbered without gaps.
    assert_eq!(images.len(), 2);
    let orders: Vec<i64> = images.iter().map(|(_, ord)| *ord).collect();
    assert_eq!(orders, vec![0, 1]);
}

#[tokio::test]
async fn test_reject_token_removes_record_and_notifies_submitter() {
    let mut harness = setup().await;

    let id = commit_simple_draft(&mut harness, "Spring Workshop", "10.04.2026").await;
    assert!(store::resolve_id(&harness.pool, &id).await.unwrap().is_some());

    let token = encode_token(TokenAction::Reject, &id);
    harness
        .controller
        .handle(action(REVIEWER, &token))
        .await
        .unwrap();

    // Parent and children are gone.
    assert!(store::resolve_id(&harness.pool, &id).await.unwrap().is_none());
    assert!(store::list_images(&harness.pool, &id).await.unwrap().is_empty());

    // Best-effort notification reached the original submitter.
    assert!(harness
        .transport
        .messages_for(SUBMITTER)
        .iter()
        .any(|m| m.contains("rejected")));
}

#[tokio::test]
async fn test_publish_token_sets_status() {
    let mut harness = setup().await;

    let id = commit_simple_draft(&mut harness, "Autumn Lecture", "03.10.2026").await;

    let token = encode_token(TokenAction::Publish, &id);
    harness
        .controller
        .handle(action(REVIEWER, &token))
        .await
        .unwrap();

    let record = store::resolve_id(&harness.pool, &id).await.unwrap().unwrap();
    assert_eq!(record.status, "published");
    assert!(harness
        .transport
        .messages_for(SUBMITTER)
        .iter()
        .any(|m| m.contains("published")));
}

#[tokio::test]
async fn test_truncated_token_resolves_by_prefix() {
    let mut harness = setup().await;

    // A long multi-byte title forces the token to truncate the id.
    let title = "Международная конференция по лучевой диагностике";
    let id = commit_simple_draft(&mut harness, title, "20.06.2026").await;

    let token = encode_token(TokenAction::Publish, &id);
    assert!(token.len() <= 64);
    harness
        .controller
        .handle(action(REVIEWER, &token))
        .await
        .unwrap();

    let record = store::resolve_id(&harness.pool, &id).await.unwrap().unwrap();
    assert_eq!(record.status, "published");
}

#[tokio::test]
async fn test_non_reviewer_cannot_act_on_records() {
    let mut harness = setup().await;

    let id = commit_simple_draft(&mut harness, "Guarded Record", "01.03.2026").await;

    let token = encode_token(TokenAction::Reject, &id);
    harness
        .controller
        .handle(action(SUBMITTER, &token))
        .await
        .unwrap();

    assert!(store::resolve_id(&harness.pool, &id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_edit_flow_replaces_single_field() {
    let mut harness = setup().await;

    harness
        .controller
        .handle(text(SUBMITTER, "Short note about the open day"))
        .await
        .unwrap();
    harness
        .controller
        .handle(command(SUBMITTER, Command::Finish))
        .await
        .unwrap();

    harness
        .controller
        .handle(action(SUBMITTER, "edit:title"))
        .await
        .unwrap();
    let state = harness
        .controller
        .sessions()
        .with(SUBMITTER, |s| s.state)
        .unwrap();
    assert_eq!(state, SessionState::Editing);

    harness
        .controller
        .handle(text(SUBMITTER, "Open day draws a full house"))
        .await
        .unwrap();

    let session = harness.controller.sessions().snapshot(SUBMITTER).unwrap();
    assert_eq!(session.state, SessionState::Previewing);
    assert!(session.awaiting_edit.is_none());
    let generated = session.generated.unwrap();
    assert_eq!(generated.title, "Open day draws a full house");
    // The other fields are untouched.
    assert_eq!(generated.full_body, "Short note about the open day");
}

#[tokio::test]
async fn test_cancel_discards_session() {
    let mut harness = setup().await;

    harness
        .controller
        .handle(text(SUBMITTER, "to be discarded"))
        .await
        .unwrap();
    assert!(harness.controller.sessions().contains(SUBMITTER));

    harness
        .controller
        .handle(command(SUBMITTER, Command::Cancel))
        .await
        .unwrap();
    assert!(!harness.controller.sessions().contains(SUBMITTER));

    let records = store::list_recent(&harness.pool, 10).await.unwrap();
    assert!(records.is_empty());
}

#[tokio::test]
async fn test_list_pages_offer_select_tokens() {
    let mut harness = setup().await;

    commit_simple_draft(&mut harness, "First Story", "01.05.2026").await;

    harness
        .controller
        .handle(command(REVIEWER, Command::List))
        .await
        .unwrap();

    let keyboards = harness.transport.keyboards_for(REVIEWER);
    let buttons: Vec<ActionButton> = keyboards.last().unwrap().iter().flatten().cloned().collect();
    assert!(buttons
        .iter()
        .any(|b| matches!(b, ActionButton::Callback { data, .. } if data.starts_with("s:"))));
}
