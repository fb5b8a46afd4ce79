//! Runtime wiring for the long-running intake service.
//!
//! One router task drains the shared event stream and hands each event to
//! a per-actor mailbox; each mailbox worker processes its actor's events
//! in arrival order, so one actor's adapter awaits never block another
//! actor. Batch-quiet completions re-enter the owning actor's mailbox
//! like any other event, which keeps the ordering guarantee intact.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::{info, warn};

use crate::config::Config;
use crate::controller::{Controller, ControllerSettings};
use crate::db;
use crate::migrate;
use crate::models::{ActorId, InboundEvent};
use crate::transport::BotApi;

pub async fn run(config: Config) -> Result<()> {
    // Idempotent; keeps a fresh deployment from needing a separate init.
    migrate::run_migrations(&config).await?;
    let pool = db::connect(&config).await?;

    let token = std::env::var("NEWSDESK_BOT_TOKEN")
        .context("NEWSDESK_BOT_TOKEN environment variable not set")?;
    let transport = Arc::new(BotApi::new(&token, config.transport.poll_timeout_secs)?);

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<InboundEvent>();
    let (quiet_tx, mut quiet_rx) = mpsc::unbounded_channel();

    let controller = Arc::new(Controller::new(
        pool,
        transport.clone(),
        ControllerSettings::from_config(&config),
        quiet_tx,
    ));

    // Batch-quiet completions feed back into the main event stream.
    {
        let event_tx = event_tx.clone();
        tokio::spawn(async move {
            while let Some(quiet) = quiet_rx.recv().await {
                let _ = event_tx.send(InboundEvent::BatchQuiet {
                    actor: quiet.actor,
                    count: quiet.count,
                });
            }
        });
    }

    // Transport long-poll producer.
    {
        let transport = transport.clone();
        tokio::spawn(async move {
            transport.poll_loop(event_tx).await;
        });
    }

    info!("newsdesk intake service started");

    let mut mailboxes: HashMap<ActorId, UnboundedSender<InboundEvent>> = HashMap::new();
    while let Some(event) = event_rx.recv().await {
        let actor = event.actor();
        let mailbox = mailboxes
            .entry(actor)
            .or_insert_with(|| spawn_actor_worker(actor, controller.clone()));
        if let Err(unsent) = mailbox.send(event) {
            // Worker died; replace it and redeliver.
            let mailbox = spawn_actor_worker(actor, controller.clone());
            let _ = mailbox.send(unsent.0);
            mailboxes.insert(actor, mailbox);
        }
    }

    Ok(())
}

fn spawn_actor_worker(actor: ActorId, controller: Arc<Controller>) -> UnboundedSender<InboundEvent> {
    let (tx, mut rx) = mpsc::unbounded_channel::<InboundEvent>();
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if let Err(e) = controller.handle(event).await {
                warn!(actor, "event handling failed: {e:#}");
            }
        }
    });
    tx
}
