//! # newsdesk
//!
//! A conversational intake pipeline that turns chat submissions into
//! reviewed, publishable news drafts.
//!
//! Unstructured, multi-modal input (text, photos, videos, voice notes)
//! arrives as discrete messages from a single actor. The pipeline
//! assembles them into one draft, enriches it with capture metadata and
//! AI-expanded copy, lets the submitter review and edit the rendering,
//! persists the approved draft transactionally, and routes it through a
//! reviewer approval workflow driven by compact action tokens.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌──────────────┐   ┌───────────┐   ┌──────────┐
//! │ Transport │──▶│  Controller   │──▶│ Committer  │──▶│  SQLite   │
//! │ long-poll │   │ sessions +   │   │ media +   │   │ news +   │
//! │  events   │   │  debounce    │   │ txn write │   │ children │
//! └───────────┘   └──────┬───────┘   └─────┬─────┘   └────┬─────┘
//!                        │                 │              │
//!                        ▼                 ▼              ▼
//!                 ┌────────────┐    ┌────────────┐  ┌──────────┐
//!                 │ transcribe │    │  approval  │  │   CLI    │
//!                 │   expand   │    │   router   │  │ (list)   │
//!                 └────────────┘    └────────────┘  └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`session`] | Per-actor draft sessions and the session store |
//! | [`controller`] | Draft-assembly state machine |
//! | [`batch`] | Media-group debounce buffer |
//! | [`metadata`] | EXIF capture date and geolocation extraction |
//! | [`expand`] | AI content-expansion adapter |
//! | [`transcribe`] | Speech-to-text adapter |
//! | [`transport`] | Messaging-transport seam and Bot-API client |
//! | [`media`] | Date-bucketed storage of accepted media |
//! | [`commit`] | Transactional persistence of approved drafts |
//! | [`approval`] | Action-token codec and reviewer routing |
//! | [`store`] | Content-store CRUD |
//! | [`service`] | Per-actor mailbox dispatch and runtime wiring |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod approval;
pub mod batch;
pub mod commit;
pub mod config;
pub mod controller;
pub mod db;
pub mod expand;
pub mod media;
pub mod metadata;
pub mod migrate;
pub mod models;
pub mod service;
pub mod session;
pub mod store;
pub mod transcribe;
pub mod transport;
