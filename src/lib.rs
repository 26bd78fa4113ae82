//! # Strait
//!
//! A WebDriver BiDi ↔ Chrome DevTools Protocol mediator.
//!
//! Strait sits between a BiDi client (a test harness or driver) and a
//! running browser. It accepts BiDi JSON commands, translates them into CDP
//! calls, mirrors the browser's target and frame tree, and emits BiDi
//! events back to the client.
//!
//! ## Architecture
//!
//! - **CdpConnection** - multiplexes every CDP session over one transport,
//!   correlating replies by id and fanning events out per session
//! - **Storages** - browsing contexts, script realms, remote-object handles,
//!   and preload scripts, owned centrally and referenced by opaque ids
//! - **Processors** - per-domain command handlers (`session.*`,
//!   `browsingContext.*`, `script.*`, `input.*`, `cdp.*`)
//! - **EventManager** - subscription bookkeeping plus buffering of lifecycle
//!   events for contexts nobody subscribed to yet
//!
//! ## Quick Start
//!
//! The embedder owns the transports and hands the mediator channel
//! endpoints plus the id of its own hosting tab:
//!
//! ```rust,no_run
//! use strait::{Mediator, MediatorConfig};
//! use tokio::sync::mpsc;
//!
//! # async fn run() -> strait::Result<()> {
//! let (bidi_out_tx, bidi_out_rx) = mpsc::unbounded_channel();
//! let (bidi_in_tx, bidi_in_rx) = mpsc::unbounded_channel();
//! let (cdp_out_tx, cdp_out_rx) = mpsc::unbounded_channel();
//! let (cdp_in_tx, cdp_in_rx) = mpsc::unbounded_channel();
//!
//! // cdp_out_rx drains toward the browser, cdp_in_tx is fed from it;
//! // bidi_in_tx is fed from the client, bidi_out_rx drains toward it.
//! # drop((bidi_out_rx, cdp_out_rx, cdp_in_tx, bidi_in_tx));
//!
//! let config = MediatorConfig {
//!     self_target_id: "SELF_TARGET".to_string(),
//! };
//! Mediator::new(config, bidi_out_tx, cdp_out_tx, cdp_in_rx)
//!     .run(bidi_in_rx)
//!     .await
//! # }
//! ```

pub mod cdp;
pub mod context;
pub mod core;
pub mod error;
pub mod events;
pub mod log;
pub mod mediator;
pub mod processor;
pub mod protocol;
pub mod realm;
pub mod storage;
pub mod target;

// Re-exports
pub use error::{Error, Result};
pub use mediator::{Mediator, MediatorConfig};
