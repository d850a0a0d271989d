//! Safety Rating tracker for F1 2019 UDP telemetry.
//!
//! srtrack listens to the game's UDP feed, detects race sessions, counts corners and
//! incidents for the player car, and keeps a rolling safety rating with a license class.
//! Sessions, incidents and the lifetime profile are persisted to SQLite and served over a
//! small read API.
//!
//! # Pipeline
//!
//! ```text
//! TelemetrySource -> decode -> SessionManager -> RatingEngine -> SyncScheduler -> SyncWriter -> Store
//!                                                     |                                          |
//!                                               RatingSnapshot (watch)                       ReadApi
//! ```
//!
//! One sequential loop owns everything up to the scheduler. Readers only ever see
//! immutable [`RatingSnapshot`]s or committed store rows.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use futures::StreamExt;
//! use srtrack::{LoopConfig, SqliteStore, Tracker, UpdateRate};
//!
//! #[tokio::main]
//! async fn main() -> srtrack::Result<()> {
//!     let store = Arc::new(SqliteStore::open("srtrack.db")?);
//!     let addr = "0.0.0.0:20777".parse().expect("valid address");
//!     let tracker = Tracker::listen(addr, store, LoopConfig::default()).await?;
//!
//!     let mut updates = tracker.subscribe(UpdateRate::Max(10));
//!     while let Some(snapshot) = updates.next().await {
//!         println!("SR {:.2} {}", snapshot.rating, snapshot.license);
//!     }
//!     Ok(())
//! }
//! ```

mod error;
#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;
pub mod types;

pub mod api;
pub mod config;
pub mod driver;
pub mod http;
pub mod overlay;
pub mod packet;
pub mod rating;
pub mod session;
pub mod source;
pub mod store;
pub mod stream;
pub mod sync;
pub mod tracker;

pub use error::*;
pub use types::*;

pub use api::ReadApi;
pub use config::Config;
pub use driver::{Command, Driver, LoopConfig, LoopSummary};
pub use packet::{Decoder, decode};
pub use rating::{RatingConfig, RatingEngine};
pub use session::{SessionConfig, SessionEvent, SessionManager};
pub use source::{Pacing, ReplaySource, TelemetrySource, UdpSource};
pub use store::{SqliteStore, Store};
pub use sync::SyncConfig;
pub use tracker::Tracker;
