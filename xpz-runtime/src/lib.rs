//! # xpz-runtime: async driver for the XPZ engine
//!
//! Connects the synchronous core to a chat platform:
//!
//! ```text
//!  platform events ──▶ XpEngine ──▶ Ledger / SessionTracker (xpz-core)
//!                        │   ▲
//!                        │   └── Directory (voice state, head counts)
//!                        ▼
//!                   EffectQueue ──▶ EffectWorker ──▶ RoleGateway / NotificationSink
//!
//!  VoiceTicker ── every N s ──▶ XpEngine::voice_tick
//! ```
//!
//! ## Modules
//!
//! - `engine`: text and voice handling, grants, prestige, admin, reads
//! - `commands`: rank, leaderboard, prestige and admin command replies
//! - `effects`: bounded side-effect queue and its worker
//! - `ticker`: the cancellable voice sweep loop
//! - `ports`: traits the platform adapter implements
//! - `telemetry`: tracing subscriber setup

#![deny(clippy::unwrap_used)]
#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod clock;
pub mod commands;
pub mod effects;
pub mod engine;
pub mod events;
pub mod notify;
pub mod ports;
pub mod telemetry;
pub mod ticker;

pub use clock::{Clock, ManualClock, SystemClock};
pub use effects::{Effect, EffectQueue, EffectWorker};
pub use engine::{LeaderboardEntry, RankCard, TextOutcome, VoiceTickReport, XpEngine};
pub use events::{TextEvent, VoiceStateChange};
pub use ports::{Directory, Notification, NotificationSink, PortError, RoleGateway};
pub use ticker::VoiceTicker;
