//! # XPZ Core Library
//!
//! Platform-agnostic XP and leveling engine for chat communities.
//!
//! Members earn XP from qualifying text messages and from time spent in voice
//! channels with other people. This crate holds everything that does not need
//! an async runtime:
//!
//! - [`curve`]: the quadratic leveling curve and its inverse
//! - [`filter`]: anti-farm heuristics for text events
//! - [`voice`]: voice session lifecycle and per-sweep eligibility
//! - [`award`]: prestige multiplier and level-up detection
//! - [`ledger`]: per-member serialized read-modify-write
//! - [`prestige`], [`admin`], [`rewards`]: the remaining state transitions
//! - [`persistence`]: the SQLite store
//!
//! Refusals (cooldowns, ineligible presence, prestige below the threshold)
//! are returned as values. Only storage failures are errors.

#![deny(clippy::unwrap_used)]
#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod admin;
pub mod award;
pub mod config;
pub mod curve;
pub mod error;
pub mod filter;
pub mod ledger;
pub mod metrics;
pub mod persistence;
pub mod prestige;
pub mod rewards;
pub mod store;
pub mod types;
pub mod voice;

pub use config::XpzConfig;
pub use error::{Result, XpzError};
pub use ledger::{Commit, Ledger};
pub use persistence::SqliteStore;
pub use store::{MemberStore, MemoryStore, SessionStore};
pub use types::*;
