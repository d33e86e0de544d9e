//! Bingohall - real-money multiplayer bingo session engine
//!
//! Core of a chat-facing bingo service: per-user balances with an append-only
//! transaction log, a precomputed card catalog, a FIFO lobby with a fixed
//! countdown, synchronous number-calling sessions with win arbitration, and
//! exactly-once prize settlement. The chat transport and durable persistence
//! are external collaborators behind the [`notify::NotificationSink`] and
//! [`store::AccountStore`] seams.

use serde::{Deserialize, Serialize};
use std::fmt;

pub mod cards;
pub mod config;
pub mod engine;
pub mod errors;
pub mod ledger;
pub mod lobby;
pub mod notify;
pub mod scheduler;
pub mod session;
pub mod store;

pub use engine::BingoEngine;

/// Session identifier, unique per session and never reused.
pub type SessionId = uuid::Uuid;

/// Opaque chat-user identity.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AccountId(String);

impl AccountId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Synthetic non-player participant reserved for covert wins.
    pub fn house() -> Self {
        Self("house".to_string())
    }

    pub fn is_house(&self) -> bool {
        self.0 == "house"
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AccountId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}
