//! Error taxonomy for the bingo engine.
//!
//! Validation failures are rejected at the boundary with a specific reason and
//! never reach ledger or session state. Delivery failures are per-recipient
//! and non-fatal.

use crate::{AccountId, SessionId};
use thiserror::Error;

/// Ledger transaction errors
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("insufficient balance: have {balance}, need {required}")]
    InsufficientBalance { balance: u64, required: u64 },

    #[error("invalid transaction amount: {0}")]
    InvalidAmount(i64),

    #[error("referral source already set")]
    ReferrerAlreadySet,

    #[error("account cannot refer itself")]
    SelfReferral,
}

/// Card catalog errors
#[derive(Debug, Error)]
pub enum CardError {
    #[error("invalid card id {id}: catalog holds 1..={pool_size}")]
    InvalidCardId { id: u32, pool_size: u32 },
}

/// Lobby admission errors
#[derive(Debug, Error)]
pub enum LobbyError {
    #[error("already waiting in the lobby")]
    AlreadyQueued,

    #[error(transparent)]
    Card(#[from] CardError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Win claim errors
#[derive(Debug, Error)]
pub enum ClaimError {
    #[error("session {0} not found")]
    SessionNotFound(SessionId),

    #[error("{account} has no card in session {session_id}")]
    NotInSession {
        session_id: SessionId,
        account: AccountId,
    },

    /// User-facing rejection: the marked pattern is not a win.
    #[error("no winning pattern on the card")]
    InvalidClaim,
}

/// Mark toggle errors
#[derive(Debug, Error)]
pub enum MarkError {
    #[error("session {0} not found")]
    SessionNotFound(SessionId),

    #[error("{account} has no card in session {session_id}")]
    NotInSession {
        session_id: SessionId,
        account: AccountId,
    },

    #[error("cell ({col},{row}) is outside the 5x5 grid")]
    OutOfBounds { col: usize, row: usize },

    /// Rejected silently to the acting player: the number was never called.
    #[error("cell ({col},{row}) has not been called")]
    CellNotCalled { col: usize, row: usize },
}

/// Settlement errors. `ConcurrentSettlementConflict` never surfaces to a
/// user: the race is resolved by atomic removal from the live set and the
/// loser of the race only logs it.
#[derive(Debug, Error)]
pub enum SettleError {
    #[error("session {0} not found")]
    SessionNotFound(SessionId),

    #[error("concurrent settlement conflict on session {0}")]
    ConcurrentSettlementConflict(SessionId),
}

/// Per-recipient delivery failure, non-fatal for the rest of a broadcast.
#[derive(Debug, Error)]
#[error("delivery to {recipient} failed: {reason}")]
pub struct DeliveryError {
    pub recipient: AccountId,
    pub reason: String,
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("failed to save configuration: {0}")]
    SaveFailed(String),

    #[error("invalid value for {field}: '{value}' ({reason})")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Root error type for engine operations
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("card error: {0}")]
    Card(#[from] CardError),

    #[error("lobby error: {0}")]
    Lobby(#[from] LobbyError),

    #[error("claim error: {0}")]
    Claim(#[from] ClaimError),

    #[error("mark error: {0}")]
    Mark(#[from] MarkError),

    #[error("settlement error: {0}")]
    Settle(#[from] SettleError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Convenience type alias for Results
pub type EngineResult<T> = Result<T, EngineError>;
