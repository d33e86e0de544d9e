//! FIFO lobby: players who have paid for a card and are waiting for the next
//! session.
//!
//! The join-check-debit-enqueue sequence runs as one unit under the lobby
//! lock so two concurrent joins cannot both pass a balance check only one can
//! satisfy, and the countdown is armed exactly once per fill cycle.

use crate::errors::LobbyError;
use crate::ledger::{Ledger, Reason};
use crate::AccountId;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use tracing::info;

/// One paid-up waiting player.
#[derive(Clone, Debug)]
pub struct LobbyEntry {
    pub account: AccountId,
    pub card_id: u32,
    pub joined_at: DateTime<Utc>,
}

/// Successful admission receipt.
#[derive(Clone, Debug)]
pub struct JoinAck {
    /// FIFO position, 1-based.
    pub position: usize,
    pub new_balance: u64,
    /// True for the entry that armed the countdown; the caller owns spawning
    /// the countdown task exactly once.
    pub countdown_started: bool,
}

struct LobbyInner {
    entries: Vec<LobbyEntry>,
    countdown_armed: bool,
}

pub struct Lobby {
    inner: Mutex<LobbyInner>,
    ledger: Arc<Ledger>,
    card_cost: u64,
}

impl Lobby {
    pub fn new(ledger: Arc<Ledger>, card_cost: u64) -> Self {
        Self {
            inner: Mutex::new(LobbyInner {
                entries: Vec::new(),
                countdown_armed: false,
            }),
            ledger,
            card_cost,
        }
    }

    /// Admit a player: reject a duplicate entry, debit the card cost
    /// atomically (a shortfall fails with `InsufficientBalance` and no state
    /// change), enqueue, and arm the fixed countdown if this is the first
    /// entry since the last drain. The countdown is not reset by later
    /// joins.
    pub fn join(&self, account: AccountId, card_id: u32) -> Result<JoinAck, LobbyError> {
        let mut inner = self.inner.lock().expect("lobby lock poisoned");

        if inner.entries.iter().any(|entry| entry.account == account) {
            return Err(LobbyError::AlreadyQueued);
        }

        let new_balance = self.ledger.apply(
            &account,
            -(self.card_cost as i64),
            Reason::CardPurchase,
            &format!("bingo card #{}", card_id),
        )?;

        inner.entries.push(LobbyEntry {
            account: account.clone(),
            card_id,
            joined_at: Utc::now(),
        });
        let position = inner.entries.len();

        let countdown_started = !inner.countdown_armed;
        if countdown_started {
            inner.countdown_armed = true;
            info!(%account, "lobby countdown armed");
        }

        Ok(JoinAck {
            position,
            new_balance,
            countdown_started,
        })
    }

    /// Atomically empty the lobby and disarm the countdown. Called once per
    /// countdown expiry, by the scheduler path only. An empty drain is a
    /// no-op for the caller.
    pub fn drain(&self) -> Vec<LobbyEntry> {
        let mut inner = self.inner.lock().expect("lobby lock poisoned");
        inner.countdown_armed = false;
        std::mem::take(&mut inner.entries)
    }

    /// Accounts currently waiting, FIFO order.
    pub fn waiting(&self) -> Vec<AccountId> {
        self.inner
            .lock()
            .expect("lobby lock poisoned")
            .entries
            .iter()
            .map(|entry| entry.account.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("lobby lock poisoned").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
