//! One running round: roster, per-player card state, call history, and the
//! pure rules for win detection and covert settlement.
//!
//! Cells are three-state: `Called` means the number has been announced and is
//! eligible for marking, `Marked` means the player toggled it. The win
//! predicate only looks at `Marked` cells.

use crate::cards::{Card, Catalog, GRID};
use crate::errors::MarkError;
use crate::lobby::LobbyEntry;
use crate::{AccountId, SessionId};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use uuid::Uuid;

/// Per-cell call/mark status.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CellMark {
    Unmarked,
    Called,
    Marked,
}

/// Session lifecycle. `Settled` is terminal; the scheduler removes the
/// session from the live set in the same step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Forming,
    Running,
    Settled,
}

/// One player's per-session view of their assigned card.
#[derive(Clone, Debug)]
pub struct CardState {
    card: Card,
    marks: [[CellMark; GRID]; GRID],
}

/// Serializable rendering of a card state for the transport layer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CardStateView {
    pub card_id: u32,
    pub cells: [[CellView; GRID]; GRID],
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct CellView {
    pub value: u8,
    pub mark: CellMark,
}

impl CardState {
    /// Deal a card: everything unmarked except the wildcard, which starts
    /// (and stays) marked.
    pub fn deal(card: Card) -> Self {
        let mut marks = [[CellMark::Unmarked; GRID]; GRID];
        marks[GRID / 2][GRID / 2] = CellMark::Marked;
        Self { card, marks }
    }

    pub fn card(&self) -> &Card {
        &self.card
    }

    pub fn mark_at(&self, col: usize, row: usize) -> CellMark {
        self.marks[col][row]
    }

    /// Record an announced number: `Unmarked -> Called`. A cell the player
    /// already marked stays marked. Returns whether the card holds the
    /// number.
    pub fn record_call(&mut self, number: u8) -> bool {
        match self.card.position_of(number) {
            Some((col, row)) => {
                if self.marks[col][row] == CellMark::Unmarked {
                    self.marks[col][row] = CellMark::Called;
                }
                true
            }
            None => false,
        }
    }

    /// Flip a cell between `Called` and `Marked`. A never-called cell is
    /// rejected without side effect; the wildcard is a legal no-op.
    pub fn toggle(&mut self, col: usize, row: usize) -> Result<(), MarkError> {
        if col >= GRID || row >= GRID {
            return Err(MarkError::OutOfBounds { col, row });
        }
        if Card::is_wildcard(col, row) {
            return Ok(());
        }
        match self.marks[col][row] {
            CellMark::Unmarked => Err(MarkError::CellNotCalled { col, row }),
            CellMark::Called => {
                self.marks[col][row] = CellMark::Marked;
                Ok(())
            }
            CellMark::Marked => {
                self.marks[col][row] = CellMark::Called;
                Ok(())
            }
        }
    }

    /// Win predicate: any full row, any full column, or either diagonal with
    /// every cell marked. The wildcard counts as permanently marked.
    pub fn has_win(&self) -> bool {
        let marked = |col: usize, row: usize| self.marks[col][row] == CellMark::Marked;

        for i in 0..GRID {
            if (0..GRID).all(|row| marked(i, row)) {
                return true; // column
            }
            if (0..GRID).all(|col| marked(col, i)) {
                return true; // row
            }
        }
        (0..GRID).all(|i| marked(i, i)) || (0..GRID).all(|i| marked(i, GRID - 1 - i))
    }

    pub fn view(&self) -> CardStateView {
        let mut cells = [[CellView {
            value: 0,
            mark: CellMark::Unmarked,
        }; GRID]; GRID];
        for col in 0..GRID {
            for row in 0..GRID {
                cells[col][row] = CellView {
                    value: self.card.value_at(col, row),
                    mark: self.marks[col][row],
                };
            }
        }
        CardStateView {
            card_id: self.card.id(),
            cells,
        }
    }
}

/// Pure covert-win rule, isolated so the randomness source is injectable:
/// once at least `min_calls` numbers are out, each call wins for the house
/// with probability `probability`.
pub fn should_covert_win_now(
    call_count: usize,
    draw: f64,
    min_calls: usize,
    probability: f64,
) -> bool {
    call_count >= min_calls && draw < probability
}

/// One complete round from roster lock to settlement. Owned exclusively by
/// the scheduler for its lifetime.
pub struct Session {
    pub id: SessionId,
    roster: Vec<AccountId>,
    /// House sentinel when the real roster is under the organic-play
    /// threshold; `None` means real claims settle immediately.
    covert_winner: Option<AccountId>,
    cards: DashMap<AccountId, CardState>,
    calls: Mutex<Vec<u8>>,
    phase: Mutex<Phase>,
}

impl Session {
    /// Forming: deal each entry its chosen card and decide covert mode. Small
    /// sessions would pay real money from an undersized pool, so the win is
    /// silently reserved for the house while the game still plays out
    /// visibly.
    pub fn form(entries: &[LobbyEntry], catalog: &Catalog, organic_threshold: usize) -> Self {
        let roster: Vec<AccountId> = entries.iter().map(|e| e.account.clone()).collect();
        let cards = DashMap::new();
        for entry in entries {
            // Card ids were validated at join time; an unknown id here means
            // the catalog shrank, which cannot happen after generation.
            if let Ok(card) = catalog.lookup(entry.card_id) {
                cards.insert(entry.account.clone(), CardState::deal(card.clone()));
            }
        }

        let covert_winner = if roster.len() < organic_threshold {
            Some(AccountId::house())
        } else {
            None
        };

        Self {
            id: Uuid::new_v4(),
            roster,
            covert_winner,
            cards,
            calls: Mutex::new(Vec::new()),
            phase: Mutex::new(Phase::Forming),
        }
    }

    pub fn roster(&self) -> &[AccountId] {
        &self.roster
    }

    pub fn is_covert(&self) -> bool {
        self.covert_winner.is_some()
    }

    pub fn covert_winner(&self) -> Option<&AccountId> {
        self.covert_winner.as_ref()
    }

    pub fn phase(&self) -> Phase {
        *self.phase.lock().expect("session phase lock poisoned")
    }

    pub fn set_phase(&self, phase: Phase) {
        *self.phase.lock().expect("session phase lock poisoned") = phase;
    }

    /// Record one announced number on the call history and every card that
    /// holds it. Per-card mutation goes through the map entry, serializing
    /// against concurrent mark toggles on the same card.
    pub fn record_call(&self, number: u8) {
        self.calls
            .lock()
            .expect("session call history lock poisoned")
            .push(number);
        for mut entry in self.cards.iter_mut() {
            entry.value_mut().record_call(number);
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls
            .lock()
            .expect("session call history lock poisoned")
            .len()
    }

    /// The most recent `limit` calls, oldest first.
    pub fn recent_calls(&self, limit: usize) -> Vec<u8> {
        let calls = self
            .calls
            .lock()
            .expect("session call history lock poisoned");
        let skip = calls.len().saturating_sub(limit);
        calls[skip..].to_vec()
    }

    /// Toggle one cell of a player's card. Serialized per card state against
    /// the call loop.
    pub fn toggle_mark(
        &self,
        account: &AccountId,
        col: usize,
        row: usize,
    ) -> Result<CardStateView, MarkError> {
        let mut state = self
            .cards
            .get_mut(account)
            .ok_or_else(|| MarkError::NotInSession {
                session_id: self.id,
                account: account.clone(),
            })?;
        state.toggle(col, row)?;
        Ok(state.view())
    }

    /// Does this player's marked pattern satisfy the win predicate?
    pub fn player_has_win(&self, account: &AccountId) -> Option<bool> {
        self.cards.get(account).map(|state| state.has_win())
    }

    pub fn card_view(&self, account: &AccountId) -> Option<CardStateView> {
        self.cards.get(account).map(|state| state.view())
    }
}
