//! Engine facade: the interface the chat transport talks to.
//!
//! Wires the ledger, card catalog, lobby, and scheduler together, and owns
//! the lobby countdown task. Every operation here returns promptly; only the
//! per-session call loops (inside the scheduler) sleep.

use crate::cards::{Card, Catalog};
use crate::config::EngineConfig;
use crate::errors::{CardError, ClaimError, LedgerError, LobbyError, MarkError};
use crate::ledger::{Ledger, LedgerEntry, Reason};
use crate::lobby::{JoinAck, Lobby};
use crate::notify::{self, NotificationSink};
use crate::scheduler::{ClaimOutcome, Randomness, Scheduler, ThreadRandomness};
use crate::session::CardStateView;
use crate::store::{AccountStore, MemoryStore};
use crate::{AccountId, SessionId};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub struct BingoEngine {
    config: Arc<EngineConfig>,
    ledger: Arc<Ledger>,
    catalog: Arc<Catalog>,
    lobby: Arc<Lobby>,
    scheduler: Arc<Scheduler>,
    sink: Arc<dyn NotificationSink>,
}

impl BingoEngine {
    /// Engine with the in-memory reference store and thread-local
    /// randomness.
    pub fn new(config: EngineConfig, sink: Arc<dyn NotificationSink>) -> Arc<Self> {
        Self::with_parts(
            config,
            sink,
            Arc::new(MemoryStore::new()),
            Arc::new(ThreadRandomness),
        )
    }

    /// Engine with explicit store and randomness backings. The store seam is
    /// where a durable transactional backing plugs in.
    pub fn with_parts(
        config: EngineConfig,
        sink: Arc<dyn NotificationSink>,
        store: Arc<dyn AccountStore>,
        rng: Arc<dyn Randomness>,
    ) -> Arc<Self> {
        let config = Arc::new(config);
        let ledger = Arc::new(Ledger::new(store, config.starting_balance));
        let catalog = Arc::new(Catalog::generate(
            config.pool_size,
            &mut rand::thread_rng(),
        ));
        let lobby = Arc::new(Lobby::new(Arc::clone(&ledger), config.card_cost));
        let scheduler = Scheduler::new(
            Arc::clone(&ledger),
            Arc::clone(&catalog),
            Arc::clone(&sink),
            rng,
            Arc::clone(&config),
        );

        Arc::new(Self {
            config,
            ledger,
            catalog,
            lobby,
            scheduler,
            sink,
        })
    }

    /// Engine with a pre-built catalog, for deterministic fixtures.
    pub fn with_catalog(
        config: EngineConfig,
        sink: Arc<dyn NotificationSink>,
        catalog: Catalog,
        rng: Arc<dyn Randomness>,
    ) -> Arc<Self> {
        let config = Arc::new(config);
        let ledger = Arc::new(Ledger::new(
            Arc::new(MemoryStore::new()),
            config.starting_balance,
        ));
        let catalog = Arc::new(catalog);
        let lobby = Arc::new(Lobby::new(Arc::clone(&ledger), config.card_cost));
        let scheduler = Scheduler::new(
            Arc::clone(&ledger),
            Arc::clone(&catalog),
            Arc::clone(&sink),
            rng,
            Arc::clone(&config),
        );

        Arc::new(Self {
            config,
            ledger,
            catalog,
            lobby,
            scheduler,
            sink,
        })
    }

    /// Buy a card and enter the lobby. The first join since the last drain
    /// arms the fixed countdown and spawns the countdown task.
    pub fn join_lobby(
        self: &Arc<Self>,
        account: AccountId,
        card_id: u32,
    ) -> Result<JoinAck, LobbyError> {
        // Validate at the boundary; an invalid id never reaches the ledger.
        self.catalog.lookup(card_id)?;

        let ack = self.lobby.join(account, card_id)?;
        if ack.countdown_started {
            self.spawn_countdown();
        }
        Ok(ack)
    }

    fn spawn_countdown(self: &Arc<Self>) {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let mut remaining = engine.config.countdown_secs;
            while remaining > 0 {
                notify::broadcast_countdown_tick(
                    engine.sink.as_ref(),
                    &engine.lobby.waiting(),
                    remaining,
                )
                .await;
                tokio::time::sleep(Duration::from_secs(1)).await;
                remaining -= 1;
            }
            let entries = engine.lobby.drain();
            engine.scheduler.open_session(entries);
        });
    }

    pub async fn claim_win(
        &self,
        session_id: SessionId,
        account: &AccountId,
    ) -> Result<ClaimOutcome, ClaimError> {
        self.scheduler.claim(session_id, account).await
    }

    pub fn toggle_mark(
        &self,
        session_id: SessionId,
        account: &AccountId,
        col: usize,
        row: usize,
    ) -> Result<CardStateView, MarkError> {
        self.scheduler.toggle_mark(session_id, account, col, row)
    }

    pub fn get_balance(&self, account: &AccountId) -> u64 {
        self.ledger.balance(account)
    }

    /// Privileged balance adjustment; the caller authenticates the admin
    /// identity externally. Accepts a signed amount so support can correct
    /// both ways; a negative adjustment still cannot overdraw.
    pub fn admin_credit(
        &self,
        account: &AccountId,
        amount: i64,
        reason: Reason,
    ) -> Result<u64, LedgerError> {
        info!(%account, amount, ?reason, "admin balance adjustment");
        self.ledger.apply(account, amount, reason, "admin adjustment")
    }

    pub fn transaction_history(&self, account: &AccountId, limit: usize) -> Vec<LedgerEntry> {
        self.ledger.history(account, limit)
    }

    /// Card layout for the transport's grid rendering.
    pub fn card_preview(&self, card_id: u32) -> Result<Card, CardError> {
        self.catalog.lookup(card_id).cloned()
    }

    pub fn live_session_ids(&self) -> Vec<SessionId> {
        self.scheduler.live_session_ids()
    }

    /// The player's current card view within a live session.
    pub fn card_state(&self, session_id: SessionId, account: &AccountId) -> Option<CardStateView> {
        self.scheduler
            .session(session_id)
            .and_then(|session| session.card_view(account))
    }

    pub fn lobby_size(&self) -> usize {
        self.lobby.len()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Abort call loops on shutdown.
    pub fn shutdown(&self) {
        self.scheduler.shutdown();
    }
}
