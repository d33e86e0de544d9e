//! Session scheduler: creates sessions from drained lobbies, drives each
//! session's call loop on its own task, and dispatches settlement back to the
//! ledger.
//!
//! Settlement is exactly-once: atomic removal from the live-session set is
//! the serialization point, and every other path observing the removal gets
//! `SessionNotFound`. The call loop is the only construct here that sleeps;
//! after every wake it re-checks that its session is still live and exits
//! cleanly if a concurrent claim settled it.

use crate::cards::{Catalog, MAX_NUMBER};
use crate::config::EngineConfig;
use crate::errors::{ClaimError, MarkError, SettleError};
use crate::ledger::{Ledger, Reason};
use crate::lobby::LobbyEntry;
use crate::notify::{self, NotificationSink, SettledOutcome};
use crate::session::{should_covert_win_now, CardStateView, Phase, Session};
use crate::{AccountId, SessionId};
use dashmap::DashMap;
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Randomness seam: the full draw order and the covert-rule draws are
/// injected so the call loop is testable.
pub trait Randomness: Send + Sync {
    /// All 75 numbers in call order, fixed at loop start.
    fn draw_pool(&self) -> Vec<u8>;

    /// Uniform draw in `[0, 1)` for the covert-win rule.
    fn unit(&self) -> f64;
}

/// Production source backed by the thread-local generator.
pub struct ThreadRandomness;

impl Randomness for ThreadRandomness {
    fn draw_pool(&self) -> Vec<u8> {
        let mut pool: Vec<u8> = (1..=MAX_NUMBER).collect();
        pool.shuffle(&mut rand::thread_rng());
        pool
    }

    fn unit(&self) -> f64 {
        rand::thread_rng().gen::<f64>()
    }
}

/// Deterministic source for tests: a fixed pool order and scripted unit
/// draws (falling back to 1.0, which never fires the covert rule).
pub struct ScriptedRandomness {
    pool: Vec<u8>,
    draws: Mutex<VecDeque<f64>>,
}

impl ScriptedRandomness {
    pub fn new(pool: Vec<u8>, draws: Vec<f64>) -> Self {
        Self {
            pool,
            draws: Mutex::new(draws.into()),
        }
    }

    /// Full pool beginning with `prefix`, followed by every other number in
    /// ascending order.
    pub fn pool_starting_with(prefix: &[u8]) -> Vec<u8> {
        let mut pool = prefix.to_vec();
        pool.extend((1..=MAX_NUMBER).filter(|n| !prefix.contains(n)));
        pool
    }
}

impl Randomness for ScriptedRandomness {
    fn draw_pool(&self) -> Vec<u8> {
        self.pool.clone()
    }

    fn unit(&self) -> f64 {
        self.draws
            .lock()
            .expect("scripted draws lock poisoned")
            .pop_front()
            .unwrap_or(1.0)
    }
}

/// How a session ended.
#[derive(Clone, Debug)]
pub enum WinPath {
    Player(AccountId),
    House,
    Void,
}

/// Result of a win claim as reported to the claimant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// Authoritative win, settled and credited.
    Won { prize: u64 },
    /// Covert session: acknowledged but not settled.
    PendingVerification,
}

pub struct Scheduler {
    live: DashMap<SessionId, Arc<Session>>,
    tasks: DashMap<SessionId, JoinHandle<()>>,
    ledger: Arc<Ledger>,
    catalog: Arc<Catalog>,
    sink: Arc<dyn NotificationSink>,
    rng: Arc<dyn Randomness>,
    config: Arc<EngineConfig>,
}

impl Scheduler {
    pub fn new(
        ledger: Arc<Ledger>,
        catalog: Arc<Catalog>,
        sink: Arc<dyn NotificationSink>,
        rng: Arc<dyn Randomness>,
        config: Arc<EngineConfig>,
    ) -> Arc<Self> {
        Arc::new(Self {
            live: DashMap::new(),
            tasks: DashMap::new(),
            ledger,
            catalog,
            sink,
            rng,
            config,
        })
    }

    /// Create a session from drained lobby entries and start its call loop.
    /// An empty drain produces no session.
    pub fn open_session(self: &Arc<Self>, entries: Vec<LobbyEntry>) -> Option<SessionId> {
        if entries.is_empty() {
            debug!("countdown expired with an empty lobby; nothing to start");
            return None;
        }

        let session = Arc::new(Session::form(
            &entries,
            &self.catalog,
            self.config.organic_threshold,
        ));
        let session_id = session.id;
        session.set_phase(Phase::Running);
        self.live.insert(session_id, Arc::clone(&session));

        info!(
            session = %session_id,
            roster = session.roster().len(),
            covert = session.is_covert(),
            "session started"
        );

        let scheduler = Arc::clone(self);
        let handle = tokio::spawn(async move {
            scheduler.run_call_loop(session).await;
        });
        self.tasks.insert(session_id, handle);

        Some(session_id)
    }

    /// The call loop: the full draw order is fixed at loop start, one number
    /// is announced per interval, and the covert rule is checked after each
    /// announcement.
    async fn run_call_loop(self: Arc<Self>, session: Arc<Session>) {
        let interval = Duration::from_millis(self.config.call_interval_ms);
        let pool = self.rng.draw_pool();

        for number in pool {
            // A concurrent claim may have settled the session while we
            // slept.
            if !self.live.contains_key(&session.id) {
                debug!(session = %session.id, "session settled concurrently; call loop exiting");
                return;
            }

            session.record_call(number);
            let recent = session.recent_calls(self.config.recent_history);
            notify::broadcast_number(
                self.sink.as_ref(),
                session.roster(),
                session.id,
                number,
                &recent,
            )
            .await;

            if session.is_covert()
                && should_covert_win_now(
                    session.call_count(),
                    self.rng.unit(),
                    self.config.covert_min_calls,
                    self.config.covert_win_probability,
                )
            {
                if let Err(e) = self.settle(session.id, WinPath::House).await {
                    warn!(
                        "{}",
                        SettleError::ConcurrentSettlementConflict(session.id)
                    );
                    debug!(session = %session.id, "covert settle lost the race: {}", e);
                }
                return;
            }

            tokio::time::sleep(interval).await;
        }

        // Pool exhausted with nobody having won: a defined terminal outcome,
        // not an error. Resources are released and the roster is notified.
        match self.settle(session.id, WinPath::Void).await {
            Ok(_) => info!(session = %session.id, "session void: draw pool exhausted"),
            Err(e) => debug!(session = %session.id, "void settle lost the race: {}", e),
        }
    }

    /// Player win claim. In a covert session a valid pattern is acknowledged
    /// as pending verification but the house still wins via the call loop's
    /// probabilistic rule; otherwise a valid pattern settles immediately.
    pub async fn claim(
        &self,
        session_id: SessionId,
        account: &AccountId,
    ) -> Result<ClaimOutcome, ClaimError> {
        let session = self
            .live
            .get(&session_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(ClaimError::SessionNotFound(session_id))?;

        let has_win = session
            .player_has_win(account)
            .ok_or_else(|| ClaimError::NotInSession {
                session_id,
                account: account.clone(),
            })?;
        if !has_win {
            return Err(ClaimError::InvalidClaim);
        }

        if session.is_covert() {
            info!(session = %session_id, %account, "valid claim held for verification (covert session)");
            return Ok(ClaimOutcome::PendingVerification);
        }

        match self.settle(session_id, WinPath::Player(account.clone())).await {
            Ok(outcome) => Ok(ClaimOutcome::Won {
                prize: outcome.prize(),
            }),
            // Settled between our lookup and the removal.
            Err(_) => Err(ClaimError::SessionNotFound(session_id)),
        }
    }

    /// Toggle one cell of the claimant's card. Never blocks on the call
    /// loop.
    pub fn toggle_mark(
        &self,
        session_id: SessionId,
        account: &AccountId,
        col: usize,
        row: usize,
    ) -> Result<CardStateView, MarkError> {
        let session = self
            .live
            .get(&session_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(MarkError::SessionNotFound(session_id))?;
        session.toggle_mark(account, col, row)
    }

    /// Exactly-once settlement. The session is removed from the live set
    /// before any payout, so a concurrent claim or loop tick arriving later
    /// observes `SessionNotFound` rather than re-settling.
    pub async fn settle(
        &self,
        session_id: SessionId,
        path: WinPath,
    ) -> Result<SettledOutcome, SettleError> {
        let (_, session) = self
            .live
            .remove(&session_id)
            .ok_or(SettleError::SessionNotFound(session_id))?;
        session.set_phase(Phase::Settled);
        self.tasks.remove(&session_id);

        let outcome = match path {
            WinPath::Player(winner) => {
                let prize = self.prize(session.roster().len());
                if prize > 0 {
                    if let Err(e) =
                        self.ledger
                            .apply(&winner, prize as i64, Reason::BingoWin, "bingo prize")
                    {
                        // A credit cannot fail for balance reasons; log and
                        // keep the settlement terminal.
                        warn!(session = %session_id, %winner, "prize credit failed: {}", e);
                    }
                }
                SettledOutcome::PlayerWin { winner, prize }
            }
            WinPath::House => SettledOutcome::HouseWin,
            WinPath::Void => SettledOutcome::Void,
        };

        info!(
            session = %session_id,
            winner = %outcome.winner_display(),
            prize = outcome.prize(),
            "session settled"
        );
        notify::broadcast_settled(self.sink.as_ref(), session.roster(), session_id, &outcome)
            .await;

        Ok(outcome)
    }

    /// Winner share of the pot: roster x card cost x payout percent,
    /// truncating; the remainder is house margin.
    fn prize(&self, roster_size: usize) -> u64 {
        roster_size as u64 * self.config.card_cost * self.config.payout_percent / 100
    }

    pub fn live_session_ids(&self) -> Vec<SessionId> {
        self.live.iter().map(|entry| *entry.key()).collect()
    }

    pub fn session(&self, session_id: SessionId) -> Option<Arc<Session>> {
        self.live
            .get(&session_id)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Abort all call loops and drop live sessions. Demo/shutdown path only;
    /// settlement state already paid out stays paid out.
    pub fn shutdown(&self) {
        for entry in self.tasks.iter() {
            entry.value().abort();
        }
        self.tasks.clear();
        self.live.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cards::Card;
    use crate::lobby::LobbyEntry;
    use crate::notify::RecordingSink;
    use crate::store::MemoryStore;
    use chrono::Utc;

    fn fixture_card() -> Card {
        Card::from_columns(
            1,
            [
                [1, 2, 3, 4, 5],
                [16, 17, 18, 19, 20],
                [31, 32, 33, 34, 35],
                [46, 47, 48, 49, 50],
                [61, 62, 63, 64, 65],
            ],
        )
    }

    fn entries(names: &[&str]) -> Vec<LobbyEntry> {
        names
            .iter()
            .map(|name| LobbyEntry {
                account: AccountId::from(*name),
                card_id: 1,
                joined_at: Utc::now(),
            })
            .collect()
    }

    fn test_scheduler(
        rng: Arc<dyn Randomness>,
        config: EngineConfig,
    ) -> (Arc<Scheduler>, Arc<Ledger>, Arc<RecordingSink>) {
        let ledger = Arc::new(Ledger::new(
            Arc::new(MemoryStore::new()),
            config.starting_balance,
        ));
        let catalog = Arc::new(Catalog::from_cards(vec![fixture_card()]));
        let sink = Arc::new(RecordingSink::new());
        let scheduler = Scheduler::new(
            Arc::clone(&ledger),
            catalog,
            sink.clone(),
            rng,
            Arc::new(config),
        );
        (scheduler, ledger, sink)
    }

    fn quiet_config() -> EngineConfig {
        // Long call interval keeps the loop out of the way of direct tests.
        EngineConfig {
            call_interval_ms: 60_000,
            ..EngineConfig::default()
        }
    }

    #[test]
    fn test_pool_starting_with() {
        let pool = ScriptedRandomness::pool_starting_with(&[1, 16, 31, 46, 61]);
        assert_eq!(pool.len(), 75);
        assert_eq!(&pool[..5], &[1, 16, 31, 46, 61]);
        let distinct: std::collections::HashSet<u8> = pool.iter().copied().collect();
        assert_eq!(distinct.len(), 75);
    }

    #[tokio::test]
    async fn test_empty_drain_opens_no_session() {
        let rng = Arc::new(ScriptedRandomness::new(
            ScriptedRandomness::pool_starting_with(&[]),
            vec![],
        ));
        let (scheduler, _, _) = test_scheduler(rng, quiet_config());
        assert!(scheduler.open_session(Vec::new()).is_none());
        assert!(scheduler.live_session_ids().is_empty());
    }

    #[tokio::test]
    async fn test_settle_is_exactly_once() {
        let rng = Arc::new(ScriptedRandomness::new(
            ScriptedRandomness::pool_starting_with(&[]),
            vec![],
        ));
        let (scheduler, ledger, _) = test_scheduler(rng, quiet_config());

        let roster = ["a", "b", "c", "d", "e", "f"];
        let session_id = scheduler.open_session(entries(&roster)).unwrap();
        let winner = AccountId::from("a");

        let first = scheduler
            .settle(session_id, WinPath::Player(winner.clone()))
            .await
            .unwrap();
        // 6 x 100 x 85%
        assert_eq!(first.prize(), 510);

        let second = scheduler
            .settle(session_id, WinPath::Player(winner.clone()))
            .await;
        assert!(matches!(second, Err(SettleError::SessionNotFound(_))));

        // Exactly one credit.
        assert_eq!(ledger.balance(&winner), 1_000 + 510);
        let wins: Vec<_> = ledger
            .history(&winner, usize::MAX)
            .into_iter()
            .filter(|entry| entry.reason == Reason::BingoWin)
            .collect();
        assert_eq!(wins.len(), 1);
    }

    #[tokio::test]
    async fn test_house_settlement_credits_nobody() {
        let rng = Arc::new(ScriptedRandomness::new(
            ScriptedRandomness::pool_starting_with(&[]),
            vec![],
        ));
        let (scheduler, ledger, sink) = test_scheduler(rng, quiet_config());

        let session_id = scheduler.open_session(entries(&["a", "b", "c"])).unwrap();
        let outcome = scheduler.settle(session_id, WinPath::House).await.unwrap();
        assert_eq!(outcome, SettledOutcome::HouseWin);
        assert_eq!(outcome.prize(), 0);

        for name in ["a", "b", "c"] {
            assert_eq!(ledger.balance(&AccountId::from(name)), 1_000);
        }

        // Outcome broadcast reaches the whole roster regardless of win path.
        let settled: Vec<_> = sink
            .events()
            .into_iter()
            .filter(|event| matches!(event, crate::notify::SinkEvent::SessionSettled { .. }))
            .collect();
        assert_eq!(settled.len(), 3);
    }

    #[tokio::test]
    async fn test_claim_on_unknown_session() {
        let rng = Arc::new(ScriptedRandomness::new(
            ScriptedRandomness::pool_starting_with(&[]),
            vec![],
        ));
        let (scheduler, _, _) = test_scheduler(rng, quiet_config());

        let missing = uuid::Uuid::new_v4();
        let result = scheduler.claim(missing, &AccountId::from("a")).await;
        assert!(matches!(result, Err(ClaimError::SessionNotFound(_))));

        let toggled = scheduler.toggle_mark(missing, &AccountId::from("a"), 0, 0);
        assert!(matches!(toggled, Err(MarkError::SessionNotFound(_))));
    }

    #[tokio::test]
    async fn test_claim_without_pattern_rejected() {
        let rng = Arc::new(ScriptedRandomness::new(
            ScriptedRandomness::pool_starting_with(&[]),
            vec![],
        ));
        let (scheduler, _, _) = test_scheduler(rng, quiet_config());

        let session_id = scheduler
            .open_session(entries(&["a", "b", "c", "d", "e", "f"]))
            .unwrap();

        let result = scheduler.claim(session_id, &AccountId::from("a")).await;
        assert!(matches!(result, Err(ClaimError::InvalidClaim)));

        let stranger = scheduler.claim(session_id, &AccountId::from("zz")).await;
        assert!(matches!(stranger, Err(ClaimError::NotInSession { .. })));
    }

    #[tokio::test]
    async fn test_call_loop_never_repeats_and_voids_on_exhaustion() {
        let config = EngineConfig {
            call_interval_ms: 0,
            ..EngineConfig::default()
        };
        // Draws of 1.0 never fire the covert rule, so the pool exhausts.
        let rng = Arc::new(ScriptedRandomness::new(
            ScriptedRandomness::pool_starting_with(&[]),
            vec![],
        ));
        let (scheduler, ledger, sink) = test_scheduler(rng, config);

        scheduler.open_session(entries(&["solo"])).unwrap();

        // Wait for the void settlement broadcast.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let settled = sink.events().into_iter().any(|event| {
                matches!(
                    event,
                    crate::notify::SinkEvent::SessionSettled {
                        outcome: SettledOutcome::Void,
                        ..
                    }
                )
            });
            if settled {
                break;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "void settlement never arrived"
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        // Exactly 75 distinct calls, in one order, as seen by the player.
        let solo = AccountId::from("solo");
        let numbers: Vec<u8> = sink
            .events()
            .into_iter()
            .filter_map(|event| match event {
                crate::notify::SinkEvent::NumberCalled {
                    recipient, number, ..
                } if recipient == solo => Some(number),
                _ => None,
            })
            .collect();
        assert_eq!(numbers.len(), 75);
        let distinct: std::collections::HashSet<u8> = numbers.iter().copied().collect();
        assert_eq!(distinct.len(), 75);

        // Void pays nothing and refunds nothing.
        assert_eq!(ledger.balance(&solo), 1_000);
        assert!(scheduler.live_session_ids().is_empty());
    }
}
