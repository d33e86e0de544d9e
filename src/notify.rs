//! Notification sink: the boundary to the chat transport.
//!
//! The engine renders state through this trait and never depends on the
//! transport's implementation. Delivery may fail per recipient; broadcast
//! helpers log the failure and keep going so one unreachable player never
//! aborts a call sequence or a settlement announcement.

use crate::errors::DeliveryError;
use crate::{AccountId, SessionId};
use async_trait::async_trait;
use std::sync::Mutex;
use tracing::{info, warn};

/// Outcome of a settled session as announced to the roster.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SettledOutcome {
    /// A real player won and was credited.
    PlayerWin { winner: AccountId, prize: u64 },
    /// The covert rule fired; no real account was credited.
    HouseWin,
    /// Draw pool exhausted with no winner.
    Void,
}

impl SettledOutcome {
    /// Display name used in the outcome broadcast.
    pub fn winner_display(&self) -> String {
        match self {
            SettledOutcome::PlayerWin { winner, .. } => winner.to_string(),
            SettledOutcome::HouseWin => "the house".to_string(),
            SettledOutcome::Void => "nobody".to_string(),
        }
    }

    pub fn prize(&self) -> u64 {
        match self {
            SettledOutcome::PlayerWin { prize, .. } => *prize,
            _ => 0,
        }
    }
}

/// Per-recipient delivery capability of the chat transport.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn number_called(
        &self,
        recipient: &AccountId,
        session_id: SessionId,
        number: u8,
        recent: &[u8],
    ) -> Result<(), DeliveryError>;

    async fn session_settled(
        &self,
        recipient: &AccountId,
        session_id: SessionId,
        outcome: &SettledOutcome,
    ) -> Result<(), DeliveryError>;

    async fn countdown_tick(
        &self,
        recipient: &AccountId,
        seconds_remaining: u64,
    ) -> Result<(), DeliveryError>;
}

/// Announce a called number to the whole roster, in draw order per
/// recipient. Failures are logged per recipient and never abort the rest.
pub async fn broadcast_number(
    sink: &dyn NotificationSink,
    roster: &[AccountId],
    session_id: SessionId,
    number: u8,
    recent: &[u8],
) {
    for recipient in roster {
        if let Err(e) = sink.number_called(recipient, session_id, number, recent).await {
            warn!(session = %session_id, "number broadcast delivery failed: {}", e);
        }
    }
}

/// Announce the settlement outcome to every roster member regardless of win
/// path.
pub async fn broadcast_settled(
    sink: &dyn NotificationSink,
    roster: &[AccountId],
    session_id: SessionId,
    outcome: &SettledOutcome,
) {
    for recipient in roster {
        if let Err(e) = sink.session_settled(recipient, session_id, outcome).await {
            warn!(session = %session_id, "settlement broadcast delivery failed: {}", e);
        }
    }
}

pub async fn broadcast_countdown_tick(
    sink: &dyn NotificationSink,
    waiting: &[AccountId],
    seconds_remaining: u64,
) {
    for recipient in waiting {
        if let Err(e) = sink.countdown_tick(recipient, seconds_remaining).await {
            warn!("countdown broadcast delivery failed: {}", e);
        }
    }
}

/// Sink that renders everything to the log. Used by the demo binary.
pub struct TracingSink;

#[async_trait]
impl NotificationSink for TracingSink {
    async fn number_called(
        &self,
        recipient: &AccountId,
        session_id: SessionId,
        number: u8,
        recent: &[u8],
    ) -> Result<(), DeliveryError> {
        info!(%recipient, session = %session_id, number, ?recent, "number called");
        Ok(())
    }

    async fn session_settled(
        &self,
        recipient: &AccountId,
        session_id: SessionId,
        outcome: &SettledOutcome,
    ) -> Result<(), DeliveryError> {
        info!(
            %recipient,
            session = %session_id,
            winner = %outcome.winner_display(),
            prize = outcome.prize(),
            "session settled"
        );
        Ok(())
    }

    async fn countdown_tick(
        &self,
        recipient: &AccountId,
        seconds_remaining: u64,
    ) -> Result<(), DeliveryError> {
        info!(%recipient, seconds_remaining, "lobby countdown");
        Ok(())
    }
}

/// Event log of everything a sink was asked to deliver. Test support.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SinkEvent {
    NumberCalled {
        recipient: AccountId,
        session_id: SessionId,
        number: u8,
        recent: Vec<u8>,
    },
    SessionSettled {
        recipient: AccountId,
        session_id: SessionId,
        outcome: SettledOutcome,
    },
    CountdownTick {
        recipient: AccountId,
        seconds_remaining: u64,
    },
}

/// Recording sink for tests; optionally fails delivery to chosen recipients
/// to exercise the per-recipient failure path.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<SinkEvent>>,
    failing: Mutex<Vec<AccountId>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_deliveries_to(&self, recipient: AccountId) {
        self.failing
            .lock()
            .expect("recording sink lock poisoned")
            .push(recipient);
    }

    pub fn events(&self) -> Vec<SinkEvent> {
        self.events
            .lock()
            .expect("recording sink lock poisoned")
            .clone()
    }

    fn record(&self, event: SinkEvent, recipient: &AccountId) -> Result<(), DeliveryError> {
        if self
            .failing
            .lock()
            .expect("recording sink lock poisoned")
            .contains(recipient)
        {
            return Err(DeliveryError {
                recipient: recipient.clone(),
                reason: "simulated transport failure".to_string(),
            });
        }
        self.events
            .lock()
            .expect("recording sink lock poisoned")
            .push(event);
        Ok(())
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn number_called(
        &self,
        recipient: &AccountId,
        session_id: SessionId,
        number: u8,
        recent: &[u8],
    ) -> Result<(), DeliveryError> {
        self.record(
            SinkEvent::NumberCalled {
                recipient: recipient.clone(),
                session_id,
                number,
                recent: recent.to_vec(),
            },
            recipient,
        )
    }

    async fn session_settled(
        &self,
        recipient: &AccountId,
        session_id: SessionId,
        outcome: &SettledOutcome,
    ) -> Result<(), DeliveryError> {
        self.record(
            SinkEvent::SessionSettled {
                recipient: recipient.clone(),
                session_id,
                outcome: outcome.clone(),
            },
            recipient,
        )
    }

    async fn countdown_tick(
        &self,
        recipient: &AccountId,
        seconds_remaining: u64,
    ) -> Result<(), DeliveryError> {
        self.record(
            SinkEvent::CountdownTick {
                recipient: recipient.clone(),
                seconds_remaining,
            },
            recipient,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_broadcast_survives_per_recipient_failure() {
        let sink = RecordingSink::new();
        let alice = AccountId::from("alice");
        let bob = AccountId::from("bob");
        let carol = AccountId::from("carol");
        sink.fail_deliveries_to(bob.clone());

        let session_id = Uuid::new_v4();
        let roster = vec![alice.clone(), bob, carol.clone()];
        broadcast_number(&sink, &roster, session_id, 42, &[42]).await;

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert!(matches!(
            &events[0],
            SinkEvent::NumberCalled { recipient, number: 42, .. } if *recipient == alice
        ));
        assert!(matches!(
            &events[1],
            SinkEvent::NumberCalled { recipient, number: 42, .. } if *recipient == carol
        ));
    }

    #[test]
    fn test_outcome_display() {
        assert_eq!(SettledOutcome::HouseWin.winner_display(), "the house");
        assert_eq!(SettledOutcome::Void.winner_display(), "nobody");
        let win = SettledOutcome::PlayerWin {
            winner: AccountId::from("alice"),
            prize: 510,
        };
        assert_eq!(win.winner_display(), "alice");
        assert_eq!(win.prize(), 510);
    }
}
