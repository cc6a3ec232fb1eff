//! Idempotency ledger
//!
//! Records which logical operations have already run. A key is first reserved
//! (`running`), then either completed with the operation's result or released so
//! a later attempt can execute again.

use chrono::Utc;
use rand::RngCore;
use serde_json::Value as JsonValue;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tenantflow_core::{
    CoreError, CoreResult, IdempotencyEntry, IdempotencyKey, IdempotencyStore, ReserveOutcome,
};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// How long a completed result is replayed for
    pub ttl: Duration,
    /// Default lease on a running reservation. A crashed holder's key becomes
    /// reclaimable once the lease passes.
    pub reservation_lease: Duration,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self { ttl: Duration::from_secs(24 * 60 * 60), reservation_lease: Duration::from_secs(300) }
    }
}

/// Proof of ownership of a running reservation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationToken(String);

impl ReservationToken {
    fn generate() -> Self {
        let mut bytes = [0u8; 16];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReservationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outcome of [`IdempotencyLedger::check_and_reserve`]
#[derive(Debug, Clone, PartialEq)]
pub enum Reservation {
    /// The caller owns the key and must `complete` or `release` it with this token
    Fresh(ReservationToken),
    /// The operation already completed; this is its recorded result
    Duplicate(JsonValue),
    /// Another caller is executing the same key right now
    InFlight { retry_after: chrono::DateTime<Utc> },
}

#[derive(Clone)]
pub struct IdempotencyLedger {
    store: Arc<dyn IdempotencyStore>,
    config: LedgerConfig,
}

impl IdempotencyLedger {
    pub fn new(store: Arc<dyn IdempotencyStore>, config: LedgerConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub async fn check_and_reserve(&self, key: &IdempotencyKey) -> CoreResult<Reservation> {
        self.check_and_reserve_with_lease(key, self.config.reservation_lease).await
    }

    /// Reserve with an explicit lease, e.g. one that covers an operation's timeout
    pub async fn check_and_reserve_with_lease(
        &self,
        key: &IdempotencyKey,
        lease: Duration,
    ) -> CoreResult<Reservation> {
        let lease = to_chrono(lease)?;
        let token = ReservationToken::generate();
        let outcome = self.store.try_reserve(key.as_str(), token.as_str(), Utc::now(), lease).await?;

        let reservation = match outcome {
            ReserveOutcome::Reserved => Reservation::Fresh(token),
            ReserveOutcome::Completed(result) => Reservation::Duplicate(result),
            ReserveOutcome::InFlight { reserved_until } => {
                Reservation::InFlight { retry_after: reserved_until }
            }
        };
        debug!(idempotency_key = %key, outcome = reservation.label(), "ledger reservation");
        Ok(reservation)
    }

    /// Record the result of a key reserved with `token`
    pub async fn complete(
        &self,
        key: &IdempotencyKey,
        token: &ReservationToken,
        result: &JsonValue,
    ) -> CoreResult<()> {
        let ttl = to_chrono(self.config.ttl)?;
        if self.store.complete(key.as_str(), token.as_str(), result, Utc::now(), ttl).await? {
            Ok(())
        } else {
            warn!(idempotency_key = %key, "completion without a running reservation");
            Err(CoreError::Conflict(format!("no running reservation for idempotency key {}", key)))
        }
    }

    /// Drop a reservation so the key can be attempted again.
    ///
    /// Returns false when `token` no longer owns the key, e.g. after its lease
    /// passed and another caller reclaimed it.
    pub async fn release(&self, key: &IdempotencyKey, token: &ReservationToken) -> CoreResult<bool> {
        let released = self.store.release(key.as_str(), token.as_str()).await?;
        debug!(idempotency_key = %key, released, "ledger reservation released");
        Ok(released)
    }

    pub async fn entry(&self, key: &IdempotencyKey) -> CoreResult<Option<IdempotencyEntry>> {
        self.store.get(key.as_str()).await
    }

    /// Evict completed entries older than their ttl
    pub async fn purge_expired(&self) -> CoreResult<u64> {
        self.store.purge_expired(Utc::now()).await
    }
}

impl Reservation {
    fn label(&self) -> &'static str {
        match self {
            Reservation::Fresh(_) => "fresh",
            Reservation::Duplicate(_) => "duplicate",
            Reservation::InFlight { .. } => "in_flight",
        }
    }
}

fn to_chrono(duration: Duration) -> CoreResult<chrono::Duration> {
    chrono::Duration::from_std(duration)
        .map_err(|_| CoreError::Invalid(format!("duration {:?} is out of range", duration)))
}
