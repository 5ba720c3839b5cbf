//! Notification fan-out engine
//!
//! Consumes accepted [`EventRecord`]s in per-trip order, resolves the
//! recipient set from a fixed table, and delivers one message per
//! `(event, recipient)` pair through the external transport. Delivery is
//! at-least-once with bounded exponential backoff and is deduplicated by
//! `(event_id, recipient)`, so retries and restarts never produce a second
//! message to the same recipient. A slow or failing transport never blocks
//! the trip's exclusive section: records are handed off through a queue.
//!
//! Exhausted deliveries are not dropped; they degrade into a
//! manager-facing [`EventPayload::DeliveryAlert`].

use crate::errors::{DispatchError, DispatchResult};
use crate::events::{EventKind, EventPayload, EventRecord};
use crate::identifiers::{EventId, TripId, UserId};
use crate::role::Role;
use crate::state_machine::State;
use crate::store::{NotificationStore, TripRepository};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Delivery lifecycle of one `(event, recipient)` obligation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryState {
    /// Not yet delivered; retries remain
    Pending,
    /// Terminal: the transport accepted the message
    Delivered,
    /// Terminal: the transport reported a permanent failure
    Failed,
    /// Terminal: the retry budget is spent
    Exhausted,
}

impl DeliveryState {
    /// Whether no further delivery attempts will be made
    pub fn is_terminal(&self) -> bool {
        !matches!(self, DeliveryState::Pending)
    }
}

/// One recipient-specific obligation to deliver an accepted transition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationEvent {
    /// Deterministic id of the underlying event; half of the dedup key
    pub event_id: EventId,
    /// The trip the event belongs to
    pub trip_id: TripId,
    /// Log position, preserved so per-recipient order follows the log
    pub seq: u64,
    /// Kind of the underlying event
    pub kind: EventKind,
    /// Concrete recipient; the other half of the dedup key
    pub recipient: UserId,
    /// Role the recipient holds on the trip
    pub recipient_role: Role,
    /// Structured snapshot handed to the transport for rendering
    pub payload: EventPayload,
    /// Current delivery lifecycle state
    pub delivery_state: DeliveryState,
    /// Attempts made so far; survives restarts
    pub attempt_count: u32,
    /// When the last attempt started
    pub last_attempt_at: Option<DateTime<Utc>>,
}

/// Outcome of one transport delivery attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryResult {
    /// Message accepted by the transport
    Delivered,
    /// Worth retrying (rate limit, timeout downstream, flaky link)
    TransientFailure(String),
    /// Retrying cannot help (unknown recipient, blocked bot)
    PermanentFailure(String),
}

/// The external chat transport
///
/// Rendering of `payload` into message text happens on the other side of
/// this trait; the core hands over the structured snapshot only.
#[async_trait]
pub trait NotificationTransport: Send + Sync {
    /// Deliver one notification to one recipient
    async fn deliver(&self, recipient: UserId, payload: &EventPayload) -> DeliveryResult;
}

/// Retry policy for delivery attempts
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Delay before the second attempt; doubles each retry
    pub base: Duration,
    /// Upper bound on the delay between attempts
    pub cap: Duration,
    /// Total attempts before an obligation is `Exhausted`
    pub max_attempts: u32,
    /// Per-attempt transport timeout; a timeout counts as a failed attempt
    pub attempt_timeout: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(2),
            cap: Duration::from_secs(60),
            max_attempts: 5,
            attempt_timeout: Duration::from_secs(10),
        }
    }
}

impl BackoffPolicy {
    /// Delay to wait before attempt number `attempt` (1-based).
    /// The first attempt runs immediately.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let exp = attempt.saturating_sub(2).min(16);
        let delay = self.base.saturating_mul(1 << exp);
        delay.min(self.cap)
    }
}

/// The fixed recipient-resolution table: which roles are told about an
/// event of the given payload. Recipients are computed, never stored
/// input; direct messages go to their addressee only.
pub fn recipient_roles(payload: &EventPayload) -> Vec<Role> {
    use Role::*;
    match payload {
        EventPayload::TripCreated { .. } => vec![Shipper, Consignee],
        EventPayload::TripAssigned { .. } => vec![Driver, Shipper, Consignee],
        EventPayload::StatusChanged { .. } => vec![Manager, Shipper, Consignee],
        EventPayload::LocationUpdated { .. } => vec![Shipper, Consignee],
        EventPayload::IssueReported { .. } => vec![Manager],
        EventPayload::IssueResolved { .. } => vec![Driver, Manager, Shipper, Consignee],
        EventPayload::IssueClosed { .. } => vec![Manager],
        EventPayload::TripCompleted { .. } => vec![Manager, Shipper, Consignee],
        EventPayload::TripCancelled { .. } => vec![Driver, Manager, Shipper, Consignee],
        EventPayload::MessageSent { to, .. } => vec![*to],
        EventPayload::DeliveryAlert { .. } => vec![Manager],
    }
}

fn poisoned() -> DispatchError {
    DispatchError::Storage("dispatcher lock poisoned".to_string())
}

struct DispatcherInner {
    transport: Arc<dyn NotificationTransport>,
    trips: Arc<dyn TripRepository>,
    store: Arc<dyn NotificationStore>,
    policy: BackoffPolicy,
    /// The only cross-trip shared resource: insertion is the atomic
    /// check-and-set that makes fan-out exactly-once per recipient
    dedup: Mutex<HashSet<(EventId, UserId)>>,
    /// One single-consumer queue per trip preserves log order per
    /// recipient while letting trips interleave freely
    workers: Mutex<HashMap<TripId, mpsc::UnboundedSender<NotificationEvent>>>,
}

/// Consumes accepted events and guarantees each recipient hears about each
/// event exactly once
#[derive(Clone)]
pub struct NotificationDispatcher {
    inner: Arc<DispatcherInner>,
}

impl NotificationDispatcher {
    /// Create a dispatcher. Must be called inside a tokio runtime; workers
    /// are spawned lazily per trip.
    pub fn new(
        transport: Arc<dyn NotificationTransport>,
        trips: Arc<dyn TripRepository>,
        store: Arc<dyn NotificationStore>,
        policy: BackoffPolicy,
    ) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                transport,
                trips,
                store,
                policy,
                dedup: Mutex::new(HashSet::new()),
                workers: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Accept an event record for fan-out. Non-blocking: obligations are
    /// persisted as `Pending` and handed to the trip's delivery worker.
    /// Redelivery of an already-seen record is a no-op per recipient.
    pub fn offer(&self, record: &EventRecord) -> DispatchResult<()> {
        let trip = self
            .inner
            .trips
            .load(record.trip_id)?
            .ok_or_else(|| DispatchError::trip_not_found(record.trip_id))?;

        for role in recipient_roles(&record.payload) {
            // A role slot can be empty (no driver assigned yet)
            let Some(recipient) = trip.member(role) else {
                debug!(trip_id = %record.trip_id, %role, "no member for role, skipping recipient");
                continue;
            };
            let obligation = NotificationEvent {
                event_id: record.event_id,
                trip_id: record.trip_id,
                seq: record.seq,
                kind: record.kind,
                recipient,
                recipient_role: role,
                payload: record.payload.clone(),
                delivery_state: DeliveryState::Pending,
                attempt_count: 0,
                last_attempt_at: None,
            };
            DispatcherInner::admit(&self.inner, obligation)?;
        }

        // Nothing follows a terminal event on this trip's log. Dropping
        // the sender lets the worker drain its queue and exit; a late
        // delivery alert simply spawns a fresh worker.
        if trip.status.is_terminal() {
            self.inner
                .workers
                .lock()
                .map_err(|_| poisoned())?
                .remove(&record.trip_id);
        }
        Ok(())
    }

    /// Re-enqueue every non-terminal obligation persisted by a previous
    /// process, continuing from its saved attempt count. Call once at
    /// startup, before accepting new records.
    pub fn resume(&self) -> DispatchResult<()> {
        {
            let mut dedup = self.inner.dedup.lock().map_err(|_| poisoned())?;
            for key in self.inner.store.known_keys()? {
                dedup.insert(key);
            }
        }
        let incomplete = self.inner.store.load_incomplete()?;
        if !incomplete.is_empty() {
            info!(count = incomplete.len(), "resuming undelivered notifications");
        }
        for obligation in incomplete {
            DispatcherInner::enqueue(&self.inner, obligation)?;
        }
        Ok(())
    }
}

impl DispatcherInner {
    /// Atomic check-and-set on the dedup index, then persist and enqueue.
    fn admit(inner: &Arc<Self>, obligation: NotificationEvent) -> DispatchResult<()> {
        let key = (obligation.event_id, obligation.recipient);
        {
            let mut dedup = inner.dedup.lock().map_err(|_| poisoned())?;
            if !dedup.insert(key) {
                debug!(event_id = %obligation.event_id, recipient = %obligation.recipient,
                    "duplicate obligation suppressed");
                return Ok(());
            }
        }
        inner.store.save(&obligation)?;
        Self::enqueue(inner, obligation)
    }

    fn enqueue(inner: &Arc<Self>, obligation: NotificationEvent) -> DispatchResult<()> {
        let mut workers = inner.workers.lock().map_err(|_| poisoned())?;
        let sender = workers.entry(obligation.trip_id).or_insert_with(|| {
            let (tx, rx) = mpsc::unbounded_channel();
            tokio::spawn(Arc::clone(inner).worker_loop(rx));
            tx
        });
        // A closed worker means the runtime is shutting down; the
        // obligation stays Pending in the store and resumes next start.
        let _ = sender.send(obligation);
        Ok(())
    }

    async fn worker_loop(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<NotificationEvent>) {
        while let Some(mut obligation) = rx.recv().await {
            if let Err(err) = Self::drive(&self, &mut obligation).await {
                error!(event_id = %obligation.event_id, %err, "notification store write failed");
            }
        }
    }

    /// Drive one obligation to a terminal delivery state.
    async fn drive(inner: &Arc<Self>, n: &mut NotificationEvent) -> DispatchResult<()> {
        if n.delivery_state.is_terminal() {
            return Ok(());
        }
        loop {
            if n.attempt_count >= inner.policy.max_attempts {
                n.delivery_state = DeliveryState::Exhausted;
                inner.store.save(n)?;
                error!(event_id = %n.event_id, recipient = %n.recipient,
                    attempts = n.attempt_count, "delivery exhausted");
                Self::raise_alert(inner, n)?;
                return Ok(());
            }

            let attempt = n.attempt_count + 1;
            let delay = inner.policy.delay_before(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            n.attempt_count = attempt;
            n.last_attempt_at = Some(Utc::now());
            inner.store.save(n)?;

            let outcome = tokio::time::timeout(
                inner.policy.attempt_timeout,
                inner.transport.deliver(n.recipient, &n.payload),
            )
            .await;

            match outcome {
                Ok(DeliveryResult::Delivered) => {
                    n.delivery_state = DeliveryState::Delivered;
                    inner.store.save(n)?;
                    info!(event_id = %n.event_id, recipient = %n.recipient, kind = %n.kind,
                        attempt, "notification delivered");
                    return Ok(());
                }
                Ok(DeliveryResult::PermanentFailure(reason)) => {
                    n.delivery_state = DeliveryState::Failed;
                    inner.store.save(n)?;
                    warn!(event_id = %n.event_id, recipient = %n.recipient, %reason,
                        "permanent delivery failure, not retrying");
                    return Ok(());
                }
                Ok(DeliveryResult::TransientFailure(reason)) => {
                    warn!(event_id = %n.event_id, recipient = %n.recipient, attempt, %reason,
                        "transient delivery failure");
                }
                Err(_) => {
                    warn!(event_id = %n.event_id, recipient = %n.recipient, attempt,
                        "delivery attempt timed out");
                }
            }
        }
    }

    /// Surface an exhausted obligation to the trip's manager. Alert
    /// obligations go through the normal delivery pipeline but never
    /// raise further alerts when they themselves exhaust.
    fn raise_alert(inner: &Arc<Self>, exhausted: &NotificationEvent) -> DispatchResult<()> {
        if exhausted.kind == EventKind::DeliveryAlert {
            error!(event_id = %exhausted.event_id, "delivery alert itself exhausted, dropping");
            return Ok(());
        }
        let Some(trip) = inner.trips.load(exhausted.trip_id)? else {
            return Ok(());
        };

        let payload = EventPayload::DeliveryAlert {
            trip_id: exhausted.trip_id,
            failed_event: exhausted.event_id,
            recipient: exhausted.recipient,
            attempts: exhausted.attempt_count,
        };
        // Alert identity is derived per failed recipient so two exhausted
        // recipients of the same event produce two distinct alerts.
        let alert_id = EventId::derive(
            exhausted.trip_id,
            exhausted.seq,
            &format!("DeliveryAlert:{}", exhausted.recipient),
        );
        let alert = NotificationEvent {
            event_id: alert_id,
            trip_id: exhausted.trip_id,
            seq: exhausted.seq,
            kind: EventKind::DeliveryAlert,
            recipient: trip.manager_id,
            recipient_role: Role::Manager,
            payload,
            delivery_state: DeliveryState::Pending,
            attempt_count: 0,
            last_attempt_at: None,
        };
        Self::admit(inner, alert)
    }
}
