//! Intent handling service
//!
//! Owns the validate-apply-record pipeline: authorize through the role
//! router, enter the target trip's exclusive section, run the state
//! machine, persist the mutated aggregates, append exactly one record to
//! the event log and hand it to the notification dispatcher. Rejections
//! leave no trace in the log and trigger no notifications.
//!
//! Replay protection is keyed on the transport-supplied idempotency key:
//! resubmitting an already-accepted intent returns the recorded reply
//! without a new log entry or notification.

use crate::dispatcher::NotificationDispatcher;
use crate::errors::{DispatchError, DispatchResult};
use crate::event_log::EventLog;
use crate::events::{EventPayload, EventRecord};
use crate::identifiers::{IdempotencyKey, TripId, UserId};
use crate::intent::{Intent, IntentPayload, RoleRouter};
use crate::issue::{Issue, IssueTracker};
use crate::role::Action;
use crate::state_machine::State;
use crate::store::{IssueRepository, TripRepository};
use crate::trip::{Trip, TripStateMachine};
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::Mutex as TokioMutex;
use tracing::{debug, warn};

/// Outcome of an accepted intent
#[derive(Debug, Clone)]
pub enum IntentReply {
    /// A trip operation: the updated snapshot plus the appended record,
    /// when the operation produced one
    Trip {
        /// Trip snapshot after the operation
        trip: Trip,
        /// The appended record; `None` for reads, dropped location
        /// samples and other no-event outcomes
        record: Option<EventRecord>,
    },
    /// An issue operation: both updated snapshots
    Issue {
        /// Issue snapshot after the operation
        issue: Issue,
        /// Trip snapshot after the operation
        trip: Trip,
        /// The appended record; acknowledging emits none
        record: Option<EventRecord>,
    },
    /// A direct message was recorded and queued for its addressee
    Message {
        /// The appended record
        record: EventRecord,
    },
    /// A slice of the trip's accepted transitions
    Events(Vec<EventRecord>),
}

fn poisoned() -> DispatchError {
    DispatchError::Storage("service lock poisoned".to_string())
}

/// The front door: one `handle` call per inbound intent
pub struct DispatchService {
    trips: Arc<dyn TripRepository>,
    issues: Arc<dyn IssueRepository>,
    log: Arc<dyn EventLog>,
    dispatcher: NotificationDispatcher,
    /// Per-trip exclusive sections; trips never block each other.
    /// Released once the trip reaches a terminal status.
    locks: StdMutex<HashMap<TripId, Arc<TokioMutex<()>>>>,
    /// One slot per idempotency key. The slot's mutex serializes
    /// concurrent submissions of the same key: the first to hold it
    /// executes and fills the slot, everyone after replays the reply.
    seen: StdMutex<HashMap<IdempotencyKey, Arc<TokioMutex<Option<IntentReply>>>>>,
}

impl DispatchService {
    /// Create a service over its collaborators
    pub fn new(
        trips: Arc<dyn TripRepository>,
        issues: Arc<dyn IssueRepository>,
        log: Arc<dyn EventLog>,
        dispatcher: NotificationDispatcher,
    ) -> Self {
        Self {
            trips,
            issues,
            log,
            dispatcher,
            locks: StdMutex::new(HashMap::new()),
            seen: StdMutex::new(HashMap::new()),
        }
    }

    /// Re-enqueue undelivered notifications from a previous process. Call
    /// once at startup, before handling intents.
    pub fn resume_deliveries(&self) -> DispatchResult<()> {
        self.dispatcher.resume()
    }

    /// The driver's current non-terminal trip, used to resolve bare
    /// driver interactions that name no trip
    pub fn active_trip_for_driver(&self, driver: UserId) -> DispatchResult<Option<Trip>> {
        self.trips.find_active_for_driver(driver)
    }

    /// Handle one intent end to end
    pub async fn handle(&self, intent: Intent) -> DispatchResult<IntentReply> {
        RoleRouter::authorize(&intent)?;

        // Reads are never cached: a reused key on a view returns fresh
        // data, since views append nothing and notify nobody anyway.
        if matches!(intent.action, Action::ViewTrip | Action::ViewEvents) {
            return self.execute(&intent).await;
        }

        let key = intent.idempotency_key.clone().ok_or_else(|| {
            DispatchError::MalformedIntent("intent requires an idempotency key".to_string())
        })?;
        let slot = {
            let mut seen = self.seen.lock().map_err(|_| poisoned())?;
            Arc::clone(seen.entry(key).or_default())
        };

        // Check-and-set: the slot is held across the whole execution, so
        // a concurrent submission of the same key waits here and then
        // replays the recorded reply instead of applying twice. Failures
        // leave the slot empty; a retried rejected intent is re-evaluated.
        let mut recorded = slot.lock().await;
        if let Some(reply) = recorded.as_ref() {
            debug!(action = %intent.action, "replayed intent, returning recorded reply");
            return Ok(reply.clone());
        }
        let reply = self.execute(&intent).await?;
        *recorded = Some(reply.clone());
        Ok(reply)
    }

    async fn execute(&self, intent: &Intent) -> DispatchResult<IntentReply> {
        match intent.action {
            Action::CreateTrip => self.create_trip(intent),
            Action::ViewTrip => self.view_trip(intent),
            Action::ViewEvents => self.view_events(intent),
            _ => self.mutate_trip(intent).await,
        }
    }

    fn trip_lock(&self, trip_id: TripId) -> DispatchResult<Arc<TokioMutex<()>>> {
        let mut locks = self.locks.lock().map_err(|_| poisoned())?;
        Ok(Arc::clone(locks.entry(trip_id).or_default()))
    }

    fn create_trip(&self, intent: &Intent) -> DispatchResult<IntentReply> {
        let IntentPayload::CreateTrip {
            shipper_id,
            consignee_id,
            origin,
            destination,
            cargo_description,
        } = &intent.payload
        else {
            return Err(DispatchError::MalformedIntent(
                "create_trip payload expected".to_string(),
            ));
        };

        let (trip, payload) = TripStateMachine::create(
            intent.role,
            intent.actor_id,
            *shipper_id,
            *consignee_id,
            origin.clone(),
            destination.clone(),
            cargo_description.clone(),
        )?;
        self.trips.save(&trip)?;
        let record = self.log.append(trip.id, 1, payload)?;
        self.dispatcher.offer(&record)?;
        Ok(IntentReply::Trip {
            trip,
            record: Some(record),
        })
    }

    /// All trip- and issue-mutating operations share one shape: exclusive
    /// section, identity check, state machine, persist, append, fan out.
    async fn mutate_trip(&self, intent: &Intent) -> DispatchResult<IntentReply> {
        let trip_id = intent
            .trip_id
            .ok_or_else(|| DispatchError::MalformedIntent("trip id required".to_string()))?;

        let section = self.trip_lock(trip_id)?;
        let _held = section.lock().await;

        let mut trip = self
            .trips
            .load(trip_id)?
            .ok_or_else(|| DispatchError::trip_not_found(trip_id))?;

        // The actor must actually hold the claimed role on this trip
        if trip.member(intent.role) != Some(intent.actor_id) {
            warn!(trip_id = %trip.id, role = %intent.role, actor = %intent.actor_id,
                "actor does not hold the claimed role on the trip");
            return Err(DispatchError::UnauthorizedActor {
                role: intent.role.to_string(),
                action: intent.action.to_string(),
            });
        }

        let mut issue_snapshot = None;
        let payload = match &intent.payload {
            IntentPayload::AssignDriver { driver_id } => {
                TripStateMachine::assign(&mut trip, *driver_id)?
            }
            IntentPayload::UpdateStatus {
                new_status,
                note,
                location,
            } => TripStateMachine::update_status(
                &mut trip,
                *new_status,
                intent.role,
                note.clone(),
                *location,
            )?,
            IntentPayload::RecordLocation { coord, timestamp } => {
                match TripStateMachine::record_location(&mut trip, *coord, *timestamp)? {
                    Some(payload) => payload,
                    None => {
                        // Out-of-order sample: dropped, no transition
                        return Ok(IntentReply::Trip { trip, record: None });
                    }
                }
            }
            IntentPayload::CancelTrip { reason } => {
                TripStateMachine::cancel(&mut trip, reason.clone())?
            }
            IntentPayload::ReportIssue { description } => {
                let (issue, payload) = IssueTracker::report(
                    &mut trip,
                    intent.role,
                    intent.actor_id,
                    description.clone(),
                )?;
                self.issues.save(&issue)?;
                issue_snapshot = Some(issue);
                payload
            }
            IntentPayload::AcknowledgeIssue => {
                let mut issue = self.load_issue(intent, &trip)?;
                IssueTracker::acknowledge(&mut issue, intent.role)?;
                self.issues.save(&issue)?;
                // Acknowledging is manager-internal: no log entry, no fan-out
                return Ok(IntentReply::Issue {
                    issue,
                    trip,
                    record: None,
                });
            }
            IntentPayload::ResolveIssue { resolution } => {
                let mut issue = self.load_issue(intent, &trip)?;
                let payload = IssueTracker::resolve(
                    &mut issue,
                    &mut trip,
                    intent.role,
                    intent.actor_id,
                    resolution.clone(),
                )?;
                self.issues.save(&issue)?;
                issue_snapshot = Some(issue);
                payload
            }
            IntentPayload::CloseIssue => {
                let mut issue = self.load_issue(intent, &trip)?;
                let payload = IssueTracker::close(&mut issue, &mut trip, intent.role)?;
                self.issues.save(&issue)?;
                issue_snapshot = Some(issue);
                payload
            }
            IntentPayload::SendMessage { to, body } => {
                if trip.member(*to).is_none() {
                    return Err(DispatchError::NotFound {
                        entity: format!("{to} stakeholder"),
                        id: trip.id.to_string(),
                    });
                }
                EventPayload::MessageSent {
                    trip_id: trip.id,
                    from: intent.role,
                    to: *to,
                    body: body.clone(),
                }
            }
            other => {
                return Err(DispatchError::MalformedIntent(format!(
                    "{} is not a trip mutation",
                    other.action()
                )));
            }
        };

        self.trips.save(&trip)?;
        let seq = self.log.next_seq(trip_id)?;
        let record = self.log.append(trip_id, seq, payload)?;
        self.dispatcher.offer(&record)?;

        // Terminal trips accept no further mutations; their section is
        // dropped from the map so it does not accumulate forever.
        if trip.status.is_terminal() {
            self.locks.lock().map_err(|_| poisoned())?.remove(&trip_id);
        }

        Ok(match issue_snapshot {
            Some(issue) => IntentReply::Issue {
                issue,
                trip,
                record: Some(record),
            },
            None if intent.action == Action::SendMessage => IntentReply::Message { record },
            None => IntentReply::Trip {
                trip,
                record: Some(record),
            },
        })
    }

    fn load_issue(&self, intent: &Intent, trip: &Trip) -> DispatchResult<Issue> {
        let issue_id = intent
            .issue_id
            .ok_or_else(|| DispatchError::MalformedIntent("issue id required".to_string()))?;
        let issue = self
            .issues
            .load(issue_id)?
            .ok_or_else(|| DispatchError::issue_not_found(issue_id))?;
        if issue.trip_id != trip.id {
            return Err(DispatchError::Conflict(format!(
                "issue {} belongs to trip {}, not {}",
                issue.id, issue.trip_id, trip.id
            )));
        }
        Ok(issue)
    }

    /// Reads never take the exclusive section. Non-members get the same
    /// not-found as a missing trip, so membership cannot be probed.
    fn view_trip(&self, intent: &Intent) -> DispatchResult<IntentReply> {
        let trip = self.member_view(intent)?;
        Ok(IntentReply::Trip { trip, record: None })
    }

    fn view_events(&self, intent: &Intent) -> DispatchResult<IntentReply> {
        let trip = self.member_view(intent)?;
        let from_seq = match intent.payload {
            IntentPayload::ViewEvents { from_seq } => from_seq.max(1),
            _ => 1,
        };
        Ok(IntentReply::Events(self.log.read_events(trip.id, from_seq)?))
    }

    fn member_view(&self, intent: &Intent) -> DispatchResult<Trip> {
        let trip_id = intent
            .trip_id
            .ok_or_else(|| DispatchError::MalformedIntent("trip id required".to_string()))?;
        let trip = self
            .trips
            .load(trip_id)?
            .ok_or_else(|| DispatchError::trip_not_found(trip_id))?;
        if !trip.is_member(intent.actor_id) {
            return Err(DispatchError::trip_not_found(trip_id));
        }
        Ok(trip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::{
        BackoffPolicy, DeliveryResult, NotificationDispatcher, NotificationTransport,
    };
    use crate::event_log::InMemoryEventLog;
    use crate::events::EventKind;
    use crate::role::Role;
    use crate::store::{
        InMemoryIssueRepository, InMemoryNotificationStore, InMemoryTripRepository,
    };
    use crate::trip::{GeoCoordinate, Place, TripStatus};
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Unique per-intent keys, the way a transport would stamp updates
    fn key() -> IdempotencyKey {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        IdempotencyKey::new(format!("k-{}", NEXT.fetch_add(1, Ordering::Relaxed))).unwrap()
    }

    struct SilentTransport;

    #[async_trait]
    impl NotificationTransport for SilentTransport {
        async fn deliver(&self, _recipient: UserId, _payload: &EventPayload) -> DeliveryResult {
            DeliveryResult::Delivered
        }
    }

    fn service() -> DispatchService {
        let trips = Arc::new(InMemoryTripRepository::new());
        let dispatcher = NotificationDispatcher::new(
            Arc::new(SilentTransport),
            trips.clone(),
            Arc::new(InMemoryNotificationStore::new()),
            BackoffPolicy::default(),
        );
        DispatchService::new(
            trips,
            Arc::new(InMemoryIssueRepository::new()),
            Arc::new(InMemoryEventLog::new()),
            dispatcher,
        )
    }

    fn trip_of(reply: IntentReply) -> (Trip, Option<EventRecord>) {
        match reply {
            IntentReply::Trip { trip, record } => (trip, record),
            other => panic!("expected trip reply, got {other:?}"),
        }
    }

    fn create_intent(manager: UserId) -> Intent {
        Intent::new(
            Role::Manager,
            manager,
            IntentPayload::CreateTrip {
                shipper_id: UserId::new(),
                consignee_id: UserId::new(),
                origin: Place::new("Rotterdam"),
                destination: Place::new("Hamburg"),
                cargo_description: "pallets".to_string(),
            },
        )
        .with_key(key())
    }

    async fn created_trip(svc: &DispatchService, manager: UserId) -> Trip {
        let reply = svc.handle(create_intent(manager)).await.unwrap();
        trip_of(reply).0
    }

    async fn assigned_trip(svc: &DispatchService, manager: UserId, driver: UserId) -> Trip {
        let trip = created_trip(svc, manager).await;
        let reply = svc
            .handle(
                Intent::new(
                    Role::Manager,
                    manager,
                    IntentPayload::AssignDriver { driver_id: driver },
                )
                .for_trip(trip.id)
                .with_key(key()),
            )
            .await
            .unwrap();
        trip_of(reply).0
    }

    fn ts(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn create_appends_the_first_record() {
        let svc = service();
        let manager = UserId::new();

        let (trip, record) = trip_of(svc.handle(create_intent(manager)).await.unwrap());
        let record = record.unwrap();

        assert_eq!(trip.status, TripStatus::Created);
        assert_eq!(trip.manager_id, manager);
        assert_eq!(record.seq, 1);
        assert_eq!(record.kind, EventKind::TripCreated);
    }

    #[tokio::test(start_paused = true)]
    async fn actor_must_hold_the_claimed_role_on_the_trip() {
        let svc = service();
        let manager = UserId::new();
        let trip = created_trip(&svc, manager).await;

        // A different manager identity may not assign on this trip
        let err = svc
            .handle(
                Intent::new(
                    Role::Manager,
                    UserId::new(),
                    IntentPayload::AssignDriver {
                        driver_id: UserId::new(),
                    },
                )
                .for_trip(trip.id)
                .with_key(key()),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::UnauthorizedActor { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_intents_append_nothing() {
        let svc = service();
        let manager = UserId::new();
        let driver = UserId::new();
        let trip = assigned_trip(&svc, manager, driver).await;

        // Assigned -> Delivered skips InTransit
        let err = svc
            .handle(
                Intent::new(
                    Role::Driver,
                    driver,
                    IntentPayload::UpdateStatus {
                        new_status: TripStatus::Delivered,
                        note: None,
                        location: None,
                    },
                )
                .for_trip(trip.id)
                .with_key(key()),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::InvalidTransition { .. }));

        let events = match svc
            .handle(
                Intent::new(Role::Manager, manager, IntentPayload::ViewEvents { from_seq: 1 })
                    .for_trip(trip.id)
                    .with_key(key()),
            )
            .await
            .unwrap()
        {
            IntentReply::Events(events) => events,
            other => panic!("expected events, got {other:?}"),
        };
        // Creation and assignment only
        assert_eq!(events.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn resubmitted_key_returns_recorded_reply_without_new_record() {
        let svc = service();
        let manager = UserId::new();
        let driver = UserId::new();
        let trip = assigned_trip(&svc, manager, driver).await;

        let intent = Intent::new(
            Role::Driver,
            driver,
            IntentPayload::UpdateStatus {
                new_status: TripStatus::InTransit,
                note: None,
                location: None,
            },
        )
        .for_trip(trip.id)
        .with_key(IdempotencyKey::new("tg-7001").unwrap());

        let (_, first) = trip_of(svc.handle(intent.clone()).await.unwrap());
        let (_, second) = trip_of(svc.handle(intent).await.unwrap());
        assert_eq!(
            first.as_ref().unwrap().event_id,
            second.as_ref().unwrap().event_id
        );

        let events = match svc
            .handle(
                Intent::new(Role::Manager, manager, IntentPayload::ViewEvents { from_seq: 1 })
                    .for_trip(trip.id)
                    .with_key(key()),
            )
            .await
            .unwrap()
        {
            IntentReply::Events(events) => events,
            other => panic!("expected events, got {other:?}"),
        };
        assert_eq!(events.len(), 3, "replay appended nothing");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_submissions_of_one_key_create_one_trip() {
        // Two tasks carrying the same key race into an empty cache; the
        // key slot admits exactly one execution.
        for _ in 0..64 {
            let svc = Arc::new(service());
            let intent = create_intent(UserId::new());

            let a = tokio::spawn({
                let svc = Arc::clone(&svc);
                let intent = intent.clone();
                async move { svc.handle(intent).await }
            });
            let b = tokio::spawn({
                let svc = Arc::clone(&svc);
                let intent = intent.clone();
                async move { svc.handle(intent).await }
            });

            let (first, _) = trip_of(a.await.unwrap().unwrap());
            let (second, _) = trip_of(b.await.unwrap().unwrap());
            assert_eq!(first.id, second.id, "one key must create one trip");
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_submissions_of_one_key_append_one_message() {
        for _ in 0..64 {
            let svc = Arc::new(service());
            let manager = UserId::new();
            let driver = UserId::new();
            let trip = assigned_trip(&svc, manager, driver).await;

            let msg = Intent::new(
                Role::Manager,
                manager,
                IntentPayload::SendMessage {
                    to: Role::Driver,
                    body: "dock 7 tonight".to_string(),
                },
            )
            .for_trip(trip.id)
            .with_key(key());

            let a = tokio::spawn({
                let svc = Arc::clone(&svc);
                let msg = msg.clone();
                async move { svc.handle(msg).await }
            });
            let b = tokio::spawn({
                let svc = Arc::clone(&svc);
                let msg = msg.clone();
                async move { svc.handle(msg).await }
            });
            a.await.unwrap().unwrap();
            b.await.unwrap().unwrap();

            let events = match svc
                .handle(
                    Intent::new(Role::Manager, manager, IntentPayload::ViewEvents { from_seq: 1 })
                        .for_trip(trip.id)
                        .with_key(key()),
                )
                .await
                .unwrap()
            {
                IntentReply::Events(events) => events,
                other => panic!("expected events, got {other:?}"),
            };
            // Created, Assigned, exactly one MessageSent
            assert_eq!(events.len(), 3);
            assert_eq!(events[2].kind, EventKind::MessageSent);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_trips_release_their_exclusive_section() {
        let svc = service();
        let manager = UserId::new();
        let trip = assigned_trip(&svc, manager, UserId::new()).await;
        assert_eq!(svc.locks.lock().unwrap().len(), 1);

        svc.handle(
            Intent::new(
                Role::Manager,
                manager,
                IntentPayload::CancelTrip {
                    reason: "shipper withdrew".to_string(),
                },
            )
            .for_trip(trip.id)
            .with_key(key()),
        )
        .await
        .unwrap();

        assert!(svc.locks.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_location_sample_emits_no_record() {
        let svc = service();
        let manager = UserId::new();
        let driver = UserId::new();
        let trip = assigned_trip(&svc, manager, driver).await;

        svc.handle(
            Intent::new(
                Role::Driver,
                driver,
                IntentPayload::UpdateStatus {
                    new_status: TripStatus::InTransit,
                    note: None,
                    location: None,
                },
            )
            .for_trip(trip.id)
            .with_key(key()),
        )
        .await
        .unwrap();

        let locate = |coord, timestamp| {
            Intent::new(
                Role::Driver,
                driver,
                IntentPayload::RecordLocation { coord, timestamp },
            )
            .for_trip(trip.id)
            .with_key(key())
        };

        let (_, record) = trip_of(
            svc.handle(locate(GeoCoordinate::new(52.0, 5.0), ts(100)))
                .await
                .unwrap(),
        );
        assert!(record.is_some());

        // Stale sample: accepted call, no transition, no record
        let (snapshot, record) = trip_of(
            svc.handle(locate(GeoCoordinate::new(52.1, 5.1), ts(50)))
                .await
                .unwrap(),
        );
        assert!(record.is_none());
        assert_eq!(snapshot.location_history.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn message_to_unfilled_role_is_not_found() {
        let svc = service();
        let manager = UserId::new();
        let trip = created_trip(&svc, manager).await;

        let err = svc
            .handle(
                Intent::new(
                    Role::Manager,
                    manager,
                    IntentPayload::SendMessage {
                        to: Role::Driver,
                        body: "who is driving?".to_string(),
                    },
                )
                .for_trip(trip.id)
                .with_key(key()),
            )
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test(start_paused = true)]
    async fn acknowledge_changes_the_issue_but_appends_nothing() {
        let svc = service();
        let manager = UserId::new();
        let driver = UserId::new();
        let trip = assigned_trip(&svc, manager, driver).await;

        svc.handle(
            Intent::new(
                Role::Driver,
                driver,
                IntentPayload::UpdateStatus {
                    new_status: TripStatus::InTransit,
                    note: None,
                    location: None,
                },
            )
            .for_trip(trip.id)
            .with_key(key()),
        )
        .await
        .unwrap();

        let issue = match svc
            .handle(
                Intent::new(
                    Role::Driver,
                    driver,
                    IntentPayload::ReportIssue {
                        description: "flat tire".to_string(),
                    },
                )
                .for_trip(trip.id)
                .with_key(key()),
            )
            .await
            .unwrap()
        {
            IntentReply::Issue { issue, .. } => issue,
            other => panic!("expected issue reply, got {other:?}"),
        };

        let reply = svc
            .handle(
                Intent::new(Role::Manager, manager, IntentPayload::AcknowledgeIssue)
                    .for_trip(trip.id)
                    .for_issue(issue.id)
                    .with_key(key()),
            )
            .await
            .unwrap();
        match reply {
            IntentReply::Issue { issue, record, .. } => {
                assert_eq!(issue.status, crate::issue::IssueStatus::Acknowledged);
                assert!(record.is_none());
            }
            other => panic!("expected issue reply, got {other:?}"),
        }

        let events = match svc
            .handle(
                Intent::new(Role::Manager, manager, IntentPayload::ViewEvents { from_seq: 1 })
                    .for_trip(trip.id)
                    .with_key(key()),
            )
            .await
            .unwrap()
        {
            IntentReply::Events(events) => events,
            other => panic!("expected events, got {other:?}"),
        };
        // Created, Assigned, StatusChanged, IssueReported; no acknowledge entry
        assert_eq!(events.len(), 4);
        assert_eq!(events[3].kind, EventKind::IssueReported);
    }

    #[tokio::test(start_paused = true)]
    async fn views_require_membership() {
        let svc = service();
        let manager = UserId::new();
        let trip = created_trip(&svc, manager).await;

        let err = svc
            .handle(
                Intent::new(Role::Shipper, UserId::new(), IntentPayload::ViewTrip)
                    .for_trip(trip.id)
                    .with_key(key()),
            )
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        let reply = svc
            .handle(
                Intent::new(Role::Shipper, trip.shipper_id, IntentPayload::ViewTrip)
                    .for_trip(trip.id)
                    .with_key(key()),
            )
            .await
            .unwrap();
        let (seen, _) = trip_of(reply);
        assert_eq!(seen.id, trip.id);
    }

    #[tokio::test(start_paused = true)]
    async fn active_trip_lookup_follows_the_driver() {
        let svc = service();
        let manager = UserId::new();
        let driver = UserId::new();
        assert!(svc.active_trip_for_driver(driver).unwrap().is_none());

        let trip = assigned_trip(&svc, manager, driver).await;
        let found = svc.active_trip_for_driver(driver).unwrap().unwrap();
        assert_eq!(found.id, trip.id);
    }
}
