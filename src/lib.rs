//! Dispatch domain - trip lifecycle and notification fan-out for truck deliveries
//!
//! This crate is the chat-facing core of a small haulage dispatch system.
//! Four stakeholder roles (driver, manager, shipper, consignee) act on
//! trips through normalized [`Intent`]s; every accepted transition is
//! recorded exactly once in a per-trip append-only [`EventLog`] and fanned
//! out to the affected stakeholders by the [`NotificationDispatcher`].
//!
//! # Key concepts
//!
//! - **Trip**: one haulage assignment with a validated lifecycle
//!   (`Created -> Assigned -> InTransit -> Delivered -> Completed`, plus
//!   issue and cancellation edges)
//! - **Issue**: a reported problem scoped to one trip; at most one active
//!   issue per trip, with its own `Reported -> Acknowledged -> Resolved ->
//!   Closed` lifecycle
//! - **Role router**: the single authorization gate; a pure table over
//!   `(role, action)`
//! - **Event log**: per-trip total order of accepted transitions with
//!   idempotent replay
//! - **Notification dispatcher**: at-least-once delivery with bounded
//!   backoff, deduplicated per `(event, recipient)`, degrading exhausted
//!   deliveries into manager alerts
//!
//! Message text rendering and the chat transport itself live outside this
//! crate, behind the [`NotificationTransport`] trait.

#![warn(missing_docs)]

pub mod dispatcher;
pub mod errors;
pub mod event_log;
pub mod events;
pub mod identifiers;
pub mod intent;
pub mod issue;
pub mod role;
pub mod service;
pub mod state_machine;
pub mod store;
pub mod trip;

pub use dispatcher::{
    recipient_roles, BackoffPolicy, DeliveryResult, DeliveryState, NotificationDispatcher,
    NotificationEvent, NotificationTransport,
};
pub use errors::{DispatchError, DispatchResult};
pub use event_log::{EventLog, InMemoryEventLog};
pub use events::{EventKind, EventPayload, EventRecord};
pub use identifiers::{EventId, IdempotencyKey, IssueId, TripId, UserId};
pub use intent::{Intent, IntentPayload, RoleRouter};
pub use issue::{Issue, IssueStatus, IssueTracker};
pub use role::{is_allowed, Action, Role};
pub use service::{DispatchService, IntentReply};
pub use state_machine::State;
pub use store::{
    InMemoryIssueRepository, InMemoryNotificationStore, InMemoryTripRepository, IssueRepository,
    NotificationStore, TripRepository,
};
pub use trip::{
    GeoCoordinate, LocationSample, Place, Trip, TripStateMachine, TripStatus,
    DEFAULT_AVERAGE_SPEED_KMH,
};
