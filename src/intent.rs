//! Normalized intents and the role router
//!
//! Every inbound interaction arrives as an [`Intent`]: who is acting, under
//! which role, what they want to do, and the action-specific payload. The
//! [`RoleRouter`] is the single authorization gate; it validates the
//! intent's shape and checks the static permission table before any state
//! machine runs. Per-edge checks (which role may enter which status) stay
//! in the state machines.

use crate::errors::{DispatchError, DispatchResult};
use crate::identifiers::{IdempotencyKey, IssueId, TripId, UserId};
use crate::role::{is_allowed, Action, Role};
use crate::trip::{GeoCoordinate, LocationSample, Place, TripStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// One normalized inbound interaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Intent {
    /// Role the actor acts under for this intent
    pub role: Role,
    /// Who is acting
    pub actor_id: UserId,
    /// What they want to do
    pub action: Action,
    /// Target trip; required for everything but trip creation
    pub trip_id: Option<TripId>,
    /// Target issue; required for acknowledge, resolve and close
    pub issue_id: Option<IssueId>,
    /// Action-specific payload
    pub payload: IntentPayload,
    /// Transport-supplied replay-protection key; intents arriving without
    /// one are rejected by the router
    pub idempotency_key: Option<IdempotencyKey>,
}

/// Action-specific payload of an intent
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum IntentPayload {
    /// Create a new trip; the acting manager becomes its manager
    CreateTrip {
        /// The shipping party
        shipper_id: UserId,
        /// The receiving party
        consignee_id: UserId,
        /// Pickup location
        origin: Place,
        /// Delivery location
        destination: Place,
        /// What is being hauled
        cargo_description: String,
    },
    /// Assign a driver to a created trip
    AssignDriver {
        /// The driver to assign
        driver_id: UserId,
    },
    /// Move the trip to a new status
    UpdateStatus {
        /// Target status
        new_status: TripStatus,
        /// Optional free-text note carried with the change
        note: Option<String>,
        /// Optional location sample taken with the change
        location: Option<LocationSample>,
    },
    /// Record a location sample for an in-flight trip
    RecordLocation {
        /// Where the truck is
        coord: GeoCoordinate,
        /// When the sample was taken
        timestamp: DateTime<Utc>,
    },
    /// Cancel a non-terminal trip
    CancelTrip {
        /// Why the trip is cancelled
        reason: String,
    },
    /// Report an issue against an in-transit trip
    ReportIssue {
        /// What went wrong
        description: String,
    },
    /// Acknowledge a reported issue
    AcknowledgeIssue,
    /// Resolve an acknowledged issue
    ResolveIssue {
        /// How it was fixed
        resolution: String,
    },
    /// Close a resolved issue
    CloseIssue,
    /// Send a free-text message to another stakeholder on the same trip
    SendMessage {
        /// Role the message is addressed to
        to: Role,
        /// Message body
        body: String,
    },
    /// Read the current trip snapshot
    ViewTrip,
    /// Read the accepted transitions of a trip
    ViewEvents {
        /// First sequence number to return (1-based, inclusive)
        from_seq: u64,
    },
}

impl IntentPayload {
    /// The action this payload shape belongs to
    pub fn action(&self) -> Action {
        match self {
            IntentPayload::CreateTrip { .. } => Action::CreateTrip,
            IntentPayload::AssignDriver { .. } => Action::AssignDriver,
            IntentPayload::UpdateStatus { .. } => Action::UpdateStatus,
            IntentPayload::RecordLocation { .. } => Action::RecordLocation,
            IntentPayload::CancelTrip { .. } => Action::CancelTrip,
            IntentPayload::ReportIssue { .. } => Action::ReportIssue,
            IntentPayload::AcknowledgeIssue => Action::AcknowledgeIssue,
            IntentPayload::ResolveIssue { .. } => Action::ResolveIssue,
            IntentPayload::CloseIssue => Action::CloseIssue,
            IntentPayload::SendMessage { .. } => Action::SendMessage,
            IntentPayload::ViewTrip => Action::ViewTrip,
            IntentPayload::ViewEvents { .. } => Action::ViewEvents,
        }
    }
}

impl Intent {
    /// Build an intent; the action is taken from the payload shape
    pub fn new(role: Role, actor_id: UserId, payload: IntentPayload) -> Self {
        Self {
            role,
            actor_id,
            action: payload.action(),
            trip_id: None,
            issue_id: None,
            payload,
            idempotency_key: None,
        }
    }

    /// Target a trip
    pub fn for_trip(mut self, trip_id: TripId) -> Self {
        self.trip_id = Some(trip_id);
        self
    }

    /// Target an issue
    pub fn for_issue(mut self, issue_id: IssueId) -> Self {
        self.issue_id = Some(issue_id);
        self
    }

    /// Attach a replay-protection key
    pub fn with_key(mut self, key: IdempotencyKey) -> Self {
        self.idempotency_key = Some(key);
        self
    }
}

/// The single authorization gate in front of the state machines
pub struct RoleRouter;

impl RoleRouter {
    /// Validate shape and permission. Malformed intents (wrong payload for
    /// the action, missing target ids) are rejected before the permission
    /// check so a caller never learns permissions from a broken request.
    pub fn authorize(intent: &Intent) -> DispatchResult<()> {
        if intent.payload.action() != intent.action {
            return Err(DispatchError::MalformedIntent(format!(
                "payload does not match action {}",
                intent.action
            )));
        }

        let needs_trip = intent.action != Action::CreateTrip;
        if needs_trip && intent.trip_id.is_none() {
            return Err(DispatchError::MalformedIntent(format!(
                "{} requires a trip id",
                intent.action
            )));
        }

        let needs_issue = matches!(
            intent.action,
            Action::AcknowledgeIssue | Action::ResolveIssue | Action::CloseIssue
        );
        if needs_issue && intent.issue_id.is_none() {
            return Err(DispatchError::MalformedIntent(format!(
                "{} requires an issue id",
                intent.action
            )));
        }

        if intent.idempotency_key.is_none() {
            return Err(DispatchError::MalformedIntent(
                "intent requires an idempotency key".to_string(),
            ));
        }

        if !is_allowed(intent.role, intent.action) {
            debug!(role = %intent.role, action = %intent.action, "intent refused by permission table");
            return Err(DispatchError::UnauthorizedActor {
                role: intent.role.to_string(),
                action: intent.action.to_string(),
            });
        }
        Ok(())
    }
}
