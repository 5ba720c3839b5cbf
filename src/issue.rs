//! Issue aggregate and its lifecycle tracker
//!
//! An issue is a reported problem scoped to exactly one trip:
//! `Reported -> Acknowledged -> Resolved -> Closed`. At most one active
//! (non-closed) issue may exist per trip. Reporting forces the owning trip
//! into `IssueReported`; resolution returns it to `InTransit`.

use crate::errors::{DispatchError, DispatchResult};
use crate::events::EventPayload;
use crate::identifiers::{IssueId, TripId, UserId};
use crate::role::Role;
use crate::state_machine::{guard_transition, State};
use crate::trip::{Trip, TripStateMachine, TripStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Lifecycle states of an issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IssueStatus {
    /// Freshly reported, awaiting manager attention
    Reported,
    /// A manager has taken ownership
    Acknowledged,
    /// Fixed; the trip has resumed
    Resolved,
    /// Terminal: resolution confirmed and filed
    Closed,
}

impl State for IssueStatus {
    fn name(&self) -> &'static str {
        match self {
            IssueStatus::Reported => "Reported",
            IssueStatus::Acknowledged => "Acknowledged",
            IssueStatus::Resolved => "Resolved",
            IssueStatus::Closed => "Closed",
        }
    }

    fn is_terminal(&self) -> bool {
        matches!(self, IssueStatus::Closed)
    }

    fn valid_transitions(&self) -> Vec<Self> {
        match self {
            IssueStatus::Reported => vec![IssueStatus::Acknowledged],
            IssueStatus::Acknowledged => vec![IssueStatus::Resolved],
            IssueStatus::Resolved => vec![IssueStatus::Closed],
            IssueStatus::Closed => vec![],
        }
    }
}

impl std::fmt::Display for IssueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// The issue aggregate, permanently linked to its trip
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    /// Unique identity
    pub id: IssueId,
    /// The owning trip
    pub trip_id: TripId,
    /// Current lifecycle status
    pub status: IssueStatus,
    /// Role the reporter acted under
    pub reporter_role: Role,
    /// Who reported it
    pub reporter_id: UserId,
    /// What went wrong
    pub description: String,
    /// When it was reported
    pub created_at: DateTime<Utc>,
    /// Manager-supplied resolution note, set on resolve
    pub resolution: Option<String>,
    /// The manager who resolved it
    pub resolved_by: Option<UserId>,
}

impl Issue {
    fn new(trip_id: TripId, reporter_role: Role, reporter_id: UserId, description: String) -> Self {
        Self {
            id: IssueId::new(),
            trip_id,
            status: IssueStatus::Reported,
            reporter_role,
            reporter_id,
            description,
            created_at: Utc::now(),
            resolution: None,
            resolved_by: None,
        }
    }

    /// Whether this issue still blocks its trip (anything but `Closed`)
    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }
}

/// Validates and applies issue transitions, including the forced trip
/// transitions that reporting and resolving entail
///
/// Like [`TripStateMachine`], operations are pure over the aggregates;
/// the caller persists both records inside the trip's exclusive section.
pub struct IssueTracker;

impl IssueTracker {
    /// Report a new issue against an in-transit trip. Any role may report.
    /// Enforces the one-active-issue invariant and forces the trip into
    /// `IssueReported`.
    pub fn report(
        trip: &mut Trip,
        reporter_role: Role,
        reporter_id: UserId,
        description: String,
    ) -> DispatchResult<(Issue, EventPayload)> {
        if let Some(existing) = trip.active_issue {
            return Err(DispatchError::Conflict(format!(
                "trip {} already has active issue {existing}",
                trip.id
            )));
        }
        if trip.status != TripStatus::InTransit {
            return Err(DispatchError::InvalidTransition {
                from: trip.status.name().to_string(),
                to: TripStatus::IssueReported.name().to_string(),
            });
        }

        let issue = Issue::new(trip.id, reporter_role, reporter_id, description);
        TripStateMachine::force_issue_reported(trip, issue.id)?;
        info!(trip_id = %trip.id, issue_id = %issue.id, reporter = %reporter_role, "issue reported");

        let payload = EventPayload::IssueReported {
            issue: issue.clone(),
            trip: trip.clone(),
        };
        Ok((issue, payload))
    }

    /// Acknowledge a reported issue. Manager-only, valid only from
    /// `Reported`. Changes nothing about the trip and emits no event.
    pub fn acknowledge(issue: &mut Issue, actor_role: Role) -> DispatchResult<()> {
        if actor_role != Role::Manager {
            return Err(DispatchError::UnauthorizedActor {
                role: actor_role.to_string(),
                action: "acknowledge_issue".to_string(),
            });
        }
        guard_transition(issue.status, IssueStatus::Acknowledged)?;

        issue.status = IssueStatus::Acknowledged;
        info!(issue_id = %issue.id, "issue acknowledged");
        Ok(())
    }

    /// Resolve an acknowledged issue and return the trip to `InTransit`.
    /// Manager-only.
    pub fn resolve(
        issue: &mut Issue,
        trip: &mut Trip,
        actor_role: Role,
        manager_id: UserId,
        resolution: String,
    ) -> DispatchResult<EventPayload> {
        if actor_role != Role::Manager {
            return Err(DispatchError::UnauthorizedActor {
                role: actor_role.to_string(),
                action: "resolve_issue".to_string(),
            });
        }
        guard_transition(issue.status, IssueStatus::Resolved)?;
        TripStateMachine::recover_from_issue(trip)?;

        issue.status = IssueStatus::Resolved;
        issue.resolution = Some(resolution);
        issue.resolved_by = Some(manager_id);
        info!(issue_id = %issue.id, trip_id = %trip.id, "issue resolved, trip back in transit");

        Ok(EventPayload::IssueResolved {
            issue: issue.clone(),
            trip: trip.clone(),
        })
    }

    /// Close a resolved issue, releasing the trip's active-issue slot.
    /// Manager-only; terminal.
    pub fn close(
        issue: &mut Issue,
        trip: &mut Trip,
        actor_role: Role,
    ) -> DispatchResult<EventPayload> {
        if actor_role != Role::Manager {
            return Err(DispatchError::UnauthorizedActor {
                role: actor_role.to_string(),
                action: "close_issue".to_string(),
            });
        }
        guard_transition(issue.status, IssueStatus::Closed)?;

        issue.status = IssueStatus::Closed;
        if trip.active_issue == Some(issue.id) {
            trip.active_issue = None;
        }
        info!(issue_id = %issue.id, "issue closed");

        Ok(EventPayload::IssueClosed {
            issue: issue.clone(),
        })
    }
}
