//! Persistence contracts for trips, issues and notification obligations
//!
//! The core specifies only the logical read/write contract; the storage
//! engine lives with an external collaborator. Writes issued inside a
//! trip's exclusive section are assumed durable before the section
//! releases. The in-memory implementations back the test suites and any
//! single-process deployment.

use crate::dispatcher::NotificationEvent;
use crate::errors::{DispatchError, DispatchResult};
use crate::identifiers::{EventId, IssueId, TripId, UserId};
use crate::issue::Issue;
use crate::state_machine::State;
use crate::trip::Trip;
use std::collections::HashMap;
use std::sync::RwLock;

/// Load/save contract for trip records
pub trait TripRepository: Send + Sync {
    /// Load a trip by id
    fn load(&self, id: TripId) -> DispatchResult<Option<Trip>>;

    /// Persist a trip snapshot
    fn save(&self, trip: &Trip) -> DispatchResult<()>;

    /// The driver's current non-terminal trip, if any
    fn find_active_for_driver(&self, driver: UserId) -> DispatchResult<Option<Trip>>;
}

/// Load/save contract for issue records
pub trait IssueRepository: Send + Sync {
    /// Load an issue by id
    fn load(&self, id: IssueId) -> DispatchResult<Option<Issue>>;

    /// Persist an issue snapshot
    fn save(&self, issue: &Issue) -> DispatchResult<()>;
}

/// Load/save contract for per-recipient delivery obligations
///
/// Keyed by `(event_id, recipient)`; the dispatcher persists every state
/// change so a restart resumes from `delivery_state`/`attempt_count`
/// instead of re-attempting from zero.
pub trait NotificationStore: Send + Sync {
    /// Load one obligation
    fn load(
        &self,
        event_id: EventId,
        recipient: UserId,
    ) -> DispatchResult<Option<NotificationEvent>>;

    /// Insert or update an obligation
    fn save(&self, notification: &NotificationEvent) -> DispatchResult<()>;

    /// All obligations not yet in a terminal delivery state, ordered by
    /// `(trip_id, seq)` so resumption preserves per-trip order
    fn load_incomplete(&self) -> DispatchResult<Vec<NotificationEvent>>;

    /// All known obligation keys, used to reseed the dedup index on restart
    fn known_keys(&self) -> DispatchResult<Vec<(EventId, UserId)>>;
}

fn poisoned() -> DispatchError {
    DispatchError::Storage("store lock poisoned".to_string())
}

/// In-memory trip repository
#[derive(Debug, Default)]
pub struct InMemoryTripRepository {
    trips: RwLock<HashMap<TripId, Trip>>,
}

impl InMemoryTripRepository {
    /// Create an empty repository
    pub fn new() -> Self {
        Self::default()
    }
}

impl TripRepository for InMemoryTripRepository {
    fn load(&self, id: TripId) -> DispatchResult<Option<Trip>> {
        Ok(self.trips.read().map_err(|_| poisoned())?.get(&id).cloned())
    }

    fn save(&self, trip: &Trip) -> DispatchResult<()> {
        self.trips
            .write()
            .map_err(|_| poisoned())?
            .insert(trip.id, trip.clone());
        Ok(())
    }

    fn find_active_for_driver(&self, driver: UserId) -> DispatchResult<Option<Trip>> {
        let trips = self.trips.read().map_err(|_| poisoned())?;
        let mut active: Vec<&Trip> = trips
            .values()
            .filter(|t| t.driver_id == Some(driver) && !t.status.is_terminal())
            .collect();
        // Newest first, mirroring how dispatch looks up "the" current trip
        active.sort_by_key(|t| std::cmp::Reverse(t.created_at));
        Ok(active.first().map(|t| (*t).clone()))
    }
}

/// In-memory issue repository
#[derive(Debug, Default)]
pub struct InMemoryIssueRepository {
    issues: RwLock<HashMap<IssueId, Issue>>,
}

impl InMemoryIssueRepository {
    /// Create an empty repository
    pub fn new() -> Self {
        Self::default()
    }
}

impl IssueRepository for InMemoryIssueRepository {
    fn load(&self, id: IssueId) -> DispatchResult<Option<Issue>> {
        Ok(self
            .issues
            .read()
            .map_err(|_| poisoned())?
            .get(&id)
            .cloned())
    }

    fn save(&self, issue: &Issue) -> DispatchResult<()> {
        self.issues
            .write()
            .map_err(|_| poisoned())?
            .insert(issue.id, issue.clone());
        Ok(())
    }
}

/// In-memory notification store
#[derive(Debug, Default)]
pub struct InMemoryNotificationStore {
    notifications: RwLock<HashMap<(EventId, UserId), NotificationEvent>>,
}

impl InMemoryNotificationStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

impl NotificationStore for InMemoryNotificationStore {
    fn load(
        &self,
        event_id: EventId,
        recipient: UserId,
    ) -> DispatchResult<Option<NotificationEvent>> {
        Ok(self
            .notifications
            .read()
            .map_err(|_| poisoned())?
            .get(&(event_id, recipient))
            .cloned())
    }

    fn save(&self, notification: &NotificationEvent) -> DispatchResult<()> {
        self.notifications
            .write()
            .map_err(|_| poisoned())?
            .insert(
                (notification.event_id, notification.recipient),
                notification.clone(),
            );
        Ok(())
    }

    fn load_incomplete(&self) -> DispatchResult<Vec<NotificationEvent>> {
        let map = self.notifications.read().map_err(|_| poisoned())?;
        let mut incomplete: Vec<NotificationEvent> = map
            .values()
            .filter(|n| !n.delivery_state.is_terminal())
            .cloned()
            .collect();
        incomplete.sort_by_key(|n| (n.trip_id, n.seq));
        Ok(incomplete)
    }

    fn known_keys(&self) -> DispatchResult<Vec<(EventId, UserId)>> {
        Ok(self
            .notifications
            .read()
            .map_err(|_| poisoned())?
            .keys()
            .copied()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::role::Role;
    use crate::trip::{Place, TripStateMachine, TripStatus};

    fn trip() -> Trip {
        Trip::new(
            UserId::new(),
            UserId::new(),
            UserId::new(),
            Place::new("A"),
            Place::new("B"),
            "timber".to_string(),
        )
    }

    #[test]
    fn trip_repository_save_and_load() {
        let repo = InMemoryTripRepository::new();
        let t = trip();
        repo.save(&t).unwrap();

        let loaded = repo.load(t.id).unwrap().unwrap();
        assert_eq!(loaded.id, t.id);
        assert_eq!(loaded.status, t.status);

        assert!(repo.load(TripId::new()).unwrap().is_none());
    }

    #[test]
    fn find_active_for_driver_skips_terminal_trips() {
        let repo = InMemoryTripRepository::new();
        let driver = UserId::new();

        let mut done = trip();
        TripStateMachine::assign(&mut done, driver).unwrap();
        TripStateMachine::update_status(&mut done, TripStatus::InTransit, Role::Driver, None, None)
            .unwrap();
        TripStateMachine::update_status(&mut done, TripStatus::Delivered, Role::Driver, None, None)
            .unwrap();
        TripStateMachine::update_status(&mut done, TripStatus::Completed, Role::Manager, None, None)
            .unwrap();
        repo.save(&done).unwrap();

        assert!(repo.find_active_for_driver(driver).unwrap().is_none());

        let mut current = trip();
        TripStateMachine::assign(&mut current, driver).unwrap();
        repo.save(&current).unwrap();

        let found = repo.find_active_for_driver(driver).unwrap().unwrap();
        assert_eq!(found.id, current.id);
    }

    #[test]
    fn issue_repository_save_and_load() {
        let repo = InMemoryIssueRepository::new();
        let mut t = trip();
        TripStateMachine::assign(&mut t, UserId::new()).unwrap();
        TripStateMachine::update_status(&mut t, TripStatus::InTransit, Role::Driver, None, None)
            .unwrap();
        let driver = t.driver_id.unwrap();
        let (issue, _) =
            crate::issue::IssueTracker::report(&mut t, Role::Driver, driver, "brakes".to_string())
                .unwrap();

        repo.save(&issue).unwrap();
        let loaded = repo.load(issue.id).unwrap().unwrap();
        assert_eq!(loaded.id, issue.id);
        assert_eq!(loaded.trip_id, t.id);
    }
}
