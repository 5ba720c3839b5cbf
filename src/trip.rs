//! Trip aggregate and its lifecycle state machine
//!
//! A trip is one haulage assignment from origin to destination under one
//! driver. The status graph is:
//!
//! ```text
//! Created -> Assigned -> InTransit -> Delivered -> Completed
//!                           ^    |
//!                           |    v
//!                        IssueReported
//! ```
//!
//! with `Cancelled` reachable from any non-terminal state. Transitions are
//! monotonic except for the explicit recovery edge `IssueReported ->
//! InTransit`, which only the issue tracker may take.

use crate::errors::{DispatchError, DispatchResult};
use crate::events::EventPayload;
use crate::identifiers::{IssueId, TripId, UserId};
use crate::role::Role;
use crate::state_machine::{guard_transition, State};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Average speed assumed until enough samples exist to measure one, in km/h
pub const DEFAULT_AVERAGE_SPEED_KMH: f64 = 60.0;

/// Number of trailing location samples the speed estimate averages over
pub const ETA_SPEED_SAMPLES: usize = 5;

/// Lifecycle states of a trip
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TripStatus {
    /// Created by a manager, no driver yet
    Created,
    /// Driver assigned, haul not started
    Assigned,
    /// Driver underway
    InTransit,
    /// An active issue is blocking the trip
    IssueReported,
    /// Driver delivered the cargo
    Delivered,
    /// Terminal: manager confirmed completion
    Completed,
    /// Terminal: manager cancelled the trip
    Cancelled,
}

impl State for TripStatus {
    fn name(&self) -> &'static str {
        match self {
            TripStatus::Created => "Created",
            TripStatus::Assigned => "Assigned",
            TripStatus::InTransit => "InTransit",
            TripStatus::IssueReported => "IssueReported",
            TripStatus::Delivered => "Delivered",
            TripStatus::Completed => "Completed",
            TripStatus::Cancelled => "Cancelled",
        }
    }

    fn is_terminal(&self) -> bool {
        matches!(self, TripStatus::Completed | TripStatus::Cancelled)
    }

    fn valid_transitions(&self) -> Vec<Self> {
        use TripStatus::*;
        match self {
            Created => vec![Assigned, Cancelled],
            Assigned => vec![InTransit, Cancelled],
            InTransit => vec![IssueReported, Delivered, Cancelled],
            IssueReported => vec![InTransit, Cancelled],
            Delivered => vec![Completed, Cancelled],
            Completed | Cancelled => vec![],
        }
    }
}

impl TripStatus {
    /// Role required to enter this status through `update_status`,
    /// or `None` when the status is not settable that way (creation,
    /// assignment and cancellation have dedicated operations; the issue
    /// edges belong to the issue tracker).
    fn update_actor(&self) -> Option<Role> {
        match self {
            TripStatus::InTransit | TripStatus::Delivered => Some(Role::Driver),
            TripStatus::Completed => Some(Role::Manager),
            _ => None,
        }
    }
}

impl std::fmt::Display for TripStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A WGS84 coordinate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoCoordinate {
    /// Latitude in decimal degrees
    pub latitude: f64,
    /// Longitude in decimal degrees
    pub longitude: f64,
}

impl GeoCoordinate {
    /// Create a coordinate
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Great-circle distance to `other` in kilometres (haversine)
    pub fn distance_km(&self, other: &GeoCoordinate) -> f64 {
        const EARTH_RADIUS_KM: f64 = 6371.0;

        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let dlat = (other.latitude - self.latitude).to_radians();
        let dlon = (other.longitude - self.longitude).to_radians();

        let a =
            (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        2.0 * a.sqrt().asin() * EARTH_RADIUS_KM
    }
}

/// One timestamped location sample in a trip's history
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationSample {
    /// Where the truck was
    pub coord: GeoCoordinate,
    /// When the sample was taken
    pub timestamp: DateTime<Utc>,
}

/// An origin or destination: an address plus optional coordinates
///
/// Coordinates are optional because dispatch often only has an address;
/// without destination coordinates no ETA can be derived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Place {
    /// Human-readable address
    pub address: String,
    /// Coordinates when known
    pub coord: Option<GeoCoordinate>,
}

impl Place {
    /// Create a place from an address only
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            coord: None,
        }
    }

    /// Create a place with known coordinates
    pub fn with_coord(address: impl Into<String>, coord: GeoCoordinate) -> Self {
        Self {
            address: address.into(),
            coord: Some(coord),
        }
    }
}

/// The trip aggregate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trip {
    /// Unique identity
    pub id: TripId,
    /// Current lifecycle status
    pub status: TripStatus,
    /// Assigned driver, set by `assign`
    pub driver_id: Option<UserId>,
    /// The shipper stakeholder
    pub shipper_id: UserId,
    /// The consignee stakeholder
    pub consignee_id: UserId,
    /// The managing dispatcher
    pub manager_id: UserId,
    /// Pickup location
    pub origin: Place,
    /// Delivery location
    pub destination: Place,
    /// What is being hauled
    pub cargo_description: String,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Append-only history of location samples, strictly increasing in time
    pub location_history: Vec<LocationSample>,
    /// Derived estimated arrival time, never settable directly
    pub eta_estimate: Option<DateTime<Utc>>,
    /// The currently active (non-closed) issue, at most one
    pub active_issue: Option<IssueId>,
}

impl Trip {
    /// Create a trip in `Created` state
    pub fn new(
        manager_id: UserId,
        shipper_id: UserId,
        consignee_id: UserId,
        origin: Place,
        destination: Place,
        cargo_description: String,
    ) -> Self {
        Self {
            id: TripId::new(),
            status: TripStatus::Created,
            driver_id: None,
            shipper_id,
            consignee_id,
            manager_id,
            origin,
            destination,
            cargo_description,
            created_at: Utc::now(),
            location_history: Vec::new(),
            eta_estimate: None,
            active_issue: None,
        }
    }

    /// The user holding `role` on this trip, if any
    pub fn member(&self, role: Role) -> Option<UserId> {
        match role {
            Role::Driver => self.driver_id,
            Role::Manager => Some(self.manager_id),
            Role::Shipper => Some(self.shipper_id),
            Role::Consignee => Some(self.consignee_id),
        }
    }

    /// Whether `user` holds any role on this trip
    pub fn is_member(&self, user: UserId) -> bool {
        Role::ALL.iter().any(|r| self.member(*r) == Some(user))
    }

    /// Latest location sample, if any
    pub fn current_location(&self) -> Option<&LocationSample> {
        self.location_history.last()
    }

    /// Append a sample if its timestamp is strictly greater than the last
    /// recorded one. Returns whether the sample was appended; out-of-order
    /// samples are dropped, not errored.
    fn try_append_location(&mut self, sample: LocationSample) -> bool {
        if let Some(last) = self.location_history.last() {
            if sample.timestamp <= last.timestamp {
                debug!(
                    trip_id = %self.id,
                    sample_ts = %sample.timestamp,
                    last_ts = %last.timestamp,
                    "dropping out-of-order location sample"
                );
                return false;
            }
        }
        self.location_history.push(sample);
        self.recompute_eta();
        true
    }

    /// Average speed over the trailing [`ETA_SPEED_SAMPLES`] samples, km/h.
    /// `None` with fewer than two samples or zero elapsed time.
    fn average_speed_kmh(&self) -> Option<f64> {
        let n = self.location_history.len();
        if n < 2 {
            return None;
        }
        let window = &self.location_history[n.saturating_sub(ETA_SPEED_SAMPLES)..];

        let mut distance_km = 0.0;
        for pair in window.windows(2) {
            distance_km += pair[0].coord.distance_km(&pair[1].coord);
        }
        let elapsed = window[window.len() - 1].timestamp - window[0].timestamp;
        let hours = elapsed.num_milliseconds() as f64 / 3_600_000.0;
        if hours <= 0.0 {
            return None;
        }
        Some(distance_km / hours)
    }

    /// Recompute the derived ETA: remaining distance to the destination
    /// divided by the measured average speed, falling back to
    /// [`DEFAULT_AVERAGE_SPEED_KMH`] until a speed can be measured.
    fn recompute_eta(&mut self) {
        let (Some(dest), Some(last)) = (self.destination.coord, self.location_history.last())
        else {
            self.eta_estimate = None;
            return;
        };

        let speed = match self.average_speed_kmh() {
            Some(s) if s > 0.0 => s,
            _ => DEFAULT_AVERAGE_SPEED_KMH,
        };
        let remaining_km = last.coord.distance_km(&dest);
        let seconds = (remaining_km / speed * 3600.0).round() as i64;
        self.eta_estimate = Some(last.timestamp + Duration::seconds(seconds));
    }
}

/// Validates and applies trip transitions
///
/// Pure over the aggregate: every operation mutates the given trip and
/// returns the payload snapshot for the single event the operation emits.
/// Persistence and log appends happen in the caller's exclusive section.
pub struct TripStateMachine;

impl TripStateMachine {
    /// Create a new trip. Fails with an authorization rejection when the
    /// caller does not act as Manager.
    pub fn create(
        actor_role: Role,
        manager_id: UserId,
        shipper_id: UserId,
        consignee_id: UserId,
        origin: Place,
        destination: Place,
        cargo_description: String,
    ) -> DispatchResult<(Trip, EventPayload)> {
        if actor_role != Role::Manager {
            return Err(DispatchError::UnauthorizedActor {
                role: actor_role.to_string(),
                action: "create_trip".to_string(),
            });
        }

        let trip = Trip::new(
            manager_id,
            shipper_id,
            consignee_id,
            origin,
            destination,
            cargo_description,
        );
        info!(trip_id = %trip.id, "trip created");
        let payload = EventPayload::TripCreated { trip: trip.clone() };
        Ok((trip, payload))
    }

    /// Assign a driver. Valid only from `Created`.
    pub fn assign(trip: &mut Trip, driver_id: UserId) -> DispatchResult<EventPayload> {
        guard_transition(trip.status, TripStatus::Assigned)?;

        trip.driver_id = Some(driver_id);
        trip.status = TripStatus::Assigned;
        info!(trip_id = %trip.id, driver = %driver_id, "driver assigned");
        Ok(EventPayload::TripAssigned {
            trip: trip.clone(),
            driver_id,
        })
    }

    /// Move the trip to `new_status`, validating both the edge and the
    /// actor-role/status pairing. An optional location sample is appended
    /// to the history (out-of-order samples silently dropped) and the ETA
    /// recomputed. An optional note travels in the payload snapshot.
    pub fn update_status(
        trip: &mut Trip,
        new_status: TripStatus,
        actor_role: Role,
        note: Option<String>,
        location: Option<LocationSample>,
    ) -> DispatchResult<EventPayload> {
        guard_transition(trip.status, new_status)?;

        // Statuses owned by dedicated operations (assignment, cancellation,
        // issue edges) are not reachable through update_status.
        let required = new_status.update_actor().ok_or_else(|| {
            DispatchError::InvalidTransition {
                from: trip.status.name().to_string(),
                to: new_status.name().to_string(),
            }
        })?;
        if actor_role != required {
            return Err(DispatchError::UnauthorizedActor {
                role: actor_role.to_string(),
                action: format!("set status {new_status}"),
            });
        }

        let from = trip.status;
        if let Some(sample) = location {
            trip.try_append_location(sample);
        }
        trip.status = new_status;
        info!(trip_id = %trip.id, %from, to = %new_status, "trip status changed");

        let payload = match new_status {
            TripStatus::Completed => EventPayload::TripCompleted { trip: trip.clone() },
            _ => EventPayload::StatusChanged {
                trip: trip.clone(),
                from,
                to: new_status,
                note,
            },
        };
        Ok(payload)
    }

    /// Record a location sample while the trip is underway. Returns `None`
    /// when the sample is dropped for being out of order; dropped samples
    /// are not transitions and emit no event.
    pub fn record_location(
        trip: &mut Trip,
        coord: GeoCoordinate,
        timestamp: DateTime<Utc>,
    ) -> DispatchResult<Option<EventPayload>> {
        if !matches!(
            trip.status,
            TripStatus::InTransit | TripStatus::IssueReported
        ) {
            return Err(DispatchError::Conflict(format!(
                "cannot record location while trip is {}",
                trip.status
            )));
        }

        let sample = LocationSample { coord, timestamp };
        if !trip.try_append_location(sample) {
            return Ok(None);
        }
        Ok(Some(EventPayload::LocationUpdated {
            trip_id: trip.id,
            sample,
            eta: trip.eta_estimate,
        }))
    }

    /// Cancel the trip. Valid from any non-terminal state; irreversible.
    pub fn cancel(trip: &mut Trip, reason: String) -> DispatchResult<EventPayload> {
        guard_transition(trip.status, TripStatus::Cancelled)?;

        trip.status = TripStatus::Cancelled;
        info!(trip_id = %trip.id, %reason, "trip cancelled");
        Ok(EventPayload::TripCancelled {
            trip: trip.clone(),
            reason,
        })
    }

    /// Force the trip into `IssueReported`. Only the issue tracker calls
    /// this, after accepting a new active issue against the trip.
    pub(crate) fn force_issue_reported(
        trip: &mut Trip,
        issue_id: IssueId,
    ) -> DispatchResult<()> {
        guard_transition(trip.status, TripStatus::IssueReported)?;
        trip.status = TripStatus::IssueReported;
        trip.active_issue = Some(issue_id);
        Ok(())
    }

    /// Return the trip to `InTransit` after its issue was resolved. The
    /// recovery edge is the single non-monotonic transition in the graph.
    pub(crate) fn recover_from_issue(trip: &mut Trip) -> DispatchResult<()> {
        guard_transition(trip.status, TripStatus::InTransit)?;
        trip.status = TripStatus::InTransit;
        Ok(())
    }
}
