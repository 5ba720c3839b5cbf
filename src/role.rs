//! Stakeholder roles and the static permission table
//!
//! Role is a closed tagged variant; there is no per-role handler object or
//! virtual dispatch. Authorization is a pure function over `(role, action)`
//! backed by the table below. Per-edge checks (e.g. which role may enter
//! `Delivered`) live in the state machines; this table gates only whether a
//! role may attempt an action at all.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The four stakeholder roles of a trip
///
/// A user may hold several role identities, but each intent acts under
/// exactly one role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// The driver carrying out the haul
    Driver,
    /// The dispatch manager coordinating trips
    Manager,
    /// The party shipping the cargo
    Shipper,
    /// The party receiving the cargo
    Consignee,
}

impl Role {
    /// All roles, in a fixed order
    pub const ALL: [Role; 4] = [Role::Driver, Role::Manager, Role::Shipper, Role::Consignee];

    /// Stable name for logging and error messages
    pub fn name(&self) -> &'static str {
        match self {
            Role::Driver => "Driver",
            Role::Manager => "Manager",
            Role::Shipper => "Shipper",
            Role::Consignee => "Consignee",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Actions a stakeholder can request against a trip or issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    /// Create a new trip
    CreateTrip,
    /// Assign a driver to a created trip
    AssignDriver,
    /// Move the trip to a new status
    UpdateStatus,
    /// Record a location sample for an in-flight trip
    RecordLocation,
    /// Cancel a non-terminal trip
    CancelTrip,
    /// Report an issue against an in-transit trip
    ReportIssue,
    /// Acknowledge a reported issue
    AcknowledgeIssue,
    /// Resolve an acknowledged issue
    ResolveIssue,
    /// Close a resolved issue
    CloseIssue,
    /// Send a free-text message to another stakeholder on the same trip
    SendMessage,
    /// Read the current trip snapshot
    ViewTrip,
    /// Read the accepted transitions of a trip
    ViewEvents,
}

impl Action {
    /// Stable name for logging and error messages
    pub fn name(&self) -> &'static str {
        match self {
            Action::CreateTrip => "create_trip",
            Action::AssignDriver => "assign_driver",
            Action::UpdateStatus => "update_status",
            Action::RecordLocation => "record_location",
            Action::CancelTrip => "cancel_trip",
            Action::ReportIssue => "report_issue",
            Action::AcknowledgeIssue => "acknowledge_issue",
            Action::ResolveIssue => "resolve_issue",
            Action::CloseIssue => "close_issue",
            Action::SendMessage => "send_message",
            Action::ViewTrip => "view_trip",
            Action::ViewEvents => "view_events",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Check whether `role` may attempt `action`
///
/// Any role may report an issue, message other stakeholders and read the
/// trips it belongs to. Mutating the trip itself is split between Manager
/// (creation, assignment, completion, cancellation, issue oversight) and
/// Driver (progress and location).
pub fn is_allowed(role: Role, action: Action) -> bool {
    use Action::*;
    use Role::*;

    match action {
        CreateTrip | AssignDriver | CancelTrip => role == Manager,
        AcknowledgeIssue | ResolveIssue | CloseIssue => role == Manager,
        UpdateStatus => matches!(role, Driver | Manager),
        RecordLocation => role == Driver,
        ReportIssue | SendMessage | ViewTrip | ViewEvents => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(Role::Manager, Action::CreateTrip => true)]
    #[test_case(Role::Driver, Action::CreateTrip => false)]
    #[test_case(Role::Shipper, Action::CreateTrip => false)]
    #[test_case(Role::Manager, Action::AssignDriver => true)]
    #[test_case(Role::Consignee, Action::AssignDriver => false)]
    #[test_case(Role::Driver, Action::UpdateStatus => true)]
    #[test_case(Role::Manager, Action::UpdateStatus => true)]
    #[test_case(Role::Shipper, Action::UpdateStatus => false)]
    #[test_case(Role::Driver, Action::RecordLocation => true)]
    #[test_case(Role::Manager, Action::RecordLocation => false)]
    #[test_case(Role::Manager, Action::CancelTrip => true)]
    #[test_case(Role::Driver, Action::CancelTrip => false)]
    #[test_case(Role::Manager, Action::AcknowledgeIssue => true)]
    #[test_case(Role::Driver, Action::AcknowledgeIssue => false)]
    #[test_case(Role::Manager, Action::ResolveIssue => true)]
    #[test_case(Role::Shipper, Action::ResolveIssue => false)]
    #[test_case(Role::Manager, Action::CloseIssue => true)]
    #[test_case(Role::Consignee, Action::CloseIssue => false)]
    fn permission_table(role: Role, action: Action) -> bool {
        is_allowed(role, action)
    }

    #[test]
    fn every_role_may_report_message_and_view() {
        for role in Role::ALL {
            assert!(is_allowed(role, Action::ReportIssue));
            assert!(is_allowed(role, Action::SendMessage));
            assert!(is_allowed(role, Action::ViewTrip));
            assert!(is_allowed(role, Action::ViewEvents));
        }
    }

    #[test]
    fn role_names_are_stable() {
        assert_eq!(Role::Driver.to_string(), "Driver");
        assert_eq!(Role::Manager.to_string(), "Manager");
        assert_eq!(Action::ReportIssue.to_string(), "report_issue");
    }

    #[test]
    fn role_serde_roundtrip() {
        for role in Role::ALL {
            let json = serde_json::to_string(&role).unwrap();
            let back: Role = serde_json::from_str(&json).unwrap();
            assert_eq!(role, back);
        }
    }
}
