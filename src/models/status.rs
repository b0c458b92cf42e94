use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Created,
    Searching,
    Offered,
    Accepted,
    EnRoute,
    ArrivedPickup,
    PickedUp,
    EnRouteDropoff,
    Delivered,
    Completed,
    Cancelled,
    Unmatched,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Created => "created",
            BookingStatus::Searching => "searching",
            BookingStatus::Offered => "offered",
            BookingStatus::Accepted => "accepted",
            BookingStatus::EnRoute => "en_route",
            BookingStatus::ArrivedPickup => "arrived_pickup",
            BookingStatus::PickedUp => "picked_up",
            BookingStatus::EnRouteDropoff => "en_route_dropoff",
            BookingStatus::Delivered => "delivered",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Unmatched => "unmatched",
        }
    }

    /// No transition of any kind leaves a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BookingStatus::Cancelled | BookingStatus::Unmatched | BookingStatus::Completed
        )
    }

    /// True for every status reached through a courier accepting the offer.
    pub fn is_matched(&self) -> bool {
        matches!(
            self,
            BookingStatus::Accepted
                | BookingStatus::EnRoute
                | BookingStatus::ArrivedPickup
                | BookingStatus::PickedUp
                | BookingStatus::EnRouteDropoff
                | BookingStatus::Delivered
                | BookingStatus::Completed
        )
    }

    pub fn is_editable(&self) -> bool {
        matches!(self, BookingStatus::Created | BookingStatus::Searching)
    }

    /// The single progress stage that may follow this one.
    pub fn next_progress(&self) -> Option<BookingStatus> {
        match self {
            BookingStatus::Accepted => Some(BookingStatus::EnRoute),
            BookingStatus::EnRoute => Some(BookingStatus::ArrivedPickup),
            BookingStatus::ArrivedPickup => Some(BookingStatus::PickedUp),
            BookingStatus::PickedUp => Some(BookingStatus::EnRouteDropoff),
            BookingStatus::EnRouteDropoff => Some(BookingStatus::Delivered),
            _ => None,
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate operations, named in state conflict errors.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    StartSearching,
    Offer,
    Accept,
    Decline,
    Expire,
    Edit,
    Cancel,
    MarkUnmatched,
    Complete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::StartSearching => "start searching",
            Operation::Offer => "offer",
            Operation::Accept => "accept",
            Operation::Decline => "decline",
            Operation::Expire => "expire offer",
            Operation::Edit => "edit",
            Operation::Cancel => "cancel",
            Operation::MarkUnmatched => "mark unmatched",
            Operation::Complete => "complete",
        };
        f.write_str(name)
    }
}
