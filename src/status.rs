//! Broker order statuses and the lifecycle they imply.

use std::fmt;

/// Status string reported by the broker gateway for an order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum OrderStatus {
    ApiPending,
    PendingSubmit,
    PendingCancel,
    PreSubmitted,
    Submitted,
    ApiCancelled,
    Cancelled,
    Filled,
    Inactive,
    Unknown,
}

impl OrderStatus {
    /// Parse a gateway status string. Unrecognised strings map to `Unknown`.
    pub fn parse(s: &str) -> Self {
        match s.trim() {
            "ApiPending" => OrderStatus::ApiPending,
            "PendingSubmit" => OrderStatus::PendingSubmit,
            "PendingCancel" => OrderStatus::PendingCancel,
            "PreSubmitted" => OrderStatus::PreSubmitted,
            "Submitted" => OrderStatus::Submitted,
            "ApiCancelled" => OrderStatus::ApiCancelled,
            "Cancelled" => OrderStatus::Cancelled,
            "Filled" => OrderStatus::Filled,
            "Inactive" => OrderStatus::Inactive,
            _ => OrderStatus::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::ApiPending => "ApiPending",
            OrderStatus::PendingSubmit => "PendingSubmit",
            OrderStatus::PendingCancel => "PendingCancel",
            OrderStatus::PreSubmitted => "PreSubmitted",
            OrderStatus::Submitted => "Submitted",
            OrderStatus::ApiCancelled => "ApiCancelled",
            OrderStatus::Cancelled => "Cancelled",
            OrderStatus::Filled => "Filled",
            OrderStatus::Inactive => "Inactive",
            OrderStatus::Unknown => "Unknown",
        }
    }

    /// No further transitions will be reported.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled
                | OrderStatus::Cancelled
                | OrderStatus::ApiCancelled
                | OrderStatus::Inactive
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Where a submitted order sits in its lifecycle.
///
/// ```text
/// submitted -> (acknowledged | pending) -> partially_filled* -> filled | cancelled | rejected
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Lifecycle {
    Submitted,
    Pending,
    Acknowledged,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
}

impl Lifecycle {
    /// Derive the lifecycle stage from a broker status and fill count.
    pub fn from_status(status: OrderStatus, filled: u64) -> Self {
        match status {
            OrderStatus::Filled => Lifecycle::Filled,
            OrderStatus::Cancelled | OrderStatus::ApiCancelled => Lifecycle::Cancelled,
            OrderStatus::Inactive => Lifecycle::Rejected,
            OrderStatus::ApiPending | OrderStatus::PendingSubmit | OrderStatus::Unknown => {
                if filled > 0 {
                    Lifecycle::PartiallyFilled
                } else {
                    Lifecycle::Pending
                }
            }
            OrderStatus::PreSubmitted | OrderStatus::Submitted | OrderStatus::PendingCancel => {
                if filled > 0 {
                    Lifecycle::PartiallyFilled
                } else {
                    Lifecycle::Acknowledged
                }
            }
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Lifecycle::Filled | Lifecycle::Cancelled | Lifecycle::Rejected
        )
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Lifecycle::Submitted => "submitted",
            Lifecycle::Pending => "pending",
            Lifecycle::Acknowledged => "acknowledged",
            Lifecycle::PartiallyFilled => "partially_filled",
            Lifecycle::Filled => "filled",
            Lifecycle::Cancelled => "cancelled",
            Lifecycle::Rejected => "rejected",
        };
        f.pad(s)
    }
}
