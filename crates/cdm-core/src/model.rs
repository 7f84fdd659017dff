//! Identifiers and transfer state shared by every component.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Fresh random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s.trim()).map(Self)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0.hyphenated())
            }
        }
    };
}

uuid_id!(
    /// Stable identifier of a single downloadable item (one lecture asset).
    ItemId
);

uuid_id!(
    /// Identifier of a group of items (a course) whose progress is aggregated.
    GroupId
);

/// Per-item transfer state, stored as a string in the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferState {
    #[default]
    NotStarted,
    InProgress,
    Paused,
    Completed,
    Failed,
}

impl TransferState {
    pub fn as_str(self) -> &'static str {
        match self {
            TransferState::NotStarted => "not_started",
            TransferState::InProgress => "in_progress",
            TransferState::Paused => "paused",
            TransferState::Completed => "completed",
            TransferState::Failed => "failed",
        }
    }

    /// Unknown strings decode as `Failed` so a corrupt row never looks healthy.
    pub fn from_str(s: &str) -> Self {
        match s {
            "not_started" => TransferState::NotStarted,
            "in_progress" => TransferState::InProgress,
            "paused" => TransferState::Paused,
            "completed" => TransferState::Completed,
            "failed" => TransferState::Failed,
            _ => TransferState::Failed,
        }
    }

    /// States that only describe a live, in-memory handle.
    pub fn is_live(self) -> bool {
        matches!(self, TransferState::InProgress | TransferState::Paused)
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Clamp a progress fraction into `[0.0, 1.0]`; NaN counts as no progress.
pub fn clamp_progress(p: f64) -> f64 {
    if p.is_nan() {
        0.0
    } else {
        p.clamp(0.0, 1.0)
    }
}
