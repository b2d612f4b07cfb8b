use std::fmt;
use std::str::FromStr;

use diesel_derive_enum::DbEnum;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

/// Which recipient pool a send addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, DbEnum)]
#[db_enum(existing_type_path = "crate::schema::sql_types::TargetKind")]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Community,
    Event,
}

/// Addressing of a send: the whole community pool or one event's registrants.
///
/// The two pools are disjoint; a phone registered for an event may also be a
/// community member and is resolved independently for each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "event_id", rename_all = "lowercase")]
pub enum Target {
    Community,
    Event(i64),
}

impl Target {
    /// Rebuilds a target from its stored columns.
    pub fn from_parts(kind: TargetKind, event_id: Option<i64>) -> AppResult<Self> {
        match (kind, event_id) {
            (TargetKind::Community, None) => Ok(Target::Community),
            (TargetKind::Event, Some(id)) => Ok(Target::Event(id)),
            (TargetKind::Community, Some(id)) => Err(AppError::validation(
                "target",
                format!("community target cannot carry event id {}", id),
            )),
            (TargetKind::Event, None) => Err(AppError::validation(
                "target",
                "event target requires an event id",
            )),
        }
    }

    pub fn kind(&self) -> TargetKind {
        match self {
            Target::Community => TargetKind::Community,
            Target::Event(_) => TargetKind::Event,
        }
    }

    pub fn event_id(&self) -> Option<i64> {
        match self {
            Target::Community => None,
            Target::Event(id) => Some(*id),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Community => f.write_str("community"),
            Target::Event(id) => write!(f, "event:{}", id),
        }
    }
}

/// Parses `community` or `event:<id>`.
impl FromStr for Target {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s.trim().to_lowercase();
        if value == "community" {
            return Ok(Target::Community);
        }

        let id = value
            .strip_prefix("event:")
            .ok_or_else(|| {
                AppError::validation(
                    "target",
                    format!("unknown target '{}', expected 'community' or 'event:<id>'", s),
                )
            })?
            .parse::<i64>()
            .map_err(|_| AppError::validation("target", format!("invalid event id in '{}'", s)))?;

        if id <= 0 {
            return Err(AppError::validation(
                "target",
                format!("event id must be positive, got {}", id),
            ));
        }

        Ok(Target::Event(id))
    }
}
