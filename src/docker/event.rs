//! Docker event payloads and their mapping onto status masks.
//!
//! Each decoded record declares a kind in its `Type` field. Container and
//! network records are deserialized into typed shapes and their `Action`
//! string is mapped onto [`ContainerStatus`] or [`NetworkStatus`]. Any other
//! kind is rejected with [`EventError::UnknownKind`].
//!
//! Action mapping capitalizes the first letter and looks the result up
//! against the status member names (`start` → `Start`). The daemon's exec
//! actions carry the command after the name (`exec_start: sh -c ...`), so
//! anything beginning with `exec_create`, `exec_detach` or `exec_start` maps
//! straight to the matching exec status. Unmapped actions resolve to `NONE`;
//! the daemon's vocabulary grows over time and that is not an error.

use std::collections::HashMap;
use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::docker::decoder::RawEventRecord;
use crate::docker::error::EventError;

/// A bitmask over lifecycle phases, usable both as "last observed status"
/// and as "set of statuses a waiter accepts".
pub trait StatusMask:
    Copy + Eq + Send + Sync + fmt::Debug + fmt::Display + 'static
{
    /// The empty mask.
    const NONE: Self;

    /// Whether the two masks share at least one bit.
    fn intersects(self, other: Self) -> bool;
}

macro_rules! status_mask {
    (
        $(#[$meta:meta])*
        $name:ident { $($konst:ident = $bit:expr => $label:literal,)+ }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
        pub struct $name(u32);

        impl $name {
            /// No phase.
            pub const NONE: Self = Self(0);
            $(
                #[doc = concat!("`", $label, "` phase.")]
                pub const $konst: Self = Self(1 << $bit);
            )+

            const NAMED: &'static [(&'static str, Self)] = &[$(($label, Self::$konst),)+];

            /// Raw bit representation.
            pub const fn bits(self) -> u32 {
                self.0
            }

            /// Whether no bit is set.
            pub const fn is_none(self) -> bool {
                self.0 == 0
            }

            /// Whether every bit of `other` is set in `self`.
            pub const fn contains(self, other: Self) -> bool {
                self.0 & other.0 == other.0
            }

            /// Whether the two masks share at least one bit.
            pub const fn intersects(self, other: Self) -> bool {
                self.0 & other.0 != 0
            }

            /// Look up a single phase by its exact member name (`"ExecStart"`).
            pub fn from_name(name: &str) -> Option<Self> {
                if name == "None" {
                    return Some(Self::NONE);
                }
                Self::NAMED
                    .iter()
                    .find(|(label, _)| *label == name)
                    .map(|(_, status)| *status)
            }
        }

        impl StatusMask for $name {
            const NONE: Self = Self(0);

            fn intersects(self, other: Self) -> bool {
                $name::intersects(self, other)
            }
        }

        impl BitOr for $name {
            type Output = Self;

            fn bitor(self, rhs: Self) -> Self {
                Self(self.0 | rhs.0)
            }
        }

        impl BitOrAssign for $name {
            fn bitor_assign(&mut self, rhs: Self) {
                self.0 |= rhs.0;
            }
        }

        impl BitAnd for $name {
            type Output = Self;

            fn bitand(self, rhs: Self) -> Self {
                Self(self.0 & rhs.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                if self.is_none() {
                    return f.write_str("None");
                }
                let mut first = true;
                for (label, status) in Self::NAMED {
                    if self.contains(*status) {
                        if !first {
                            f.write_str(" | ")?;
                        }
                        f.write_str(label)?;
                        first = false;
                    }
                }
                Ok(())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self)
            }
        }

        /// Parses `"Start | ExecStart"` style masks.
        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.split('|')
                    .map(str::trim)
                    .filter(|part| !part.is_empty())
                    .try_fold(Self::NONE, |mask, part| {
                        Self::from_name(part)
                            .map(|status| mask | status)
                            .ok_or_else(|| {
                                format!("unknown {} '{}'", stringify!($name), part)
                            })
                    })
            }
        }
    };
}

status_mask! {
    /// Container lifecycle phases reported by the daemon.
    ContainerStatus {
        ATTACH = 0 => "Attach",
        COMMIT = 1 => "Commit",
        COPY = 2 => "Copy",
        CREATE = 3 => "Create",
        DESTROY = 4 => "Destroy",
        DETACH = 5 => "Detach",
        DIE = 6 => "Die",
        EXEC_CREATE = 7 => "ExecCreate",
        EXEC_DETACH = 8 => "ExecDetach",
        EXEC_START = 9 => "ExecStart",
        EXPORT = 10 => "Export",
        HEALTH_STATUS = 11 => "HealthStatus",
        KILL = 12 => "Kill",
        OOM = 13 => "OOM",
        PAUSE = 14 => "Pause",
        RENAME = 15 => "Rename",
        RESIZE = 16 => "Resize",
        RESTART = 17 => "Restart",
        START = 18 => "Start",
        STOP = 19 => "Stop",
        TOP = 20 => "Top",
        UNPAUSE = 21 => "Unpause",
        UPDATE = 22 => "Update",
    }
}

status_mask! {
    /// Network lifecycle phases reported by the daemon.
    NetworkStatus {
        CREATE = 0 => "Create",
        CONNECT = 1 => "Connect",
        DESTROY = 2 => "Destroy",
        DISCONNECT = 3 => "Disconnect",
        REMOVE = 4 => "Remove",
    }
}

/// Declared kind of an event record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    Container,
    Network,
    Other(String),
}

impl EventKind {
    fn parse(kind: &str) -> Self {
        match kind {
            "container" => Self::Container,
            "network" => Self::Network,
            other => Self::Other(other.to_string()),
        }
    }
}

/// The object an event refers to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventActor {
    #[serde(rename = "ID")]
    pub id: Option<String>,
    #[serde(rename = "Attributes")]
    pub attributes: Option<HashMap<String, String>>,
}

impl EventActor {
    fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.as_ref()?.get(key).map(String::as_str)
    }
}

/// A container-scoped lifecycle event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerEvent {
    #[serde(rename = "Action")]
    pub action: Option<String>,
    /// Legacy mirror of `Action` still sent by older daemons.
    pub status: Option<String>,
    pub id: Option<String>,
    /// Image the container was created from (legacy field).
    pub from: Option<String>,
    #[serde(rename = "Actor")]
    pub actor: Option<EventActor>,
    pub scope: Option<String>,
    pub time: Option<i64>,
    #[serde(rename = "timeNano")]
    pub time_nano: Option<i64>,
}

impl ContainerEvent {
    /// Action name, falling back to the legacy `status` field.
    pub fn action(&self) -> &str {
        self.action
            .as_deref()
            .or(self.status.as_deref())
            .unwrap_or_default()
    }

    /// Image name, from the legacy field or the actor attributes.
    pub fn image(&self) -> Option<&str> {
        self.from
            .as_deref()
            .or_else(|| self.actor.as_ref()?.attribute("image"))
    }

    /// Container name from the actor attributes.
    pub fn container_name(&self) -> Option<&str> {
        self.actor.as_ref()?.attribute("name")
    }

    /// Event time, when the daemon sent one.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        event_time(self.time, self.time_nano)
    }

    /// Whether this event is about the container named `name`.
    ///
    /// Matches the actor's `name` attribute, or an id equal to `name`.
    pub fn is_for(&self, name: &str) -> bool {
        self.container_name() == Some(name)
            || self.actor.as_ref().and_then(|a| a.id.as_deref()) == Some(name)
            || self.id.as_deref() == Some(name)
    }

    /// Status this event maps to.
    pub fn status(&self) -> ContainerStatus {
        container_status_for(self.action())
    }
}

/// A network-scoped lifecycle event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkEvent {
    #[serde(rename = "Action")]
    pub action: Option<String>,
    #[serde(rename = "Actor")]
    pub actor: Option<EventActor>,
    pub scope: Option<String>,
    pub time: Option<i64>,
    #[serde(rename = "timeNano")]
    pub time_nano: Option<i64>,
}

impl NetworkEvent {
    /// Action name.
    pub fn action(&self) -> &str {
        self.action.as_deref().unwrap_or_default()
    }

    /// Event time, when the daemon sent one.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        event_time(self.time, self.time_nano)
    }

    /// Status this event maps to.
    pub fn status(&self) -> NetworkStatus {
        network_status_for(self.action())
    }
}

/// A record after classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassifiedEvent {
    Container {
        event: ContainerEvent,
        status: ContainerStatus,
    },
    Network {
        event: NetworkEvent,
        status: NetworkStatus,
    },
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "Type")]
    kind: String,
}

/// Classify one decoded record.
pub fn classify(record: &RawEventRecord) -> Result<ClassifiedEvent, EventError> {
    let text = record.as_str();
    let envelope: Envelope = serde_json::from_str(text)?;

    match EventKind::parse(&envelope.kind) {
        EventKind::Container => {
            let event: ContainerEvent = serde_json::from_str(text)?;
            let status = event.status();
            Ok(ClassifiedEvent::Container { event, status })
        }
        EventKind::Network => {
            let event: NetworkEvent = serde_json::from_str(text)?;
            let status = event.status();
            Ok(ClassifiedEvent::Network { event, status })
        }
        EventKind::Other(kind) => Err(EventError::UnknownKind(kind)),
    }
}

/// Map a container action onto its status.
pub fn container_status_for(action: &str) -> ContainerStatus {
    if action.starts_with("exec_create") {
        return ContainerStatus::EXEC_CREATE;
    }
    if action.starts_with("exec_detach") {
        return ContainerStatus::EXEC_DETACH;
    }
    if action.starts_with("exec_start") {
        return ContainerStatus::EXEC_START;
    }

    ContainerStatus::from_name(&capitalize(action)).unwrap_or_else(|| {
        tracing::debug!(action, "Unmapped container action");
        ContainerStatus::NONE
    })
}

/// Map a network action onto its status.
pub fn network_status_for(action: &str) -> NetworkStatus {
    NetworkStatus::from_name(&capitalize(action)).unwrap_or_else(|| {
        tracing::debug!(action, "Unmapped network action");
        NetworkStatus::NONE
    })
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn event_time(secs: Option<i64>, nanos: Option<i64>) -> Option<DateTime<Utc>> {
    match (nanos, secs) {
        (Some(nanos), _) => Some(DateTime::from_timestamp_nanos(nanos)),
        (None, Some(secs)) => DateTime::from_timestamp(secs, 0),
        (None, None) => None,
    }
}
