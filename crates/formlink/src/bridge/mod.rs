//! Client side of the HTTP introspection bridge embedded in the target application.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod client;
pub mod discovery;
pub mod probe;
pub mod protocol;

pub use client::{BridgeClient, ClientOptions};
pub use discovery::{DiscoveryOptions, EndpointDiscovery};
pub use probe::EndpointProbe;
pub use protocol::{BridgeForm, BridgeRequest, ClickTarget, ControlGeometry, ControlNode, ControlQuery};

/// A bridge listener that passed the signature probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    /// Owner of the listening socket, when the socket table reported it.
    pub process_id: Option<u32>,
    pub validated_at: DateTime<Utc>,
    pub signature_path: String,
}

impl Endpoint {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    pub(crate) fn same_listener(&self, other: &Endpoint) -> bool {
        self.host == other.host && self.port == other.port
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Which process owns the bridge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessTarget {
    /// Any local listener answering the signature.
    #[default]
    Any,
    Pid(u32),
    /// Case-insensitive substring of the executable name, re-resolved on every
    /// discovery so a restarted process with a new PID is found again.
    Name(String),
}

impl ProcessTarget {
    pub fn as_pid(&self) -> Option<u32> {
        match self {
            ProcessTarget::Pid(pid) => Some(*pid),
            _ => None,
        }
    }

    /// `None` means no PID restriction.
    pub fn resolve_pids(&self) -> Option<Vec<u32>> {
        match self {
            ProcessTarget::Any => None,
            ProcessTarget::Pid(pid) => Some(vec![*pid]),
            ProcessTarget::Name(name) => Some(crate::utils::find_pids_for_process(name)),
        }
    }

    /// Single PID for per-process platform queries; the lowest match for names.
    pub fn resolve_pid(&self) -> Option<u32> {
        self.resolve_pids().and_then(|pids| pids.into_iter().next())
    }
}

impl fmt::Display for ProcessTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessTarget::Any => f.write_str("any"),
            ProcessTarget::Pid(pid) => write!(f, "pid {pid}"),
            ProcessTarget::Name(name) => write!(f, "process '{name}'"),
        }
    }
}

impl std::str::FromStr for ProcessTarget {
    type Err = std::convert::Infallible;

    /// Digits are a PID, `*`/`any`/empty is any process, everything else a name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || s == "*" || s.eq_ignore_ascii_case("any") {
            return Ok(ProcessTarget::Any);
        }
        Ok(match s.parse::<u32>() {
            Ok(pid) => ProcessTarget::Pid(pid),
            Err(_) => ProcessTarget::Name(s.to_string()),
        })
    }
}
