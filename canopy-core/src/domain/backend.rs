//! Backend and processing service domain model
//!
//! A backend is a named group of remote processing services able to run a
//! subset of pipelines. Each processing service carries a liveness triple
//! written by the liveness monitor and read by service selection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;
use uuid::Uuid;

/// A group of processing services, the unit of capacity scaling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Backend {
    pub id: Uuid,
    pub name: String,

    /// Pipelines this backend can execute
    pub pipelines: BTreeSet<Uuid>,

    pub created_at: DateTime<Utc>,
}

impl Backend {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            pipelines: BTreeSet::new(),
            created_at: Utc::now(),
        }
    }
}

/// Remote inference endpoint belonging to a backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingService {
    pub id: Uuid,
    pub name: String,
    pub backend_id: Uuid,

    /// Base URL; `None` until the service is deployed somewhere reachable
    pub endpoint_url: Option<String>,

    pub liveness: Liveness,

    pub created_at: DateTime<Utc>,
}

impl ProcessingService {
    pub fn new(name: impl Into<String>, backend_id: Uuid, endpoint_url: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            backend_id,
            endpoint_url,
            liveness: Liveness::default(),
            created_at: Utc::now(),
        }
    }

    /// A service can receive work only if it has an endpoint and a fresh
    /// successful probe.
    pub fn is_eligible(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        self.endpoint_url.is_some() && self.liveness.is_fresh(now, threshold)
    }

    pub fn status(&self, now: DateTime<Utc>, threshold: Duration) -> ServiceStatus {
        if self.endpoint_url.is_none() {
            return ServiceStatus::Unassigned;
        }
        match self.liveness.last_seen {
            None => ServiceStatus::Unknown,
            Some(_) if self.liveness.is_fresh(now, threshold) => ServiceStatus::Online,
            Some(_) => ServiceStatus::Offline,
        }
    }
}

/// Health signals of a processing service
///
/// Always read and written as a whole. `last_seen_live <= last_seen` holds
/// for every value produced by [`Liveness::record`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Liveness {
    /// Last probe attempt, successful or not
    pub last_seen: Option<DateTime<Utc>>,

    /// Last probe that confirmed a healthy response
    pub last_seen_live: Option<DateTime<Utc>>,

    /// Round trip of the last successful probe
    pub last_seen_latency: Option<Duration>,
}

impl Liveness {
    /// Folds a probe result taken at `at` into the triple.
    ///
    /// A failed probe only advances `last_seen`; the stale `last_seen_live`
    /// is what marks the service unhealthy.
    pub fn record(&mut self, probe: &ProbeResult, at: DateTime<Utc>) {
        if probe.reachable {
            self.record_success(at, probe.latency);
        } else {
            self.record_failure(at);
        }
    }

    pub fn record_success(&mut self, at: DateTime<Utc>, latency: Duration) {
        self.last_seen = Some(at);
        self.last_seen_live = Some(at);
        self.last_seen_latency = Some(latency);
    }

    pub fn record_failure(&mut self, at: DateTime<Utc>) {
        self.last_seen = Some(at);
    }

    pub fn is_fresh(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        let Some(live) = self.last_seen_live else {
            return false;
        };
        let age = now.signed_duration_since(live);
        // Clock skew between writers can put `live` slightly in the future
        age.to_std().map(|age| age <= threshold).unwrap_or(true)
    }
}

/// Outcome of one liveness probe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub reachable: bool,
    pub latency: Duration,
    pub error: Option<String>,
}

impl ProbeResult {
    pub fn reachable(latency: Duration) -> Self {
        Self {
            reachable: true,
            latency,
            error: None,
        }
    }

    pub fn unreachable(latency: Duration, error: impl Into<String>) -> Self {
        Self {
            reachable: false,
            latency,
            error: Some(error.into()),
        }
    }
}

/// Display status of a processing service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceStatus {
    /// Fresh successful probe
    Online,

    /// Probed, but not live within the freshness threshold
    Offline,

    /// Never probed
    Unknown,

    /// No endpoint assigned
    Unassigned,
}

impl std::fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceStatus::Online => write!(f, "Online"),
            ServiceStatus::Offline => write!(f, "Offline"),
            ServiceStatus::Unknown => write!(f, "Unknown"),
            ServiceStatus::Unassigned => write!(f, "Unassigned"),
        }
    }
}

/// Picks the service that should receive the next unit.
///
/// Only eligible services are considered (endpoint assigned, fresh
/// `last_seen_live`); among those the lowest `last_seen_latency` wins, ties
/// going to the smallest id so the choice is deterministic.
pub fn select_service<'a, I>(
    candidates: I,
    now: DateTime<Utc>,
    threshold: Duration,
) -> Option<&'a ProcessingService>
where
    I: IntoIterator<Item = &'a ProcessingService>,
{
    candidates
        .into_iter()
        .filter(|service| service.is_eligible(now, threshold))
        .min_by_key(|service| {
            (
                service.liveness.last_seen_latency.unwrap_or(Duration::MAX),
                service.id,
            )
        })
}
