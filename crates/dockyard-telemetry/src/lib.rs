//! Periodic resource sampling for the host and for individual containers.
//!
//! Both samplers produce endless streams of ticks. A failed sample never
//! ends a stream: the failure is published as an error-marker tick and the
//! next interval is attempted as usual. Consumers (the SSE endpoints)
//! decide when to stop listening.

use serde::{Deserialize, Serialize};

pub mod container;
pub mod host;

pub use container::container_stream;
pub use host::{host_overview, host_stream, probe_host, HostOverview, HostProbe, HostSample};

pub const SAMPLE_INTERVAL_SECS: u64 = 1;

/// One entry in a telemetry stream: a sample, or a marker that this
/// interval's sample failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Tick<T> {
    Sample { data: T },
    Error { message: String },
}

impl<T> Tick<T> {
    pub fn is_error(&self) -> bool {
        matches!(self, Tick::Error { .. })
    }
}
