// SPDX-FileCopyrightText: The eso-harness authors
//
// SPDX-License-Identifier: MIT

// Definitions shared by the `eso-check` binary and the cluster-backed
// integration tests under `tests/`.

use kube::api::ObjectMeta;
use std::time::Duration;

pub mod clock;
pub mod cluster;
pub mod config;
pub mod pods;
pub mod poller;
pub mod reloader;
pub mod samples;
pub mod secrets;
pub mod terraform;
pub mod variables;
pub mod watcher;

#[cfg(test)]
mod mock_client;

pub use clock::{Clock, MockClock, TokioClock};
pub use cluster::{Cluster, ResourceKind};
pub use pods::{PodLister, PodSet, Selector, WorkloadSelector, selector_of};
pub use poller::Poller;
pub use watcher::{Convergence, ConvergenceWatcher};

#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("deployment {workload} has no pod selector")]
    EmptySelector { workload: String },

    #[error("deployment {workload} has no spec")]
    MissingSpec { workload: String },

    #[error("unsupported label selector operator {operator:?} for key {key:?}")]
    InvalidSelector { key: String, operator: String },

    #[error("timed out after {timeout:?} waiting for a new pod of {workload}")]
    ConvergenceTimeout { workload: String, timeout: Duration },

    #[error("{context}: expected {expected}, got {actual}")]
    Assertion {
        context: String,
        expected: String,
        actual: String,
    },

    #[error("terraform outputs missing or null: {}", .0.join(", "))]
    MissingOutputs(Vec<String>),

    #[error("{0}")]
    Anyhow(#[from] anyhow::Error),
}

pub fn name_or_default(meta: &ObjectMeta) -> String {
    meta.name.clone().unwrap_or("<no name>".to_string())
}

/// Log `$what` on success, or return early with the error.
#[macro_export]
macro_rules! info_ok {
    ($result:expr, $($what:tt)+) => {
        match $result {
            Ok(v) => {
                log::info!($($what)+);
                v
            }
            Err(e) => return Err(e.into()),
        }
    };
}
