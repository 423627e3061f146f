// SPDX-FileCopyrightText: The eso-harness authors
//
// SPDX-License-Identifier: MIT

//! Detecting that a workload has been restarted.
//!
//! After an external mutation (for example a secret update picked up by
//! Reloader) the watcher polls the workload's pods at a fixed interval until
//! a pod appears that was not part of the set captured before the mutation,
//! or the deadline passes. Listing failures while the rollout is in flight
//! are logged and retried on the next tick.

use log::{debug, info, warn};
use std::time::Duration;

use crate::HarnessError;
use crate::clock::{Clock, TokioClock};
use crate::pods::{PodLister, PodSet, WorkloadSelector};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Terminal outcome of a watch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Convergence {
    Found(String),
    TimedOut,
}

impl Convergence {
    /// Treat a timeout as a hard failure naming the workload.
    pub fn into_new_pod(
        self,
        workload: &WorkloadSelector,
        timeout: Duration,
    ) -> Result<String, HarnessError> {
        match self {
            Convergence::Found(pod) => Ok(pod),
            Convergence::TimedOut => Err(HarnessError::ConvergenceTimeout {
                workload: workload.to_string(),
                timeout,
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum WatchState {
    Waiting,
    Found(String),
    TimedOut,
}

pub struct ConvergenceWatcher<'a, L, C = TokioClock> {
    lister: &'a L,
    clock: C,
    timeout: Duration,
    poll_interval: Duration,
}

impl<'a, L: PodLister> ConvergenceWatcher<'a, L, TokioClock> {
    pub fn new(lister: &'a L) -> Self {
        Self {
            lister,
            clock: TokioClock,
            timeout: DEFAULT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl<'a, L: PodLister, C: Clock> ConvergenceWatcher<'a, L, C> {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_clock<C2: Clock>(self, clock: C2) -> ConvergenceWatcher<'a, L, C2> {
        ConvergenceWatcher {
            lister: self.lister,
            clock,
            timeout: self.timeout,
            poll_interval: self.poll_interval,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Wait until `workload` has a pod that is not in `known`.
    pub async fn wait_for_new_pod(
        &self,
        workload: &WorkloadSelector,
        known: &PodSet,
    ) -> Convergence {
        let deadline = self.clock.now() + self.timeout;
        let mut state = WatchState::Waiting;
        let mut polls = 0u32;

        loop {
            state = match state {
                WatchState::Waiting if self.clock.now() >= deadline => WatchState::TimedOut,
                WatchState::Waiting => {
                    self.clock.sleep(self.poll_interval).await;
                    polls += 1;
                    self.poll(workload, known).await
                }
                WatchState::Found(pod) => {
                    info!("New pod {pod} of {workload} found after {polls} polls");
                    return Convergence::Found(pod);
                }
                WatchState::TimedOut => {
                    warn!(
                        "No new pod of {workload} after {:?} ({polls} polls, {} known pods)",
                        self.timeout,
                        known.len()
                    );
                    return Convergence::TimedOut;
                }
            };
        }
    }

    async fn poll(&self, workload: &WorkloadSelector, known: &PodSet) -> WatchState {
        match self.lister.pod_names(workload).await {
            Ok(current) => {
                debug!("Pods of {workload}: {current:?}");
                known
                    .first_new(current)
                    .map_or(WatchState::Waiting, WatchState::Found)
            }
            Err(e) => {
                warn!("Listing pods of {workload} failed, retrying: {e}");
                WatchState::Waiting
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use std::sync::Mutex;

    /// Answers each listing from a script keyed on simulated time.
    struct ScriptedPods<F> {
        clock: MockClock,
        script: F,
        calls: Mutex<Vec<Duration>>,
    }

    impl<F> ScriptedPods<F>
    where
        F: Fn(Duration) -> Result<Vec<String>, HarnessError> + Send + Sync,
    {
        fn new(clock: &MockClock, script: F) -> Self {
            Self {
                clock: clock.clone(),
                script,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn call_times(&self) -> Vec<Duration> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl<F> PodLister for ScriptedPods<F>
    where
        F: Fn(Duration) -> Result<Vec<String>, HarnessError> + Send + Sync,
    {
        async fn pod_names(
            &self,
            _workload: &WorkloadSelector,
        ) -> Result<Vec<String>, HarnessError> {
            let now = self.clock.elapsed();
            self.calls.lock().unwrap().push(now);
            (self.script)(now)
        }
    }

    fn names(pods: &[&str]) -> Result<Vec<String>, HarnessError> {
        Ok(pods.iter().map(|p| p.to_string()).collect())
    }

    fn workload() -> WorkloadSelector {
        WorkloadSelector::new("reloader-test-ns", "example-deployment")
    }

    fn known() -> PodSet {
        ["pod-abc"].into_iter().collect()
    }

    #[tokio::test]
    async fn test_new_pod_found_when_it_appears() {
        let clock = MockClock::new();
        let lister = ScriptedPods::new(&clock, |t| {
            if t >= Duration::from_secs(5) {
                names(&["pod-abc", "pod-def"])
            } else {
                names(&["pod-abc"])
            }
        });

        let result = ConvergenceWatcher::new(&lister)
            .with_timeout(Duration::from_secs(20))
            .with_poll_interval(Duration::from_secs(1))
            .with_clock(clock.clone())
            .wait_for_new_pod(&workload(), &known())
            .await;

        assert_eq!(result, Convergence::Found("pod-def".to_string()));
        assert!(clock.elapsed() >= Duration::from_secs(5));
        assert!(clock.elapsed() <= Duration::from_secs(6));
    }

    #[tokio::test]
    async fn test_times_out_no_earlier_than_deadline() {
        let clock = MockClock::new();
        let lister = ScriptedPods::new(&clock, |_| names(&["pod-abc"]));

        let result = ConvergenceWatcher::new(&lister)
            .with_timeout(Duration::from_secs(20))
            .with_poll_interval(Duration::from_secs(1))
            .with_clock(clock.clone())
            .wait_for_new_pod(&workload(), &known())
            .await;

        assert_eq!(result, Convergence::TimedOut);
        assert_eq!(clock.elapsed(), Duration::from_secs(20));
        assert_eq!(lister.call_times().len(), 20);
    }

    #[tokio::test]
    async fn test_transient_listing_error_does_not_abort() {
        let clock = MockClock::new();
        let lister = ScriptedPods::new(&clock, |t| {
            if t == Duration::from_secs(3) {
                Err(HarnessError::Anyhow(anyhow::anyhow!("connection reset")))
            } else if t >= Duration::from_secs(5) {
                names(&["pod-def", "pod-abc"])
            } else {
                names(&["pod-abc"])
            }
        });

        let result = ConvergenceWatcher::new(&lister)
            .with_timeout(Duration::from_secs(20))
            .with_poll_interval(Duration::from_secs(1))
            .with_clock(clock.clone())
            .wait_for_new_pod(&workload(), &known())
            .await;

        assert_eq!(result, Convergence::Found("pod-def".to_string()));
        assert_eq!(clock.elapsed(), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_every_poll_sleeps_first() {
        let clock = MockClock::new();
        let lister = ScriptedPods::new(&clock, |_| {
            Err(HarnessError::Anyhow(anyhow::anyhow!("deployment not found")))
        });

        let result = ConvergenceWatcher::new(&lister)
            .with_timeout(Duration::from_secs(5))
            .with_poll_interval(Duration::from_secs(2))
            .with_clock(clock.clone())
            .wait_for_new_pod(&workload(), &known())
            .await;

        assert_eq!(result, Convergence::TimedOut);
        let expected: Vec<Duration> = [2, 4, 6].map(Duration::from_secs).to_vec();
        assert_eq!(lister.call_times(), expected);
    }

    #[tokio::test]
    async fn test_rolling_restart_with_disappearing_old_pod() {
        let clock = MockClock::new();
        let lister = ScriptedPods::new(&clock, |t| match t.as_secs() {
            0..=1 => names(&["pod-abc"]),
            2 => names(&[]),
            _ => names(&["pod-ghi"]),
        });

        let result = ConvergenceWatcher::new(&lister)
            .with_clock(clock.clone())
            .wait_for_new_pod(&workload(), &known())
            .await;

        assert_eq!(result, Convergence::Found("pod-ghi".to_string()));
    }

    #[test]
    fn test_timeout_converts_to_error() {
        let err = Convergence::TimedOut
            .into_new_pod(&workload(), Duration::from_secs(20))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "timed out after 20s waiting for a new pod of reloader-test-ns/example-deployment"
        );
        let pod = Convergence::Found("pod-def".to_string())
            .into_new_pod(&workload(), Duration::from_secs(20))
            .unwrap();
        assert_eq!(pod, "pod-def");
    }
}
