// SPDX-FileCopyrightText: The eso-harness authors
//
// SPDX-License-Identifier: MIT

use log::debug;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use crate::clock::{Clock, TokioClock};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

/// Retries an async fallible check at a fixed interval until it succeeds, the
/// timeout elapses, or the optional attempt cap is reached.
pub struct Poller<C = TokioClock> {
    timeout: Option<Duration>,
    interval: Duration,
    max_attempts: Option<u32>,
    error_message: Option<String>,
    clock: C,
}

impl Poller<TokioClock> {
    pub fn new() -> Self {
        Self {
            timeout: Some(DEFAULT_TIMEOUT),
            interval: DEFAULT_INTERVAL,
            max_attempts: None,
            error_message: None,
            clock: TokioClock,
        }
    }
}

impl Default for Poller<TokioClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> Poller<C> {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Stop only on success or when the attempt cap is reached.
    pub fn without_timeout(mut self) -> Self {
        self.timeout = None;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    pub fn with_error_message(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    pub fn with_clock<C2: Clock>(self, clock: C2) -> Poller<C2> {
        Poller {
            timeout: self.timeout,
            interval: self.interval,
            max_attempts: self.max_attempts,
            error_message: self.error_message,
            clock,
        }
    }

    pub async fn poll_async<F, Fut, T, E>(&self, mut check: F) -> anyhow::Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let deadline = self.timeout.map(|timeout| self.clock.now() + timeout);
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let last_error = match check().await {
                Ok(value) => return Ok(value),
                Err(e) => e.to_string(),
            };
            debug!("Attempt {attempts} failed: {last_error}");

            let exhausted = self.max_attempts.is_some_and(|max| attempts >= max);
            let expired = deadline.is_some_and(|deadline| self.clock.now() >= deadline);
            if exhausted || expired {
                let message = self
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "condition not met".to_string());
                anyhow::bail!("{message} (after {attempts} attempts, last error: {last_error})");
            }

            self.clock.sleep(self.interval).await;
        }
    }
}
