/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tower::retry::budget::{Budget, TpsBudget};

use crate::error::{self, Error};
use crate::types::RetryConfig;

/// Decides whether (and after how long) a failed backend request is retried.
///
/// The attempt counter tracks consecutive failures of a single request and is reset by
/// [`RetryPolicy::on_success`]. Retries additionally draw from a [`TpsBudget`] that may be
/// shared between operations, so a backend that keeps failing is not hammered by every
/// in-flight operation at once.
#[derive(Debug, Clone)]
pub(crate) struct RetryPolicy {
    budget: Arc<TpsBudget>,
    config: RetryConfig,
    attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default(), Arc::new(TpsBudget::default()))
    }
}

impl RetryPolicy {
    pub(crate) fn new(config: RetryConfig, budget: Arc<TpsBudget>) -> Self {
        Self {
            budget,
            config,
            attempts: 0,
        }
    }

    /// Record a successful request.
    pub(crate) fn on_success(&mut self) {
        self.budget.deposit();
        self.attempts = 0;
    }

    /// The delay before retrying after `err`, or `None` if the error should be surfaced.
    pub(crate) fn next_backoff(&mut self, err: &Error) -> Option<Duration> {
        if !err.is_transient() {
            return None;
        }
        if self.attempts >= self.config.max_attempts() || !self.budget.withdraw() {
            return None;
        }
        let delay = self
            .config
            .initial_backoff()
            .saturating_mul(2u32.saturating_pow(self.attempts))
            .min(self.config.max_backoff());
        self.attempts += 1;
        Some(delay)
    }

    /// Number of retries spent on the current request
    pub(crate) fn attempts(&self) -> u32 {
        self.attempts
    }
}

/// Sleep for `delay` unless `token` is cancelled first.
pub(crate) async fn backoff(delay: Duration, token: &CancellationToken) -> Result<(), Error> {
    tokio::select! {
        _ = token.cancelled() => Err(error::operation_cancelled()),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}
