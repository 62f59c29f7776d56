// Copyright 2023 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Backoff for transient event-loop failures.

use std::time::Duration;

use tracing::debug;

const BASE_DELAY: Duration = Duration::from_secs(1);
const MAX_DELAY: Duration = Duration::from_secs(30);

/// Bounded exponential backoff between event-loop polls.
///
/// The transport reconnects on its own at the next poll; this only spaces
/// the attempts out. Reset on every successful connection.
#[derive(Debug, Default)]
pub(crate) struct DelayedPoll {
    attempts: u32,
}

impl DelayedPoll {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Clears the backoff after a successful connection.
    pub(crate) fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Sleeps for the current delay and doubles it, up to the cap.
    pub(crate) async fn wait(&mut self) {
        let delay = self.current_delay();
        self.attempts = self.attempts.saturating_add(1);
        debug!("retrying poll in {}s", delay.as_secs());
        tokio::time::sleep(delay).await;
    }

    fn current_delay(&self) -> Duration {
        BASE_DELAY
            .checked_mul(1u32 << self.attempts.min(5))
            .map_or(MAX_DELAY, |delay| delay.min(MAX_DELAY))
    }
}
