/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Bounded calls into pluggable components.
//!
//! The protocol threads never call a [`DataSource`](crate::pluggables::DataSource),
//! [`ContractTransmitter`](crate::pluggables::ContractTransmitter), or
//! [`Database`](crate::pluggables::Database) directly. Instead they go through [`block_for_at_most`],
//! which runs the call on a helper thread and gives up waiting once a timeout elapses. A call that hangs
//! therefore costs the caller at most the timeout, never its liveness.
//!
//! Rust threads cannot be killed. Instead, the called function receives a [`CallContext`] that carries
//! the deadline and a cancellation flag, which well-behaved implementations check to stop early. A call
//! that ignores its context keeps running on its helper thread after the caller has moved on; its result
//! is discarded.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc, Arc,
    },
    thread,
    time::{Duration, Instant},
};

/// The deadline and cancellation state of one bounded call.
#[derive(Clone, Debug)]
pub struct CallContext {
    deadline: Instant,
    cancelled: Arc<AtomicBool>,
}

impl CallContext {
    pub(crate) fn new(timeout: Duration) -> CallContext {
        CallContext {
            deadline: Instant::now() + timeout,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The instant after which the caller may no longer be waiting for the result.
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Time left until [`deadline`](Self::deadline), or zero if it has passed.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Whether the call should stop: either the caller gave up waiting, or the deadline passed.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire) || Instant::now() >= self.deadline
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release)
    }
}

/// Run `f` on a helper thread and wait at most `timeout` for its result.
///
/// Returns `None` if `f` did not return in time, or panicked.
pub(crate) fn block_for_at_most<T, F>(timeout: Duration, f: F) -> Option<T>
where
    T: Send + 'static,
    F: FnOnce(&CallContext) -> T + Send + 'static,
{
    block_for_at_most_with_grace(timeout, Duration::ZERO, f)
}

/// Like [`block_for_at_most`], but wait an additional `grace_period` after the context deadline has
/// passed before giving up on the result.
///
/// Used for data sources, which may still produce a useful value shortly after being told to stop.
pub(crate) fn block_for_at_most_with_grace<T, F>(
    timeout: Duration,
    grace_period: Duration,
    f: F,
) -> Option<T>
where
    T: Send + 'static,
    F: FnOnce(&CallContext) -> T + Send + 'static,
{
    let context = CallContext::new(timeout);
    let (result_sender, result_receiver) = mpsc::sync_channel(1);

    let call_context = context.clone();
    thread::spawn(move || {
        let _ = result_sender.send(f(&call_context));
    });

    let result = result_receiver.recv_timeout(timeout + grace_period).ok();
    context.cancel();
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fast_call_returns_its_result() {
        assert_eq!(
            block_for_at_most(Duration::from_secs(1), |_| 42),
            Some(42)
        );
    }

    #[test]
    fn slow_call_times_out() {
        let start = Instant::now();
        let result = block_for_at_most(Duration::from_millis(50), |_| {
            thread::sleep(Duration::from_secs(2));
            1
        });
        assert_eq!(result, None);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn grace_period_admits_late_results() {
        let result =
            block_for_at_most_with_grace(Duration::from_millis(20), Duration::from_secs(1), |ctx| {
                while !ctx.is_cancelled() {
                    thread::sleep(Duration::from_millis(5));
                }
                7
            });
        assert_eq!(result, Some(7));
    }

    #[test]
    fn panicking_call_yields_none() {
        let result: Option<u8> =
            block_for_at_most(Duration::from_secs(1), |_| panic!("data source exploded"));
        assert_eq!(result, None);
    }
}
