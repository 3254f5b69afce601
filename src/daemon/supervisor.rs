//! Keeps the compositor event source running.
//!
//! When the connection drops, a [`CompositorEvent::Disconnected`] is sent so
//! the store stops trusting its mirror, and the source is restarted after an
//! exponentially growing delay.  A fresh connection always starts with
//! [`CompositorEvent::Connected`], which resyncs everything.

use crate::model::CompositorEvent;
use crate::traits::EventSource;
use log::{info, warn};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Reconnect delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(30),
        }
    }
}

impl Backoff {
    fn next(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max)
    }
}

/// Run `source` until `sink` closes, reconnecting on failure.
pub async fn supervise<S: EventSource>(
    mut source: S,
    sink: mpsc::Sender<CompositorEvent>,
    backoff: Backoff,
) {
    let mut delay = backoff.initial;
    let mut failures: u32 = 0;
    loop {
        let started = Instant::now();
        match source.run(sink.clone()).await {
            Ok(()) => {
                info!("event sink closed, stopping compositor connection");
                return;
            }
            Err(e) => {
                // A connection that stayed up for a while starts over.
                if started.elapsed() >= backoff.max {
                    delay = backoff.initial;
                    failures = 0;
                }
                failures = failures.saturating_add(1);
                warn!(
                    "compositor connection lost: {} (attempt {}, retrying in {:?})",
                    e, failures, delay
                );
                if sink.send(CompositorEvent::Disconnected).await.is_err() {
                    return;
                }
                tokio::time::sleep(delay).await;
                delay = backoff.next(delay);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Tree;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, thiserror::Error)]
    #[error("connection refused")]
    struct Refused;

    /// Plays back a list of outcomes: `false` fails, `true` connects and
    /// finishes.
    struct FlakySource {
        outcomes: VecDeque<bool>,
        attempts: Arc<Mutex<Vec<Instant>>>,
    }

    #[async_trait]
    impl EventSource for FlakySource {
        type Error = Refused;

        async fn run(&mut self, sink: mpsc::Sender<CompositorEvent>) -> Result<(), Refused> {
            self.attempts.lock().unwrap().push(Instant::now());
            match self.outcomes.pop_front() {
                Some(true) => {
                    let _ = sink.send(CompositorEvent::Connected(Tree::default())).await;
                    Ok(())
                }
                _ => Err(Refused),
            }
        }
    }

    #[test]
    fn delays_double_up_to_the_cap() {
        let b = Backoff {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(3),
        };
        assert_eq!(b.next(Duration::from_secs(1)), Duration::from_secs(2));
        assert_eq!(b.next(Duration::from_secs(2)), Duration::from_secs(3));
        assert_eq!(b.next(Duration::from_secs(3)), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn reconnects_with_backoff() {
        let (tx, mut rx) = mpsc::channel(16);
        let attempts = Arc::new(Mutex::new(Vec::new()));
        let source = FlakySource {
            outcomes: VecDeque::from([false, false, true]),
            attempts: attempts.clone(),
        };
        let backoff = Backoff {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(1),
        };
        let start = Instant::now();
        supervise(source, tx, backoff).await;

        assert_eq!(rx.recv().await, Some(CompositorEvent::Disconnected));
        assert_eq!(rx.recv().await, Some(CompositorEvent::Disconnected));
        assert_eq!(rx.recv().await, Some(CompositorEvent::Connected(Tree::default())));
        let offsets: Vec<Duration> = attempts.lock().unwrap().iter().map(|t| *t - start).collect();
        assert_eq!(
            offsets,
            vec![
                Duration::ZERO,
                Duration::from_millis(100),
                Duration::from_millis(300)
            ]
        );
    }

    #[tokio::test]
    async fn stops_when_the_daemon_is_gone() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let source = FlakySource {
            outcomes: VecDeque::new(),
            attempts: Arc::new(Mutex::new(Vec::new())),
        };
        // Fails, then cannot report the disconnect: returns without sleeping.
        supervise(source, tx, Backoff::default()).await;
    }
}
