//! Fixed-delay reconnect scheduling.
//!
//! A scheduled attempt is a spawned task that sleeps for the configured delay
//! before running its body. The returned [`ReconnectHandle`] is the only way
//! to cancel it; dropping the handle leaves the attempt scheduled.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

use linkhub_core::SessionId;

/// Spawns delayed reconnect attempts. Clones share the ticket counter.
#[derive(Debug, Clone)]
pub struct ReconnectScheduler {
    delay: Duration,
    next_ticket: Arc<AtomicU64>,
}

impl ReconnectScheduler {
    /// Scheduler firing attempts `delay` after they are scheduled.
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            next_ticket: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Configured delay.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Schedule `attempt` to run once after the delay.
    ///
    /// The closure receives the ticket of the returned handle so the attempt
    /// can tell whether it is still the one registered for its session.
    pub fn schedule<F, Fut>(&self, session_id: &SessionId, attempt: F) -> ReconnectHandle
    where
        F: FnOnce(u64) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let delay = self.delay;
        debug!(
            "Scheduling reconnect #{} for {} in {:?}",
            ticket, session_id, delay
        );

        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            attempt(ticket).await;
        });

        ReconnectHandle {
            session_id: session_id.clone(),
            ticket,
            task,
        }
    }
}

/// A pending reconnect attempt.
#[derive(Debug)]
pub struct ReconnectHandle {
    session_id: SessionId,
    ticket: u64,
    task: JoinHandle<()>,
}

impl ReconnectHandle {
    /// Ticket identifying this attempt.
    pub fn ticket(&self) -> u64 {
        self.ticket
    }

    /// Cancel the attempt. Has no effect once the attempt is running its body
    /// past its last await point.
    pub fn cancel(self) {
        debug!("Cancelling reconnect #{} for {}", self.ticket, self.session_id);
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn id() -> SessionId {
        SessionId::parse("s1").unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_after_delay() {
        let scheduler = ReconnectScheduler::new(Duration::from_millis(3000));
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = fired.clone();
        let handle = scheduler.schedule(&id(), move |_| async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(2999)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(2)).await;
        tokio::task::yield_now().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(handle.task.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_attempt() {
        let scheduler = ReconnectScheduler::new(Duration::from_millis(3000));
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = fired.clone();
        let handle = scheduler.schedule(&id(), move |_| async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        handle.cancel();

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tickets_are_distinct() {
        let scheduler = ReconnectScheduler::new(Duration::from_millis(10));
        let seen = Arc::new(AtomicU64::new(0));

        let first = scheduler.schedule(&id(), |_| async {});
        let recorded = seen.clone();
        let second = scheduler.schedule(&id(), move |ticket| async move {
            recorded.store(ticket, Ordering::SeqCst);
        });

        assert_ne!(first.ticket(), second.ticket());
        tokio::time::sleep(Duration::from_millis(20)).await;
        tokio::task::yield_now().await;
        assert_eq!(seen.load(Ordering::SeqCst), second.ticket());
    }
}
