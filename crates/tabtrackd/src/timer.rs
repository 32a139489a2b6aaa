//! One-shot timers that deliver a message back to an actor.
//!
//! A timer is a spawned task that sleeps and then sends its message on the
//! actor's own command channel. It holds only a weak sender, so a pending
//! timer never keeps an actor alive after every handle is gone.
//!
//! Dropping a [`Timer`] aborts it. A timer that already fired may still have
//! its message queued; actors guard against that with a ticket per arming.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::trace;

/// A pending one-shot timer.
#[derive(Debug)]
pub struct Timer {
    task: JoinHandle<()>,
}

impl Timer {
    /// Sends `message` on `target` after `delay`.
    ///
    /// If the receiving actor has stopped by then, the message is dropped.
    pub fn after<T>(delay: Duration, target: mpsc::WeakSender<T>, message: T) -> Self
    where
        T: Send + 'static,
    {
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match target.upgrade() {
                Some(sender) => {
                    if sender.send(message).await.is_err() {
                        trace!("Timer fired after receiver closed");
                    }
                }
                None => trace!("Timer fired after all senders dropped"),
            }
        });
        Self { task }
    }

    #[cfg(test)]
    fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.task.abort();
    }
}
