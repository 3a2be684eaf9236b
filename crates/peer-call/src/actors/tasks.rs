//! Background tasks owned by the supervisor.
//!
//! Every task here is tied to a `CancellationToken` derived from the
//! supervisor's token, and reports back only by posting a
//! [`SupervisorMessage`]. If the mailbox is gone by the time a task has
//! something to report, the resource it carries is released on the spot.

use super::messages::{Generation, SupervisorMessage};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Post `message` to the supervisor, releasing its payload if nobody is
/// listening any more.
pub(crate) async fn deliver(sender: &mpsc::Sender<SupervisorMessage>, message: SupervisorMessage) {
    if let Err(mpsc::error::SendError(undelivered)) = sender.send(message).await {
        undelivered.release();
    }
}

/// A fixed-interval tick source.
///
/// Each tick posts the message built by `tick` with this timer's
/// generation. The tick task stops when the timer is dropped or the parent
/// token is cancelled. A tick that fires while the supervisor is still busy
/// with the previous one is skipped, not queued.
#[derive(Debug)]
pub(crate) struct RetryTimer {
    generation: Generation,
    cancel: CancellationToken,
}

impl RetryTimer {
    pub(crate) fn start<F>(
        generation: Generation,
        first_delay: Duration,
        period: Duration,
        parent: &CancellationToken,
        sender: mpsc::Sender<SupervisorMessage>,
        tick: F,
    ) -> Self
    where
        F: Fn(Generation) -> SupervisorMessage + Send + 'static,
    {
        let cancel = parent.child_token();
        let token = cancel.clone();
        // interval_at panics on a zero period
        let period = period.max(Duration::from_millis(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + first_delay, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if sender.send(tick(generation)).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        Self { generation, cancel }
    }

    pub(crate) fn generation(&self) -> Generation {
        self.generation
    }
}

impl Drop for RetryTimer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Forward every event from a transport feed into the mailbox, wrapped by
/// `wrap`. Stops on cancellation or when the feed ends.
pub(crate) fn spawn_forwarder<E, F>(
    mut events: mpsc::UnboundedReceiver<E>,
    token: CancellationToken,
    sender: mpsc::Sender<SupervisorMessage>,
    wrap: F,
) where
    E: Send + 'static,
    F: Fn(E) -> SupervisorMessage + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = token.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => deliver(&sender, wrap(event)).await,
                    None => break,
                },
            }
        }
    });
}
