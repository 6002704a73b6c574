//! Log Hub
//!
//! In-process pub/sub for live pipeline events.
//!
//! A single actor task owns the subscriber set. Registration, unregistration
//! and publishing are commands sent through one queue, so they are applied
//! in the order they were issued and the set is never shared between tasks.
//!
//! Delivery is best effort: each subscriber has a bounded buffer and an event
//! that does not fit is dropped for that subscriber only. A slow observer
//! never stalls the producer or the other observers.

use opsdeck_core::domain::event::LogEvent;
use opsdeck_core::domain::pipeline::PipelineStatus;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use uuid::Uuid;

/// Pending events each subscriber may hold before new ones are dropped
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 100;

/// Identity of a registered subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

enum Command {
    Register {
        id: SubscriberId,
        sender: mpsc::Sender<LogEvent>,
    },
    Unregister(SubscriberId),
    Publish(LogEvent),
    Count(oneshot::Sender<usize>),
}

/// Handle to the hub actor
///
/// Cheap to clone; every clone talks to the same actor.
#[derive(Clone)]
pub struct LogHub {
    commands: mpsc::UnboundedSender<Command>,
    next_id: Arc<AtomicU64>,
    buffer: usize,
}

impl LogHub {
    /// Spawns the actor task on the current tokio runtime
    pub fn spawn(buffer: usize) -> Self {
        let (commands, receiver) = mpsc::unbounded_channel();
        tokio::spawn(run(receiver));

        Self {
            commands,
            next_id: Arc::new(AtomicU64::new(1)),
            buffer: buffer.max(1),
        }
    }

    /// Registers a subscriber with the hub's default buffer size
    pub fn register(&self) -> Subscription {
        self.register_with_capacity(self.buffer)
    }

    /// Registers a subscriber holding at most `capacity` pending events
    pub fn register_with_capacity(&self, capacity: usize) -> Subscription {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (sender, receiver) = mpsc::channel(capacity.max(1));

        self.send(Command::Register { id, sender });

        Subscription {
            id,
            receiver,
            commands: self.commands.clone(),
        }
    }

    /// Removes a subscriber and closes its channel. Unknown ids are ignored.
    pub fn unregister(&self, id: SubscriberId) {
        self.send(Command::Unregister(id));
    }

    /// Queues an event for every registered subscriber. Never waits.
    pub fn publish(&self, event: LogEvent) {
        self.send(Command::Publish(event));
    }

    pub fn publish_log(&self, pipeline_id: Uuid, content: impl Into<String>) {
        self.publish(LogEvent::log(pipeline_id, content));
    }

    pub fn publish_status(&self, pipeline_id: Uuid, status: PipelineStatus) {
        self.publish(LogEvent::status(pipeline_id, status));
    }

    /// Number of registered subscribers once every earlier command is applied
    pub async fn subscriber_count(&self) -> usize {
        let (reply, response) = oneshot::channel();
        self.send(Command::Count(reply));
        response.await.unwrap_or(0)
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            warn!("Log hub is not running, command dropped");
        }
    }
}

/// Receiving end of a hub registration
///
/// Dropping the subscription unregisters it.
pub struct Subscription {
    id: SubscriberId,
    receiver: mpsc::Receiver<LogEvent>,
    commands: mpsc::UnboundedSender<Command>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Next event, or `None` once unregistered and drained
    pub async fn recv(&mut self) -> Option<LogEvent> {
        self.receiver.recv().await
    }

    /// Next buffered event without waiting
    pub fn try_recv(&mut self) -> Option<LogEvent> {
        self.receiver.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Unregister(self.id));
    }
}

async fn run(mut commands: mpsc::UnboundedReceiver<Command>) {
    let mut subscribers: HashMap<SubscriberId, mpsc::Sender<LogEvent>> = HashMap::new();

    while let Some(command) = commands.recv().await {
        match command {
            Command::Register { id, sender } => {
                subscribers.insert(id, sender);
                debug!("Log subscriber {:?} registered ({} total)", id, subscribers.len());
            }
            Command::Unregister(id) => {
                if subscribers.remove(&id).is_some() {
                    debug!(
                        "Log subscriber {:?} unregistered ({} total)",
                        id,
                        subscribers.len()
                    );
                }
            }
            Command::Publish(event) => {
                subscribers.retain(|id, sender| match sender.try_send(event.clone()) {
                    Ok(()) => true,
                    Err(TrySendError::Full(_)) => {
                        debug!("Log subscriber {:?} is full, event dropped", id);
                        true
                    }
                    Err(TrySendError::Closed(_)) => {
                        debug!("Log subscriber {:?} went away", id);
                        false
                    }
                });
            }
            Command::Count(reply) => {
                let _ = reply.send(subscribers.len());
            }
        }
    }

    debug!("Log hub stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn next(sub: &mut Subscription) -> LogEvent {
        tokio::time::timeout(Duration::from_secs(5), sub.recv())
            .await
            .expect("timed out waiting for event")
            .expect("subscription closed")
    }

    #[tokio::test]
    async fn test_publish_reaches_every_subscriber() {
        let hub = LogHub::spawn(DEFAULT_SUBSCRIBER_BUFFER);
        let mut subs: Vec<Subscription> = (0..5).map(|_| hub.register()).collect();
        let pipeline = Uuid::new_v4();

        hub.publish_log(pipeline, "hello\n");

        for sub in subs.iter_mut() {
            assert_eq!(next(sub).await, LogEvent::log(pipeline, "hello\n"));
        }
    }

    #[tokio::test]
    async fn test_events_arrive_in_publish_order() {
        let hub = LogHub::spawn(DEFAULT_SUBSCRIBER_BUFFER);
        let mut sub = hub.register();
        let pipeline = Uuid::new_v4();

        hub.publish_status(pipeline, PipelineStatus::Running);
        for i in 0..20 {
            hub.publish_log(pipeline, format!("line {}\n", i));
        }
        hub.publish_status(pipeline, PipelineStatus::Success);

        assert_eq!(
            next(&mut sub).await,
            LogEvent::status(pipeline, PipelineStatus::Running)
        );
        for i in 0..20 {
            assert_eq!(
                next(&mut sub).await,
                LogEvent::log(pipeline, format!("line {}\n", i))
            );
        }
        assert_eq!(
            next(&mut sub).await,
            LogEvent::status(pipeline, PipelineStatus::Success)
        );
    }

    #[tokio::test]
    async fn test_full_subscriber_does_not_affect_others() {
        let hub = LogHub::spawn(DEFAULT_SUBSCRIBER_BUFFER);
        let mut slow = hub.register_with_capacity(1);
        let mut fast = hub.register_with_capacity(10);
        let pipeline = Uuid::new_v4();

        for i in 0..3 {
            hub.publish_log(pipeline, format!("{}", i));
        }

        for i in 0..3 {
            assert_eq!(next(&mut fast).await, LogEvent::log(pipeline, format!("{}", i)));
        }

        // The fast subscriber saw the last event, so the hub already tried
        // (and failed) to deliver events 1 and 2 to the slow one.
        assert_eq!(slow.try_recv(), Some(LogEvent::log(pipeline, "0")));
        assert_eq!(slow.try_recv(), None);

        // The slow subscriber is still registered and receives new events.
        hub.publish_log(pipeline, "3");
        assert_eq!(next(&mut slow).await, LogEvent::log(pipeline, "3"));
    }

    #[tokio::test]
    async fn test_unregister_closes_subscription() {
        let hub = LogHub::spawn(DEFAULT_SUBSCRIBER_BUFFER);
        let mut sub = hub.register();

        hub.unregister(sub.id());

        let closed = tokio::time::timeout(Duration::from_secs(5), sub.recv())
            .await
            .expect("recv did not terminate");
        assert!(closed.is_none());
    }

    #[tokio::test]
    async fn test_double_unregister_is_harmless() {
        let hub = LogHub::spawn(DEFAULT_SUBSCRIBER_BUFFER);
        let gone = hub.register();
        let mut other = hub.register();
        assert_eq!(hub.subscriber_count().await, 2);

        hub.unregister(gone.id());
        hub.unregister(gone.id());
        assert_eq!(hub.subscriber_count().await, 1);

        let pipeline = Uuid::new_v4();
        hub.publish_log(pipeline, "still here");
        assert_eq!(next(&mut other).await, LogEvent::log(pipeline, "still here"));
    }

    #[tokio::test]
    async fn test_dropping_subscription_unregisters() {
        let hub = LogHub::spawn(DEFAULT_SUBSCRIBER_BUFFER);
        let sub = hub.register();
        assert_eq!(hub.subscriber_count().await, 1);

        drop(sub);
        assert_eq!(hub.subscriber_count().await, 0);
    }
}
