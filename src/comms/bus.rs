//! Message bus — per-agent FIFO inboxes
//!
//! At-most-once intra-process delivery, strict FIFO per receiver. Senders and
//! receivers may run concurrently; registration is guarded separately from the
//! inboxes themselves so a send never contends with the registry lock longer
//! than a map lookup.
//!
//! Backpressure: an inbox past its configured depth evicts its oldest message
//! with a warning. Agents tolerate a missed message — the next periodic
//! collector cycle recovers the state.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Notify;
use tracing::{debug, warn};

use super::acl::AclMessage;
use crate::config::RuntimeConfig;

/// ACL protocol misuse errors.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BusError {
    #[error("agent {0} is already registered")]
    AlreadyRegistered(String),
    #[error("agent {0} is not registered")]
    NotRegistered(String),
}

struct Inbox {
    queue: Mutex<VecDeque<AclMessage>>,
    notify: Notify,
}

impl Inbox {
    fn new() -> Self {
        Self { queue: Mutex::new(VecDeque::new()), notify: Notify::new() }
    }
}

/// Centralized message routing between agents.
pub struct MessageBus {
    inboxes: RwLock<HashMap<String, Arc<Inbox>>>,
    max_inbox_size: usize,
    message_ttl_seconds: i64,
}

impl MessageBus {
    pub fn new(config: &RuntimeConfig) -> Self {
        Self {
            inboxes: RwLock::new(HashMap::new()),
            max_inbox_size: config.max_inbox_size,
            message_ttl_seconds: config.message_ttl_seconds,
        }
    }

    /// Register a new agent and create its inbox.
    pub fn register(&self, agent_id: &str) -> Result<(), BusError> {
        let mut inboxes = self.inboxes.write().unwrap_or_else(|e| e.into_inner());
        if inboxes.contains_key(agent_id) {
            return Err(BusError::AlreadyRegistered(agent_id.to_string()));
        }
        inboxes.insert(agent_id.to_string(), Arc::new(Inbox::new()));
        debug!(agent = agent_id, "agent registered with message bus");
        Ok(())
    }

    /// Unregister an agent, dropping any queued messages.
    pub fn unregister(&self, agent_id: &str) -> Result<(), BusError> {
        let mut inboxes = self.inboxes.write().unwrap_or_else(|e| e.into_inner());
        if inboxes.remove(agent_id).is_none() {
            return Err(BusError::NotRegistered(agent_id.to_string()));
        }
        debug!(agent = agent_id, "agent unregistered from message bus");
        Ok(())
    }

    fn inbox(&self, agent_id: &str) -> Result<Arc<Inbox>, BusError> {
        self.inboxes
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(agent_id)
            .cloned()
            .ok_or_else(|| BusError::NotRegistered(agent_id.to_string()))
    }

    /// Enqueue a message into the receiver's inbox (FIFO per receiver).
    pub fn send(&self, message: AclMessage) -> Result<(), BusError> {
        let inbox = self.inbox(&message.receiver)?;
        {
            let mut queue = inbox.queue.lock().unwrap_or_else(|e| e.into_inner());
            if queue.len() >= self.max_inbox_size {
                let evicted = queue.pop_front();
                warn!(
                    receiver = %message.receiver,
                    evicted = evicted.as_ref().map(|m| m.body.tag()),
                    "inbox over capacity, evicted oldest message"
                );
            }
            debug!(
                from = %message.sender,
                to = %message.receiver,
                performative = %message.performative,
                tag = message.body.tag(),
                "message enqueued"
            );
            queue.push_back(message);
        }
        inbox.notify.notify_one();
        Ok(())
    }

    fn pop_fresh(&self, inbox: &Inbox) -> Option<AclMessage> {
        let mut queue = inbox.queue.lock().unwrap_or_else(|e| e.into_inner());
        while let Some(msg) = queue.pop_front() {
            let age = (Utc::now() - msg.timestamp).num_seconds();
            if age > self.message_ttl_seconds {
                warn!(
                    receiver = %msg.receiver,
                    tag = msg.body.tag(),
                    age_seconds = age,
                    "dropping expired message"
                );
                continue;
            }
            return Some(msg);
        }
        None
    }

    /// Non-blocking receive: next message or `None` when the inbox is empty.
    pub fn try_receive(&self, agent_id: &str) -> Result<Option<AclMessage>, BusError> {
        let inbox = self.inbox(agent_id)?;
        Ok(self.pop_fresh(&inbox))
    }

    /// Blocking receive with a timeout. Returns `None` on timeout.
    pub async fn receive_timeout(
        &self,
        agent_id: &str,
        timeout: Duration,
    ) -> Result<Option<AclMessage>, BusError> {
        let inbox = self.inbox(agent_id)?;
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(msg) = self.pop_fresh(&inbox) {
                return Ok(Some(msg));
            }
            if tokio::time::timeout_at(deadline, inbox.notify.notified()).await.is_err() {
                return Ok(None);
            }
        }
    }

    /// Number of pending messages for an agent.
    pub fn size(&self, agent_id: &str) -> Result<usize, BusError> {
        let inbox = self.inbox(agent_id)?;
        let len = inbox.queue.lock().unwrap_or_else(|e| e.into_inner()).len();
        Ok(len)
    }

    /// Drop all queued messages for an agent, returning the count cleared.
    pub fn clear(&self, agent_id: &str) -> Result<usize, BusError> {
        let inbox = self.inbox(agent_id)?;
        let mut queue = inbox.queue.lock().unwrap_or_else(|e| e.into_inner());
        let count = queue.len();
        queue.clear();
        Ok(count)
    }

    /// Send a per-recipient copy to every registered agent.
    pub fn broadcast(&self, message: &AclMessage, exclude_sender: bool) -> usize {
        let recipients: Vec<String> = {
            let inboxes = self.inboxes.read().unwrap_or_else(|e| e.into_inner());
            inboxes
                .keys()
                .filter(|id| !(exclude_sender && **id == message.sender))
                .cloned()
                .collect()
        };
        let mut count = 0;
        for recipient in recipients {
            if self.send(message.readdressed(recipient)).is_ok() {
                count += 1;
            }
        }
        count
    }

    /// Registered agent ids, for liveness reporting.
    pub fn registered_agents(&self) -> Vec<String> {
        let inboxes = self.inboxes.read().unwrap_or_else(|e| e.into_inner());
        inboxes.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comms::acl::MessageBody;

    fn bus() -> MessageBus {
        MessageBus::new(&RuntimeConfig::default())
    }

    fn msg(sender: &str, receiver: &str) -> AclMessage {
        AclMessage::inform(sender, receiver, MessageBody::ProcessAndUpdate, None)
    }

    #[test]
    fn double_register_fails() {
        let bus = bus();
        bus.register("a").unwrap();
        assert_eq!(bus.register("a"), Err(BusError::AlreadyRegistered("a".into())));
    }

    #[test]
    fn send_to_unregistered_is_error() {
        let bus = bus();
        assert_eq!(
            bus.send(msg("a", "ghost")),
            Err(BusError::NotRegistered("ghost".into()))
        );
    }

    #[test]
    fn fifo_per_receiver() {
        let bus = bus();
        bus.register("a").unwrap();
        bus.register("b").unwrap();

        let mut m1 = msg("a", "b");
        m1.reply_with = Some("first".into());
        let mut m2 = msg("a", "b");
        m2.reply_with = Some("second".into());

        bus.send(m1).unwrap();
        bus.send(m2).unwrap();

        let r1 = bus.try_receive("b").unwrap().unwrap();
        let r2 = bus.try_receive("b").unwrap().unwrap();
        assert_eq!(r1.reply_with.as_deref(), Some("first"));
        assert_eq!(r2.reply_with.as_deref(), Some("second"));
        assert!(bus.try_receive("b").unwrap().is_none());
    }

    #[test]
    fn size_and_clear() {
        let bus = bus();
        bus.register("a").unwrap();
        bus.register("b").unwrap();
        bus.send(msg("a", "b")).unwrap();
        bus.send(msg("a", "b")).unwrap();
        assert_eq!(bus.size("b").unwrap(), 2);
        assert_eq!(bus.clear("b").unwrap(), 2);
        assert_eq!(bus.size("b").unwrap(), 0);
    }

    #[test]
    fn broadcast_excludes_sender() {
        let bus = bus();
        bus.register("a").unwrap();
        bus.register("b").unwrap();
        bus.register("c").unwrap();

        let count = bus.broadcast(&msg("a", "everyone"), true);
        assert_eq!(count, 2);
        assert_eq!(bus.size("a").unwrap(), 0);
        assert_eq!(bus.size("b").unwrap(), 1);
        let received = bus.try_receive("c").unwrap().unwrap();
        assert_eq!(received.receiver, "c");
    }

    #[test]
    fn overflow_evicts_oldest() {
        let config = RuntimeConfig { max_inbox_size: 2, ..RuntimeConfig::default() };
        let bus = MessageBus::new(&config);
        bus.register("b").unwrap();

        for tag in ["one", "two", "three"] {
            let mut m = msg("a", "b");
            m.reply_with = Some(tag.into());
            bus.send(m).unwrap();
        }
        assert_eq!(bus.size("b").unwrap(), 2);
        let first = bus.try_receive("b").unwrap().unwrap();
        assert_eq!(first.reply_with.as_deref(), Some("two"));
    }

    #[tokio::test]
    async fn receive_timeout_returns_none_when_empty() {
        let bus = bus();
        bus.register("b").unwrap();
        let got = bus.receive_timeout("b", Duration::from_millis(20)).await.unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn receive_timeout_wakes_on_send() {
        let bus = Arc::new(bus());
        bus.register("a").unwrap();
        bus.register("b").unwrap();

        let bus2 = Arc::clone(&bus);
        let waiter = tokio::spawn(async move {
            bus2.receive_timeout("b", Duration::from_secs(2)).await.unwrap()
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        bus.send(msg("a", "b")).unwrap();

        let got = waiter.await.unwrap();
        assert!(got.is_some());
    }
}
