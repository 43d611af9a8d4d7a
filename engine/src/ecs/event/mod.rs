//! Typed event channels with deferred and immediate dispatch.
//!
//! An event is a named channel owned by a scene's [`Bus`]: a declared
//! message size, a subscriber list of systems, and a mutex-guarded deferred
//! queue. [`Bus::send`] appends to the deferred queue; the orchestrator
//! drains every queue at the start of each tick, in event-creation order,
//! and invokes each subscriber once per message. Immediate dispatch
//! (`send_sync` on the universe) bypasses the queue and delivers on the
//! spot.
//!
//! Subscribers that no longer exist at flush time are dropped silently -
//! the system was destroyed mid-tick and the message simply has nowhere to
//! go.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::ecs::system::SystemId;
use crate::error::{Error, Result};
use crate::value::Var;

/// A created event channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventId(u32);

impl EventId {
    #[inline]
    pub(crate) const fn new(id: u32) -> Self {
        Self(id)
    }

    /// The id's index; ids are handed out in creation order.
    #[inline]
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

/// One queued or delivered event message.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// The message payload, copied in at send time.
    pub payload: Var,
    /// Nanoseconds since universe start at send time, when known.
    pub timestamp: Option<u64>,
}

struct EventChannel {
    name: String,
    message_size: usize,
    subscribers: Vec<SystemId>,
    deferred: Mutex<VecDeque<Message>>,
}

/// A scene's event channels.
#[derive(Default)]
pub struct Bus {
    channels: Vec<EventChannel>,
}

impl Bus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an event channel. `message_size` is the declared payload size
    /// in bytes, kept as metadata for hosts that pack their own buffers.
    pub fn create(&mut self, name: impl Into<String>, message_size: usize) -> EventId {
        let id = EventId::new(self.channels.len() as u32);
        self.channels.push(EventChannel {
            name: name.into(),
            message_size,
            subscribers: Vec::new(),
            deferred: Mutex::new(VecDeque::new()),
        });
        id
    }

    /// Number of channels, which is also the flush order.
    #[inline]
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// `true` when no channels exist.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// The channel's declared name.
    pub fn name(&self, event: EventId) -> Option<&str> {
        self.channels.get(event.index()).map(|c| c.name.as_str())
    }

    /// The channel's declared message size.
    pub fn message_size(&self, event: EventId) -> Option<usize> {
        self.channels.get(event.index()).map(|c| c.message_size)
    }

    /// Subscribe a system to the channel. Duplicate subscriptions are
    /// rejected so a message is delivered once per subscriber.
    pub fn subscribe(&mut self, event: EventId, system: SystemId) -> Result<()> {
        let channel = self
            .channels
            .get_mut(event.index())
            .ok_or(Error::DoesNotExist)?;
        if channel.subscribers.contains(&system) {
            return Err(Error::AlreadyExists);
        }
        channel.subscribers.push(system);
        Ok(())
    }

    /// Remove a subscription. Unknown subscriptions are a silent no-op.
    pub fn unsubscribe(&mut self, event: EventId, system: SystemId) {
        if let Some(channel) = self.channels.get_mut(event.index()) {
            channel.subscribers.retain(|&s| s != system);
        }
    }

    /// The channel's subscribers in subscription order.
    pub fn subscribers(&self, event: EventId) -> &[SystemId] {
        self.channels
            .get(event.index())
            .map(|c| c.subscribers.as_slice())
            .unwrap_or(&[])
    }

    /// Queue a message for delivery at the start of the next flush.
    pub fn send(&self, event: EventId, payload: Var, timestamp: Option<u64>) -> Result<()> {
        let channel = self.channels.get(event.index()).ok_or(Error::DoesNotExist)?;
        channel
            .deferred
            .lock()
            .unwrap()
            .push_back(Message { payload, timestamp });
        Ok(())
    }

    /// Take every queued message of one channel, in send order.
    pub fn drain(&self, event: EventId) -> Vec<Message> {
        match self.channels.get(event.index()) {
            Some(channel) => channel.deferred.lock().unwrap().drain(..).collect(),
            None => Vec::new(),
        }
    }

    /// Queued message count for one channel.
    pub fn pending(&self, event: EventId) -> usize {
        self.channels
            .get(event.index())
            .map(|c| c.deferred.lock().unwrap().len())
            .unwrap_or(0)
    }

    /// Iterate channel ids in creation order - the flush order.
    pub fn ids(&self) -> impl Iterator<Item = EventId> {
        (0..self.channels.len() as u32).map(EventId::new)
    }
}
