//! Blocking var channels with multi-channel select.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use crate::value::Var;

/// A blocking channel of [`Var`] values.
///
/// Writers never block. [`Channel::read`] blocks until a value arrives; a
/// single-reader mutex serializes concurrent readers so two threads cannot
/// interleave a read. Values are deep-copied in on write, so sender and
/// receiver never alias storage; only a `Ptr` payload shares its object.
///
/// Cloning the channel clones the handle; both handles address the same
/// underlying buffer.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<Inner>,
}

struct Inner {
    buffer: Mutex<VecDeque<Var>>,
    available: Condvar,
    reader: Mutex<()>,
    /// Wakeup hook installed while a `select` is waiting on this channel.
    select: Mutex<Option<Arc<SelectShared>>>,
}

struct SelectShared {
    gate: Mutex<()>,
    ready: Condvar,
}

impl Default for Channel {
    fn default() -> Self {
        Self::new()
    }
}

impl Channel {
    /// Create an empty channel.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                buffer: Mutex::new(VecDeque::new()),
                available: Condvar::new(),
                reader: Mutex::new(()),
                select: Mutex::new(None),
            }),
        }
    }

    /// Append a value. Wakes one blocked reader and any select waiting on
    /// this channel.
    pub fn write(&self, value: Var) {
        self.inner.buffer.lock().unwrap().push_back(value.clone());
        self.inner.available.notify_one();

        if let Some(shared) = self.inner.select.lock().unwrap().as_ref() {
            // Serialize against the waiter's check-then-wait so the
            // notification cannot fall between its check and its sleep.
            drop(shared.gate.lock().unwrap());
            shared.ready.notify_all();
        }
    }

    /// Block until a value is available and take it.
    pub fn read(&self) -> Var {
        let _single_reader = self.inner.reader.lock().unwrap();
        let mut buffer = self.inner.buffer.lock().unwrap();
        loop {
            if let Some(value) = buffer.pop_front() {
                return value;
            }
            buffer = self.inner.available.wait(buffer).unwrap();
        }
    }

    /// Take a value if one is available. Never blocks.
    pub fn try_read(&self) -> Option<Var> {
        let _single_reader = self.inner.reader.lock().unwrap();
        self.inner.buffer.lock().unwrap().pop_front()
    }

    /// Copy the front value without consuming it. Never blocks.
    pub fn peek(&self) -> Option<Var> {
        self.inner.buffer.lock().unwrap().front().cloned()
    }

    /// Number of buffered values.
    pub fn len(&self) -> usize {
        self.inner.buffer.lock().unwrap().len()
    }

    /// `true` when no values are buffered.
    pub fn is_empty(&self) -> bool {
        self.inner.buffer.lock().unwrap().is_empty()
    }

    fn set_select(&self, shared: Option<Arc<SelectShared>>) {
        *self.inner.select.lock().unwrap() = shared;
    }

    fn has_data(&self) -> bool {
        !self.inner.buffer.lock().unwrap().is_empty()
    }
}

/// Rotating origin for select polling so one busy channel cannot starve the
/// others.
static SELECT_ORIGIN: AtomicUsize = AtomicUsize::new(0);

/// Block until any of `channels` has a value, then read and return it.
///
/// Polling starts at a rotating origin each call, so repeated selects over
/// the same set give every channel a turn even when several are always
/// ready.
///
/// # Panics
///
/// Panics when `channels` is empty - there is nothing to wait on.
pub fn select(channels: &[&Channel]) -> Var {
    assert!(!channels.is_empty(), "select over an empty channel set");

    let shared = Arc::new(SelectShared {
        gate: Mutex::new(()),
        ready: Condvar::new(),
    });
    for channel in channels {
        channel.set_select(Some(Arc::clone(&shared)));
    }

    let origin = SELECT_ORIGIN.fetch_add(1, Ordering::Relaxed);
    let selected = {
        let mut gate = shared.gate.lock().unwrap();
        loop {
            let found = (0..channels.len())
                .map(|i| (origin + i) % channels.len())
                .find(|&i| channels[i].has_data());
            match found {
                Some(i) => break i,
                None => gate = shared.ready.wait(gate).unwrap(),
            }
        }
    };

    for channel in channels {
        channel.set_select(None);
    }
    channels[selected].read()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn write_then_read() {
        let ch = Channel::new();

        ch.write(Var::Int(1));
        ch.write(Var::Int(2));

        assert_eq!(ch.read(), Var::Int(1));
        assert_eq!(ch.read(), Var::Int(2));
    }

    #[test]
    fn read_blocks_until_write() {
        let ch = Channel::new();
        let writer = ch.clone();

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            writer.write(Var::from("late"));
        });

        assert_eq!(ch.read(), Var::from("late"));
        handle.join().unwrap();
    }

    #[test]
    fn peek_does_not_consume() {
        let ch = Channel::new();
        ch.write(Var::Int(7));

        assert_eq!(ch.peek(), Some(Var::Int(7)));
        assert_eq!(ch.len(), 1);
        assert_eq!(ch.read(), Var::Int(7));
        assert_eq!(ch.peek(), None);
    }

    #[test]
    fn try_read_never_blocks() {
        let ch = Channel::new();
        assert_eq!(ch.try_read(), None);

        ch.write(Var::Bool(true));
        assert_eq!(ch.try_read(), Some(Var::Bool(true)));
    }

    #[test]
    fn values_are_copied_in() {
        let ch = Channel::new();
        let mut original = Var::Array(vec![Var::Int(1)]);

        ch.write(original.clone());
        *original.index_mut(0).unwrap() = Var::Int(99);

        assert_eq!(ch.read(), Var::Array(vec![Var::Int(1)]));
    }

    #[test]
    fn select_returns_ready_channel() {
        let a = Channel::new();
        let b = Channel::new();

        b.write(Var::Int(2));

        let value = select(&[&a, &b]);
        assert_eq!(value, Var::Int(2));
    }

    #[test]
    fn select_blocks_until_any_write() {
        let a = Channel::new();
        let b = Channel::new();
        let writer = b.clone();

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            writer.write(Var::from("from-b"));
        });

        let value = select(&[&a, &b]);
        assert_eq!(value, Var::from("from-b"));
        handle.join().unwrap();

        // Select hooks are removed afterwards.
        a.write(Var::Int(1));
        assert_eq!(a.read(), Var::Int(1));
    }

    #[test]
    fn select_drains_all_ready_channels_over_repeated_calls() {
        let a = Channel::new();
        let b = Channel::new();
        a.write(Var::Int(10));
        b.write(Var::Int(20));

        let first = select(&[&a, &b]);
        let second = select(&[&a, &b]);

        let mut got = vec![first.as_int().unwrap(), second.as_int().unwrap()];
        got.sort();
        assert_eq!(got, vec![10, 20]);
    }

    #[test]
    #[should_panic(expected = "select over an empty channel set")]
    fn select_over_nothing_panics() {
        select(&[]);
    }
}
