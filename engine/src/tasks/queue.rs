//! Lock-free MPMC var queue.

use crossbeam::queue::SegQueue;

use crate::value::Var;

/// An unbounded multi-producer multi-consumer queue of [`Var`] values.
///
/// Writes and reads are lock-free; there is no blocking read. Use
/// [`Channel`](crate::tasks::Channel) when a consumer needs to wait.
#[derive(Default)]
pub struct VarQueue {
    queue: SegQueue<Var>,
}

impl VarQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a value.
    pub fn write(&self, value: Var) {
        self.queue.push(value);
    }

    /// Dequeue into `out`. Returns `false` when the queue was empty, leaving
    /// `out` untouched.
    pub fn try_read(&self, out: &mut Var) -> bool {
        match self.queue.pop() {
            Some(value) => {
                *out = value;
                true
            }
            None => false,
        }
    }

    /// Number of queued values at this instant.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// `true` when nothing is queued at this instant.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn write_then_try_read_fifo() {
        let queue = VarQueue::new();
        queue.write(Var::Int(1));
        queue.write(Var::Int(2));

        let mut out = Var::Nil;
        assert!(queue.try_read(&mut out));
        assert_eq!(out, Var::Int(1));
        assert!(queue.try_read(&mut out));
        assert_eq!(out, Var::Int(2));
    }

    #[test]
    fn try_read_on_empty_returns_false_and_preserves_out() {
        let queue = VarQueue::new();
        let mut out = Var::Int(7);

        assert!(!queue.try_read(&mut out));
        assert_eq!(out, Var::Int(7));
    }

    #[test]
    fn concurrent_producers_and_consumers_lose_nothing() {
        let queue = Arc::new(VarQueue::new());
        const PER_PRODUCER: u64 = 500;

        let producers: Vec<_> = (0..4)
            .map(|p| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for i in 0..PER_PRODUCER {
                        queue.write(Var::Uint(p * PER_PRODUCER + i));
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }

        let consumers: Vec<_> = (0..4)
            .map(|_| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    let mut got = Vec::new();
                    let mut out = Var::Nil;
                    while queue.try_read(&mut out) {
                        got.push(out.as_uint().unwrap());
                    }
                    got
                })
            })
            .collect();

        let mut all: Vec<u64> = consumers
            .into_iter()
            .flat_map(|c| c.join().unwrap())
            .collect();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 4 * PER_PRODUCER as usize);
    }
}
