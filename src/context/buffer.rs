//! Trigger buffer — FIFO of fired hotkeys awaiting the next poll.

use std::collections::VecDeque;

use crate::config::OverflowPolicy;
use crate::hotkey::Hotkey;

/// Bounded (or unbounded) FIFO with a drop counter.
#[derive(Debug)]
pub(crate) struct TriggerBuffer {
    queue: VecDeque<Hotkey>,
    capacity: usize,
    overflow: OverflowPolicy,
    dropped: u64,
}

impl TriggerBuffer {
    /// `capacity == 0` means unbounded.
    pub(crate) fn new(capacity: usize, overflow: OverflowPolicy) -> Self {
        Self {
            queue: VecDeque::new(),
            capacity,
            overflow,
            dropped: 0,
        }
    }

    /// Append a trigger, applying the overflow policy when full.
    ///
    /// Returns the evicted or rejected entry, if any.
    pub(crate) fn push(&mut self, hotkey: Hotkey) -> Option<Hotkey> {
        if self.capacity != 0 && self.queue.len() >= self.capacity {
            self.dropped += 1;
            return match self.overflow {
                OverflowPolicy::DropOldest => {
                    let evicted = self.queue.pop_front();
                    self.queue.push_back(hotkey);
                    evicted
                }
                OverflowPolicy::DropNewest => Some(hotkey),
            };
        }
        self.queue.push_back(hotkey);
        None
    }

    /// Take every pending trigger, oldest first.
    pub(crate) fn drain(&mut self) -> Vec<Hotkey> {
        self.queue.drain(..).collect()
    }

    pub(crate) fn clear(&mut self) {
        self.queue.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.queue.len()
    }

    pub(crate) fn dropped(&self) -> u64 {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hotkey::{Key, Modifiers};

    fn hk(key: Key) -> Hotkey {
        Hotkey::new(Modifiers::CTRL, key)
    }

    #[test]
    fn drain_is_fifo_and_empties() {
        let mut buffer = TriggerBuffer::new(0, OverflowPolicy::DropOldest);
        buffer.push(hk(Key::A));
        buffer.push(hk(Key::B));
        buffer.push(hk(Key::A));

        assert_eq!(buffer.drain(), vec![hk(Key::A), hk(Key::B), hk(Key::A)]);
        assert!(buffer.drain().is_empty());
        assert_eq!(buffer.len(), 0);
    }

    #[test]
    fn unbounded_never_drops() {
        let mut buffer = TriggerBuffer::new(0, OverflowPolicy::DropNewest);
        for _ in 0..10_000 {
            assert_eq!(buffer.push(hk(Key::Z)), None);
        }
        assert_eq!(buffer.len(), 10_000);
        assert_eq!(buffer.dropped(), 0);
    }

    #[test]
    fn drop_oldest_evicts_front() {
        let mut buffer = TriggerBuffer::new(2, OverflowPolicy::DropOldest);
        buffer.push(hk(Key::A));
        buffer.push(hk(Key::B));
        assert_eq!(buffer.push(hk(Key::C)), Some(hk(Key::A)));

        assert_eq!(buffer.drain(), vec![hk(Key::B), hk(Key::C)]);
        assert_eq!(buffer.dropped(), 1);
    }

    #[test]
    fn drop_newest_rejects_incoming() {
        let mut buffer = TriggerBuffer::new(2, OverflowPolicy::DropNewest);
        buffer.push(hk(Key::A));
        buffer.push(hk(Key::B));
        assert_eq!(buffer.push(hk(Key::C)), Some(hk(Key::C)));
        assert_eq!(buffer.push(hk(Key::D)), Some(hk(Key::D)));

        assert_eq!(buffer.drain(), vec![hk(Key::A), hk(Key::B)]);
        assert_eq!(buffer.dropped(), 2);
    }
}
