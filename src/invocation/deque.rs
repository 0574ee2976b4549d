//! Growable ring buffer of continuation slots.
//!
//! A pending stage queues its continuations here. Each continuation occupies
//! one slot for the handler plus one slot per auxiliary argument, pushed as a
//! group so the slots of one continuation are always contiguous.
//!
//! The deque freezes the instant a poll finds it empty. From then on every
//! push is rejected and the caller has to run its continuation against the
//! final outcome itself, on a new stage.

/// Initial slot capacity; always a power of two.
const INITIAL_CAPACITY: usize = 8;

/// Rejected push: the deque is frozen. Carries the slots back to the caller.
#[derive(Debug)]
pub struct Frozen<T>(pub T);

/// FIFO ring buffer with head/tail wrap and doubling growth.
#[derive(Debug)]
pub struct HandlerDeque<S> {
    /// Slot storage; length is the capacity and always a power of two.
    slots: Vec<Option<S>>,

    /// Index of the oldest slot.
    head: usize,

    /// Number of occupied slots.
    len: usize,

    /// Set once a poll drained the deque; never cleared.
    frozen: bool,
}

impl<S> HandlerDeque<S> {
    /// Create an empty, open deque.
    pub fn new() -> Self {
        Self::with_capacity(INITIAL_CAPACITY)
    }

    /// Create an empty, open deque with at least `capacity` slots.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1).next_power_of_two();
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            slots,
            head: 0,
            len: 0,
            frozen: false,
        }
    }

    /// Create a deque that is frozen from the start.
    ///
    /// Used for stages that are produced already completed, e.g. an
    /// immediately-exceptional result.
    pub fn frozen() -> Self {
        Self {
            slots: Vec::new(),
            head: 0,
            len: 0,
            frozen: true,
        }
    }

    /// Number of queued slots.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if no slots are queued.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Current slot capacity.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Check if the deque rejects new slots.
    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Freeze explicitly. Queued slots can still be polled.
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    /// Append one slot at the tail.
    pub fn push(&mut self, slot: S) -> Result<(), Frozen<S>> {
        if self.frozen {
            return Err(Frozen(slot));
        }
        self.reserve(1);
        self.write_tail(slot);
        Ok(())
    }

    /// Append a group of slots contiguously, or none of them.
    pub fn push_group<const N: usize>(&mut self, group: [S; N]) -> Result<(), Frozen<[S; N]>> {
        if self.frozen {
            return Err(Frozen(group));
        }
        self.reserve(N);
        for slot in group {
            self.write_tail(slot);
        }
        Ok(())
    }

    /// Remove the oldest slot.
    ///
    /// Returns `None` and freezes the deque when it is empty.
    pub fn poll(&mut self) -> Option<S> {
        if self.len == 0 {
            self.frozen = true;
            return None;
        }
        let mask = self.slots.len() - 1;
        let slot = self.slots[self.head].take();
        self.head = (self.head + 1) & mask;
        self.len -= 1;
        slot
    }

    fn write_tail(&mut self, slot: S) {
        let mask = self.slots.len() - 1;
        let tail = (self.head + self.len) & mask;
        self.slots[tail] = Some(slot);
        self.len += 1;
    }

    fn reserve(&mut self, additional: usize) {
        let required = self.len + additional;
        if required <= self.slots.len() {
            return;
        }
        let mut capacity = self.slots.len().max(1);
        while capacity < required {
            capacity *= 2;
        }
        self.grow(capacity);
    }

    /// Re-pack the live slots at index 0 of a larger buffer, oldest first.
    fn grow(&mut self, capacity: usize) {
        let old_capacity = self.slots.len();
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        for (i, target) in slots.iter_mut().enumerate().take(self.len) {
            *target = self.slots[(self.head + i) & (old_capacity - 1)].take();
        }
        self.slots = slots;
        self.head = 0;
    }
}

impl<S> Default for HandlerDeque<S> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_across_wrap_and_growth() {
        let mut deque = HandlerDeque::with_capacity(4);
        deque.push(1).unwrap();
        deque.push(2).unwrap();
        deque.push(3).unwrap();
        assert_eq!(deque.poll(), Some(1));
        assert_eq!(deque.poll(), Some(2));

        // tail wraps around index 0 before the buffer grows
        deque.push(4).unwrap();
        deque.push(5).unwrap();
        deque.push(6).unwrap();
        assert_eq!(deque.capacity(), 4);
        deque.push(7).unwrap();
        assert_eq!(deque.capacity(), 8);

        let drained: Vec<_> = std::iter::from_fn(|| deque.poll()).collect();
        assert_eq!(drained, vec![3, 4, 5, 6, 7]);
        assert!(deque.is_frozen());
    }

    #[test]
    fn group_push_is_contiguous_and_grows_once() {
        let mut deque = HandlerDeque::with_capacity(2);
        deque.push(0).unwrap();
        deque.push_group([1, 2, 3]).unwrap();
        assert_eq!(deque.capacity(), 4);
        assert_eq!(deque.len(), 4);
        assert_eq!(deque.poll(), Some(0));
        assert_eq!(deque.poll(), Some(1));
        assert_eq!(deque.poll(), Some(2));
        assert_eq!(deque.poll(), Some(3));
    }

    #[test]
    fn poll_on_empty_freezes() {
        let mut deque = HandlerDeque::new();
        assert!(!deque.is_frozen());
        assert_eq!(deque.poll(), None::<u8>);
        assert!(deque.is_frozen());

        let Err(Frozen(rejected)) = deque.push(9) else {
            panic!("push after freeze must be rejected");
        };
        assert_eq!(rejected, 9);

        let Err(Frozen(group)) = deque.push_group([1, 2]) else {
            panic!("group push after freeze must be rejected");
        };
        assert_eq!(group, [1, 2]);
        assert!(deque.is_empty());
    }

    #[test]
    fn pre_frozen_deque_rejects_everything() {
        let mut deque: HandlerDeque<u8> = HandlerDeque::frozen();
        assert!(deque.push(1).is_err());
        assert_eq!(deque.poll(), None);
    }
}
