use std::collections::VecDeque;

/// Fixed-capacity buffer that evicts its oldest element when full.
///
/// A capacity of `0` stores nothing.
#[derive(Clone, Debug)]
pub(crate) struct RingBuffer<T> {
    inner: VecDeque<T>,
    capacity: usize,
}

impl<T> RingBuffer<T> {
    pub(crate) fn new(capacity: usize) -> Self {
        Self { inner: VecDeque::with_capacity(capacity), capacity }
    }

    /// Adds a new element, removing the oldest one if the buffer is full.
    pub(crate) fn push(&mut self, item: T) {
        if self.capacity == 0 {
            return;
        }
        if self.inner.len() == self.capacity {
            self.inner.pop_front();
        }
        self.inner.push_back(item);
    }

    /// Removes and returns the newest element.
    pub(crate) fn pop_back(&mut self) -> Option<T> {
        self.inner.pop_back()
    }

    /// Returns a reference to the newest element.
    pub(crate) fn back(&self) -> Option<&T> {
        self.inner.back()
    }

    /// Iterates from the oldest to the newest element.
    pub(crate) fn iter(&self) -> impl DoubleEndedIterator<Item = &T> {
        self.inner.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_capacity_ignores_elements() {
        let mut buf = RingBuffer::<u32>::new(0);
        buf.push(1);
        assert_eq!(buf.back(), None);
    }

    #[test]
    fn evicts_oldest_when_full() {
        let mut buf = RingBuffer::new(2);
        buf.push(1);
        buf.push(2);
        buf.push(3);

        assert_eq!(buf.iter().copied().collect::<Vec<_>>(), [2, 3]);
        assert_eq!(buf.pop_back(), Some(3));
        assert_eq!(buf.pop_back(), Some(2));
        assert_eq!(buf.pop_back(), None);
    }

    #[test]
    fn back_is_newest() {
        let mut buf = RingBuffer::new(4);
        buf.push("a");
        buf.push("b");
        assert_eq!(buf.back(), Some(&"b"));
        assert_eq!(buf.iter().rev().next(), Some(&"b"));
    }
}
