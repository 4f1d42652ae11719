use std::collections::VecDeque;

/// Keeps resources alive until the submission that last used them has finished.
///
/// Serials must be retired in non-decreasing order, which is how a single
/// queue hands them out.
#[derive(Debug)]
pub struct DeferredReleaseQueue<T> {
    pending: VecDeque<(u64, T)>,
}

impl<T> Default for DeferredReleaseQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> DeferredReleaseQueue<T> {
    pub fn new() -> Self {
        Self {
            pending: VecDeque::new(),
        }
    }

    pub fn retire(&mut self, serial: u64, resource: T) {
        debug_assert!(
            self.pending.back().is_none_or(|(last, _)| *last <= serial),
            "serials must be retired in order"
        );
        self.pending.push_back((serial, resource));
    }

    /// Drops everything retired at or before `completed_serial` and returns how many.
    pub fn release_completed(&mut self, completed_serial: u64) -> usize {
        let mut released = 0;
        while self
            .pending
            .front()
            .is_some_and(|(serial, _)| *serial <= completed_serial)
        {
            self.pending.pop_front();
            released += 1;
        }

        if released > 0 {
            log::trace!("Released {released} deferred resources up to serial {completed_serial}");
        }

        released
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::Cell, rc::Rc};

    use super::*;

    struct DropCounter(Rc<Cell<usize>>);

    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.0.set(self.0.get() + 1);
        }
    }

    #[test]
    fn resources_outlive_their_submission() {
        let dropped = Rc::new(Cell::new(0));
        let mut queue = DeferredReleaseQueue::new();
        queue.retire(1, DropCounter(dropped.clone()));
        queue.retire(2, DropCounter(dropped.clone()));

        assert_eq!(queue.release_completed(0), 0);
        assert_eq!(dropped.get(), 0);

        assert_eq!(queue.release_completed(1), 1);
        assert_eq!(dropped.get(), 1);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn later_serial_releases_everything_before_it() {
        let mut queue = DeferredReleaseQueue::new();
        queue.retire(3, "a");
        queue.retire(3, "b");
        queue.retire(5, "c");

        assert_eq!(queue.release_completed(7), 3);
        assert!(queue.is_empty());
    }
}
