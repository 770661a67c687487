use crate::config::SelectionStrategy;
use std::collections::VecDeque;

/// Which clients may take another call and how many calls each one has in
/// flight.
///
/// A client id is in `ready` iff its count is below `ceiling`. Plain data; the
/// pool keeps it behind a mutex.
#[derive(Debug)]
pub(crate) struct ReadySet {
    strategy: SelectionStrategy,
    ceiling: usize,
    ready: VecDeque<usize>,
    active: Vec<usize>,
}

impl ReadySet {
    pub(crate) fn new(len: usize, ceiling: usize, strategy: SelectionStrategy) -> Self {
        Self {
            strategy,
            ceiling,
            ready: (0..len).collect(),
            active: vec![0; len],
        }
    }

    /// Takes one ready client and counts a call against it. Returns `None`
    /// when every client is saturated.
    pub(crate) fn select(&mut self) -> Option<usize> {
        let id = match self.strategy {
            SelectionStrategy::Lifo => self.ready.pop_back()?,
            SelectionStrategy::RoundRobin => self.ready.pop_front()?,
            SelectionStrategy::LeastLoaded => {
                let position = self
                    .ready
                    .iter()
                    .enumerate()
                    .min_by_key(|&(_, &id)| (self.active[id], id))
                    .map(|(position, _)| position)?;
                self.ready.remove(position)?
            }
        };

        self.active[id] += 1;
        if self.active[id] < self.ceiling {
            match self.strategy {
                SelectionStrategy::Lifo => self.ready.push_front(id),
                SelectionStrategy::RoundRobin | SelectionStrategy::LeastLoaded => {
                    self.ready.push_back(id);
                }
            }
        }
        Some(id)
    }

    /// Settles one call on `id`. Returns `true` if the client was saturated
    /// and is ready again.
    pub(crate) fn release(&mut self, id: usize) -> bool {
        debug_assert!(self.active[id] > 0, "release without a matching select");
        let was_saturated = self.active[id] >= self.ceiling;
        self.active[id] = self.active[id].saturating_sub(1);
        if was_saturated {
            self.ready.push_back(id);
        }
        was_saturated
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.ready.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.ready.len()
    }

    pub(crate) fn active(&self, id: usize) -> usize {
        self.active.get(id).copied().unwrap_or_default()
    }

    pub(crate) fn total_active(&self) -> usize {
        self.active.iter().sum()
    }
}
