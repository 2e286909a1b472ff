// Copyright (C) 2025 Ryan Daum <ryan.daum@gmail.com> This program is free
// software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, version
// 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Priority-ordered ready queue.
//!
//! Entries are kept sorted by descending priority. Entries of equal priority form a
//! band that is served first-in first-out. The queue has no synchronization of its
//! own; the scheduler only touches it while holding the baton.

use crate::task::Priority;
use std::collections::VecDeque;
use std::sync::Arc;

/// Anything that can be ordered in a [`PriorityQueue`].
pub trait Prioritized {
    fn priority(&self) -> Priority;
}

impl<T: Prioritized> Prioritized for Arc<T> {
    fn priority(&self) -> Priority {
        (**self).priority()
    }
}

impl Prioritized for Priority {
    fn priority(&self) -> Priority {
        *self
    }
}

/// Ordered container, highest priority at the front.
#[derive(Debug, Clone)]
pub struct PriorityQueue<T> {
    entries: VecDeque<T>,
}

impl<T: Prioritized> PriorityQueue<T> {
    pub fn new() -> Self {
        Self {
            entries: VecDeque::new(),
        }
    }

    /// Insert behind every entry of greater or equal priority.
    pub fn push(&mut self, entry: T) {
        let priority = entry.priority();
        // Linear scan; task counts are small
        let position = self
            .entries
            .iter()
            .position(|existing| existing.priority() < priority)
            .unwrap_or(self.entries.len());
        self.entries.insert(position, entry);
    }

    /// The highest-priority entry, if any
    pub fn peek(&self) -> Option<&T> {
        self.entries.front()
    }

    /// Remove and return the highest-priority entry
    pub fn pop(&mut self) -> Option<T> {
        self.entries.pop_front()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in dispatch order
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl<T: Prioritized> Default for PriorityQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
