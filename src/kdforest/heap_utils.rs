//! This module contains an array-backed binary heap with a caller-supplied ordering.
//!
//! Unlike `std::collections::BinaryHeap`, elements can be inspected and
//! replaced in place through their slot index and the heap property restored
//! with [`Heap::update`]. The forest uses three instances: the search queue
//! (smallest lower bound first), the split-dimension candidates (smallest
//! variance first) and the bounded neighbor set (largest distance first).

/// Ordering rule of a [`Heap`]: `precedes(a, b)` is true when `a` must sit
/// closer to the root than `b`.
///
/// The rule must be a strict weak ordering. Closures `Fn(&T, &T) -> bool`
/// implement it directly.
pub trait HeapOrder<T> {
    fn precedes(&self, a: &T, b: &T) -> bool;
}

impl<T, F> HeapOrder<T> for F
where
    F: Fn(&T, &T) -> bool,
{
    fn precedes(&self, a: &T, b: &T) -> bool {
        self(a, b)
    }
}

/// Binary heap laid out as an implicit tree in a `Vec`.
///
/// The children of slot `i` are `2i + 1` and `2i + 2`; slot 0 holds the
/// element that precedes every other one.
#[derive(Debug, Clone)]
pub struct Heap<T, O> {
    nodes: Vec<T>,
    order: O,
}

#[inline]
fn parent(index: usize) -> usize {
    (index - 1) / 2
}

#[inline]
fn left_child(index: usize) -> usize {
    2 * index + 1
}

impl<T, O: HeapOrder<T>> Heap<T, O> {
    pub fn new(order: O) -> Self {
        Heap {
            nodes: Vec::new(),
            order,
        }
    }

    pub fn with_capacity(capacity: usize, order: O) -> Self {
        Heap {
            nodes: Vec::with_capacity(capacity),
            order,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Removes every element, keeping the allocation.
    pub fn clear(&mut self) {
        self.nodes.clear();
    }

    /// The root element, if any.
    pub fn peek(&self) -> Option<&T> {
        self.nodes.first()
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.nodes.get(index)
    }

    /// The elements in heap (not sorted) order.
    pub fn as_slice(&self) -> &[T] {
        &self.nodes
    }

    /// Appends `item` and sifts it toward the root.
    pub fn push(&mut self, item: T) {
        self.nodes.push(item);
        let last = self.nodes.len() - 1;
        self.sift_up(last);
    }

    /// Removes and returns the root element.
    ///
    /// The root is swapped with the last slot, the heap shrinks by one and the
    /// new root is sifted down.
    pub fn pop(&mut self) -> Option<T> {
        if self.nodes.is_empty() {
            return None;
        }
        let last = self.nodes.len() - 1;
        self.nodes.swap(0, last);
        let root = self.nodes.pop();
        if self.nodes.len() > 1 {
            self.sift_down(0);
        }
        root
    }

    /// Restores the heap property after the element at `index` changed in place.
    ///
    /// # Panics
    /// Panics if `index` is out of range.
    pub fn update(&mut self, index: usize) {
        assert!(index < self.nodes.len(), "heap index {} out of range", index);
        let index = self.sift_up(index);
        self.sift_down(index);
    }

    /// Overwrites the element at `index` and restores the heap property.
    /// Returns the element that was replaced.
    ///
    /// # Panics
    /// Panics if `index` is out of range.
    pub fn replace(&mut self, index: usize, item: T) -> T {
        let old = std::mem::replace(&mut self.nodes[index], item);
        self.update(index);
        old
    }

    /// Moves the element at `index` toward the root while it precedes its
    /// parent. Returns its final slot.
    fn sift_up(&mut self, mut index: usize) -> usize {
        while index > 0 {
            let parent_index = parent(index);
            if !self
                .order
                .precedes(&self.nodes[index], &self.nodes[parent_index])
            {
                break;
            }
            self.nodes.swap(index, parent_index);
            index = parent_index;
        }
        index
    }

    /// Moves the element at `index` toward the leaves, swapping with the
    /// preceding child while that child precedes it.
    fn sift_down(&mut self, mut index: usize) {
        let len = self.nodes.len();
        loop {
            let left = left_child(index);
            if left >= len {
                return;
            }
            let right = left + 1;
            let child = if right < len && self.order.precedes(&self.nodes[right], &self.nodes[left])
            {
                right
            } else {
                left
            };
            if !self.order.precedes(&self.nodes[child], &self.nodes[index]) {
                return;
            }
            self.nodes.swap(index, child);
            index = child;
        }
    }
}
