use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

/// Max-weight queue; equal weights come out in insertion order.
#[derive(Debug)]
pub struct PriorityQueue<T> {
    heap: BinaryHeap<Entry<T>>,
    next_sequence: u64,
}

#[derive(Debug)]
struct Entry<T> {
    weight: u32,
    sequence: u64,
    item: T,
}

impl<T> Entry<T> {
    fn rank(&self) -> (u32, Reverse<u64>) {
        (self.weight, Reverse(self.sequence))
    }
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.rank() == other.rank()
    }
}

impl<T> Eq for Entry<T> {}

impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Entry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl<T> Default for PriorityQueue<T> {
    fn default() -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_sequence: 0,
        }
    }
}

impl<T> PriorityQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, item: T, weight: u32) {
        let sequence = self.next_sequence;
        self.next_sequence = self.next_sequence.saturating_add(1);
        self.heap.push(Entry {
            weight,
            sequence,
            item,
        });
    }

    pub fn dequeue(&mut self) -> Option<T> {
        self.heap.pop().map(|entry| entry.item)
    }

    pub fn peek(&self) -> Option<&T> {
        self.heap.peek().map(|entry| &entry.item)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Drops every item matching `predicate`, returning how many were removed.
    pub fn remove_where(&mut self, mut predicate: impl FnMut(&T) -> bool) -> usize {
        let before = self.heap.len();
        self.heap.retain(|entry| !predicate(&entry.item));
        before - self.heap.len()
    }
}

#[cfg(test)]
mod tests {
    use super::PriorityQueue;

    #[test]
    fn dequeues_highest_weight_first() {
        let mut queue = PriorityQueue::new();
        for (item, weight) in [("low", 25), ("critical", 100), ("normal", 50), ("high", 75)] {
            queue.enqueue(item, weight);
        }

        let order: Vec<_> = std::iter::from_fn(|| queue.dequeue()).collect();
        assert_eq!(order, vec!["critical", "high", "normal", "low"]);
    }

    #[test]
    fn equal_weights_keep_insertion_order() {
        let mut queue = PriorityQueue::new();
        for item in 0..32 {
            queue.enqueue(item, 50);
        }
        queue.enqueue(99, 75);

        assert_eq!(queue.peek(), Some(&99));
        assert_eq!(queue.dequeue(), Some(99));
        let order: Vec<_> = std::iter::from_fn(|| queue.dequeue()).collect();
        assert_eq!(order, (0..32).collect::<Vec<_>>());
    }

    #[test]
    fn reinserted_items_join_the_back_of_their_weight_class() {
        let mut queue = PriorityQueue::new();
        queue.enqueue("a", 50);
        queue.enqueue("b", 50);
        let first = queue.dequeue().unwrap();
        queue.enqueue(first, 50);

        assert_eq!(queue.dequeue(), Some("b"));
        assert_eq!(queue.dequeue(), Some("a"));
        assert!(queue.is_empty());
    }

    #[test]
    fn remove_where_preserves_remaining_order() {
        let mut queue = PriorityQueue::new();
        queue.enqueue(1, 50);
        queue.enqueue(2, 50);
        queue.enqueue(3, 50);

        assert_eq!(queue.remove_where(|item| *item == 2), 1);
        assert_eq!(queue.remove_where(|item| *item == 7), 0);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.dequeue(), Some(1));
        assert_eq!(queue.dequeue(), Some(3));
        assert_eq!(queue.dequeue(), None);
    }
}
