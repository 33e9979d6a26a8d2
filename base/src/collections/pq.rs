//! A keyed priority queue which yields the item with the *smallest*
//! priority first.  The simulator uses it to find the device whose
//! next poll time is earliest.
use std::cmp::Ordering;
use std::fmt::{self, Debug, Formatter};
use std::hash::Hash;

use keyed_priority_queue::KeyedPriorityQueue;

#[derive(Debug)]
struct ReverseOrdered<T> {
    inner: T,
}

impl<T> From<T> for ReverseOrdered<T> {
    fn from(inner: T) -> ReverseOrdered<T> {
        ReverseOrdered { inner }
    }
}

impl<T: Ord> PartialOrd for ReverseOrdered<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: Eq> Eq for ReverseOrdered<T> {}

impl<T: Eq> PartialEq for ReverseOrdered<T> {
    fn eq(&self, other: &Self) -> bool {
        self.inner == other.inner
    }
}

impl<T: Ord> Ord for ReverseOrdered<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        other.inner.cmp(&self.inner)
    }
}

pub struct KeyedReversePriorityQueue<K: Hash + Eq + Ord, P: Ord> {
    items: KeyedPriorityQueue<K, ReverseOrdered<P>>,
}

impl<K, P> KeyedReversePriorityQueue<K, P>
where
    K: Hash + Eq + Ord,
    P: Ord,
{
    pub fn new() -> KeyedReversePriorityQueue<K, P> {
        KeyedReversePriorityQueue {
            items: KeyedPriorityQueue::<K, ReverseOrdered<P>>::new(),
        }
    }

    pub fn peek(&self) -> Option<(&K, &P)> {
        self.items.peek().map(|(k, p)| (k, &p.inner))
    }

    pub fn pop(&mut self) -> Option<(K, P)> {
        self.items.pop().map(|(k, p)| (k, p.inner))
    }

    /// Insert `key`, or change its priority if it is already
    /// present.  Returns the previous priority, if there was one.
    pub fn push(&mut self, key: K, priority: P) -> Option<P> {
        self.items
            .push(key, ReverseOrdered::from(priority))
            .map(|rd| rd.inner)
    }

    pub fn clear(&mut self) {
        while self.items.pop().is_some() {}
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<K, P> Default for KeyedReversePriorityQueue<K, P>
where
    K: Hash + Eq + Ord,
    P: Ord,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, P> Debug for KeyedReversePriorityQueue<K, P>
where
    K: Hash + Eq + Ord + Debug,
    P: Ord + Debug,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedReversePriorityQueue")
            .field("items", &self.items)
            .finish()
    }
}

#[test]
fn test_reverse_order() {
    assert!(ReverseOrdered::from(1) < ReverseOrdered::from(0));
    assert_eq!(ReverseOrdered::from(3), ReverseOrdered::from(3));
}

#[test]
fn test_empty() {
    let mut q: KeyedReversePriorityQueue<u8, u64> = KeyedReversePriorityQueue::default();
    assert!(q.is_empty());
    assert_eq!(q.peek(), None);
    assert_eq!(q.pop(), None);
}

#[test]
fn test_earliest_first() {
    let mut q: KeyedReversePriorityQueue<u8, u64> = KeyedReversePriorityQueue::new();
    assert_eq!(q.push(3, 900), None);
    assert_eq!(q.push(1, 100), None);
    assert_eq!(q.push(2, 500), None);
    assert_eq!(q.pop(), Some((1, 100)));
    assert_eq!(q.pop(), Some((2, 500)));
    assert_eq!(q.pop(), Some((3, 900)));
}

#[test]
fn test_push_replaces_priority() {
    let mut q: KeyedReversePriorityQueue<u8, u64> = KeyedReversePriorityQueue::new();
    assert_eq!(q.push(7, 20), None);
    assert_eq!(q.push(7, 40), Some(20));
    assert_eq!(q.len(), 1);
    assert_eq!(q.pop(), Some((7, 40)));
}

#[test]
fn test_clear() {
    let mut q: KeyedReversePriorityQueue<u8, u64> = KeyedReversePriorityQueue::new();
    q.push(1, 10);
    q.push(2, 20);
    q.clear();
    assert!(q.is_empty());
}
