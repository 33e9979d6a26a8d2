use std::time::Duration;

use tracing::{event, Level};

use base::collections::pq::KeyedReversePriorityQueue;

use crate::types::DeviceId;

/// The devices waiting to be polled, earliest poll time first.
#[derive(Debug)]
pub(crate) struct PollQueue {
    items: KeyedReversePriorityQueue<DeviceId, Duration>,
}

impl PollQueue {
    pub(crate) fn new() -> PollQueue {
        PollQueue {
            items: KeyedReversePriorityQueue::new(),
        }
    }

    pub(crate) fn peek(&self) -> Option<(&DeviceId, &Duration)> {
        self.items.peek()
    }

    pub(crate) fn pop(&mut self) -> Option<(DeviceId, Duration)> {
        self.items.pop()
    }

    pub(crate) fn push(&mut self, key: DeviceId, priority: Duration) -> Option<Duration> {
        let old_pri = self.items.push(key, priority);
        if let Some(prev) = old_pri {
            if prev < priority {
                event!(
                    Level::DEBUG,
                    "device {} poll time pushed back from {:?} to {:?}",
                    key,
                    prev,
                    priority
                );
            }
        }
        old_pri
    }

    pub(crate) fn clear(&mut self) {
        self.items.clear();
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
fn dev(n: u8) -> DeviceId {
    DeviceId::new(n).expect("test device id should be valid")
}

#[test]
fn test_pollqueue_empty() {
    let mut q = PollQueue::new();
    assert!(q.is_empty());
    assert_eq!(0, q.len());
    assert_eq!(q.peek(), None);
    assert_eq!(q.pop(), None);
}

#[test]
fn test_pollqueue_repeat_push() {
    let mut q = PollQueue::new();
    assert_eq!(q.push(dev(1), Duration::from_micros(200)), None);
    assert_eq!(
        q.push(dev(1), Duration::from_micros(400)),
        Some(Duration::from_micros(200))
    );
    assert_eq!(
        q.push(dev(1), Duration::from_micros(300)),
        Some(Duration::from_micros(400))
    );
    assert_eq!(q.pop(), Some((dev(1), Duration::from_micros(300))));
    assert!(q.is_empty());
}

#[test]
fn test_pollqueue_earliest_first() {
    let mut q = PollQueue::new();
    q.push(dev(3), Duration::from_millis(30));
    q.push(dev(1), Duration::from_millis(10));
    q.push(dev(2), Duration::from_millis(20));
    assert_eq!(q.peek(), Some((&dev(1), &Duration::from_millis(10))));
    assert_eq!(q.pop().map(|(k, _)| k), Some(dev(1)));
    assert_eq!(q.pop().map(|(k, _)| k), Some(dev(2)));
    q.clear();
    assert!(q.is_empty());
}
