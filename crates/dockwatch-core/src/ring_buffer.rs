//! Fixed-capacity circular sample store with resumable reads.

use std::sync::RwLock;

struct Inner<T> {
    data: Vec<T>,
    head: usize,
    count: u64,
}

/// Thread-safe circular buffer.
///
/// `head` is the slot the next item is written to. `count` is the number of
/// items ever added; it only grows, and `head == count % capacity` holds at
/// all times. Readers keep their own cursor (a previously returned count)
/// and call [`RingBuffer::get_from_count`] to resume where they left off.
pub struct RingBuffer<T> {
    inner: RwLock<Inner<T>>,
}

impl<T: Clone + Default> RingBuffer<T> {
    /// Create a buffer holding at most `capacity` items.
    ///
    /// # Panics
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring buffer capacity must be non-zero");
        Self {
            inner: RwLock::new(Inner {
                data: vec![T::default(); capacity],
                head: 0,
                count: 0,
            }),
        }
    }

    /// Maximum number of retained items.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.read().unwrap().data.len()
    }

    /// Total number of items ever added.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.inner.read().unwrap().count
    }

    /// Append an item, overwriting the oldest one once full.
    pub fn add(&self, item: T) {
        let mut inner = self.inner.write().unwrap();
        let head = inner.head;
        inner.data[head] = item;
        inner.head = (head + 1) % inner.data.len();
        inner.count += 1;
    }

    /// Items added after the `from`-th one, oldest first, plus the current count.
    ///
    /// A cursor ahead of the producer yields nothing. A cursor so old that
    /// the buffer has wrapped since yields everything still retained.
    #[must_use]
    pub fn get_from_count(&self, from: u64) -> (Vec<T>, u64) {
        let inner = self.inner.read().unwrap();
        let Inner { data, head, count } = &*inner;
        let (head, count) = (*head, *count);

        if from > count {
            return (Vec::new(), count);
        }

        let capacity = data.len();
        let to_read = count - from;
        if to_read >= capacity as u64 {
            let mut out = Vec::with_capacity(capacity);
            out.extend_from_slice(&data[head..]);
            out.extend_from_slice(&data[..head]);
            return (out, count);
        }

        #[allow(clippy::cast_possible_truncation)]
        let idx = (from % capacity as u64) as usize;
        let out = if idx <= head {
            data[idx..head].to_vec()
        } else {
            let mut out = data[idx..].to_vec();
            out.extend_from_slice(&data[..head]);
            out
        };
        (out, count)
    }
}
