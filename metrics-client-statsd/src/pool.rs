use std::{
    ops::{Deref, DerefMut},
    sync::Arc,
};

use crossbeam_queue::ArrayQueue;

// Capacity classes are powers of two, from 2^6 (64 bytes) to 2^16 (64KiB) inclusive.
const MIN_CLASS_SHIFT: u32 = 6;
const MAX_CLASS_SHIFT: u32 = 16;
const NUM_CLASSES: usize = (MAX_CLASS_SHIFT - MIN_CLASS_SHIFT + 1) as usize;

/// Maximum number of idle buffers held per capacity class.
pub const MAX_FREE_PER_CLASS: usize = 64;

/// A pool of reusable byte buffers.
///
/// Buffers are grouped into power-of-two capacity classes, each with its own bounded free list. A buffer filed under a
/// class always has at least that class's capacity, so acquiring from a class never needs to grow the buffer to satisfy
/// the requested capacity.
///
/// Buffers larger than the largest class, and buffers released while their class's free list is full, are simply
/// dropped, which keeps the memory held by idle buffers bounded.
pub struct BufferPool {
    classes: Vec<ArrayQueue<Vec<u8>>>,
}

impl BufferPool {
    /// Creates an empty `BufferPool`.
    pub fn new() -> Self {
        let classes = (0..NUM_CLASSES).map(|_| ArrayQueue::new(MAX_FREE_PER_CLASS)).collect();
        Self { classes }
    }

    /// Acquires an empty buffer with a capacity of at least `min_capacity` bytes.
    ///
    /// A previously released buffer is reused when one is available in the matching class, otherwise a new one is
    /// allocated.
    pub fn acquire(self: &Arc<Self>, min_capacity: usize) -> PooledBuffer {
        let buf = match acquire_class(min_capacity) {
            Some(class) => self.classes[class]
                .pop()
                .unwrap_or_else(|| Vec::with_capacity(class_capacity(class))),
            None => Vec::with_capacity(min_capacity),
        };

        PooledBuffer { buf, pool: Arc::clone(self) }
    }

    /// Releases a buffer back to the pool.
    ///
    /// The buffer is cleared, but its capacity is retained so that it can be reused by a later call to `acquire`.
    pub fn release(&self, mut buf: Vec<u8>) {
        let Some(class) = release_class(buf.capacity()) else {
            return;
        };

        buf.clear();

        // If the free list is full, we just let the buffer drop.
        let _ = self.classes[class].push(buf);
    }

    /// Returns the number of idle buffers currently held by the pool.
    #[cfg(test)]
    pub fn idle(&self) -> usize {
        self.classes.iter().map(ArrayQueue::len).sum()
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}

const fn class_capacity(class: usize) -> usize {
    1 << (class as u32 + MIN_CLASS_SHIFT)
}

/// Returns the class to acquire from in order to get a buffer of at least `capacity` bytes.
fn acquire_class(capacity: usize) -> Option<usize> {
    let shift = capacity.max(1).next_power_of_two().trailing_zeros().max(MIN_CLASS_SHIFT);
    (shift <= MAX_CLASS_SHIFT).then(|| (shift - MIN_CLASS_SHIFT) as usize)
}

/// Returns the class a buffer of `capacity` bytes should be filed under, if any.
fn release_class(capacity: usize) -> Option<usize> {
    if capacity < class_capacity(0) {
        return None;
    }

    // Round down, so that every buffer in a class has at least the class capacity.
    let shift = usize::BITS - 1 - capacity.leading_zeros();
    (shift <= MAX_CLASS_SHIFT).then(|| (shift - MIN_CLASS_SHIFT) as usize)
}

/// A buffer borrowed from a [`BufferPool`].
///
/// The buffer is released back to its pool when dropped.
pub struct PooledBuffer {
    buf: Vec<u8>,
    pool: Arc<BufferPool>,
}

impl Deref for PooledBuffer {
    type Target = Vec<u8>;

    fn deref(&self) -> &Self::Target {
        &self.buf
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.buf
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        self.pool.release(std::mem::take(&mut self.buf));
    }
}
