//! Bounded buffer pool for the access-log write path.
//!
//! A free-list of 1 KiB buffers shared by every incoming stream. Acquire
//! pops a pooled buffer or allocates a fresh one; release clears and keeps
//! the buffer only while the pool is below capacity, so exhaustion degrades
//! to plain allocation with no backpressure on the stream.

use bytes::BytesMut;
use parking_lot::Mutex;

pub const DEFAULT_POOL_CAPACITY: usize = 10_000;
pub const DEFAULT_BUFFER_SIZE: usize = 1024;

#[derive(Debug)]
pub struct BufferPool {
    free: Mutex<Vec<BytesMut>>,
    capacity: usize,
    buffer_size: usize,
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_CAPACITY, DEFAULT_BUFFER_SIZE)
    }
}

impl BufferPool {
    pub fn new(capacity: usize, buffer_size: usize) -> Self {
        Self { free: Mutex::new(Vec::new()), capacity, buffer_size }
    }

    pub fn acquire(&self) -> BytesMut {
        let pooled = self.free.lock().pop();
        pooled.unwrap_or_else(|| BytesMut::with_capacity(self.buffer_size))
    }

    pub fn release(&self, mut buffer: BytesMut) {
        buffer.clear();
        let mut free = self.free.lock();
        if free.len() < self.capacity {
            free.push(buffer);
        }
        // above capacity the buffer is simply dropped
    }

    #[cfg(test)]
    fn pooled(&self) -> usize {
        self.free.lock().len()
    }
}
