// SPDX-License-Identifier: Apache-2.0

//! Shared pool of read buffers.
//!
//! Buffers go back to the pool when the [`PooledBuffer`] guard drops, so every
//! exit path out of a read returns its buffer, including errors and panics.

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};

/// Initial capacity of a fresh buffer
pub const DEFAULT_BUFFER_SIZE: usize = 16 * 1024;

#[derive(Debug)]
struct PoolInner {
    buffers: Mutex<Vec<Vec<u8>>>,
    /// Buffers larger than this are shrunk before being pooled again
    max_retained_capacity: usize,
    /// Upper bound on idle buffers kept around
    max_idle: usize,
}

/// A cloneable handle to the shared pool
#[derive(Debug, Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

impl BufferPool {
    pub fn new(max_idle: usize, max_retained_capacity: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                buffers: Mutex::new(Vec::with_capacity(max_idle)),
                max_retained_capacity: max_retained_capacity.max(DEFAULT_BUFFER_SIZE),
                max_idle,
            }),
        }
    }

    /// Take a cleared buffer from the pool, allocating if none is idle.
    pub fn get(&self) -> PooledBuffer {
        let buf = match self.inner.buffers.lock() {
            Ok(mut buffers) => buffers.pop(),
            Err(_) => None,
        }
        .unwrap_or_else(|| Vec::with_capacity(DEFAULT_BUFFER_SIZE));

        PooledBuffer {
            buf,
            pool: self.inner.clone(),
        }
    }

    /// Number of idle buffers currently held by the pool
    pub fn idle(&self) -> usize {
        self.inner.buffers.lock().map(|b| b.len()).unwrap_or(0)
    }
}

/// A buffer borrowed from a [`BufferPool`]
#[derive(Debug)]
pub struct PooledBuffer {
    buf: Vec<u8>,
    pool: Arc<PoolInner>,
}

impl Deref for PooledBuffer {
    type Target = Vec<u8>;

    fn deref(&self) -> &Vec<u8> {
        &self.buf
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut Vec<u8> {
        &mut self.buf
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let mut buf = std::mem::take(&mut self.buf);
        buf.clear();
        if buf.capacity() > self.pool.max_retained_capacity {
            buf.shrink_to(self.pool.max_retained_capacity);
        }
        if let Ok(mut buffers) = self.pool.buffers.lock() {
            if buffers.len() < self.pool.max_idle {
                buffers.push(buf);
            }
        }
    }
}
