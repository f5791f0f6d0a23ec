// Copyright 2025 John Brosnihan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//! Buffer pooling for reducing allocation churn
//!
//! The mutation log hands out one task list per component type every frame.
//! Those lists are short lived and refilled at roughly the same size each
//! frame, so they are drawn from a [`BufferPool`] and returned when the
//! [`PooledBuffer`] guard drops.

use parking_lot::Mutex;
use serde::Deserialize;
use std::sync::Arc;

/// Configuration for buffer pool behavior
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolConfig {
    /// Initial capacity for each buffer in the pool
    pub initial_capacity: usize,
    /// Maximum number of buffers to keep in the pool
    pub max_pool_size: usize,
    /// Whether to log when the pool has to allocate
    pub log_resize_events: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            initial_capacity: 64,
            max_pool_size: 8,
            log_resize_events: false,
        }
    }
}

impl PoolConfig {
    /// Create a new pool configuration with custom settings
    pub fn new(initial_capacity: usize, max_pool_size: usize) -> Self {
        PoolConfig {
            initial_capacity,
            max_pool_size,
            log_resize_events: false,
        }
    }

    /// Enable logging for allocation events
    pub fn with_logging(mut self) -> Self {
        self.log_resize_events = true;
        self
    }
}

/// Statistics for monitoring pool performance
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    /// Number of times a buffer was successfully borrowed from the pool
    pub hits: usize,
    /// Number of times a new buffer had to be allocated
    pub misses: usize,
    /// Current number of buffers in the pool
    pub pool_size: usize,
    /// Peak number of idle buffers held by the pool
    pub peak_size: usize,
}

impl PoolStats {
    /// Calculate the hit rate as a percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

/// A thread-safe pool of `Vec<T>` buffers
pub struct BufferPool<T> {
    pool: Arc<Mutex<Vec<Vec<T>>>>,
    config: PoolConfig,
    stats: Arc<Mutex<PoolStats>>,
}

impl<T> BufferPool<T> {
    /// Create a new buffer pool with default configuration
    pub fn new() -> Self {
        Self::with_config(PoolConfig::default())
    }

    /// Create a new buffer pool with custom configuration
    pub fn with_config(config: PoolConfig) -> Self {
        BufferPool {
            pool: Arc::new(Mutex::new(Vec::new())),
            config,
            stats: Arc::new(Mutex::new(PoolStats::default())),
        }
    }

    /// Acquire a buffer from the pool
    ///
    /// If the pool is empty, allocates a new buffer. The buffer is
    /// automatically returned to the pool when the guard is dropped.
    pub fn acquire(&self) -> PooledBuffer<T> {
        // LOCK ORDERING: pool lock is released before the stats lock is taken
        let (buffer, was_hit, pool_len) = {
            let mut pool = self.pool.lock();
            let was_hit = !pool.is_empty();
            let buf = pool
                .pop()
                .unwrap_or_else(|| Vec::with_capacity(self.config.initial_capacity));
            let len = pool.len();
            (buf, was_hit, len)
        };

        {
            let mut stats = self.stats.lock();
            if was_hit {
                stats.hits += 1;
            } else {
                stats.misses += 1;
                if self.config.log_resize_events {
                    tracing::debug!(
                        hit_rate = stats.hit_rate(),
                        "buffer pool allocating new buffer"
                    );
                }
            }
            stats.pool_size = pool_len;
        }

        PooledBuffer {
            buffer,
            pool: Arc::clone(&self.pool),
            stats: Arc::clone(&self.stats),
            max_pool_size: self.config.max_pool_size,
        }
    }

    /// Get current pool statistics
    pub fn stats(&self) -> PoolStats {
        self.stats.lock().clone()
    }

    /// Drop every idle buffer
    pub fn clear(&self) {
        self.pool.lock().clear();
        self.stats.lock().pool_size = 0;
    }

    /// Get the current number of idle buffers in the pool
    pub fn len(&self) -> usize {
        self.pool.lock().len()
    }

    /// Check if the pool holds no idle buffers
    pub fn is_empty(&self) -> bool {
        self.pool.lock().is_empty()
    }
}

impl<T> Default for BufferPool<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for BufferPool<T> {
    fn clone(&self) -> Self {
        BufferPool {
            pool: Arc::clone(&self.pool),
            config: self.config.clone(),
            stats: Arc::clone(&self.stats),
        }
    }
}

/// RAII guard for a pooled buffer
///
/// When dropped, the buffer is cleared and returned to the pool unless the
/// pool already holds `max_pool_size` idle buffers.
pub struct PooledBuffer<T> {
    buffer: Vec<T>,
    pool: Arc<Mutex<Vec<Vec<T>>>>,
    stats: Arc<Mutex<PoolStats>>,
    max_pool_size: usize,
}

impl<T> PooledBuffer<T> {
    /// Move the contents out, leaving the pooled allocation in place
    pub fn take_items(&mut self) -> Vec<T> {
        let capacity = self.buffer.capacity();
        std::mem::replace(&mut self.buffer, Vec::with_capacity(capacity))
    }
}

impl<T> std::ops::Deref for PooledBuffer<T> {
    type Target = Vec<T>;

    fn deref(&self) -> &Self::Target {
        &self.buffer
    }
}

impl<T> std::ops::DerefMut for PooledBuffer<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.buffer
    }
}

impl<T> Drop for PooledBuffer<T> {
    fn drop(&mut self) {
        let mut buffer = std::mem::take(&mut self.buffer);
        buffer.clear();
        if buffer.capacity() == 0 {
            return;
        }

        let mut pool = self.pool.lock();
        if pool.len() < self.max_pool_size {
            pool.push(buffer);

            let mut stats = self.stats.lock();
            stats.pool_size = pool.len();
            if stats.pool_size > stats.peak_size {
                stats.peak_size = stats.pool_size;
            }
        }
        // If pool is full, buffer is dropped (deallocated)
    }
}
