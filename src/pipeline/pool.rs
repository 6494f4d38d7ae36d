//! Fixed-size pool of display buffers shared with the render context
//!
//! The pool keeps one `Arc` per slot. A slot is writable only while the pool
//! holds the sole reference, which is exactly the "no reader references it"
//! condition: every published frame and every reader's copy of it is an
//! extra strong count. Recycling therefore never needs a lock.

use std::sync::Arc;

use crate::error::ConfigError;

/// Converted RGBA8 pixels ready for upload
#[derive(Debug, Default)]
pub struct DisplayBuffer {
    pixels: Vec<u8>,
    width: u32,
    height: u32,
    generation: u64,
}

impl DisplayBuffer {
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn pixels_mut(&mut self) -> &mut Vec<u8> {
        &mut self.pixels
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Generation of the last publish of this buffer
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Row pitch in bytes
    pub fn pitch(&self) -> usize {
        self.width as usize * 4
    }

    pub fn set_dimensions(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
    }

    pub fn set_generation(&mut self, generation: u64) {
        self.generation = generation;
    }
}

struct Slot {
    buffer: Arc<DisplayBuffer>,
    /// Generation this slot was last published with (0 = never)
    last_published: u64,
}

impl Slot {
    fn is_free(&self) -> bool {
        Arc::strong_count(&self.buffer) == 1
    }
}

/// Pool of `N >= 2` display buffers
pub struct DisplayPool {
    slots: Vec<Slot>,
}

impl DisplayPool {
    pub fn new(size: usize) -> Result<Self, ConfigError> {
        if size < 2 {
            return Err(ConfigError::PoolSize(size));
        }
        let slots = (0..size)
            .map(|_| Slot {
                buffer: Arc::new(DisplayBuffer::default()),
                last_published: 0,
            })
            .collect();
        Ok(Self { slots })
    }

    /// Check out the least-recently-published buffer nobody is reading.
    ///
    /// Returns `None` when every buffer is referenced; the caller drops the
    /// frame rather than waiting.
    pub fn checkout(&mut self) -> Option<(usize, &mut DisplayBuffer)> {
        let index = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_free())
            .min_by_key(|(_, slot)| slot.last_published)
            .map(|(i, _)| i)?;
        let buffer = Arc::get_mut(&mut self.slots[index].buffer)?;
        Some((index, buffer))
    }

    /// Share a written buffer for publishing
    pub fn publish(&mut self, index: usize, generation: u64) -> Arc<DisplayBuffer> {
        let slot = &mut self.slots[index];
        slot.last_published = generation;
        Arc::clone(&slot.buffer)
    }

    /// Buffers currently referenced outside the pool
    pub fn in_use(&self) -> usize {
        self.slots.iter().filter(|slot| !slot.is_free()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(pool: &mut DisplayPool, generation: u64) -> Arc<DisplayBuffer> {
        let (index, buffer) = pool.checkout().expect("free buffer");
        buffer.pixels_mut().resize(4, generation as u8);
        buffer.set_dimensions(1, 1);
        buffer.set_generation(generation);
        pool.publish(index, generation)
    }

    #[test]
    fn rejects_tiny_pools() {
        assert!(matches!(DisplayPool::new(1), Err(ConfigError::PoolSize(1))));
        assert!(DisplayPool::new(2).is_ok());
    }

    #[test]
    fn unread_frames_become_reclaimable() {
        let mut pool = DisplayPool::new(3).unwrap();
        let mut published = None;
        for generation in 1..=3 {
            published = Some(write(&mut pool, generation));
        }
        // Only the latest publish holds a reference
        assert_eq!(pool.in_use(), 1);
        assert_eq!(published.unwrap().generation(), 3);
    }

    #[test]
    fn readers_block_recycling() {
        let mut pool = DisplayPool::new(2).unwrap();
        let first = write(&mut pool, 1);
        let second = write(&mut pool, 2);
        assert_eq!(pool.in_use(), 2);
        assert!(pool.checkout().is_none());

        drop(first);
        let (_, buffer) = pool.checkout().unwrap();
        // The recycled buffer is the one that was read, not the live one
        assert_eq!(buffer.generation(), 1);
        assert_eq!(second.generation(), 2);
    }

    #[test]
    fn prefers_least_recently_published() {
        let mut pool = DisplayPool::new(3).unwrap();
        drop(write(&mut pool, 1));
        drop(write(&mut pool, 2));
        drop(write(&mut pool, 3));
        let (_, buffer) = pool.checkout().unwrap();
        assert_eq!(buffer.generation(), 1);
    }
}
