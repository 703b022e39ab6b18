//! Sliding-window order id deduplication.
//!
//! A window remembers the last `cap` ids in a bitmap. Ids at or below the
//! floor are rejected as expired, ids inside the window are rejected when
//! their bit is already set, and larger ids slide the window forward.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowError {
    #[error("order id {id} is at or below window floor {min}")]
    Expired { id: u64, min: u64 },

    #[error("order id {0} already seen")]
    Duplicate(u64),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub min: u64,
    pub max: u64,
    pub cap: u64,
    bitmap: Vec<u8>,
}

impl Window {
    /// Window accepting ids in `(min, max]`, with capacity `max - min`.
    pub fn new(min: u64, max: u64) -> Self {
        let cap = max.saturating_sub(min).max(1);
        Self {
            min,
            max: min + cap,
            cap,
            bitmap: vec![0; cap.div_ceil(8) as usize],
        }
    }

    pub fn with_capacity(cap: u64) -> Self {
        Self::new(0, cap)
    }

    /// Record `id`, rejecting it if it was seen or fell behind the window.
    pub fn put(&mut self, id: u64) -> Result<(), WindowError> {
        if id <= self.min {
            return Err(WindowError::Expired { id, min: self.min });
        }

        if id <= self.max {
            if self.is_set(id) {
                return Err(WindowError::Duplicate(id));
            }
            self.set(id);
            return Ok(());
        }

        let delta = id - self.max;
        if delta >= self.cap {
            self.bitmap.iter_mut().for_each(|b| *b = 0);
        } else {
            // slots of ids max+1..=id are reused; drop what they held
            for slot in self.max + 1..=id {
                self.clear(slot);
            }
        }
        self.min += delta;
        self.max += delta;
        self.set(id);
        Ok(())
    }

    pub fn contains(&self, id: u64) -> bool {
        id > self.min && id <= self.max && self.is_set(id)
    }

    fn slot(&self, id: u64) -> (usize, u8) {
        let bit = id % self.cap;
        ((bit / 8) as usize, 1 << (bit % 8))
    }

    fn is_set(&self, id: u64) -> bool {
        let (byte, mask) = self.slot(id);
        self.bitmap[byte] & mask != 0
    }

    fn set(&mut self, id: u64) {
        let (byte, mask) = self.slot(id);
        self.bitmap[byte] |= mask;
    }

    fn clear(&mut self, id: u64) {
        let (byte, mask) = self.slot(id);
        self.bitmap[byte] &= !mask;
    }
}
