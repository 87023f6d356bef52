//! Lock-free "latest sample" slot.
//!
//! One writer thread publishes fixed-size `f32` samples; any number of readers
//! load the most recent complete sample without blocking the writer. A
//! sequence counter is odd while a write is in progress, and readers retry
//! until they observe the same even value before and after copying.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

pub struct LatestSample<const N: usize> {
    seq: AtomicU64,
    values: [AtomicU32; N],
}

impl<const N: usize> Default for LatestSample<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> LatestSample<N> {
    /// A slot holding all zeros.
    pub fn new() -> Self {
        Self {
            seq: AtomicU64::new(0),
            values: std::array::from_fn(|_| AtomicU32::new(0.0_f32.to_bits())),
        }
    }

    /// Publishes a sample. Only one thread may store at a time.
    pub fn store(&self, sample: [f32; N]) {
        self.seq.fetch_add(1, Ordering::AcqRel); // odd => write in progress
        for (dst, src) in self.values.iter().zip(sample) {
            dst.store(src.to_bits(), Ordering::Relaxed);
        }
        self.seq.fetch_add(1, Ordering::Release); // even => stable
    }

    /// The most recently completed sample.
    pub fn load(&self) -> [f32; N] {
        loop {
            let v1 = self.seq.load(Ordering::Acquire);
            if v1 & 1 == 1 {
                std::hint::spin_loop();
                continue;
            }
            let out: [f32; N] =
                std::array::from_fn(|i| f32::from_bits(self.values[i].load(Ordering::Relaxed)));
            std::sync::atomic::fence(Ordering::Acquire);
            if self.seq.load(Ordering::Relaxed) == v1 {
                return out;
            }
        }
    }

    /// Number of completed stores.
    pub fn version(&self) -> u64 {
        self.seq.load(Ordering::Acquire) / 2
    }
}
