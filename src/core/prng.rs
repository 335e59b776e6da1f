// Minimal PRNG (no external crates).
//
// This is NOT cryptographically secure.
// It only draws semantic pointer components, so a fixed seed and a fixed call
// order always reproduce the same vocabulary.

use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone)]
pub struct Prng {
    state: u64,
    // Second Box-Muller sample, kept for the next gaussian draw.
    spare: Option<f32>,
}

impl Prng {
    pub fn new(seed: u64) -> Self {
        // Avoid a zero state.
        let seed = if seed == 0 { 0x9E3779B97F4A7C15 } else { seed };
        Self {
            state: seed,
            spare: None,
        }
    }

    #[inline]
    fn next_u64(&mut self) -> u64 {
        // xorshift64*
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545F4914F6CDD1D)
    }

    #[inline]
    pub fn next_u32(&mut self) -> u32 {
        (self.next_u64() >> 32) as u32
    }

    #[inline]
    pub fn next_f32_01(&mut self) -> f32 {
        // Convert to [0,1).
        let x = self.next_u32();
        (x as f32) / (u32::MAX as f32 + 1.0)
    }

    /// Standard normal sample (Box-Muller, pairs are cached).
    pub fn next_gaussian(&mut self) -> f32 {
        if let Some(z) = self.spare.take() {
            return z;
        }
        // u1 in (0,1] so ln() stays finite.
        let u1 = 1.0 - self.next_f32_01();
        let u2 = self.next_f32_01();
        let r = (-2.0 * u1.ln()).sqrt();
        let theta = core::f32::consts::TAU * u2;
        self.spare = Some(r * theta.sin());
        r * theta.cos()
    }

    /// `dimensions` i.i.d. gaussian components scaled to unit length.
    pub fn unit_vector(&mut self, dimensions: usize) -> Vec<f32> {
        loop {
            let v: Vec<f32> = (0..dimensions).map(|_| self.next_gaussian()).collect();
            let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
            if norm > f32::EPSILON {
                return v.into_iter().map(|x| x / norm).collect();
            }
        }
    }
}

/// A random source shared by every vocabulary of one model.
///
/// Draws are serialized through the lock, so sequential reuse from several
/// vocabularies stays deterministic for a fixed call order.
#[derive(Debug, Clone)]
pub struct SharedPrng(Arc<Mutex<Prng>>);

impl SharedPrng {
    pub fn new(seed: u64) -> Self {
        Self(Arc::new(Mutex::new(Prng::new(seed))))
    }

    pub fn lock(&self) -> MutexGuard<'_, Prng> {
        // A panic while drawing cannot leave the state half-written.
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Copy of the current generator state.
    pub fn snapshot(&self) -> Prng {
        self.lock().clone()
    }

    /// Rewind to a state taken with [`snapshot`](Self::snapshot).
    pub fn restore(&self, state: Prng) {
        *self.lock() = state;
    }

    pub fn ptr_eq(&self, other: &SharedPrng) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Default for SharedPrng {
    fn default() -> Self {
        Self::new(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_sequence() {
        let mut a = Prng::new(7);
        let mut b = Prng::new(7);
        for _ in 0..32 {
            assert_eq!(a.next_u32(), b.next_u32());
        }
    }

    #[test]
    fn unit_vector_has_unit_norm() {
        let mut rng = Prng::new(42);
        let v = rng.unit_vector(64);
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn gaussian_moments_are_plausible() {
        let mut rng = Prng::new(3);
        let n = 20_000;
        let samples: Vec<f32> = (0..n).map(|_| rng.next_gaussian()).collect();
        let mean = samples.iter().sum::<f32>() / n as f32;
        let var = samples.iter().map(|x| (x - mean) * (x - mean)).sum::<f32>() / n as f32;
        assert!(mean.abs() < 0.05, "mean {mean}");
        assert!((var - 1.0).abs() < 0.1, "var {var}");
    }

    #[test]
    fn shared_handle_advances_one_state() {
        let shared = SharedPrng::new(9);
        let clone = shared.clone();
        let first = shared.lock().next_u32();
        let second = clone.lock().next_u32();
        let mut reference = Prng::new(9);
        assert_eq!(first, reference.next_u32());
        assert_eq!(second, reference.next_u32());
        assert!(shared.ptr_eq(&clone));
    }

    #[test]
    fn restore_rewinds_the_shared_state() {
        let shared = SharedPrng::new(21);
        let saved = shared.snapshot();
        let first = shared.lock().next_gaussian();
        shared.lock().next_gaussian();
        shared.restore(saved);
        assert_eq!(shared.lock().next_gaussian(), first);
    }
}
