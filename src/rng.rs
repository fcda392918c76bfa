//! Session-scoped random number source for the poisoning engine.
//!
//! One `SessionRng` is created per execution context and cloned into every
//! interceptor. Clones share the same underlying generator, so the whole
//! context draws from a single stream. Seeded construction makes every noise
//! routine reproducible in tests.

use std::cell::RefCell;
use std::rc::Rc;

use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};

/// Shared handle to the context's random generator.
#[derive(Clone)]
pub struct SessionRng {
    inner: Rc<RefCell<StdRng>>,
}

impl SessionRng {
    /// Seed from the platform entropy source.
    /// Uses `getrandom` (backed by crypto.getRandomValues in WASM).
    pub fn from_entropy() -> Self {
        Self::from_rng(StdRng::from_entropy())
    }

    /// Deterministic generator for tests and reproducible runs.
    pub fn seeded(seed: u64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed))
    }

    fn from_rng(rng: StdRng) -> Self {
        Self {
            inner: Rc::new(RefCell::new(rng)),
        }
    }

    /// Uniform float in `[0, 1)`.
    #[inline]
    pub fn unit(&self) -> f64 {
        self.inner.borrow_mut().gen::<f64>()
    }

    /// Bernoulli trial with success probability `p`.
    #[inline]
    pub fn chance(&self, p: f64) -> bool {
        self.unit() < p
    }

    /// Uniform float in `[-1, 1)`.
    #[inline]
    pub fn signed_unit(&self) -> f64 {
        self.unit() * 2.0 - 1.0
    }

    /// Fresh hex token of `bytes` random bytes.
    pub fn token(&self, bytes: usize) -> String {
        let mut buf = vec![0u8; bytes];
        self.inner.borrow_mut().fill_bytes(&mut buf);
        hex::encode(buf)
    }
}

impl RngCore for SessionRng {
    fn next_u32(&mut self) -> u32 {
        self.inner.borrow_mut().next_u32()
    }

    fn next_u64(&mut self) -> u64 {
        self.inner.borrow_mut().next_u64()
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.inner.borrow_mut().fill_bytes(dest)
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.inner.borrow_mut().try_fill_bytes(dest)
    }
}

impl std::fmt::Debug for SessionRng {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionRng")
    }
}
