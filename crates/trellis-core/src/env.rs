//! Environment abstraction for deterministic testing.
//!
//! The `Environment` trait decouples protocol logic from the system's entropy
//! source. This enables:
//!
//! - Deterministic Simulation: the harness seeds a `ChaCha20` generator, so a
//!   failing schedule replays exactly from its seed.
//!
//! - Production Runtime: [`SystemEnv`] draws from the operating system without
//!   any change to the protocol logic.
//!
//! # Invariants
//!
//! - Determinism: given the same seed, `random_bytes()` produces the same
//!   sequence
//! - Isolation: implementations must not share global state

use rand::{CryptoRng, RngCore};
use trellis_proto::{UID_SIZE, Uid};

/// Abstract environment providing randomness.
///
/// This trait is the foundation of the Sans-IO architecture: the engine never
/// reaches for ambient entropy, so every run is reproducible under simulation.
///
/// # Safety
///
/// Implementations MUST guarantee that `random_bytes()` uses cryptographically
/// secure entropy in production. Scalars, nonces and instance uids are all
/// drawn from it.
pub trait Environment: Clone + Send + Sync + 'static {
    /// Fills the provided buffer with random bytes.
    ///
    /// # Security
    ///
    /// Production implementations MUST use the OS entropy pool
    /// (`getrandom`). Simulation implementations MUST be seeded and the seed
    /// MUST be logged for reproducibility.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Generates a random `u64`.
    fn random_u64(&self) -> u64 {
        let mut bytes = [0u8; 8];
        self.random_bytes(&mut bytes);
        u64::from_be_bytes(bytes)
    }

    /// Generates a fresh protocol instance uid.
    fn random_uid(&self) -> Uid {
        let mut bytes = [0u8; UID_SIZE];
        self.random_bytes(&mut bytes);
        Uid::from_bytes(bytes)
    }
}

/// Production environment backed by `getrandom`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    fn random_bytes(&self, buffer: &mut [u8]) {
        if let Err(e) = getrandom::fill(buffer) {
            // No safe fallback exists for key material.
            tracing::error!("getrandom failed: {}", e);
            std::process::abort();
        }
    }
}

/// Object-safe cryptographic RNG, as handed to protocol steps.
pub trait SecureRng: RngCore + CryptoRng {}

impl<T: RngCore + CryptoRng> SecureRng for T {}

/// Adapts an [`Environment`] to [`rand::RngCore`].
///
/// The environment is the only entropy source the engine uses, so this is the
/// `CryptoRng` handed to key generation and signing.
#[derive(Debug, Clone)]
pub struct EnvRng<E> {
    env: E,
}

impl<E: Environment> EnvRng<E> {
    /// Wrap an environment.
    pub fn new(env: E) -> Self {
        Self { env }
    }
}

impl<E: Environment> RngCore for EnvRng<E> {
    fn next_u32(&mut self) -> u32 {
        let mut bytes = [0u8; 4];
        self.env.random_bytes(&mut bytes);
        u32::from_le_bytes(bytes)
    }

    fn next_u64(&mut self) -> u64 {
        let mut bytes = [0u8; 8];
        self.env.random_bytes(&mut bytes);
        u64::from_le_bytes(bytes)
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.env.random_bytes(dest);
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.env.random_bytes(dest);
        Ok(())
    }
}

impl<E: Environment> CryptoRng for EnvRng<E> {}
