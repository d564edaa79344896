//! Per-instance exclusive locks.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use crate::{backend::InstanceKey, error::ProtocolError};

/// Serializes work on one instance while unrelated instances run in
/// parallel. Idle entries are removed, so the map only holds instances with
/// a message in flight.
#[derive(Debug, Default)]
pub(crate) struct InstanceLocks {
    locks: Mutex<HashMap<InstanceKey, Arc<Mutex<()>>>>,
}

impl InstanceLocks {
    /// Run `f` while holding the lock of `key`.
    pub(crate) fn with<T>(
        &self,
        key: &InstanceKey,
        f: impl FnOnce() -> Result<T, ProtocolError>,
    ) -> Result<T, ProtocolError> {
        let lock = {
            let mut locks = self.locks.lock().map_err(|_| ProtocolError::LockPoisoned)?;
            Arc::clone(locks.entry(key.clone()).or_default())
        };

        let result = {
            let _guard = lock.lock().map_err(|_| ProtocolError::LockPoisoned)?;
            f()
        };

        if let Ok(mut locks) = self.locks.lock() {
            // clones are only taken under the map lock: map + ours means idle
            if Arc::strong_count(&lock) == 2 {
                locks.remove(key);
            }
        }
        result
    }

    /// Instances with a message in flight.
    pub(crate) fn active(&self) -> usize {
        self.locks.lock().map_or(0, |locks| locks.len())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        thread,
    };

    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;
    use trellis_crypto::CurveId;
    use trellis_proto::{ProtocolId, Uid};

    use super::*;
    use crate::identity::OwnedIdentity;

    fn key(n: u8) -> InstanceKey {
        let owner = OwnedIdentity::generate("s", CurveId::Mdc, &mut ChaCha20Rng::seed_from_u64(1))
            .unwrap()
            .identity;
        InstanceKey { owner, protocol: ProtocolId(1), uid: Uid::from_bytes([n; 32]) }
    }

    #[test]
    fn same_instance_is_serialized() {
        let locks = Arc::new(InstanceLocks::default());
        let inside = Arc::new(AtomicUsize::new(0));
        let key = key(1);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let locks = Arc::clone(&locks);
                let inside = Arc::clone(&inside);
                let key = key.clone();
                thread::spawn(move || {
                    locks
                        .with(&key, || {
                            let before = inside.fetch_add(1, Ordering::SeqCst);
                            thread::yield_now();
                            inside.fetch_sub(1, Ordering::SeqCst);
                            Ok(before)
                        })
                        .unwrap()
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), 0, "two holders inside one instance");
        }
        assert_eq!(locks.active(), 0);
    }

    #[test]
    fn errors_pass_through_and_release() {
        let locks = InstanceLocks::default();
        let result: Result<(), _> = locks.with(&key(2), || Err(ProtocolError::InstanceNotFound));
        assert!(matches!(result, Err(ProtocolError::InstanceNotFound)));
        assert_eq!(locks.active(), 0);
    }
}
