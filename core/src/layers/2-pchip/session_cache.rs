//! Session key cache.
use crate::layers::crypto::{sk_decrypt, sk_encrypt, HmacKey, KeyPair, SkKey};
use crate::os::Mutex;
use crate::prelude::*;

/// Index of a slot in the session key cache.
pub type SessionSlot = usize;

/// Software model of the P chip's session key cache.
///
/// Clients encrypt their session (HMAC) keys under the endorsement key.
/// `process_key` unwraps such a key and rewraps it under a per-boot process
/// key, so the untrusted server can keep processed keys for all sessions
/// while only a few live in the cache at a time.
pub struct SoftSessionCache {
    capacity: usize,
    inner: Mutex<SessionCacheInner>,
}

struct SessionCacheInner {
    endorsement_key: Option<KeyPair>,
    process_key: SkKey,
    keys: Vec<Option<HmacKey>>,
}

impl SoftSessionCache {
    /// Creates an empty cache with `capacity` slots.
    ///
    /// The cache cannot process keys until the boot logic hands it the
    /// endorsement key.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return_errno_with_msg!(InvalidArgs, "session cache needs at least one slot");
        }
        Ok(Self {
            capacity,
            inner: Mutex::new(SessionCacheInner {
                endorsement_key: None,
                process_key: SkKey::random(),
                keys: vec![None; capacity],
            }),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Installs the endorsement key recovered during boot.
    pub fn set_endorsement_key(&self, endorsement_key: KeyPair) {
        self.inner.lock().endorsement_key = Some(endorsement_key);
    }

    /// Forgets the endorsement key and every loaded session key.
    ///
    /// A new process key is drawn, so keys processed before the reset can no
    /// longer be loaded.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.endorsement_key = None;
        inner.process_key = SkKey::random();
        inner.keys.iter_mut().for_each(|key| *key = None);
    }

    /// Converts a session key encrypted under the endorsement key into the
    /// form accepted by `load`.
    pub fn process_key(&self, encrypted_session_key: &[u8]) -> Result<Vec<u8>> {
        let (endorsement_key, process_key) = {
            let inner = self.inner.lock();
            let Some(endorsement_key) = inner.endorsement_key.clone() else {
                return_errno_with_msg!(InvalidBootState, "session cache used before boot");
            };
            (endorsement_key, inner.process_key)
        };
        let raw_key = endorsement_key
            .decrypt(encrypted_session_key)
            .map_err(|_| Error::with_msg(DecryptFailed, "incorrectly encrypted session key"))?;
        let session_key = HmacKey::from_slice(&raw_key)?;
        sk_encrypt(&process_key, &session_key)
    }

    /// Places a processed session key in a slot, replacing its old key.
    pub fn load(&self, slot: SessionSlot, processed_key: &[u8]) -> Result<()> {
        self.check_slot(slot)?;
        let mut inner = self.inner.lock();
        let raw_key = sk_decrypt(&inner.process_key, processed_key)?;
        inner.keys[slot] = Some(HmacKey::from_slice(&raw_key)?);
        Ok(())
    }

    /// Clears a slot, so nothing certifies under its old key.
    pub fn unload(&self, slot: SessionSlot) -> Result<()> {
        self.check_slot(slot)?;
        self.inner.lock().keys[slot] = None;
        Ok(())
    }

    /// The session key in a slot. Never leaves the P chip.
    pub(crate) fn session_key(&self, slot: SessionSlot) -> Result<HmacKey> {
        self.check_slot(slot)?;
        match self.inner.lock().keys[slot] {
            Some(key) => Ok(key),
            None => Err(Error::with_msg(SessionNotLoaded, "no key in session slot")),
        }
    }

    fn check_slot(&self, slot: SessionSlot) -> Result<()> {
        if slot >= self.capacity {
            return_errno_with_msg!(InvalidSlot, "session slot exceeds cache capacity");
        }
        Ok(())
    }
}

impl Debug for SoftSessionCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("SoftSessionCache")
            .field("capacity", &self.capacity)
            .field("booted", &inner.endorsement_key.is_some())
            .field(
                "loaded",
                &inner.keys.iter().filter(|key| key.is_some()).count(),
            )
            .finish()
    }
}
