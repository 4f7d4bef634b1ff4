//! P chip boot logic.
use crate::layers::crypto::{
    crypto_hash, hmac, nonce, sk_decrypt, sk_encrypt, Certificate, Digest, KeyPair, Mac, Nonce,
    PublicKey, SkKey,
};
use crate::os::Mutex;
use crate::prelude::*;

/// Where the boot handshake with the S chip stands.
///
/// `Reset -> Started -> Booted`; `reset` goes back to `Reset` from anywhere.
#[derive(Clone, Debug)]
pub enum BootState {
    Reset,
    Started {
        nonce: Nonce,
        endorsement_certificate: Certificate,
    },
    Booted {
        root_hash: Digest,
    },
}

/// The boot handshake, as run by the P chip.
///
/// The P chip shares a symmetric key with its S chip and has the
/// manufacturer CA's public key burned in. Booting proves to the P chip that
/// it talks to its own S chip and fetches the root hash and endorsement key
/// that the node and session caches need.
pub struct BootLogic {
    p_key: SkKey,
    ca_public_key: PublicKey,
    state: Mutex<BootState>,
}

impl BootLogic {
    pub fn new(p_key: SkKey, ca_public_key: PublicKey) -> Self {
        Self {
            p_key,
            ca_public_key,
            state: Mutex::new(BootState::Reset),
        }
    }

    pub fn state(&self) -> BootState {
        self.state.lock().clone()
    }

    /// The root hash received from the S chip, once booted.
    pub fn root_hash(&self) -> Option<Digest> {
        match &*self.state.lock() {
            BootState::Booted { root_hash } => Some(*root_hash),
            _ => None,
        }
    }

    pub fn reset(&self) {
        *self.state.lock() = BootState::Reset;
        debug!("[BootLogic] reset");
    }

    /// Checks the S chip's identity and issues a challenge for it.
    ///
    /// Returns the fresh boot nonce encrypted under the P key, and its HMAC.
    pub fn boot_start(
        &self,
        puf_syndrome: &Digest,
        endorsement_certificate: &Certificate,
    ) -> Result<(Vec<u8>, Mac)> {
        let mut state = self.state.lock();
        if !matches!(*state, BootState::Reset) {
            return_errno_with_msg!(InvalidBootState, "boot_start called twice");
        }
        if crypto_hash(&self.p_key) != *puf_syndrome {
            error!("[BootLogic] PUF syndrome mismatch");
            return_errno_with_msg!(BootFailed, "invalid PUF syndrome");
        }
        if !endorsement_certificate.is_signed_by(&self.ca_public_key) {
            error!("[BootLogic] endorsement certificate not signed by the CA");
            return_errno_with_msg!(BootFailed, "invalid endorsement certificate");
        }

        let boot_nonce = nonce();
        let encrypted_nonce = sk_encrypt(&self.p_key, &boot_nonce)?;
        let nonce_hmac = hmac(&self.p_key, &boot_nonce)?;
        *state = BootState::Started {
            nonce: boot_nonce,
            endorsement_certificate: endorsement_certificate.clone(),
        };
        Ok((encrypted_nonce, nonce_hmac))
    }

    /// Checks the S chip's answer to the challenge.
    ///
    /// On success returns the endorsement key, which the P chip hands to its
    /// session cache, while the root hash goes to the node cache.
    pub fn boot_finish(
        &self,
        root_hash: &Digest,
        state_hmac: &Mac,
        encrypted_endorsement_key: &[u8],
    ) -> Result<KeyPair> {
        let mut state = self.state.lock();
        let BootState::Started {
            nonce,
            endorsement_certificate,
        } = &*state
        else {
            return_errno_with_msg!(InvalidBootState, "boot_finish called before boot_start");
        };

        if hmac(&self.p_key, &[&root_hash[..], &nonce[..]].concat())? != *state_hmac {
            error!("[BootLogic] state HMAC check failed");
            return_errno_with_msg!(BootFailed, "state HMAC check failed");
        }
        let endorsement_key = sk_decrypt(&self.p_key, encrypted_endorsement_key)
            .and_then(|der| KeyPair::from_der(&der))
            .map_err(|_| Error::with_msg(BootFailed, "unreadable endorsement key"))?;
        if !endorsement_certificate
            .public_key()?
            .matches(&endorsement_key)
        {
            error!("[BootLogic] endorsement key does not match certificate");
            return_errno_with_msg!(BootFailed, "endorsement key does not match certificate");
        }

        *state = BootState::Booted {
            root_hash: *root_hash,
        };
        info!("[BootLogic] booted");
        Ok(endorsement_key)
    }
}
