use crate::layers::crypto::{
    hmac, sk_decrypt, sk_encrypt, Certificate, Digest, KeyPair, Mac, SkKey,
};
use crate::prelude::*;

/// Software model of the S chip.
///
/// Answers the P chip's boot challenge with the root hash, an HMAC binding
/// that root to the challenge, and the endorsement key wrapped under the
/// shared P key.
pub struct SoftSChip {
    p_key: SkKey,
    endorsement_key: KeyPair,
    endorsement_certificate: Certificate,
    puf_syndrome: Digest,
    root_hash: Digest,
}

impl SoftSChip {
    pub fn new(
        p_key: SkKey,
        endorsement_key: KeyPair,
        endorsement_certificate: Certificate,
        puf_syndrome: Digest,
        root_hash: Digest,
    ) -> Self {
        Self {
            p_key,
            endorsement_key,
            endorsement_certificate,
            puf_syndrome,
            root_hash,
        }
    }

    pub fn puf_syndrome(&self) -> &Digest {
        &self.puf_syndrome
    }

    pub fn endorsement_certificate(&self) -> &Certificate {
        &self.endorsement_certificate
    }

    pub fn root_hash(&self) -> &Digest {
        &self.root_hash
    }

    /// Answers the boot challenge issued by `BootLogic::boot_start`.
    ///
    /// Returns `(root_hash, state_hmac, encrypted_endorsement_key)`.
    pub fn boot(&self, encrypted_nonce: &[u8], nonce_hmac: &Mac) -> Result<(Digest, Mac, Vec<u8>)> {
        let boot_nonce = sk_decrypt(&self.p_key, encrypted_nonce)
            .map_err(|_| Error::with_msg(BootFailed, "undecryptable boot nonce"))?;
        if hmac(&self.p_key, &boot_nonce)? != *nonce_hmac {
            error!("[SChip] nonce HMAC check failed");
            return_errno_with_msg!(BootFailed, "nonce HMAC check failed");
        }
        let state_hmac = hmac(&self.p_key, &[&self.root_hash[..], &boot_nonce[..]].concat())?;
        let encrypted_endorsement_key = sk_encrypt(&self.p_key, &self.endorsement_key.to_der()?)?;
        Ok((self.root_hash, state_hmac, encrypted_endorsement_key))
    }
}

impl Debug for SoftSChip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoftSChip")
            .field("root_hash", &self.root_hash)
            .finish_non_exhaustive()
    }
}
