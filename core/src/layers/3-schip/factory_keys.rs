use super::s_chip::SoftSChip;
use crate::layers::crypto::{crypto_hash, Certificate, Digest, KeyPair, PublicKey, SkKey};
use crate::prelude::*;

use core::sync::atomic::{AtomicU32, Ordering};

const CA_COMMON_NAME: &str = "S-P Store Dev CA";
const CA_VALID_DAYS: u32 = 3650;
const CHIP_COMMON_NAME: &str = "S-P Store P Chip";
const CHIP_VALID_DAYS: u32 = 365;

/// The manufacturer CA used to endorse development S-P chip pairs.
///
/// Production chips are endorsed by a CA whose private key never leaves the
/// factory; development setups generate one, or load a saved one with
/// `from_der`.
pub struct FactoryKeys {
    ca_keys: KeyPair,
    ca_cert: Certificate,
    next_serial: AtomicU32,
}

impl FactoryKeys {
    /// Creates a fresh CA with a self-signed certificate.
    pub fn generate() -> Result<Self> {
        let ca_keys = KeyPair::generate()?;
        let ca_cert = Certificate::issue(
            CA_COMMON_NAME,
            CA_VALID_DAYS,
            1,
            &ca_keys,
            None,
            &ca_keys.public_key()?,
        )?;
        Ok(Self::new(ca_keys, ca_cert))
    }

    /// Loads a CA saved with `to_der`.
    pub fn from_der(ca_keys_der: &[u8], ca_cert_der: &[u8]) -> Result<Self> {
        let ca_keys = KeyPair::from_der(ca_keys_der)?;
        let ca_cert = Certificate::from_der(ca_cert_der)?;
        if !ca_cert.public_key()?.matches(&ca_keys) {
            return_errno_with_msg!(InvalidArgs, "CA certificate does not match CA keys");
        }
        Ok(Self::new(ca_keys, ca_cert))
    }

    fn new(ca_keys: KeyPair, ca_cert: Certificate) -> Self {
        Self {
            ca_keys,
            ca_cert,
            next_serial: AtomicU32::new(2),
        }
    }

    /// Returns `(ca_keys_der, ca_cert_der)`.
    pub fn to_der(&self) -> Result<(Vec<u8>, Vec<u8>)> {
        Ok((self.ca_keys.to_der()?, self.ca_cert.to_der()?))
    }

    pub fn ca_cert(&self) -> &Certificate {
        &self.ca_cert
    }

    /// The key burned into every P chip's ROM.
    pub fn ca_public_key(&self) -> Result<PublicKey> {
        self.ca_keys.public_key()
    }

    /// Issues an endorsement certificate for a chip's endorsement key.
    pub fn endorse(&self, endorsement_key: &KeyPair) -> Result<Certificate> {
        let serial = self.next_serial.fetch_add(1, Ordering::Relaxed);
        Certificate::issue(
            CHIP_COMMON_NAME,
            CHIP_VALID_DAYS,
            serial,
            &self.ca_keys,
            Some(&self.ca_cert),
            &endorsement_key.public_key()?,
        )
    }

    /// Manufactures an S chip anchored at `root_hash`.
    ///
    /// Returns the chip and the P key to give its P chip.
    pub fn provision(&self, root_hash: Digest) -> Result<(SoftSChip, SkKey)> {
        let p_key = SkKey::random();
        let puf_syndrome = crypto_hash(&p_key);
        let endorsement_key = KeyPair::generate()?;
        let certificate = self.endorse(&endorsement_key)?;
        let s_chip = SoftSChip::new(p_key, endorsement_key, certificate, puf_syndrome, root_hash);
        debug!("[FactoryKeys] provisioned an S-P chip pair");
        Ok((s_chip, p_key))
    }
}

impl Debug for FactoryKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FactoryKeys")
            .field("ca_cert", &self.ca_cert)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endorsements_chain_to_ca() -> Result<()> {
        let factory = FactoryKeys::generate()?;
        let ca_public_key = factory.ca_public_key()?;
        assert!(factory.ca_cert().is_signed_by(&ca_public_key));

        let key = KeyPair::generate()?;
        let cert = factory.endorse(&key)?;
        assert!(cert.is_signed_by(&ca_public_key));
        assert!(cert.public_key()?.matches(&key));

        let other = FactoryKeys::generate()?;
        assert!(!cert.is_signed_by(&other.ca_public_key()?));
        Ok(())
    }

    #[test]
    fn save_and_load() -> Result<()> {
        let factory = FactoryKeys::generate()?;
        let (keys_der, cert_der) = factory.to_der()?;
        let loaded = FactoryKeys::from_der(&keys_der, &cert_der)?;
        let cert = loaded.endorse(&KeyPair::generate()?)?;
        assert!(cert.is_signed_by(&factory.ca_public_key()?));

        let (other_keys_der, _) = FactoryKeys::generate()?.to_der()?;
        assert_eq!(
            FactoryKeys::from_der(&other_keys_der, &cert_der)
                .unwrap_err()
                .errno(),
            InvalidArgs
        );
        Ok(())
    }
}
