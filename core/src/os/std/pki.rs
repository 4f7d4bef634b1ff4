//! RSA key pairs and X.509 certificates backed by openssl.

use crate::error::Errno;
use crate::prelude::{Error, Result};
use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private, Public};
use openssl::rsa::{Padding, Rsa};
use openssl::x509::{X509NameBuilder, X509};

const RSA_BITS: u32 = 2048;

fn crypto_err<E>(_: E) -> Error {
    Error::new(Errno::CryptoFailed)
}

/// An RSA key pair, used for the manufacturer CA and endorsement keys.
#[derive(Clone)]
pub struct KeyPair {
    pkey: PKey<Private>,
}

/// The public half of a `KeyPair`.
#[derive(Clone)]
pub struct PublicKey {
    pkey: PKey<Public>,
}

impl KeyPair {
    /// Generates a fresh key pair.
    pub fn generate() -> Result<Self> {
        let rsa = Rsa::generate(RSA_BITS).map_err(crypto_err)?;
        let pkey = PKey::from_rsa(rsa).map_err(crypto_err)?;
        Ok(Self { pkey })
    }

    /// Loads a key pair saved by `to_der`.
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let rsa = Rsa::private_key_from_der(der).map_err(crypto_err)?;
        let pkey = PKey::from_rsa(rsa).map_err(crypto_err)?;
        Ok(Self { pkey })
    }

    /// Serializes the private key (PKCS#1 DER).
    pub fn to_der(&self) -> Result<Vec<u8>> {
        self.pkey
            .rsa()
            .and_then(|rsa| rsa.private_key_to_der())
            .map_err(crypto_err)
    }

    pub fn public_key(&self) -> Result<PublicKey> {
        let der = self.pkey.public_key_to_der().map_err(crypto_err)?;
        PublicKey::from_der(&der)
    }

    /// Decrypts data produced by `PublicKey::encrypt`.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let rsa = self.pkey.rsa().map_err(crypto_err)?;
        let mut plaintext = vec![0u8; rsa.size() as usize];
        let len = rsa
            .private_decrypt(ciphertext, &mut plaintext, Padding::PKCS1_OAEP)
            .map_err(|_| Error::new(Errno::DecryptFailed))?;
        plaintext.truncate(len);
        Ok(plaintext)
    }
}

impl PublicKey {
    /// Loads a public key from SubjectPublicKeyInfo DER.
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let pkey = PKey::public_key_from_der(der).map_err(crypto_err)?;
        Ok(Self { pkey })
    }

    pub fn to_der(&self) -> Result<Vec<u8>> {
        self.pkey.public_key_to_der().map_err(crypto_err)
    }

    /// Encrypts a short message (e.g. a session key) under this key.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let rsa = self.pkey.rsa().map_err(crypto_err)?;
        let mut ciphertext = vec![0u8; rsa.size() as usize];
        let len = rsa
            .public_encrypt(plaintext, &mut ciphertext, Padding::PKCS1_OAEP)
            .map_err(|_| Error::new(Errno::EncryptFailed))?;
        ciphertext.truncate(len);
        Ok(ciphertext)
    }

    /// Whether both keys hold the same public components.
    pub fn matches(&self, key_pair: &KeyPair) -> bool {
        self.pkey.public_eq(&key_pair.pkey)
    }
}

/// An X.509 certificate.
#[derive(Clone)]
pub struct Certificate(X509);

impl Certificate {
    /// Issues a certificate for `subject`.
    ///
    /// A self-signed certificate is produced when `issuer_cert` is `None`;
    /// `subject` must then be the public half of `issuer_keys`.
    pub fn issue(
        common_name: &str,
        days: u32,
        serial: u32,
        issuer_keys: &KeyPair,
        issuer_cert: Option<&Certificate>,
        subject: &PublicKey,
    ) -> Result<Self> {
        let mut name = X509NameBuilder::new().map_err(crypto_err)?;
        name.append_entry_by_text("CN", common_name)
            .map_err(crypto_err)?;
        let name = name.build();

        let mut builder = X509::builder().map_err(crypto_err)?;
        builder.set_version(2).map_err(crypto_err)?;
        let serial = BigNum::from_u32(serial)
            .and_then(|bn| bn.to_asn1_integer())
            .map_err(crypto_err)?;
        builder.set_serial_number(&serial).map_err(crypto_err)?;
        builder.set_subject_name(&name).map_err(crypto_err)?;
        let issuer_name = match issuer_cert {
            Some(issuer) => issuer.0.subject_name(),
            None => &*name,
        };
        builder.set_issuer_name(issuer_name).map_err(crypto_err)?;
        builder.set_pubkey(&subject.pkey).map_err(crypto_err)?;
        let not_before = Asn1Time::days_from_now(0).map_err(crypto_err)?;
        let not_after = Asn1Time::days_from_now(days).map_err(crypto_err)?;
        builder.set_not_before(&not_before).map_err(crypto_err)?;
        builder.set_not_after(&not_after).map_err(crypto_err)?;
        builder
            .sign(&issuer_keys.pkey, MessageDigest::sha256())
            .map_err(crypto_err)?;
        Ok(Self(builder.build()))
    }

    pub fn from_der(der: &[u8]) -> Result<Self> {
        X509::from_der(der).map(Self).map_err(crypto_err)
    }

    pub fn to_der(&self) -> Result<Vec<u8>> {
        self.0.to_der().map_err(crypto_err)
    }

    /// Whether the certificate's signature checks out under `ca_key`.
    pub fn is_signed_by(&self, ca_key: &PublicKey) -> bool {
        self.0.verify(&ca_key.pkey).unwrap_or(false)
    }

    pub fn public_key(&self) -> Result<PublicKey> {
        let pkey = self.0.public_key().map_err(crypto_err)?;
        Ok(PublicKey { pkey })
    }
}

impl core::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("KeyPair").finish_non_exhaustive()
    }
}

impl core::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PublicKey").finish_non_exhaustive()
    }
}

impl core::fmt::Debug for Certificate {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Certificate").finish_non_exhaustive()
    }
}
