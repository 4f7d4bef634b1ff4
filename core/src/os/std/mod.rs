//! Std user space implementations.

use crate::error::Errno;
use crate::prelude::{Error, Result};
use openssl::hash::MessageDigest;
use openssl::pkey::PKey;
use openssl::rand::rand_bytes;
use openssl::sha::Sha256;
use openssl::sign::Signer;
use openssl::symm::{decrypt_aead, encrypt_aead, Cipher};
use pod_rs::Pod;
use serde::{Deserialize, Serialize};

mod pki;

pub use self::pki::{Certificate, KeyPair, PublicKey};

/// Reuse the `Mutex` and `MutexGuard` implementation.
pub use spin::{Mutex, MutexGuard};

pub use hashbrown::{HashMap, HashSet};
pub use std::boxed::Box;
pub use std::string::{String, ToString};
pub use std::sync::Arc;
pub use std::vec::Vec;

/// A random number generator.
pub struct Rng;

impl crate::util::Rng for Rng {
    fn new(_seed: &[u8]) -> Self {
        Self
    }

    fn fill_bytes(&self, dest: &mut [u8]) -> Result<()> {
        rand_bytes(dest).map_err(|_| Error::new(Errno::CryptoFailed))
    }
}

/// A macro to define byte_array_types used by hashing, `Hmac` or `Aead`.
macro_rules! new_byte_array_type {
    ($name:ident, $n:expr) => {
        #[repr(C)]
        #[derive(Copy, Clone, Pod, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
        pub struct $name([u8; $n]);

        impl $name {
            /// Size of the value in bytes.
            pub const SIZE: usize = $n;

            /// Builds a value from a slice of exactly `SIZE` bytes.
            pub fn from_slice(bytes: &[u8]) -> Result<Self> {
                if bytes.len() != $n {
                    return Err(Error::with_msg(Errno::SizeMismatch, "wrong byte array length"));
                }
                let mut value = Self::default();
                value.0.copy_from_slice(bytes);
                Ok(value)
            }
        }

        impl core::ops::Deref for $name {
            type Target = [u8];

            fn deref(&self) -> &Self::Target {
                self.0.as_slice()
            }
        }

        impl core::ops::DerefMut for $name {
            fn deref_mut(&mut self) -> &mut Self::Target {
                self.0.as_mut_slice()
            }
        }

        impl From<[u8; $n]> for $name {
            fn from(bytes: [u8; $n]) -> Self {
                Self(bytes)
            }
        }

        impl crate::util::RandomInit for $name {
            fn random() -> Self {
                use crate::util::Rng;

                let mut result = Self::default();
                let rng = self::Rng::new(&[]);
                rng.fill_bytes(&mut result).unwrap_or_default();
                result
            }
        }
    };
}

const AES_GCM_KEY_SIZE: usize = 16;
const AES_GCM_IV_SIZE: usize = 12;
const AES_GCM_MAC_SIZE: usize = 16;

new_byte_array_type!(AeadKey, AES_GCM_KEY_SIZE);
new_byte_array_type!(AeadIv, AES_GCM_IV_SIZE);
new_byte_array_type!(AeadMac, AES_GCM_MAC_SIZE);

const SHA256_SIZE: usize = 32;
const HMAC_KEY_SIZE: usize = 32;
const NONCE_SIZE: usize = 16;

// Hash tree node contents and data block hashes.
new_byte_array_type!(Digest, SHA256_SIZE);
// HMAC-SHA-256 tags.
new_byte_array_type!(Mac, SHA256_SIZE);
new_byte_array_type!(HmacKey, HMAC_KEY_SIZE);
new_byte_array_type!(Nonce, NONCE_SIZE);

/// Computes the SHA-256 digest of the concatenation of `parts`.
pub fn sha256(parts: &[&[u8]]) -> Digest {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    Digest(hasher.finish())
}

/// Computes the HMAC-SHA-256 tag of the concatenation of `parts`.
pub fn hmac_sha256(key: &[u8], parts: &[&[u8]]) -> Result<Mac> {
    let pkey = PKey::hmac(key).map_err(|_| Error::new(Errno::CryptoFailed))?;
    let mut signer = Signer::new(MessageDigest::sha256(), &pkey)
        .map_err(|_| Error::new(Errno::CryptoFailed))?;
    for part in parts {
        signer
            .update(part)
            .map_err(|_| Error::new(Errno::CryptoFailed))?;
    }
    let tag = signer
        .sign_to_vec()
        .map_err(|_| Error::new(Errno::CryptoFailed))?;
    Mac::from_slice(&tag)
}

/// An `AEAD` cipher.
pub struct Aead;

impl Aead {
    /// Construct an `Aead` instance.
    pub fn new() -> Self {
        Self
    }
}

impl crate::util::Aead for Aead {
    type Key = AeadKey;
    type Iv = AeadIv;
    type Mac = AeadMac;

    fn encrypt(
        &self,
        input: &[u8],
        key: &Self::Key,
        iv: &Self::Iv,
        aad: &[u8],
        output: &mut [u8],
    ) -> Result<Self::Mac> {
        let mut mac = AeadMac::default();

        let result = encrypt_aead(Cipher::aes_128_gcm(), key, Some(iv), aad, input, &mut mac)
            .map_err(|_| Error::new(Errno::EncryptFailed))?;
        output.copy_from_slice(result.as_slice());
        Ok(mac)
    }

    fn decrypt(
        &self,
        input: &[u8],
        key: &Self::Key,
        iv: &Self::Iv,
        aad: &[u8],
        mac: &Self::Mac,
        output: &mut [u8],
    ) -> Result<()> {
        let result = decrypt_aead(Cipher::aes_128_gcm(), key, Some(iv), aad, input, mac)
            .map_err(|_| Error::new(Errno::DecryptFailed))?;
        output.copy_from_slice(result.as_slice());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn mutex() {
        use super::Mutex;

        let x: Mutex<i32> = Mutex::new(0);
        let mut y = x.lock();
        *y += 1;
        assert_eq!(*y, 1);
    }

    #[test]
    fn rng() {
        use super::Rng as OsRng;
        use crate::util::Rng;

        let rng = OsRng::new(&[]);
        let mut buf = [0u8; 16];
        rng.fill_bytes(&mut buf).unwrap();
        let mut other = [0u8; 16];
        rng.fill_bytes(&mut other).unwrap();
        assert_ne!(buf, other);
    }

    #[test]
    fn aead() {
        use super::{Aead as OsAead, AeadIv, AeadKey};
        use crate::util::{Aead, RandomInit};

        let data = b"Some Crypto Text";
        let key = AeadKey::random();
        let iv = AeadIv::random();

        let aead = OsAead::new();
        let mut ciphertext = [0u8; 16];
        let mac = aead.encrypt(data, &key, &iv, &[], &mut ciphertext).unwrap();
        assert_ne!(data, &ciphertext);

        let mut plaintext = [0u8; 16];
        aead.decrypt(&ciphertext, &key, &iv, &[], &mac, &mut plaintext)
            .unwrap();
        assert_eq!(data, &plaintext);
    }

    #[test]
    fn sha256_of_parts() {
        use super::sha256;

        // SHA-256("abc")
        let expected = [
            0xba, 0x78, 0x16, 0xbf, 0x8f, 0x01, 0xcf, 0xea, 0x41, 0x41, 0x40, 0xde, 0x5d, 0xae,
            0x22, 0x23, 0xb0, 0x03, 0x61, 0xa3, 0x96, 0x17, 0x7a, 0x9c, 0xb4, 0x10, 0xff, 0x61,
            0xf2, 0x00, 0x15, 0xad,
        ];
        assert_eq!(&sha256(&[b"abc".as_slice()])[..], &expected[..]);
        assert_eq!(
            sha256(&[b"a".as_slice(), b"bc".as_slice()]),
            sha256(&[b"abc".as_slice()])
        );
    }

    #[test]
    fn hmac() {
        use super::{hmac_sha256, HmacKey};
        use crate::util::RandomInit;

        let key = HmacKey::random();
        let tag = hmac_sha256(&key, &[b"data".as_slice()]).unwrap();
        assert_eq!(
            tag,
            hmac_sha256(&key, &[b"da".as_slice(), b"ta".as_slice()]).unwrap()
        );
        assert_ne!(tag, hmac_sha256(&key, &[b"atad".as_slice()]).unwrap());
        assert_ne!(
            tag,
            hmac_sha256(&HmacKey::random(), &[b"data".as_slice()]).unwrap()
        );
    }
}
