//! Symmetric encryption of short secrets (nonces, keys).
//!
//! # Format
//!
//! ```text
//! ┌──────────┬──────────┬──────────────────────┐
//! │    IV    │   MAC    │      Ciphertext      │
//! │  (12B)   │  (16B)   │  (plaintext length)  │
//! └──────────┴──────────┴──────────────────────┘
//! ```
use crate::os::{Aead, AeadIv, AeadKey, AeadMac};
use crate::prelude::*;
use crate::util::Aead as _;

/// Key for `sk_encrypt` / `sk_decrypt`.
pub type SkKey = AeadKey;

const HEADER_SIZE: usize = AeadIv::SIZE + AeadMac::SIZE;

/// Encrypts `plaintext` under `key` with a random IV.
pub fn sk_encrypt(key: &SkKey, plaintext: &[u8]) -> Result<Vec<u8>> {
    let iv = AeadIv::random();
    let mut output = vec![0u8; HEADER_SIZE + plaintext.len()];
    let mac = Aead::new().encrypt(plaintext, key, &iv, &[], &mut output[HEADER_SIZE..])?;
    output[..AeadIv::SIZE].copy_from_slice(&iv);
    output[AeadIv::SIZE..HEADER_SIZE].copy_from_slice(&mac);
    Ok(output)
}

/// Decrypts and authenticates the output of `sk_encrypt`.
pub fn sk_decrypt(key: &SkKey, ciphertext: &[u8]) -> Result<Vec<u8>> {
    if ciphertext.len() < HEADER_SIZE {
        return_errno_with_msg!(DecryptFailed, "ciphertext shorter than its header");
    }
    let iv = AeadIv::from_slice(&ciphertext[..AeadIv::SIZE])?;
    let mac = AeadMac::from_slice(&ciphertext[AeadIv::SIZE..HEADER_SIZE])?;
    let mut output = vec![0u8; ciphertext.len() - HEADER_SIZE];
    Aead::new().decrypt(&ciphertext[HEADER_SIZE..], key, &iv, &[], &mac, &mut output)?;
    Ok(output)
}
