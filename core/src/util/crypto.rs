use crate::prelude::Result;

/// Random initialization for key, IV and nonce types.
pub trait RandomInit: Default {
    /// Returns a randomly-initialized value.
    fn random() -> Self;
}

/// Random number generator.
pub trait Rng {
    /// Creates an instance, with `seed` as the initial state.
    fn new(seed: &[u8]) -> Self;

    /// Fills `dest` with random bytes.
    fn fill_bytes(&self, dest: &mut [u8]) -> Result<()>;
}

/// Authenticated Encryption with Associated Data (AEAD) algorithm.
pub trait Aead {
    type Key;
    type Iv;
    type Mac;

    /// Encrypts `input` with `key`, `iv` and `aad` into `output`, which must
    /// have the same length as `input`. Returns the authentication tag.
    fn encrypt(
        &self,
        input: &[u8],
        key: &Self::Key,
        iv: &Self::Iv,
        aad: &[u8],
        output: &mut [u8],
    ) -> Result<Self::Mac>;

    /// Decrypts `input` into `output` after checking `mac`.
    fn decrypt(
        &self,
        input: &[u8],
        key: &Self::Key,
        iv: &Self::Iv,
        aad: &[u8],
        mac: &Self::Mac,
        output: &mut [u8],
    ) -> Result<()>;
}
