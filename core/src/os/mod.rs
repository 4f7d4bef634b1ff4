//! OS-specific or OS-dependent APIs.

mod std;
pub use self::std::{
    hmac_sha256, sha256, Aead, AeadIv, AeadKey, AeadMac, Arc, Box, Certificate, Digest, HashMap,
    HashSet, HmacKey, KeyPair, Mac, Mutex, MutexGuard, Nonce, PublicKey, Rng, String, ToString,
    Vec,
};
