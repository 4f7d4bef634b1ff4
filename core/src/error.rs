/// The error type which is returned from the APIs of this crate.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Errno {
    /// A verified cache entry still has a cached child.
    ChildStillCached,
    /// A cache entry does not hold the expected child node.
    WrongChild,
    /// The old parent entry does not hold the evicted node's parent.
    WrongParent,
    /// A child node already has another verified copy in the cache.
    DuplicateChild,
    /// A parent hash does not match the hashes of its children.
    HashMismatch,
    /// Malformed update path.
    InvalidUpdatePath,
    /// A cache entry used as a trust anchor is not verified.
    UnverifiedEntry,
    /// Certification requested for an unverified entry.
    NotVerified,
    /// Cache slot out of range.
    InvalidSlot,
    /// Tree node id out of range.
    InvalidNodeId,
    /// Block, leaf or node index out of range.
    OutOfRange,
    /// Buffer length does not match the block size.
    SizeMismatch,
    /// Session does not exist.
    SessionNotFound,
    /// No key loaded in the session cache slot.
    SessionNotLoaded,
    /// Boot operation called in the wrong boot state.
    InvalidBootState,
    /// Boot handshake check failed.
    BootFailed,
    /// Encryption operation failed.
    EncryptFailed,
    /// Decryption operation failed.
    DecryptFailed,
    /// Hashing, signing or key handling failed.
    CryptoFailed,
    /// Invalid arguments.
    InvalidArgs,
    /// IO error.
    IoFailed,
}

impl Errno {
    /// Whether the error means the cache or tree state cannot be trusted.
    ///
    /// Integrity violations must not be retried; a client seeing one should
    /// treat the store as possibly compromised.
    pub fn is_integrity_violation(&self) -> bool {
        matches!(
            self,
            Errno::ChildStillCached
                | Errno::WrongChild
                | Errno::WrongParent
                | Errno::DuplicateChild
                | Errno::HashMismatch
                | Errno::InvalidUpdatePath
                | Errno::UnverifiedEntry
                | Errno::NotVerified
        )
    }

    /// Whether the error is a bounds error, i.e. a bug in the caller.
    pub fn is_bounds_error(&self) -> bool {
        matches!(
            self,
            Errno::InvalidSlot | Errno::InvalidNodeId | Errno::OutOfRange
        )
    }

    /// Numeric code used in node cache responses on the wire.
    pub(crate) fn code(&self) -> u8 {
        *self as u8 + 1
    }

    /// Inverse of `code`.
    pub(crate) fn from_code(code: u8) -> Option<Self> {
        const ALL: [Errno; 21] = [
            Errno::ChildStillCached,
            Errno::WrongChild,
            Errno::WrongParent,
            Errno::DuplicateChild,
            Errno::HashMismatch,
            Errno::InvalidUpdatePath,
            Errno::UnverifiedEntry,
            Errno::NotVerified,
            Errno::InvalidSlot,
            Errno::InvalidNodeId,
            Errno::OutOfRange,
            Errno::SizeMismatch,
            Errno::SessionNotFound,
            Errno::SessionNotLoaded,
            Errno::InvalidBootState,
            Errno::BootFailed,
            Errno::EncryptFailed,
            Errno::DecryptFailed,
            Errno::CryptoFailed,
            Errno::InvalidArgs,
            Errno::IoFailed,
        ];
        ALL.get((code as usize).checked_sub(1)?).copied()
    }
}

/// error used in this crate
#[derive(Debug, Clone)]
pub struct Error {
    errno: Errno,
    msg: Option<&'static str>,
}

impl Error {
    pub const fn new(errno: Errno) -> Self {
        Error { errno, msg: None }
    }

    pub const fn with_msg(errno: Errno, msg: &'static str) -> Self {
        Error {
            errno,
            msg: Some(msg),
        }
    }

    pub fn errno(&self) -> Errno {
        self.errno
    }

    pub fn msg(&self) -> Option<&'static str> {
        self.msg
    }

    pub fn is_integrity_violation(&self) -> bool {
        self.errno.is_integrity_violation()
    }
}

impl From<Errno> for Error {
    fn from(errno: Errno) -> Self {
        Error::new(errno)
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.msg {
            Some(msg) => write!(f, "{:?}: {}", self.errno, msg),
            None => write!(f, "{:?}", self.errno),
        }
    }
}

impl std::error::Error for Error {}

#[macro_export]
macro_rules! return_errno {
    ($errno: expr) => {
        return core::result::Result::Err(crate::error::Error::new($errno))
    };
}

#[macro_export]
macro_rules! return_errno_with_msg {
    ($errno: expr, $msg: expr) => {
        return core::result::Result::Err(crate::error::Error::with_msg($errno, $msg))
    };
}
