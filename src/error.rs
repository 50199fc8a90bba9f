use std::error;
use std::fmt;
use std::io;

/// Errors reported by the trie and its serialization routines.
///
/// Lookup misses are not errors: `get`-style accessors return [`Option`]
/// and erase-of-missing-key reports a zero count. Allocation failure
/// follows the standard-library containers' behavior (the global
/// allocation error hook is invoked); it is never surfaced through this
/// type.
#[derive(Debug)]
pub enum Error {
    /// The key is longer than [`max_key_size`] for the configured key-size
    /// width.
    ///
    /// [`max_key_size`]: crate::TrieMap::max_key_size
    KeyTooLong {
        /// Length of the rejected key, in bytes.
        len: usize,
        /// Maximum length accepted by the current configuration.
        max_len: usize,
    },
    /// A single hash node would exceed the element capacity of the
    /// configured index-size width, or the trie would exceed
    /// `usize::MAX` elements.
    ///
    /// With the default configuration this is unreachable: leaves burst
    /// long before they approach the 16-bit index limit. It can trigger
    /// when the burst threshold is raised past the index capacity.
    CapacityExceeded,
    /// An I/O error from the underlying reader or writer during
    /// serialization or deserialization.
    Io(io::Error),
    /// Deserialization input is malformed, truncated, or produced by an
    /// incompatible version or configuration.
    Corrupted(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::KeyTooLong { len, max_len } => {
                write!(f, "key of {} bytes exceeds the maximum of {} bytes", len, max_len)
            }
            Error::CapacityExceeded => {
                write!(f, "too many elements for the configured index size")
            }
            Error::Io(err) => write!(f, "serialization i/o error: {}", err),
            Error::Corrupted(msg) => write!(f, "corrupted serialized data: {}", msg),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}
