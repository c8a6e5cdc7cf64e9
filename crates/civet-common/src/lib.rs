// Shared identity types and protocol limits used across crates.
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid client id: {0}")]
    InvalidClientId(String),
}

/// Smallest queue capacity a client may request.
pub const MIN_QUEUE_CAPACITY: usize = 1;
/// Largest queue capacity a client may request.
pub const MAX_QUEUE_CAPACITY: usize = 100;

/// Identity of a connected client (a process id or equivalent handle).
///
/// The engine keys sessions by this identity; at most one session exists
/// per client at any time.
///
/// ```
/// use civet_common::ClientId;
///
/// let client = ClientId::new(4817);
/// assert_eq!(client.raw(), 4817);
/// assert_eq!(client.to_string(), "4817");
/// ```
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct ClientId(u64);

impl ClientId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    // Expose the underlying integer for interoperability.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl From<u64> for ClientId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ClientId {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self> {
        // Preserve the original input for clearer error messages.
        let id = input
            .parse::<u64>()
            .map_err(|_| Error::InvalidClientId(input.into()))?;
        Ok(Self(id))
    }
}
