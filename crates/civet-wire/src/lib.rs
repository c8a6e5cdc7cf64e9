// Payload-level codec for the civet channel protocol.
//
// The protocol is stateful but the payloads themselves are not: a sizing
// write carries exactly one unsigned byte, and value/priority writes carry
// exactly four bytes holding a native-byte-order signed integer. This crate
// validates and decodes those shapes; which shape applies at a given moment
// is the engine's concern.
use civet_common::{MAX_QUEUE_CAPACITY, MIN_QUEUE_CAPACITY};

pub type Result<T> = std::result::Result<T, Error>;

/// Byte length of a sizing payload.
pub const SIZING_LEN: usize = 1;
/// Byte length of a value or priority payload.
pub const FIELD_LEN: usize = 4;

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    #[error("expected {expected} byte(s), got {got}")]
    UnexpectedLength { expected: usize, got: usize },
    #[error(
        "queue capacity must be in [{MIN_QUEUE_CAPACITY}, {MAX_QUEUE_CAPACITY}], got {0}"
    )]
    CapacityOutOfRange(usize),
    #[error("priority must be a positive integer, got {0}")]
    NonPositivePriority(i32),
}

/// Decode a sizing payload into a queue capacity.
///
/// ```
/// use civet_wire::decode_capacity;
///
/// assert_eq!(decode_capacity(&[5]).expect("capacity"), 5);
/// assert!(decode_capacity(&[0]).is_err());
/// assert!(decode_capacity(&[5, 5]).is_err());
/// ```
pub fn decode_capacity(payload: &[u8]) -> Result<usize> {
    if payload.len() != SIZING_LEN {
        return Err(Error::UnexpectedLength {
            expected: SIZING_LEN,
            got: payload.len(),
        });
    }
    let capacity = payload[0] as usize;
    if !(MIN_QUEUE_CAPACITY..=MAX_QUEUE_CAPACITY).contains(&capacity) {
        return Err(Error::CapacityOutOfRange(capacity));
    }
    Ok(capacity)
}

/// Decode a value payload. Values are unconstrained signed integers.
///
/// ```
/// use civet_wire::decode_value;
///
/// assert_eq!(decode_value(&(-7i32).to_ne_bytes()).expect("value"), -7);
/// assert!(decode_value(&[1, 2, 3]).is_err());
/// ```
pub fn decode_value(payload: &[u8]) -> Result<i32> {
    let bytes: [u8; FIELD_LEN] =
        payload
            .try_into()
            .map_err(|_| Error::UnexpectedLength {
                expected: FIELD_LEN,
                got: payload.len(),
            })?;
    Ok(i32::from_ne_bytes(bytes))
}

/// Decode a priority payload. Priorities must be strictly positive.
///
/// ```
/// use civet_wire::decode_priority;
///
/// assert_eq!(decode_priority(&3i32.to_ne_bytes()).expect("priority"), 3);
/// assert!(decode_priority(&0i32.to_ne_bytes()).is_err());
/// ```
pub fn decode_priority(payload: &[u8]) -> Result<i32> {
    let priority = decode_value(payload)?;
    if priority <= 0 {
        return Err(Error::NonPositivePriority(priority));
    }
    Ok(priority)
}

/// Encode a popped value for transfer back to the caller.
pub fn encode_value(value: i32) -> [u8; FIELD_LEN] {
    value.to_ne_bytes()
}
