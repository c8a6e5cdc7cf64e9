// Per-client bounded priority queues reachable through a byte channel.
// Each client opens a session, sizes its queue with a one-byte write, then
// feeds (value, priority) pairs as alternating four-byte writes and drains
// minimum-priority values with four-byte reads. A single registry lock
// serializes every operation end to end, including the queue work performed
// inside writes and reads.
use ahash::RandomState;
use civet_common::ClientId;
use civet_queue::{BoundedHeap, Item};
use civet_wire::FIELD_LEN;
use hashbrown::HashMap;
use parking_lot::Mutex;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineError {
    /// Malformed payload: wrong length, capacity outside protocol limits,
    /// or a non-positive priority.
    #[error("invalid argument: {0}")]
    InvalidArgument(#[from] civet_wire::Error),
    /// The caller has no session, or tried to open a second one.
    #[error("client {client} {reason}")]
    Unauthorized {
        client: ClientId,
        reason: &'static str,
    },
    /// The queue is full; the caller may retry after draining it.
    #[error("queue full (capacity {capacity})")]
    ResourceExhausted { capacity: usize },
    /// The session's queue is missing or empty.
    #[error("{0}")]
    FailedPrecondition(&'static str),
    /// The popped value could not be handed to the caller. The item has
    /// already left the queue and is not restored.
    #[error("failed to transfer popped value to caller")]
    TransferFailed,
}

/// Returned by a delivery callback that could not accept the popped bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryRefused;

/// Occupancy snapshot of one client's queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueInfo {
    pub count: usize,
    pub capacity: usize,
}

#[derive(Debug, Default)]
struct Session {
    // Unset until the first valid sizing write arrives.
    queue: Option<BoundedHeap>,
    // One-slot cache holding a value that awaits its paired priority.
    // Occupied only when the queue exists.
    pending_value: Option<i32>,
}

/// In-process engine hosting one bounded priority queue per client.
///
/// ```
/// use civet_common::ClientId;
/// use civet_engine::Engine;
///
/// let engine = Engine::new();
/// let client = ClientId::new(17);
/// engine.open(client).expect("open");
/// engine.write(client, &[8]).expect("size");
/// engine.write(client, &42i32.to_ne_bytes()).expect("value");
/// engine.write(client, &3i32.to_ne_bytes()).expect("priority");
/// let mut buf = [0u8; 4];
/// engine.read(client, &mut buf).expect("read");
/// assert_eq!(i32::from_ne_bytes(buf), 42);
/// engine.close(client);
/// ```
#[derive(Debug, Default)]
pub struct Engine {
    // Map of client id -> session. One lock spans the existence check plus
    // whatever mutation follows, so concurrent opens, closes, writes, and
    // reads for the same client never interleave mid-operation.
    sessions: Mutex<HashMap<ClientId, Session, RandomState>>,
}

impl Engine {
    // Use Default to centralize initialization.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty session for `client`.
    ///
    /// A client holds at most one session; a second open is rejected until
    /// the first session is closed.
    pub fn open(&self, client: ClientId) -> Result<()> {
        let mut sessions = self.sessions.lock();
        if sessions.contains_key(&client) {
            return Err(EngineError::Unauthorized {
                client,
                reason: "already has an open session",
            });
        }
        sessions.insert(client, Session::default());
        tracing::info!(%client, open_sessions = sessions.len(), "session opened");
        Ok(())
    }

    /// Destroy `client`'s session and its queue. Closing an absent session
    /// is a no-op; any cached value or queued items are discarded.
    pub fn close(&self, client: ClientId) {
        let mut sessions = self.sessions.lock();
        if sessions.remove(&client).is_some() {
            tracing::info!(%client, open_sessions = sessions.len(), "session closed");
        } else {
            tracing::warn!(%client, "close for a client with no open session");
        }
    }

    /// Feed one protocol write. Returns the number of payload bytes
    /// consumed: 1 for the sizing write, 4 for value and priority writes.
    ///
    /// The first write sizes the queue. After that, writes alternate
    /// between caching a value and pushing it at the supplied priority.
    /// A rejected priority (non-positive, or the queue is full) leaves the
    /// cached value in place so the caller can retry.
    pub fn write(&self, client: ClientId, payload: &[u8]) -> Result<usize> {
        let mut sessions = self.sessions.lock();
        let session = sessions
            .get_mut(&client)
            .ok_or(EngineError::Unauthorized {
                client,
                reason: "has no open session",
            })?;

        // The first valid write sizes the queue; every write after that
        // carries item data.
        let queue = match &mut session.queue {
            Some(queue) => queue,
            queue @ None => {
                let capacity = civet_wire::decode_capacity(payload)?;
                *queue = Some(BoundedHeap::new(capacity));
                tracing::info!(%client, capacity, "queue sized");
                return Ok(civet_wire::SIZING_LEN);
            }
        };

        match session.pending_value {
            None => {
                let value = civet_wire::decode_value(payload)?;
                session.pending_value = Some(value);
                tracing::debug!(%client, value, "value cached, awaiting priority");
            }
            Some(value) => {
                let priority = civet_wire::decode_priority(payload)?;
                queue
                    .push(Item { value, priority })
                    .map_err(|_| EngineError::ResourceExhausted {
                        capacity: queue.capacity(),
                    })?;
                session.pending_value = None;
                tracing::debug!(%client, value, priority, "item pushed");
            }
        }
        Ok(FIELD_LEN)
    }

    /// Pop the minimum-priority value into `buf`, which must be exactly
    /// four bytes. Returns the number of bytes written.
    pub fn read(&self, client: ClientId, buf: &mut [u8]) -> Result<usize> {
        let requested = buf.len();
        self.read_with(client, requested, |bytes| {
            buf.copy_from_slice(bytes);
            Ok(())
        })
    }

    /// Pop the minimum-priority value and hand its encoding to `deliver`.
    ///
    /// The pop happens before delivery; if `deliver` refuses the bytes the
    /// item is already gone and is NOT restored. Callers that cannot
    /// tolerate loss must provide an infallible sink.
    pub fn read_with<F>(&self, client: ClientId, requested: usize, deliver: F) -> Result<usize>
    where
        F: FnOnce(&[u8; FIELD_LEN]) -> std::result::Result<(), DeliveryRefused>,
    {
        if requested != FIELD_LEN {
            return Err(EngineError::InvalidArgument(
                civet_wire::Error::UnexpectedLength {
                    expected: FIELD_LEN,
                    got: requested,
                },
            ));
        }

        let mut sessions = self.sessions.lock();
        let session = sessions
            .get_mut(&client)
            .ok_or(EngineError::Unauthorized {
                client,
                reason: "has no open session",
            })?;
        let queue = session
            .queue
            .as_mut()
            .ok_or(EngineError::FailedPrecondition("queue capacity not set"))?;
        let value = queue
            .pop()
            .map_err(|_| EngineError::FailedPrecondition("queue is empty"))?;

        match deliver(&civet_wire::encode_value(value)) {
            Ok(()) => {
                tracing::debug!(%client, value, "minimum-priority value popped");
                Ok(FIELD_LEN)
            }
            Err(DeliveryRefused) => {
                tracing::warn!(%client, value, "delivery refused; popped item dropped");
                Err(EngineError::TransferFailed)
            }
        }
    }

    /// Occupancy and capacity of `client`'s queue. Diagnostic only; does
    /// not mutate the queue.
    pub fn queue_info(&self, client: ClientId) -> Result<QueueInfo> {
        let sessions = self.sessions.lock();
        let session = sessions.get(&client).ok_or(EngineError::Unauthorized {
            client,
            reason: "has no open session",
        })?;
        let queue = session
            .queue
            .as_ref()
            .ok_or(EngineError::FailedPrecondition("queue capacity not set"))?;
        Ok(QueueInfo {
            count: queue.len(),
            capacity: queue.capacity(),
        })
    }

    /// Snapshot of clients with open sessions. Diagnostic only.
    pub fn clients(&self) -> Vec<ClientId> {
        let sessions = self.sessions.lock();
        sessions.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::{DeliveryRefused, Engine, EngineError, QueueInfo};
    use civet_common::ClientId;

    fn int(value: i32) -> [u8; 4] {
        value.to_ne_bytes()
    }

    #[test]
    fn open_then_duplicate_open_is_rejected() {
        let engine = Engine::new();
        let client = ClientId::new(1);
        engine.open(client).expect("open");
        let err = engine.open(client).expect_err("duplicate");
        assert!(matches!(err, EngineError::Unauthorized { .. }));
        // The original session is untouched.
        engine.write(client, &[5]).expect("size");
    }

    #[test]
    fn write_without_session_is_unauthorized() {
        let engine = Engine::new();
        let err = engine.write(ClientId::new(2), &[5]).expect_err("no session");
        assert!(matches!(err, EngineError::Unauthorized { .. }));
    }

    #[test]
    fn sizing_write_consumes_one_byte() {
        let engine = Engine::new();
        let client = ClientId::new(3);
        engine.open(client).expect("open");
        assert_eq!(engine.write(client, &[10]).expect("size"), 1);
        assert_eq!(
            engine.queue_info(client).expect("info"),
            QueueInfo {
                count: 0,
                capacity: 10
            }
        );
    }

    #[test]
    fn sizing_rejects_bad_lengths_and_ranges() {
        let engine = Engine::new();
        let client = ClientId::new(4);
        engine.open(client).expect("open");
        for payload in [&[][..], &[5, 0][..], &int(5)[..]] {
            let err = engine.write(client, payload).expect_err("length");
            assert!(matches!(err, EngineError::InvalidArgument(_)));
        }
        for capacity in [0u8, 101, 255] {
            let err = engine.write(client, &[capacity]).expect_err("range");
            assert!(matches!(err, EngineError::InvalidArgument(_)));
        }
        // The session is still unsized; a valid sizing write goes through.
        assert_eq!(engine.write(client, &[1]).expect("size"), 1);
    }

    #[test]
    fn value_writes_require_four_bytes() {
        let engine = Engine::new();
        let client = ClientId::new(5);
        engine.open(client).expect("open");
        engine.write(client, &[5]).expect("size");
        let err = engine.write(client, &[1]).expect_err("short");
        assert!(matches!(err, EngineError::InvalidArgument(_)));
        let err = engine.write(client, &[0; 8]).expect_err("long");
        assert!(matches!(err, EngineError::InvalidArgument(_)));
    }

    #[test]
    fn negative_priority_keeps_cached_value_for_retry() {
        let engine = Engine::new();
        let client = ClientId::new(6);
        engine.open(client).expect("open");
        engine.write(client, &[5]).expect("size");
        engine.write(client, &int(9)).expect("value");
        let err = engine.write(client, &int(-1)).expect_err("priority");
        assert!(matches!(err, EngineError::InvalidArgument(_)));
        // Retrying with a valid priority pushes the same cached value.
        engine.write(client, &int(2)).expect("retry priority");
        let mut buf = [0u8; 4];
        engine.read(client, &mut buf).expect("read");
        assert_eq!(i32::from_ne_bytes(buf), 9);
    }

    #[test]
    fn overflow_keeps_cached_value_and_allows_retry_after_pop() {
        let engine = Engine::new();
        let client = ClientId::new(7);
        engine.open(client).expect("open");
        engine.write(client, &[1]).expect("size");
        engine.write(client, &int(1)).expect("value");
        engine.write(client, &int(1)).expect("priority");
        engine.write(client, &int(2)).expect("second value");
        let err = engine.write(client, &int(1)).expect_err("full");
        assert_eq!(err, EngineError::ResourceExhausted { capacity: 1 });
        // Draining frees a slot; the cached value is still pending.
        let mut buf = [0u8; 4];
        engine.read(client, &mut buf).expect("drain");
        assert_eq!(engine.write(client, &int(3)).expect("retry"), 4);
        engine.read(client, &mut buf).expect("read");
        assert_eq!(i32::from_ne_bytes(buf), 2);
    }

    #[test]
    fn read_validates_length_before_anything_else() {
        let engine = Engine::new();
        // A bad length fails even with no session open.
        let err = engine
            .read_with(ClientId::new(8), 3, |_| Ok(()))
            .expect_err("length");
        assert!(matches!(err, EngineError::InvalidArgument(_)));
    }

    #[test]
    fn read_before_sizing_and_on_empty_queue_fails() {
        let engine = Engine::new();
        let client = ClientId::new(9);
        engine.open(client).expect("open");
        let mut buf = [0u8; 4];
        let err = engine.read(client, &mut buf).expect_err("unsized");
        assert!(matches!(err, EngineError::FailedPrecondition(_)));
        engine.write(client, &[3]).expect("size");
        let err = engine.read(client, &mut buf).expect_err("empty");
        assert!(matches!(err, EngineError::FailedPrecondition(_)));
    }

    #[test]
    fn refused_delivery_drops_the_popped_item() {
        let engine = Engine::new();
        let client = ClientId::new(10);
        engine.open(client).expect("open");
        engine.write(client, &[2]).expect("size");
        engine.write(client, &int(11)).expect("value");
        engine.write(client, &int(1)).expect("priority");
        engine.write(client, &int(22)).expect("value");
        engine.write(client, &int(2)).expect("priority");

        let err = engine
            .read_with(client, 4, |_| Err(DeliveryRefused))
            .expect_err("refused");
        assert_eq!(err, EngineError::TransferFailed);
        // Item (11, 1) is gone; the next read yields the next minimum.
        let mut buf = [0u8; 4];
        engine.read(client, &mut buf).expect("read");
        assert_eq!(i32::from_ne_bytes(buf), 22);
        assert_eq!(engine.queue_info(client).expect("info").count, 0);
    }

    #[test]
    fn close_is_idempotent_and_never_touches_other_sessions() {
        let engine = Engine::new();
        let a = ClientId::new(11);
        let b = ClientId::new(12);
        engine.open(a).expect("open a");
        engine.open(b).expect("open b");
        engine.write(b, &[4]).expect("size b");
        engine.write(b, &int(1)).expect("value b");
        engine.write(b, &int(1)).expect("priority b");

        engine.close(a);
        engine.close(a); // double close
        engine.close(ClientId::new(999)); // never opened

        assert_eq!(engine.clients(), vec![b]);
        assert_eq!(engine.queue_info(b).expect("info").count, 1);
    }

    #[test]
    fn reopen_after_close_starts_unsized() {
        let engine = Engine::new();
        let client = ClientId::new(13);
        engine.open(client).expect("open");
        engine.write(client, &[5]).expect("size");
        engine.close(client);
        engine.open(client).expect("reopen");
        // The fresh session expects a sizing byte again.
        let err = engine.write(client, &int(5)).expect_err("unsized");
        assert!(matches!(err, EngineError::InvalidArgument(_)));
        assert_eq!(engine.write(client, &[5]).expect("size"), 1);
    }

    #[test]
    fn sessions_are_isolated() {
        let engine = Engine::new();
        let a = ClientId::new(14);
        let b = ClientId::new(15);
        engine.open(a).expect("open a");
        engine.open(b).expect("open b");
        engine.write(a, &[2]).expect("size a");
        engine.write(b, &[2]).expect("size b");
        engine.write(a, &int(100)).expect("value a");
        // b has no pending value, so its next write is a value too.
        engine.write(b, &int(200)).expect("value b");
        engine.write(a, &int(1)).expect("priority a");
        engine.write(b, &int(1)).expect("priority b");

        let mut buf = [0u8; 4];
        engine.read(a, &mut buf).expect("read a");
        assert_eq!(i32::from_ne_bytes(buf), 100);
        engine.read(b, &mut buf).expect("read b");
        assert_eq!(i32::from_ne_bytes(buf), 200);
    }
}
