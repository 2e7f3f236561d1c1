//! Payload storage for resources.
//!
//! A [`SharedBuffer`] is an append-only list of [`Bytes`] segments. Cloning it is cheap and the
//! clones never observe later appends, which is what gives clients their read-only view.
//!
//! The [`PurgeableBuffer`] wraps the payload of one resource together with its lock state. An
//! unlocked buffer may be dropped by the store under memory pressure, a locked one never is.

use bytes::{Bytes, BytesMut};

/// A segmented, cheaply clonable byte buffer.
#[derive(Clone, Debug, Default)]
pub struct SharedBuffer {
    segments: Vec<Bytes>,
    len: usize,
}

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a segment without copying it.
    pub fn append(&mut self, data: Bytes) {
        if data.is_empty() {
            return;
        }
        self.len += data.len();
        self.segments.push(data);
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn segments(&self) -> &[Bytes] {
        &self.segments
    }

    /// Returns the whole payload as one contiguous [`Bytes`].
    ///
    /// This only copies when the buffer consists of more than one segment.
    pub fn to_bytes(&self) -> Bytes {
        match self.segments.as_slice() {
            [] => Bytes::new(),
            [single] => single.clone(),
            segments => {
                let mut buf = BytesMut::with_capacity(self.len);
                for segment in segments {
                    buf.extend_from_slice(segment);
                }
                buf.freeze()
            }
        }
    }

    /// Merges all segments into one, so that later [`to_bytes`](Self::to_bytes) calls are free.
    pub fn consolidate(&mut self) {
        if self.segments.len() > 1 {
            let merged = self.to_bytes();
            self.segments = vec![merged];
        }
    }
}

impl From<Bytes> for SharedBuffer {
    fn from(data: Bytes) -> Self {
        let mut buffer = Self::new();
        buffer.append(data);
        buffer
    }
}

impl From<Vec<u8>> for SharedBuffer {
    fn from(data: Vec<u8>) -> Self {
        Bytes::from(data).into()
    }
}

impl From<&'static str> for SharedBuffer {
    fn from(data: &'static str) -> Self {
        Bytes::from_static(data.as_bytes()).into()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PurgeState {
    Locked,
    Unlocked,
    Purged,
}

/// The payload of a resource together with its purge state.
#[derive(Debug)]
pub(crate) struct PurgeableBuffer {
    data: Option<SharedBuffer>,
    state: PurgeState,
}

impl Default for PurgeableBuffer {
    fn default() -> Self {
        Self {
            data: None,
            state: PurgeState::Locked,
        }
    }
}

impl PurgeableBuffer {
    pub fn get(&self) -> Option<&SharedBuffer> {
        self.data.as_ref()
    }

    pub fn has_data(&self) -> bool {
        self.data.is_some()
    }

    pub fn len(&self) -> usize {
        self.data.as_ref().map_or(0, SharedBuffer::len)
    }

    /// Replaces the payload. A fresh payload always starts out locked.
    pub fn set(&mut self, data: Option<SharedBuffer>) {
        self.data = data;
        self.state = PurgeState::Locked;
    }

    pub fn append(&mut self, data: Bytes) {
        debug_assert_ne!(self.state, PurgeState::Unlocked, "appending to an unlocked buffer");
        self.state = PurgeState::Locked;
        self.data.get_or_insert_with(SharedBuffer::new).append(data);
    }

    pub fn clear(&mut self) {
        self.set(None);
    }

    pub fn is_locked(&self) -> bool {
        self.state == PurgeState::Locked
    }

    pub fn was_purged(&self) -> bool {
        self.state == PurgeState::Purged
    }

    /// Locks the payload again. Returns `false` if the payload was purged in the meantime.
    pub fn lock(&mut self) -> bool {
        match self.state {
            PurgeState::Locked => true,
            PurgeState::Unlocked => {
                self.state = PurgeState::Locked;
                true
            }
            PurgeState::Purged => false,
        }
    }

    pub fn unlock(&mut self) {
        if self.data.is_some() {
            self.state = PurgeState::Unlocked;
        }
    }

    /// Drops an unlocked payload. Returns the number of bytes released.
    pub fn purge(&mut self) -> usize {
        if self.state != PurgeState::Unlocked {
            return 0;
        }
        let released = self.len();
        self.data = None;
        self.state = PurgeState::Purged;
        released
    }
}
