//! Payload Transfer
//!
//! Encodes request and response values into a transport-safe [`Payload`]: a bincode
//! body plus a side list of transferable buffers. Encoding consumes the value, so a
//! buffer moved into a payload is owned by the receiver from then on. Callers that
//! need to keep their bytes make an explicit copy with [`TransferBuffer::copy_from_slice`].

use crate::error::TransferError;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Large binary data that moves, rather than copies, across a context boundary.
///
/// Inside an encoded payload the buffer is replaced by an empty placeholder and its
/// bytes travel in [`Payload::buffers`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferBuffer {
    #[serde(skip)]
    bytes: Bytes,
}

impl TransferBuffer {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        TransferBuffer {
            bytes: bytes.into(),
        }
    }

    /// Copy `data` into a fresh buffer the caller can hand off while keeping its own.
    pub fn copy_from_slice(data: &[u8]) -> Self {
        TransferBuffer {
            bytes: Bytes::copy_from_slice(data),
        }
    }

    /// Move the bytes out, leaving an empty placeholder behind.
    pub fn take(&mut self) -> Bytes {
        std::mem::take(&mut self.bytes)
    }

    pub fn restore(&mut self, bytes: Bytes) {
        self.bytes = bytes;
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn into_bytes(self) -> Bytes {
        self.bytes
    }
}

/// Values that can carry transferable buffers next to their serialized body.
///
/// Implementations must detach and attach buffers in the same order.
pub trait Transferable {
    fn detach_buffers(&mut self) -> Vec<Bytes> {
        Vec::new()
    }

    fn attach_buffers(&mut self, buffers: Vec<Bytes>) -> Result<(), TransferError> {
        expect_buffers(&buffers, 0)
    }
}

/// Check that a value received exactly `expected` buffers.
pub fn expect_buffers(buffers: &[Bytes], expected: usize) -> Result<(), TransferError> {
    if buffers.len() == expected {
        Ok(())
    } else {
        Err(TransferError::BufferCount {
            expected,
            actual: buffers.len(),
        })
    }
}

impl Transferable for () {}
impl Transferable for bool {}
impl Transferable for u32 {}
impl Transferable for u64 {}
impl Transferable for String {}
impl Transferable for Vec<String> {}
impl Transferable for Vec<u64> {}
impl<T: Transferable> Transferable for Option<T> {
    fn detach_buffers(&mut self) -> Vec<Bytes> {
        self.as_mut().map(T::detach_buffers).unwrap_or_default()
    }

    fn attach_buffers(&mut self, buffers: Vec<Bytes>) -> Result<(), TransferError> {
        match self {
            Some(value) => value.attach_buffers(buffers),
            None => expect_buffers(&buffers, 0),
        }
    }
}

impl Transferable for TransferBuffer {
    fn detach_buffers(&mut self) -> Vec<Bytes> {
        vec![self.take()]
    }

    fn attach_buffers(&mut self, mut buffers: Vec<Bytes>) -> Result<(), TransferError> {
        expect_buffers(&buffers, 1)?;
        if let Some(bytes) = buffers.pop() {
            self.restore(bytes);
        }
        Ok(())
    }
}

/// Transport-safe form of a request or response value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Payload {
    pub data: Bytes,
    pub buffers: Vec<Bytes>,
}

impl Payload {
    /// Encode `value`, moving its transferable buffers into the payload.
    pub fn encode<T>(mut value: T) -> Result<Self, TransferError>
    where
        T: Serialize + Transferable,
    {
        let buffers = value.detach_buffers();
        let data = bincode::serialize(&value).map_err(|e| TransferError::Encode(e.to_string()))?;
        Ok(Payload {
            data: Bytes::from(data),
            buffers,
        })
    }

    /// Decode a value, handing the side buffers back to it.
    pub fn decode<T>(self) -> Result<T, TransferError>
    where
        T: DeserializeOwned + Transferable,
    {
        let mut value: T = bincode::deserialize(&self.data)?;
        value.attach_buffers(self.buffers)?;
        Ok(value)
    }

    /// Total bytes carried, body and buffers together.
    pub fn byte_len(&self) -> usize {
        self.data.len() + self.buffers.iter().map(Bytes::len).sum::<usize>()
    }
}
