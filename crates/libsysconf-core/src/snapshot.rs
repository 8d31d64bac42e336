//! Snapshot buffer encoding, validation and expansion
//!
//! Buffer format (all header fields big-endian):
//! - Version: u32
//! - Kind: u32 (see `Service::kind`)
//! - Generation: u64
//! - Attribute length: u32
//! - Padding length: u32
//! - Attributes: CBOR document of the payload type
//! - Padding: zero-filled, allocated by the receiver only
//!
//! Size checks are fatal (`CorruptSnapshot`). Anything wrong with the
//! content once the sizes agree (version, kind, undecodable attributes) is a
//! soft miss and expands to `None`.

use std::ops::Deref;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{CoreError, CorruptSnapshot};
use crate::service::Service;

/// Current snapshot format version
pub const SNAPSHOT_VERSION: u32 = 1;

/// Size of the fixed header in bytes
pub const HEADER_SIZE: usize = 24;

/// Maximum size of a snapshot buffer, padding included
pub const MAX_BUFFER_SIZE: usize = 1024 * 1024;

const VERSION_OFFSET: usize = 0;
const KIND_OFFSET: usize = 4;
const GENERATION_OFFSET: usize = 8;
const ATTRIBUTE_LENGTH_OFFSET: usize = 16;
const PADDING_LENGTH_OFFSET: usize = 20;

/// A payload that can be published as a snapshot
pub trait SnapshotPayload: Serialize + DeserializeOwned {
    /// The service this payload is published under
    const SERVICE: Service;

    /// Bytes of zero padding the receiver should reserve after the attributes
    fn padding_hint(&self) -> u32 {
        0
    }

    /// Structural checks run after decoding; `false` is treated as no data
    fn is_consistent(&self) -> bool {
        true
    }
}

/// Header fields of a buffer that passed size validation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedHeader {
    pub version: u32,
    pub kind: u32,
    pub generation: u64,
    pub attribute_length: u32,
    pub padding_length: u32,
}

impl ParsedHeader {
    /// Length of header plus attributes, as received
    pub fn payload_len(&self) -> usize {
        HEADER_SIZE + self.attribute_length as usize
    }

    /// Length of the in-memory buffer, padding included
    pub fn buffer_len(&self) -> usize {
        self.payload_len() + self.padding_length as usize
    }
}

/// Validate the sizes declared by a received buffer.
///
/// The checks run in a fixed order and nothing else is read from the buffer
/// until all of them pass.
pub fn validate(raw: &[u8]) -> Result<ParsedHeader, CorruptSnapshot> {
    let received = raw.len();
    if !(HEADER_SIZE..=MAX_BUFFER_SIZE).contains(&received) {
        return Err(CorruptSnapshot::Length {
            len: received,
            min: HEADER_SIZE,
            max: MAX_BUFFER_SIZE,
        });
    }

    let attribute_length = read_u32(raw, ATTRIBUTE_LENGTH_OFFSET);
    let padding_length = read_u32(raw, PADDING_LENGTH_OFFSET);

    let declared = HEADER_SIZE + attribute_length as usize;
    if declared != received {
        return Err(CorruptSnapshot::AttributeLength { declared, received });
    }

    let available = MAX_BUFFER_SIZE - received;
    if padding_length as usize > available {
        return Err(CorruptSnapshot::Padding {
            padding: padding_length as usize,
            available,
        });
    }

    let buffer_len = received + padding_length as usize;
    if buffer_len > MAX_BUFFER_SIZE {
        return Err(CorruptSnapshot::BufferLength {
            len: buffer_len,
            max: MAX_BUFFER_SIZE,
        });
    }

    Ok(ParsedHeader {
        version: read_u32(raw, VERSION_OFFSET),
        kind: read_u32(raw, KIND_OFFSET),
        generation: read_u64(raw, GENERATION_OFFSET),
        attribute_length,
        padding_length,
    })
}

/// Interpret validated bytes as a payload of type `T`.
///
/// Returns `None` when the format version or kind is not understood or the
/// attributes do not decode.
pub fn expand<T: SnapshotPayload>(header: &ParsedHeader, bytes: &[u8]) -> Option<T> {
    if header.version != SNAPSHOT_VERSION || header.kind != T::SERVICE.kind() {
        return None;
    }
    let attributes = bytes.get(HEADER_SIZE..header.payload_len())?;
    let payload: T = ciborium::from_reader(attributes).ok()?;
    payload.is_consistent().then_some(payload)
}

/// Encode a payload into the wire form of a snapshot (no padding bytes)
pub fn encode<T: SnapshotPayload>(generation: u64, payload: &T) -> Result<Vec<u8>, CoreError> {
    let mut attributes = Vec::new();
    ciborium::into_writer(payload, &mut attributes)
        .map_err(|e| CoreError::Encode(format!("Failed to encode snapshot: {}", e)))?;

    let size = HEADER_SIZE + attributes.len();
    let padding = payload.padding_hint() as usize;
    if size + padding > MAX_BUFFER_SIZE {
        return Err(CoreError::SnapshotTooLarge {
            size: size + padding,
            max: MAX_BUFFER_SIZE,
        });
    }

    let mut buf = Vec::with_capacity(size);
    buf.extend_from_slice(&SNAPSHOT_VERSION.to_be_bytes());
    buf.extend_from_slice(&T::SERVICE.kind().to_be_bytes());
    buf.extend_from_slice(&generation.to_be_bytes());
    buf.extend_from_slice(&(attributes.len() as u32).to_be_bytes());
    buf.extend_from_slice(&(padding as u32).to_be_bytes());
    buf.extend_from_slice(&attributes);
    Ok(buf)
}

fn read_u32(raw: &[u8], offset: usize) -> u32 {
    let mut field = [0u8; 4];
    field.copy_from_slice(&raw[offset..offset + 4]);
    u32::from_be_bytes(field)
}

fn read_u64(raw: &[u8], offset: usize) -> u64 {
    let mut field = [0u8; 8];
    field.copy_from_slice(&raw[offset..offset + 8]);
    u64::from_be_bytes(field)
}

/// A received snapshot, copied into a buffer of its own with the requested
/// padding zero-filled
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotBuffer {
    header: ParsedHeader,
    bytes: Vec<u8>,
}

impl SnapshotBuffer {
    /// Validate received bytes and copy them into an owned, padded buffer
    pub fn copy_from_wire(raw: &[u8]) -> Result<Self, CorruptSnapshot> {
        let header = validate(raw)?;
        let mut bytes = Vec::with_capacity(header.buffer_len());
        bytes.extend_from_slice(raw);
        bytes.resize(header.buffer_len(), 0);
        Ok(Self { header, bytes })
    }

    pub fn header(&self) -> &ParsedHeader {
        &self.header
    }

    pub fn generation(&self) -> u64 {
        self.header.generation
    }

    /// The attribute bytes
    pub fn attributes(&self) -> &[u8] {
        &self.bytes[HEADER_SIZE..self.header.payload_len()]
    }

    /// The zero-filled padding region
    pub fn padding(&self) -> &[u8] {
        &self.bytes[self.header.payload_len()..]
    }

    /// The whole buffer, padding included
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Expand into a typed snapshot, or `None` if the content is not understood
    pub fn expand<T: SnapshotPayload>(self) -> Option<Snapshot<T>> {
        let payload = expand::<T>(&self.header, &self.bytes)?;
        Some(Snapshot {
            generation: self.header.generation,
            payload,
            buffer: self,
        })
    }
}

/// An immutable, generation-numbered copy of a service's configuration
#[derive(Debug, Clone)]
pub struct Snapshot<T> {
    generation: u64,
    payload: T,
    buffer: SnapshotBuffer,
}

impl<T> Snapshot<T> {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn payload(&self) -> &T {
        &self.payload
    }

    pub fn buffer(&self) -> &SnapshotBuffer {
        &self.buffer
    }

    pub fn into_payload(self) -> T {
        self.payload
    }
}

impl<T> Deref for Snapshot<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.payload
    }
}
