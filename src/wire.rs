//! Wire-format envelope
//!
//! Every message is prefixed with a 5-byte header binding the payload to a
//! schema in the registry:
//!
//! ```text
//! +-------+----------------------------+------------------------+
//! | 0x00  | schema id (u32 big-endian) | Avro-encoded payload   |
//! +-------+----------------------------+------------------------+
//!  byte 0   bytes 1..5                   bytes 5..
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{RegistryError, Result};
use crate::schema::SchemaId;

/// Reserved leading byte of every envelope
pub const MAGIC_BYTE: u8 = 0x00;

/// Length of the envelope header
pub const HEADER_LEN: usize = 5;

/// Prefix `payload` with the envelope for `schema_id`
pub fn encode(schema_id: SchemaId, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
    buf.put_u8(MAGIC_BYTE);
    buf.put_u32(schema_id);
    buf.put_slice(payload);
    buf.freeze()
}

/// Split a message into its schema ID and payload
///
/// The payload is returned as a view into `message`.
pub fn decode(message: &[u8]) -> Result<(SchemaId, &[u8])> {
    if message.len() < HEADER_LEN {
        return Err(RegistryError::MalformedWireFormat(format!(
            "message is {} bytes, must be at least {}",
            message.len(),
            HEADER_LEN
        )));
    }
    if message[0] != MAGIC_BYTE {
        return Err(RegistryError::MalformedWireFormat(format!(
            "invalid magic byte: expected 0x{:02x}, got 0x{:02x}",
            MAGIC_BYTE, message[0]
        )));
    }

    let mut id_bytes = &message[1..HEADER_LEN];
    let schema_id = id_bytes.get_u32();
    Ok((schema_id, &message[HEADER_LEN..]))
}
