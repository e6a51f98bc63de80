//! Document codec: the boundary between materialized documents and the
//! opaque blobs stored in checkpoints.
//!
//! The version graph never looks inside a checkpoint blob except through a
//! codec. Any format can be plugged in; [`CborCodec`] is the default.

use crate::canonical::{canonical_value_bytes, decode_value};
use crate::error::CoreError;
use crate::value::Document;

/// Serializes whole documents to blobs and back.
pub trait DocumentCodec: Send + Sync {
    /// Encode a document to a checkpoint blob.
    fn encode(&self, document: &Document) -> Result<Vec<u8>, CoreError>;

    /// Decode a checkpoint blob.
    ///
    /// Any failure here is reported by the engine as corruption of the
    /// checkpoint that held the blob.
    fn decode(&self, bytes: &[u8]) -> Result<Document, CoreError>;
}

/// Deterministic CBOR codec.
///
/// Equal documents encode to equal bytes, so checkpoint ids are stable.
#[derive(Debug, Clone, Copy, Default)]
pub struct CborCodec;

impl DocumentCodec for CborCodec {
    fn encode(&self, document: &Document) -> Result<Vec<u8>, CoreError> {
        Ok(canonical_value_bytes(document))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Document, CoreError> {
        decode_value(bytes)
    }
}

impl<C: DocumentCodec + ?Sized> DocumentCodec for &C {
    fn encode(&self, document: &Document) -> Result<Vec<u8>, CoreError> {
        (**self).encode(document)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Document, CoreError> {
        (**self).decode(bytes)
    }
}
