//! Binary shard codec.
//!
//! A shard is serialized with `rkyv` into a single self-describing
//! buffer: strings are length-prefixed, vectors are stored behind
//! relative offsets, and symbol ids land as fixed 8-byte
//! little-endian words. Serialization is deterministic, so the same
//! logical shard produces identical bytes on every host.
//!
//! [`verify`] walks the buffer bounds before any field is read; a
//! buffer that fails the walk is rejected as [`CodecError::Malformed`]
//! and no partial decode is exposed.

use rkyv::rancor;
use rkyv::util::AlignedVec;

use crate::models::{ArchivedShard, Shard};

/// Codec failures. `Malformed` covers every verification failure on
/// the read path.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("malformed shard buffer: {0}")]
    Malformed(String),
    #[error("shard encode failed: {0}")]
    Encode(String),
}

/// Serialize a shard into its on-disk byte form.
pub fn encode(shard: &Shard) -> Result<AlignedVec, CodecError> {
    rkyv::to_bytes::<rancor::Error>(shard).map_err(|err| CodecError::Encode(err.to_string()))
}

/// Bounds-check a serialized shard without decoding it.
pub fn verify(bytes: &[u8]) -> Result<(), CodecError> {
    let aligned = realign(bytes);
    rkyv::access::<ArchivedShard, rancor::Error>(&aligned)
        .map(|_| ())
        .map_err(|err| CodecError::Malformed(err.to_string()))
}

/// Verify and decode a serialized shard into its owned logical form.
pub fn decode(bytes: &[u8]) -> Result<Shard, CodecError> {
    let aligned = realign(bytes);
    let archived = rkyv::access::<ArchivedShard, rancor::Error>(&aligned)
        .map_err(|err| CodecError::Malformed(err.to_string()))?;
    rkyv::deserialize::<Shard, rancor::Error>(archived)
        .map_err(|err| CodecError::Malformed(err.to_string()))
}

// Buffers arrive from arbitrary readers; archive access requires the
// root to sit at its natural alignment.
fn realign(bytes: &[u8]) -> AlignedVec {
    let mut aligned = AlignedVec::with_capacity(bytes.len());
    aligned.extend_from_slice(bytes);
    aligned
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        Comment, CommentGroup, CommentGroups, CommentKind, CommentStyle, CompletionItem,
        CrossSymbol, ExtendEntry, ExtendItem, Position, Range, Ref, RefEntry, RefKind, Relation,
        RelationKind, Symbol, SymbolKind,
    };

    fn sample_range(uri: &str) -> Range {
        Range {
            begin: Position {
                file_id: 1,
                line: 3,
                column: 7,
            },
            end: Position {
                file_id: 1,
                line: 3,
                column: 12,
            },
            file_uri: uri.to_string(),
        }
    }

    fn sample_shard() -> Shard {
        let mut shard = Shard::new("demo.pkg", "h1");
        shard.symbols.push(Symbol {
            id: 0x42,
            name: "parseConfig".to_string(),
            scope: "demo.pkg:".to_string(),
            kind: SymbolKind::Function,
            sub_kind: 2,
            language: 1,
            properties: 0x10,
            location: sample_range("file:///demo/config.cj"),
            declaration: sample_range("file:///demo/config.cj"),
            signature: "(path: String)".to_string(),
            return_type: "Config".to_string(),
            documentation: "Parses the workspace config.".to_string(),
            completion_items: vec![CompletionItem {
                label: "parseConfig".to_string(),
                insert_text: "parseConfig(${1:path})".to_string(),
            }],
            comments: CommentGroups {
                leading: vec![CommentGroup {
                    comments: vec![Comment {
                        style: CommentStyle::Doc,
                        kind: CommentKind::Ordinary,
                        text: "Parses the workspace config.".to_string(),
                    }],
                }],
                ..CommentGroups::default()
            },
            ..Symbol::default()
        });
        shard.refs.push(RefEntry {
            id: 0x42,
            item: Ref {
                location: sample_range("file:///demo/main.cj"),
                kind: RefKind::Call,
                container: 0x43,
                is_cjo_ref: false,
                is_super: false,
            },
        });
        shard.relations.push(Relation {
            subject: 0x42,
            predicate: RelationKind::BaseOf,
            object: 0x43,
        });
        shard.extends.push(ExtendEntry {
            id: 0x42,
            item: ExtendItem {
                id: 0x44,
                modifier: "public".to_string(),
                interface_name: "ToString".to_string(),
            },
        });
        shard.cross_symbols.push(CrossSymbol {
            id: 0x45,
            name: "bridge".to_string(),
            cross_type: 3,
            container: 0x42,
            container_name: "parseConfig".to_string(),
            location: sample_range("file:///demo/bridge.cj"),
            declaration: sample_range("file:///demo/bridge.cj"),
        });
        shard
    }

    #[test]
    fn encode_decode_round_trips() {
        let shard = sample_shard();
        let bytes = encode(&shard).expect("encode");
        let decoded = decode(&bytes).expect("decode");
        assert_eq!(decoded, shard);
    }

    #[test]
    fn decode_then_encode_is_stable() {
        let shard = sample_shard();
        let first = encode(&shard).expect("encode");
        let decoded = decode(&first).expect("decode");
        let second = encode(&decoded).expect("re-encode");
        assert_eq!(first.as_slice(), second.as_slice());
    }

    #[test]
    fn empty_slabs_round_trip() {
        let shard = Shard::new("empty.pkg", "h0");
        let bytes = encode(&shard).expect("encode");
        verify(&bytes).expect("verify");
        let decoded = decode(&bytes).expect("decode");
        assert!(decoded.symbols.is_empty());
        assert!(decoded.refs.is_empty());
        assert!(decoded.extends.is_empty());
        assert_eq!(decoded.pkg_name, "empty.pkg");
    }

    #[test]
    fn garbage_is_rejected() {
        let garbage = b"not a shard at all";
        assert!(verify(garbage).is_err());
        assert!(decode(garbage).is_err());
    }

    #[test]
    fn truncated_buffer_is_rejected() {
        let shard = sample_shard();
        let bytes = encode(&shard).expect("encode");
        let cut = &bytes[..bytes.len() / 2];
        assert!(decode(cut).is_err());
    }

    #[test]
    fn empty_buffer_is_rejected() {
        assert!(verify(&[]).is_err());
    }
}
