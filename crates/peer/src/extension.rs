//! BEP 10 extended handshake and BEP 9 `ut_metadata` messages.

use bytes::Bytes;
use grapefruit_krpc::{bencode, Value};
use grapefruit_models::GrapefruitError;

/// Extension id of the extended handshake itself.
pub const HANDSHAKE_EXT_ID: u8 = 0;
/// Id we advertise for `ut_metadata`; peers address their replies to it.
pub const UT_METADATA_LOCAL_ID: u8 = 1;
pub const METADATA_PIECE_SIZE: usize = 16 * 1024;

const CLIENT_VERSION: &str = "Grapefruit 0.1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerExtensions {
    /// Id the remote peer wants `ut_metadata` requests sent to.
    pub ut_metadata: u8,
    pub metadata_size: usize,
}

pub fn extended_handshake() -> Bytes {
    Value::dict()
        .insert("m", Value::dict().insert("ut_metadata", Value::Int(UT_METADATA_LOCAL_ID as i64)).build())
        .insert("v", Value::bytes(CLIENT_VERSION))
        .build()
        .to_bytes()
        .into()
}

pub fn parse_extended_handshake(payload: &[u8], max_metadata_bytes: usize) -> Result<PeerExtensions, GrapefruitError> {
    let value = bencode::decode(payload)?;
    let ut_metadata = value
        .get("m")
        .and_then(|m| m.get_int("ut_metadata"))
        .filter(|id| (1..=255).contains(id))
        .ok_or_else(|| protocol("peer does not support ut_metadata"))? as u8;
    let metadata_size = value
        .get_int("metadata_size")
        .ok_or_else(|| protocol("peer did not announce metadata_size"))?;

    if metadata_size <= 0 || metadata_size as u64 > max_metadata_bytes as u64 {
        return Err(protocol(&format!("unacceptable metadata_size {}", metadata_size)));
    }

    Ok(PeerExtensions { ut_metadata, metadata_size: metadata_size as usize })
}

pub fn piece_count(metadata_size: usize) -> usize {
    (metadata_size + METADATA_PIECE_SIZE - 1) / METADATA_PIECE_SIZE
}

/// Expected length of piece `piece` of a metadata blob of `metadata_size` bytes.
pub fn piece_len(metadata_size: usize, piece: usize) -> usize {
    let start = piece * METADATA_PIECE_SIZE;
    METADATA_PIECE_SIZE.min(metadata_size.saturating_sub(start))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataMessage {
    Request { piece: usize },
    Data { piece: usize, total_size: Option<usize>, data: Vec<u8> },
    Reject { piece: usize },
}

impl MetadataMessage {
    pub fn to_bytes(&self) -> Bytes {
        let (msg_type, piece) = match self {
            MetadataMessage::Request { piece } => (0, *piece),
            MetadataMessage::Data { piece, .. } => (1, *piece),
            MetadataMessage::Reject { piece } => (2, *piece),
        };
        let mut dict = Value::dict()
            .insert("msg_type", Value::Int(msg_type))
            .insert("piece", Value::Int(piece as i64));
        if let MetadataMessage::Data { total_size: Some(total), .. } = self {
            dict = dict.insert("total_size", Value::Int(*total as i64));
        }
        let mut out = dict.build().to_bytes();
        if let MetadataMessage::Data { data, .. } = self {
            out.extend_from_slice(data);
        }
        out.into()
    }

    /// Data messages carry raw piece bytes right after the bencoded dictionary.
    pub fn parse(payload: &[u8]) -> Result<Self, GrapefruitError> {
        let (header, used) = bencode::decode_prefix(payload)?;
        let msg_type = header.get_int("msg_type").ok_or_else(|| protocol("missing msg_type"))?;
        let piece = header
            .get_int("piece")
            .filter(|p| *p >= 0)
            .ok_or_else(|| protocol("missing piece index"))? as usize;

        match msg_type {
            0 => Ok(MetadataMessage::Request { piece }),
            1 => Ok(MetadataMessage::Data {
                piece,
                total_size: header.get_int("total_size").filter(|t| *t >= 0).map(|t| t as usize),
                data: payload[used..].to_vec(),
            }),
            2 => Ok(MetadataMessage::Reject { piece }),
            other => Err(protocol(&format!("unknown ut_metadata msg_type {}", other))),
        }
    }
}

fn protocol(reason: &str) -> GrapefruitError {
    GrapefruitError::Protocol { reason: reason.to_string() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extended_handshake_advertises_ut_metadata() {
        let value = bencode::decode(&extended_handshake()).unwrap();
        assert_eq!(value.get("m").and_then(|m| m.get_int("ut_metadata")), Some(1));
    }

    #[test]
    fn test_parse_peer_handshake() {
        let payload = b"d1:md11:ut_metadatai3ee13:metadata_sizei31235ee";
        let ext = parse_extended_handshake(payload, 1 << 20).unwrap();
        assert_eq!(ext, PeerExtensions { ut_metadata: 3, metadata_size: 31235 });
    }

    #[test]
    fn test_parse_peer_handshake_limits() {
        assert!(parse_extended_handshake(b"d1:md11:ut_metadatai3ee13:metadata_sizei0ee", 1024).is_err());
        assert!(parse_extended_handshake(b"d1:md11:ut_metadatai3ee13:metadata_sizei2048ee", 1024).is_err());
        assert!(parse_extended_handshake(b"d1:mde13:metadata_sizei10ee", 1024).is_err());
        assert!(parse_extended_handshake(b"d1:md11:ut_metadatai0ee13:metadata_sizei10ee", 1024).is_err());
    }

    #[test]
    fn test_piece_arithmetic() {
        assert_eq!(piece_count(1), 1);
        assert_eq!(piece_count(METADATA_PIECE_SIZE), 1);
        assert_eq!(piece_count(METADATA_PIECE_SIZE + 1), 2);
        assert_eq!(piece_len(METADATA_PIECE_SIZE + 10, 0), METADATA_PIECE_SIZE);
        assert_eq!(piece_len(METADATA_PIECE_SIZE + 10, 1), 10);
    }

    #[test]
    fn test_data_message_keeps_trailing_bytes() {
        let msg = MetadataMessage::Data { piece: 2, total_size: Some(40000), data: b"d4:name".to_vec() };
        let parsed = MetadataMessage::parse(&msg.to_bytes()).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn test_reject_and_request() {
        assert_eq!(
            MetadataMessage::parse(b"d8:msg_typei2e5:piecei4ee").unwrap(),
            MetadataMessage::Reject { piece: 4 }
        );
        assert_eq!(
            MetadataMessage::parse(&MetadataMessage::Request { piece: 0 }.to_bytes()).unwrap(),
            MetadataMessage::Request { piece: 0 }
        );
        assert!(MetadataMessage::parse(b"d8:msg_typei9e5:piecei0ee").is_err());
    }
}
