//! Peer wire protocol: the fixed-size handshake and the length-prefixed
//! message framing that follows it.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use grapefruit_models::{GrapefruitError, Id20, InfoHash};
use rand::Rng;
use tokio_util::codec::{Decoder, Encoder};

pub const PROTOCOL: &[u8; 19] = b"BitTorrent protocol";
pub const HANDSHAKE_LEN: usize = 68;
/// Message id of BEP 10 extended messages.
pub const EXTENDED_MESSAGE_ID: u8 = 20;
/// Largest frame accepted from a peer. Metadata pieces are 16 KiB.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

const PEER_ID_PREFIX: &[u8; 8] = b"-GF0001-";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub reserved: [u8; 8],
    pub info_hash: InfoHash,
    pub peer_id: [u8; 20],
}

impl Handshake {
    /// Handshake advertising the extension protocol.
    pub fn new(info_hash: InfoHash, peer_id: [u8; 20]) -> Self {
        let mut reserved = [0u8; 8];
        reserved[5] |= 0x10;
        Self { reserved, info_hash, peer_id }
    }

    pub fn supports_extensions(&self) -> bool {
        self.reserved[5] & 0x10 != 0
    }

    pub fn to_bytes(&self) -> [u8; HANDSHAKE_LEN] {
        let mut out = [0u8; HANDSHAKE_LEN];
        out[0] = PROTOCOL.len() as u8;
        out[1..20].copy_from_slice(PROTOCOL);
        out[20..28].copy_from_slice(&self.reserved);
        out[28..48].copy_from_slice(self.info_hash.as_bytes());
        out[48..68].copy_from_slice(&self.peer_id);
        out
    }

    pub fn parse(bytes: &[u8; HANDSHAKE_LEN]) -> Result<Self, GrapefruitError> {
        if bytes[0] as usize != PROTOCOL.len() || &bytes[1..20] != PROTOCOL {
            return Err(GrapefruitError::Protocol { reason: "not a BitTorrent handshake".to_string() });
        }
        let mut reserved = [0u8; 8];
        reserved.copy_from_slice(&bytes[20..28]);
        let info_hash = Id20::from_bytes(&bytes[28..48])?;
        let mut peer_id = [0u8; 20];
        peer_id.copy_from_slice(&bytes[48..68]);
        Ok(Self { reserved, info_hash, peer_id })
    }
}

pub fn generate_peer_id() -> [u8; 20] {
    let mut id = [0u8; 20];
    id[..8].copy_from_slice(PEER_ID_PREFIX);
    rand::thread_rng().fill(&mut id[8..]);
    id
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerMessage {
    KeepAlive,
    /// BEP 10 message; `id` is the extension id, 0 for the extended handshake.
    Extended { id: u8, payload: Bytes },
    /// Any other message. The metadata exchange has no use for them.
    Other { id: u8, payload: Bytes },
}

#[derive(Debug, Clone)]
pub struct PeerCodec {
    max_frame_len: usize,
}

impl Default for PeerCodec {
    fn default() -> Self {
        Self { max_frame_len: MAX_FRAME_LEN }
    }
}

impl Decoder for PeerCodec {
    type Item = PeerMessage;
    type Error = GrapefruitError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < 4 {
            return Ok(None);
        }
        let len = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if len > self.max_frame_len {
            return Err(GrapefruitError::Protocol {
                reason: format!("frame of {} bytes exceeds limit of {}", len, self.max_frame_len),
            });
        }
        if src.len() < 4 + len {
            src.reserve(4 + len - src.len());
            return Ok(None);
        }

        src.advance(4);
        if len == 0 {
            return Ok(Some(PeerMessage::KeepAlive));
        }

        let mut frame = src.split_to(len);
        let id = frame.get_u8();
        if id == EXTENDED_MESSAGE_ID {
            if frame.is_empty() {
                return Err(GrapefruitError::Protocol { reason: "empty extended message".to_string() });
            }
            let ext_id = frame.get_u8();
            return Ok(Some(PeerMessage::Extended { id: ext_id, payload: frame.freeze() }));
        }
        Ok(Some(PeerMessage::Other { id, payload: frame.freeze() }))
    }
}

impl Encoder<PeerMessage> for PeerCodec {
    type Error = GrapefruitError;

    fn encode(&mut self, item: PeerMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            PeerMessage::KeepAlive => dst.put_u32(0),
            PeerMessage::Extended { id, payload } => {
                dst.reserve(6 + payload.len());
                dst.put_u32((payload.len() + 2) as u32);
                dst.put_u8(EXTENDED_MESSAGE_ID);
                dst.put_u8(id);
                dst.put_slice(&payload);
            }
            PeerMessage::Other { id, payload } => {
                dst.reserve(5 + payload.len());
                dst.put_u32((payload.len() + 1) as u32);
                dst.put_u8(id);
                dst.put_slice(&payload);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_layout() {
        let hs = Handshake::new(Id20::new([3; 20]), generate_peer_id());
        let bytes = hs.to_bytes();
        assert_eq!(bytes[0], 19);
        assert_eq!(&bytes[1..20], PROTOCOL);
        assert_eq!(bytes[25], 0x10);
        assert_eq!(&bytes[48..56], PEER_ID_PREFIX);

        let parsed = Handshake::parse(&bytes).unwrap();
        assert!(parsed.supports_extensions());
        assert_eq!(parsed, hs);
    }

    #[test]
    fn test_handshake_rejects_other_protocols() {
        let mut bytes = Handshake::new(Id20::new([3; 20]), [0; 20]).to_bytes();
        bytes[1] = b'X';
        assert!(Handshake::parse(&bytes).is_err());
    }

    #[test]
    fn test_codec_waits_for_full_frame() {
        let mut codec = PeerCodec::default();
        let mut buf = BytesMut::new();
        codec
            .encode(PeerMessage::Extended { id: 0, payload: Bytes::from_static(b"de") }, &mut buf)
            .unwrap();
        codec.encode(PeerMessage::KeepAlive, &mut buf).unwrap();

        let mut partial = buf.split_to(5);
        assert_eq!(codec.decode(&mut partial).unwrap(), None);
        partial.unsplit(buf);

        assert_eq!(
            codec.decode(&mut partial).unwrap(),
            Some(PeerMessage::Extended { id: 0, payload: Bytes::from_static(b"de") })
        );
        assert_eq!(codec.decode(&mut partial).unwrap(), Some(PeerMessage::KeepAlive));
        assert!(partial.is_empty());
    }

    #[test]
    fn test_codec_rejects_oversized_frames() {
        let mut codec = PeerCodec::default();
        let mut buf = BytesMut::new();
        buf.put_u32((MAX_FRAME_LEN + 1) as u32);
        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn test_codec_passes_through_other_messages() {
        let mut codec = PeerCodec::default();
        let mut buf = BytesMut::from(&[0u8, 0, 0, 3, 5, 0xff, 0x00][..]);
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(PeerMessage::Other { id: 5, payload: Bytes::from_static(&[0xff, 0x00]) })
        );
    }
}
