// src/transport/codec.rs
use super::Frames;
use bytes::{Buf, BufMut, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder};

const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;
const COUNT_LEN: usize = 2;
const LEN_PREFIX: usize = 4;

/// `u16` frame count followed by `u32`-length-prefixed frames, all big-endian.
#[derive(Debug, Clone)]
pub struct MultipartCodec {
    max_frame_len: usize,
}

impl Default for MultipartCodec {
    fn default() -> Self {
        Self {
            max_frame_len: MAX_FRAME_LEN,
        }
    }
}

impl MultipartCodec {
    pub fn with_max_frame_len(max_frame_len: usize) -> Self {
        Self { max_frame_len }
    }
}

impl Decoder for MultipartCodec {
    type Item = Frames;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frames>, io::Error> {
        if src.len() < COUNT_LEN {
            return Ok(None);
        }

        let count = u16::from_be_bytes([src[0], src[1]]) as usize;

        // Walk the length prefixes first so nothing is consumed until the whole
        // message has arrived.
        let mut offset = COUNT_LEN;
        for _ in 0..count {
            if src.len() < offset + LEN_PREFIX {
                src.reserve(offset + LEN_PREFIX - src.len());
                return Ok(None);
            }

            let len = u32::from_be_bytes([
                src[offset],
                src[offset + 1],
                src[offset + 2],
                src[offset + 3],
            ]) as usize;

            if len > self.max_frame_len {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("frame of {} bytes exceeds limit of {}", len, self.max_frame_len),
                ));
            }

            offset += LEN_PREFIX + len;
        }

        if src.len() < offset {
            src.reserve(offset - src.len());
            return Ok(None);
        }

        let mut message = src.split_to(offset);
        message.advance(COUNT_LEN);

        let mut frames = Vec::with_capacity(count);
        for _ in 0..count {
            let len = message.get_u32() as usize;
            frames.push(message.split_to(len).freeze());
        }

        Ok(Some(frames))
    }
}

impl Encoder<Frames> for MultipartCodec {
    type Error = io::Error;

    fn encode(&mut self, frames: Frames, dst: &mut BytesMut) -> Result<(), io::Error> {
        let count = u16::try_from(frames.len()).map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidInput, "too many frames in one message")
        })?;

        let body: usize = frames.iter().map(|f| LEN_PREFIX + f.len()).sum();
        dst.reserve(COUNT_LEN + body);
        dst.put_u16(count);

        for frame in frames {
            if frame.len() > self.max_frame_len {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("frame of {} bytes exceeds limit of {}", frame.len(), self.max_frame_len),
                ));
            }
            dst.put_u32(frame.len() as u32);
            dst.put_slice(&frame);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn frames(parts: &[&'static [u8]]) -> Frames {
        parts.iter().map(|p| Bytes::from_static(p)).collect()
    }

    #[test]
    fn test_partial_message_waits_for_more_bytes() {
        let mut codec = MultipartCodec::default();
        let mut encoded = BytesMut::new();
        codec
            .encode(frames(&[b"identity", b"payload"]), &mut encoded)
            .unwrap();

        let mut partial = encoded.split_to(encoded.len() - 3);
        assert!(codec.decode(&mut partial).unwrap().is_none());

        partial.unsplit(encoded);
        let decoded = codec.decode(&mut partial).unwrap().unwrap();
        assert_eq!(decoded, frames(&[b"identity", b"payload"]));
        assert!(partial.is_empty());
    }

    #[test]
    fn test_back_to_back_messages() {
        let mut codec = MultipartCodec::default();
        let mut buf = BytesMut::new();
        codec.encode(frames(&[b"a"]), &mut buf).unwrap();
        codec.encode(Vec::new(), &mut buf).unwrap();

        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), frames(&[b"a"]));
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), Frames::new());
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_oversized_frame_is_rejected() {
        let mut codec = MultipartCodec::with_max_frame_len(4);
        let mut buf = BytesMut::new();
        buf.put_u16(1);
        buf.put_u32(5);
        buf.put_slice(b"hello");

        let err = codec.decode(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    proptest::proptest! {
        #[test]
        fn prop_decode_survives_arbitrary_chunking(
            messages in proptest::collection::vec(
                proptest::collection::vec(proptest::collection::vec(proptest::num::u8::ANY, 0..64), 0..5),
                1..6,
            ),
            chunk in 1usize..17,
        ) {
            let mut codec = MultipartCodec::default();
            let mut wire = BytesMut::new();
            let expected: Vec<Frames> = messages
                .into_iter()
                .map(|parts| parts.into_iter().map(Bytes::from).collect())
                .collect();
            for message in &expected {
                codec.encode(message.clone(), &mut wire).unwrap();
            }

            let mut buf = BytesMut::new();
            let mut decoded = Vec::new();
            for piece in wire.chunks(chunk) {
                buf.extend_from_slice(piece);
                while let Some(message) = codec.decode(&mut buf).unwrap() {
                    decoded.push(message);
                }
            }

            proptest::prop_assert_eq!(decoded, expected);
            proptest::prop_assert!(buf.is_empty());
        }
    }
}
