//! Frame layer: header bytes, a little-endian `u32` payload length, payload.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{
    decode_header, NodePacketType, PacketHeader, ProtocolError, Result, FRAME_LENGTH_SIZE,
    MAX_PAYLOAD_SIZE,
};

/// One packet as it travels between processes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: PacketHeader,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(header: PacketHeader, payload: Bytes) -> Self {
        Self { header, payload }
    }

    pub fn packet_type(&self) -> NodePacketType {
        self.header.packet_type()
    }

    pub fn encoded_len(&self) -> usize {
        self.header.encoded_len() + FRAME_LENGTH_SIZE + self.payload.len()
    }
}

pub fn encode_frame(frame: &Frame, buf: &mut BytesMut) -> Result<()> {
    let len = u32::try_from(frame.payload.len()).map_err(|_| ProtocolError::PayloadTooLarge {
        size: frame.payload.len(),
        limit: u32::MAX as usize,
    })?;
    buf.reserve(frame.encoded_len());
    frame.header.encode(buf);
    buf.put_u32_le(len);
    buf.put_slice(&frame.payload);
    Ok(())
}

/// Take one complete frame off the front of `buf`.
///
/// Returns `Ok(None)` and leaves `buf` untouched while the frame is still
/// incomplete.
pub fn decode_frame(buf: &mut BytesMut) -> Result<Option<Frame>> {
    let Some(&first) = buf.first() else {
        return Ok(None);
    };
    let header_len = if decode_header(first).1 { 2 } else { 1 };
    if buf.len() < header_len + FRAME_LENGTH_SIZE {
        return Ok(None);
    }

    let mut peek = &buf[header_len..header_len + FRAME_LENGTH_SIZE];
    let payload_len = peek.get_u32_le() as usize;
    if payload_len > MAX_PAYLOAD_SIZE {
        return Err(ProtocolError::PayloadTooLarge {
            size: payload_len,
            limit: MAX_PAYLOAD_SIZE,
        });
    }
    if buf.len() < header_len + FRAME_LENGTH_SIZE + payload_len {
        return Ok(None);
    }

    let header = PacketHeader::decode(&mut &buf[..header_len])?;
    buf.advance(header_len + FRAME_LENGTH_SIZE);
    let payload = buf.split_to(payload_len).freeze();
    Ok(Some(Frame::new(header, payload)))
}

pub async fn write_packet<W>(writer: &mut W, frame: &Frame) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut buf = BytesMut::new();
    encode_frame(frame, &mut buf)?;
    writer.write_all(&buf).await?;
    writer.flush().await?;
    tracing::trace!(packet_type = %frame.packet_type(), bytes = buf.len(), "Packet written");
    Ok(())
}

/// Read the next frame, or `None` on a clean end of stream between frames.
pub async fn read_packet<R>(reader: &mut R) -> Result<Option<Frame>>
where
    R: AsyncRead + Unpin,
{
    let first = match reader.read_u8().await {
        Ok(byte) => byte,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let mut header_bytes = vec![first];
    if decode_header(first).1 {
        header_bytes.push(reader.read_u8().await?);
    }
    let header = PacketHeader::decode(&mut header_bytes.as_slice())?;

    let payload_len = reader.read_u32_le().await? as usize;
    if payload_len > MAX_PAYLOAD_SIZE {
        return Err(ProtocolError::PayloadTooLarge {
            size: payload_len,
            limit: MAX_PAYLOAD_SIZE,
        });
    }
    let mut payload = vec![0u8; payload_len];
    reader.read_exact(&mut payload).await?;

    tracing::trace!(packet_type = %header.packet_type(), bytes = payload_len, "Packet read");
    Ok(Some(Frame::new(header, Bytes::from(payload))))
}
