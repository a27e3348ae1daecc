//! Client/forwarder framing: 4-byte little-endian payload length, then the bincode
//! encoding of one [`Message`].

use bincode::Options;
use serde::de::DeserializeOwned;

use crate::protocol::Message;

const LEN_SIZE: usize = 4;
/// Largest payload either side accepts (16 MiB).
pub const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

pub fn encode_frame(msg: &Message) -> Result<Vec<u8>, FrameEncodeError> {
    let payload = bincode::serialize(msg)?;
    let len = u32::try_from(payload.len())
        .ok()
        .filter(|len| *len <= MAX_FRAME_LEN)
        .ok_or(FrameEncodeError::TooLarge)?;
    let mut frame = len.to_le_bytes().to_vec();
    frame.extend(payload);
    Ok(frame)
}

#[derive(Debug, thiserror::Error)]
pub enum FrameEncodeError {
    #[error("encode error: {0}")]
    Encode(#[from] bincode::Error),
    #[error("frame too large")]
    TooLarge,
}

/// Decode a whole buffer with the layout of `bincode::serialize`. Trailing bytes are an error.
pub fn decode_exact<T: DeserializeOwned>(bytes: &[u8]) -> bincode::Result<T> {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .reject_trailing_bytes()
        .deserialize(bytes)
}

/// Total size (header + payload) of the frame at the front of `bytes`, once the header is in.
/// Lets a reader skip a frame whose payload failed to decode.
pub fn frame_len(bytes: &[u8]) -> Option<usize> {
    let header: [u8; LEN_SIZE] = bytes.get(..LEN_SIZE)?.try_into().ok()?;
    Some(LEN_SIZE + u32::from_le_bytes(header) as usize)
}

/// Decode the frame at the front of `bytes`, returning the message and the bytes it used.
/// `NeedMore` means the buffer holds a partial frame; read more and retry.
pub fn decode_frame(bytes: &[u8]) -> Result<(Message, usize), FrameDecodeError> {
    let total = frame_len(bytes).ok_or(FrameDecodeError::NeedMore)?;
    if total - LEN_SIZE > MAX_FRAME_LEN as usize {
        return Err(FrameDecodeError::TooLarge);
    }
    let payload = bytes.get(LEN_SIZE..total).ok_or(FrameDecodeError::NeedMore)?;
    let msg = decode_exact(payload).map_err(FrameDecodeError::Decode)?;
    Ok((msg, total))
}

/// Error decoding a frame (need more bytes, too large, or bincode failure).
#[derive(Debug, thiserror::Error)]
pub enum FrameDecodeError {
    #[error("need more bytes")]
    NeedMore,
    #[error("frame too large")]
    TooLarge,
    #[error("decode error: {0}")]
    Decode(#[from] bincode::Error),
}
