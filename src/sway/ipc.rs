//! i3-ipc wire framing.
//!
//! Every message is `"i3-ipc" | u32 length | u32 type | payload`, with the
//! integers in native byte order.  Replies carry the type of the request;
//! events have the high bit set.

use log::trace;
use std::path::PathBuf;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::UnixStream;

pub const MAGIC: &[u8; 6] = b"i3-ipc";
pub const HEADER_LEN: usize = 14;

/// Replies larger than this are treated as a corrupt stream.
const MAX_PAYLOAD: usize = 64 * 1024 * 1024;

/// Request message types.
pub mod msg {
    pub const RUN_COMMAND: u32 = 0;
    pub const GET_WORKSPACES: u32 = 1;
    pub const SUBSCRIBE: u32 = 2;
    pub const GET_OUTPUTS: u32 = 3;
    pub const GET_TREE: u32 = 4;
}

/// Event message types.
pub mod event {
    pub const WORKSPACE: u32 = 0x8000_0000;
    pub const OUTPUT: u32 = 0x8000_0001;
    pub const WINDOW: u32 = 0x8000_0003;
    pub const SHUTDOWN: u32 = 0x8000_0006;

    pub fn is_event(msg_type: u32) -> bool {
        msg_type & 0x8000_0000 != 0
    }
}

/// Errors talking to an i3-ipc compositor.
#[derive(Debug, thiserror::Error)]
pub enum SwayError {
    #[error("neither SWAYSOCK nor I3SOCK is set")]
    NoSocket,
    #[error("connect to {path}: {source}")]
    Connect {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid message magic")]
    BadMagic,
    #[error("message of {0} bytes exceeds the size limit")]
    TooLarge(usize),
    #[error("unexpected reply type {got} (expected {expected})")]
    UnexpectedReply { expected: u32, got: u32 },
    #[error("malformed reply: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("command failed: {0}")]
    Command(String),
    #[error("subscription refused")]
    SubscribeRefused,
    #[error("compositor is shutting down")]
    Shutdown,
}

/// Socket path from `SWAYSOCK`, falling back to `I3SOCK`.
pub fn socket_path() -> Result<PathBuf, SwayError> {
    std::env::var_os("SWAYSOCK")
        .or_else(|| std::env::var_os("I3SOCK"))
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .ok_or(SwayError::NoSocket)
}

/// Frame one message.
pub fn encode(msg_type: u32, payload: &[u8]) -> Vec<u8> {
    let mut message = Vec::with_capacity(HEADER_LEN + payload.len());
    message.extend_from_slice(MAGIC);
    message.extend_from_slice(&(payload.len() as u32).to_ne_bytes());
    message.extend_from_slice(&msg_type.to_ne_bytes());
    message.extend_from_slice(payload);
    message
}

/// Split a header into `(payload length, message type)`.
pub fn decode_header(header: &[u8; HEADER_LEN]) -> Result<(usize, u32), SwayError> {
    if &header[..6] != MAGIC {
        return Err(SwayError::BadMagic);
    }
    let length = u32::from_ne_bytes([header[6], header[7], header[8], header[9]]) as usize;
    let msg_type = u32::from_ne_bytes([header[10], header[11], header[12], header[13]]);
    if length > MAX_PAYLOAD {
        return Err(SwayError::TooLarge(length));
    }
    Ok((length, msg_type))
}

pub async fn write_message<W>(writer: &mut W, msg_type: u32, payload: &[u8]) -> Result<(), SwayError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&encode(msg_type, payload)).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn read_message<R>(reader: &mut R) -> Result<(u32, Vec<u8>), SwayError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    reader.read_exact(&mut header).await?;
    let (length, msg_type) = decode_header(&header)?;
    let mut payload = vec![0u8; length];
    if length > 0 {
        reader.read_exact(&mut payload).await?;
    }
    trace!("received message type {:#x} ({} bytes)", msg_type, length);
    Ok((msg_type, payload))
}

/// One socket connection.
pub struct Connection {
    stream: UnixStream,
}

impl Connection {
    pub async fn connect(path: &PathBuf) -> Result<Self, SwayError> {
        let stream = UnixStream::connect(path)
            .await
            .map_err(|source| SwayError::Connect {
                path: path.clone(),
                source,
            })?;
        Ok(Self { stream })
    }

    /// Send a request and wait for its reply, skipping any events that
    /// arrive first.
    pub async fn request(&mut self, msg_type: u32, payload: &[u8]) -> Result<Vec<u8>, SwayError> {
        write_message(&mut self.stream, msg_type, payload).await?;
        loop {
            let (got, reply) = read_message(&mut self.stream).await?;
            if got == msg_type {
                return Ok(reply);
            }
            if !event::is_event(got) {
                return Err(SwayError::UnexpectedReply {
                    expected: msg_type,
                    got,
                });
            }
        }
    }

    /// Next message of any type.
    pub async fn next_message(&mut self) -> Result<(u32, Vec<u8>), SwayError> {
        read_message(&mut self.stream).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_layout() {
        let frame = encode(msg::GET_TREE, b"");
        assert_eq!(frame.len(), HEADER_LEN);
        assert_eq!(&frame[..6], b"i3-ipc");
        let header: [u8; HEADER_LEN] = frame[..HEADER_LEN].try_into().unwrap();
        assert_eq!(decode_header(&header).unwrap(), (0, msg::GET_TREE));
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut header = [0u8; HEADER_LEN];
        header[..6].copy_from_slice(b"i3-ipx");
        assert!(matches!(decode_header(&header), Err(SwayError::BadMagic)));
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let mut frame = encode(msg::GET_TREE, b"");
        frame[6..10].copy_from_slice(&u32::MAX.to_ne_bytes());
        let header: [u8; HEADER_LEN] = frame[..HEADER_LEN].try_into().unwrap();
        assert!(matches!(decode_header(&header), Err(SwayError::TooLarge(_))));
    }

    #[test]
    fn event_bit() {
        assert!(event::is_event(event::WINDOW));
        assert!(!event::is_event(msg::SUBSCRIBE));
    }

    #[tokio::test]
    async fn write_then_read_over_a_pipe() {
        let (mut a, mut b) = tokio::io::duplex(256);
        write_message(&mut a, msg::RUN_COMMAND, b"workspace number 3")
            .await
            .unwrap();
        let (msg_type, payload) = read_message(&mut b).await.unwrap();
        assert_eq!(msg_type, msg::RUN_COMMAND);
        assert_eq!(payload, b"workspace number 3");
    }

    #[tokio::test]
    async fn request_skips_interleaved_events() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sway.sock");
        let listener = tokio::net::UnixListener::bind(&path).unwrap();
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let (msg_type, _) = read_message(&mut stream).await.unwrap();
            write_message(&mut stream, event::WINDOW, b"{}").await.unwrap();
            write_message(&mut stream, msg_type, b"[]").await.unwrap();
        });

        let mut conn = Connection::connect(&path).await.unwrap();
        let reply = conn.request(msg::GET_WORKSPACES, b"").await.unwrap();
        assert_eq!(reply, b"[]");
        server.await.unwrap();
    }
}
