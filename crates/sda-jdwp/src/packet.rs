use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::codec::{FLAG_REPLY, HEADER_LEN};
use crate::{JdwpError, Result};

pub const JDWP_HANDSHAKE: &[u8] = b"JDWP-Handshake";
/// Handshake spoken between the agent and the debug proxy.
pub const SDWP_HANDSHAKE: &[u8] = b"SDWP-Handshake";

/// Packets larger than this are treated as a framing error.
const MAX_PACKET_LEN: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Command {
        id: u32,
        command_set: u8,
        command: u8,
        payload: Vec<u8>,
    },
    Reply {
        id: u32,
        error_code: u16,
        payload: Vec<u8>,
    },
}

impl Packet {
    pub fn id(&self) -> u32 {
        match self {
            Packet::Command { id, .. } | Packet::Reply { id, .. } => *id,
        }
    }
}

/// Read one packet. Returns `Ok(None)` on a clean EOF at a packet boundary.
pub async fn read_packet<R>(reader: &mut R) -> Result<Option<Packet>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    match reader.read_exact(&mut header).await {
        Ok(_n) => {}
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err.into()),
    }

    let length = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
    if !(HEADER_LEN..=MAX_PACKET_LEN).contains(&length) {
        return Err(JdwpError::Protocol(format!("invalid packet length {length}")));
    }
    let id = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);
    let flags = header[8];
    let mut payload = vec![0u8; length - HEADER_LEN];
    reader.read_exact(&mut payload).await?;

    if (flags & FLAG_REPLY) != 0 {
        Ok(Some(Packet::Reply {
            id,
            error_code: u16::from_be_bytes([header[9], header[10]]),
            payload,
        }))
    } else {
        Ok(Some(Packet::Command {
            id,
            command_set: header[9],
            command: header[10],
            payload,
        }))
    }
}

/// Server side of the handshake: read the peer's greeting, then echo it.
pub async fn accept_handshake<S>(stream: &mut S, expected: &[u8]) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut hs = vec![0u8; expected.len()];
    stream.read_exact(&mut hs).await?;
    if hs != expected {
        tracing::warn!(target: "sda.jdwp", received = ?String::from_utf8_lossy(&hs), "bad handshake");
        return Err(JdwpError::HandshakeFailed);
    }
    stream.write_all(expected).await?;
    stream.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{encode_command, encode_reply};

    #[tokio::test]
    async fn reads_commands_and_replies() {
        let mut bytes = encode_command(7, 15, 1, &[1, 2, 3]);
        bytes.extend(encode_reply(8, 99, &[]));
        let mut reader = &bytes[..];

        let first = read_packet(&mut reader).await.unwrap().unwrap();
        assert_eq!(
            first,
            Packet::Command {
                id: 7,
                command_set: 15,
                command: 1,
                payload: vec![1, 2, 3],
            }
        );
        let second = read_packet(&mut reader).await.unwrap().unwrap();
        assert_eq!(
            second,
            Packet::Reply {
                id: 8,
                error_code: 99,
                payload: Vec::new(),
            }
        );
        assert!(read_packet(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn short_length_is_rejected() {
        let mut bytes = encode_command(1, 1, 1, &[]);
        bytes[3] = 3;
        let mut reader = &bytes[..];
        assert!(matches!(
            read_packet(&mut reader).await,
            Err(JdwpError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn handshake_echoes_greeting() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let server = tokio::spawn(async move { accept_handshake(&mut server, SDWP_HANDSHAKE).await });
        client.write_all(SDWP_HANDSHAKE).await.unwrap();
        let mut echoed = vec![0u8; SDWP_HANDSHAKE.len()];
        client.read_exact(&mut echoed).await.unwrap();
        assert_eq!(echoed, SDWP_HANDSHAKE);
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn handshake_rejects_wrong_greeting() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(JDWP_HANDSHAKE).await.unwrap();
        let res = accept_handshake(&mut server, SDWP_HANDSHAKE).await;
        assert!(matches!(res, Err(JdwpError::HandshakeFailed)));
    }
}
