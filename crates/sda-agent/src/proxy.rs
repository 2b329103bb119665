use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use sda_jdwp::{encode_command, encode_reply, read_packet, Packet};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::error::AgentError;

/// Outgoing side of the connection to the debug proxy, as seen by the
/// components that emit events and stepping queries.
pub trait ProxyChannel: Send + Sync {
    /// Queues a command for the proxy without waiting for a reply.
    fn send_command(&self, command_set: u8, command: u8, payload: Vec<u8>) -> Result<(), AgentError>;

    /// Sends a command and blocks the calling thread until the proxy replies.
    ///
    /// There is no timeout; an unresponsive proxy stalls the caller.
    fn request(&self, command_set: u8, command: u8, payload: Vec<u8>) -> Result<Vec<u8>, AgentError>;
}

/// A command packet received from the proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingCommand {
    pub id: u32,
    pub command_set: u8,
    pub command: u8,
    pub payload: Vec<u8>,
}

#[derive(Debug)]
struct Reply {
    error_code: u16,
    payload: Vec<u8>,
}

/// A live connection to the proxy.
///
/// A reader task routes replies to waiting requesters and forwards commands to
/// the receiver returned by [`ProxyLink::spawn`]; a writer task drains the
/// outgoing queue. Either task ending closes the link.
pub struct ProxyLink {
    outgoing: mpsc::UnboundedSender<Vec<u8>>,
    pending: Mutex<HashMap<u32, oneshot::Sender<Reply>>>,
    next_id: AtomicU32,
    shutdown: CancellationToken,
}

impl ProxyLink {
    /// Starts the IO tasks on the current tokio runtime.
    pub fn spawn<S>(stream: S) -> (Arc<Self>, mpsc::UnboundedReceiver<IncomingCommand>)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

        let link = Arc::new(Self {
            outgoing: out_tx,
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU32::new(1),
            shutdown: CancellationToken::new(),
        });

        tokio::spawn(write_loop(writer, out_rx, link.shutdown.clone()));
        tokio::spawn(read_loop(reader, link.clone(), cmd_tx));
        (link, cmd_rx)
    }

    pub fn send_reply(&self, id: u32, error_code: u16, payload: &[u8]) {
        if self.outgoing.send(encode_reply(id, error_code, payload)).is_err() {
            tracing::debug!(target: "sda.proxy", id, "dropping reply; proxy link closed");
        }
    }

    /// Closes the link. Queued packets are still flushed.
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    pub async fn closed(&self) {
        self.shutdown.cancelled().await
    }

    fn alloc_id(&self) -> u32 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

impl ProxyChannel for ProxyLink {
    fn send_command(&self, command_set: u8, command: u8, payload: Vec<u8>) -> Result<(), AgentError> {
        if self.is_closed() {
            return Err(AgentError::ProxyClosed);
        }
        let id = self.alloc_id();
        self.outgoing
            .send(encode_command(id, command_set, command, &payload))
            .map_err(|_| AgentError::ProxyClosed)
    }

    fn request(&self, command_set: u8, command: u8, payload: Vec<u8>) -> Result<Vec<u8>, AgentError> {
        let id = self.alloc_id();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);
        // The reader cancels before draining `pending`, so checking after the
        // insert cannot miss a shutdown.
        if self.is_closed() {
            self.pending.lock().remove(&id);
            return Err(AgentError::ProxyClosed);
        }

        if self
            .outgoing
            .send(encode_command(id, command_set, command, &payload))
            .is_err()
        {
            self.pending.lock().remove(&id);
            return Err(AgentError::ProxyClosed);
        }
        tracing::debug!(target: "sda.proxy", id, command_set, command, "waiting for proxy reply");

        let reply = rx.blocking_recv().map_err(|_| AgentError::ProxyClosed)?;
        if reply.error_code != 0 {
            return Err(AgentError::ProxyReply(reply.error_code));
        }
        Ok(reply.payload)
    }
}

async fn read_loop<R>(
    mut reader: R,
    link: Arc<ProxyLink>,
    commands: mpsc::UnboundedSender<IncomingCommand>,
) where
    R: AsyncRead + Unpin,
{
    loop {
        let packet = tokio::select! {
            _ = link.shutdown.cancelled() => break,
            res = read_packet(&mut reader) => res,
        };
        match packet {
            Ok(Some(Packet::Reply {
                id,
                error_code,
                payload,
            })) => {
                let tx = link.pending.lock().remove(&id);
                match tx {
                    Some(tx) => {
                        let _ = tx.send(Reply {
                            error_code,
                            payload,
                        });
                    }
                    None => {
                        tracing::warn!(target: "sda.proxy", id, "reply for unknown request");
                    }
                }
            }
            Ok(Some(Packet::Command {
                id,
                command_set,
                command,
                payload,
            })) => {
                let command = IncomingCommand {
                    id,
                    command_set,
                    command,
                    payload,
                };
                if commands.send(command).is_err() {
                    break;
                }
            }
            Ok(None) => {
                tracing::info!(target: "sda.proxy", "proxy closed the connection");
                break;
            }
            Err(err) => {
                tracing::warn!(target: "sda.proxy", error = %err, "proxy connection failed");
                break;
            }
        }
    }

    link.shutdown.cancel();
    // Dropping the senders fails every outstanding request.
    let pending = std::mem::take(&mut *link.pending.lock());
    drop(pending);
}

async fn write_loop<W>(
    mut writer: W,
    mut outgoing: mpsc::UnboundedReceiver<Vec<u8>>,
    shutdown: CancellationToken,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        let bytes = tokio::select! {
            biased;
            msg = outgoing.recv() => match msg {
                Some(bytes) => bytes,
                None => break,
            },
            _ = shutdown.cancelled() => {
                // Flush whatever was queued before the close.
                while let Ok(bytes) = outgoing.try_recv() {
                    if writer.write_all(&bytes).await.is_err() {
                        break;
                    }
                }
                break;
            }
        };
        if let Err(err) = writer.write_all(&bytes).await {
            tracing::warn!(target: "sda.proxy", error = %err, "failed to write to proxy");
            shutdown.cancel();
            break;
        }
    }
    let _ = writer.shutdown().await;
}
