//! Secure session over a byte stream.
//!
//! Wraps any `AsyncRead + AsyncWrite` transport, runs the signed
//! ephemeral-key handshake, and thereafter frames every message as one
//! encrypted line (`<seq>|<base64 body>`). The send path is serialized
//! behind a mutex so sequence assignment and line writes are atomic; the
//! receive loop is a single spawned task that owns the read half and the
//! replay gate.
//!
//! Lifecycle: `establish` → (`run_receiver`, `send`)* → `close`. Close is
//! idempotent; the session key is zeroized when the last task releases it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::io::{self, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::debug;

use knot_core::frame::{aad_for, DataFrame, SequenceGate};
use knot_core::{Envelope, MAX_LINE_LEN};
use knot_crypto::handshake::{Handshake, HandshakeError, SessionKey};
use knot_crypto::{aead, CryptoError, IdentityKeypair, PeerId};

/// Which side of the handshake this session plays.
///
/// The initiator sends its envelope first and then waits; the responder
/// waits first and answers only after validating. Exactly one message is
/// ever in flight unacknowledged per direction, so the exchange cannot
/// deadlock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

/// Session errors.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("connection closed during handshake: the other side hung up before finishing")]
    HandshakeEof,

    #[error("invalid handshake envelope: {0}")]
    Envelope(String),

    #[error(transparent)]
    Handshake(#[from] HandshakeError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("session is closed")]
    Closed,
}

/// Delivered by the receive loop.
#[derive(Debug)]
pub enum SessionEvent {
    /// A decrypted, replay-checked message from the peer.
    Message(String),
    /// The receive loop terminated. `None` means a clean peer disconnect;
    /// `Some` carries the error that tore the session down.
    Closed(Option<SessionError>),
}

struct SendState<S> {
    writer: WriteHalf<S>,
    next_seq: u64,
}

struct Shared<S> {
    tx: Mutex<SendState<S>>,
    key: SessionKey,
    closed: AtomicBool,
}

/// An established secure session.
///
/// `shared` is `None` once `close` has run; the session key is zeroized
/// as soon as the receive task releases its clone of the handle.
pub struct SecureSession<S> {
    shared: Option<Arc<Shared<S>>>,
    reader: Option<LineReader<ReadHalf<S>>>,
    recv_task: Option<JoinHandle<()>>,
    peer: PeerId,
}

impl<S> SecureSession<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    /// Run the handshake on a fresh transport connection.
    ///
    /// Any validation failure aborts this connection attempt with a
    /// distinct error; the caller closes the transport by dropping the
    /// returned error path.
    pub async fn establish(
        stream: S,
        identity: &IdentityKeypair,
        expected_peer: &PeerId,
        role: Role,
    ) -> Result<Self, SessionError> {
        let (read_half, mut write_half) = io::split(stream);
        let mut reader = LineReader::new(read_half);

        let handshake = Handshake::new();
        let hello_line = handshake
            .hello(identity, expected_peer)
            .to_json()
            .map_err(|e| SessionError::Envelope(e.to_string()))?;

        let key = match role {
            Role::Initiator => {
                write_line(&mut write_half, &hello_line).await?;
                let line = expect_line(&mut reader).await?;
                let envelope = Envelope::from_json(&line)
                    .map_err(|e| SessionError::Envelope(e.to_string()))?;
                handshake.finish(&envelope, identity, expected_peer)?
            }
            Role::Responder => {
                let line = expect_line(&mut reader).await?;
                let envelope = Envelope::from_json(&line)
                    .map_err(|e| SessionError::Envelope(e.to_string()))?;
                // Validate before answering: an unauthenticated caller
                // never sees our envelope.
                let key = handshake.finish(&envelope, identity, expected_peer)?;
                write_line(&mut write_half, &hello_line).await?;
                key
            }
        };

        Ok(Self {
            shared: Some(Arc::new(Shared {
                tx: Mutex::new(SendState {
                    writer: write_half,
                    next_seq: 0,
                }),
                key,
                closed: AtomicBool::new(false),
            })),
            reader: Some(reader),
            recv_task: None,
            peer: expected_peer.clone(),
        })
    }

    /// The authenticated peer on the other side.
    pub fn peer_id(&self) -> &PeerId {
        &self.peer
    }

    /// Encrypt and send one message, flushing immediately.
    ///
    /// Returns the sequence number used. Serialized against concurrent
    /// callers; sequence numbers are consumed even if the write fails.
    pub async fn send(&self, plaintext: &str) -> Result<u64, SessionError> {
        let Some(shared) = &self.shared else {
            return Err(SessionError::Closed);
        };
        if shared.closed.load(Ordering::SeqCst) {
            return Err(SessionError::Closed);
        }

        let mut tx = shared.tx.lock().await;
        let seq = tx.next_seq;
        tx.next_seq += 1;

        let aad = aad_for(seq);
        let body = aead::seal_to_base64(shared.key.as_bytes(), plaintext.as_bytes(), &aad)?;
        let line = DataFrame::encode(seq, &body);

        tx.writer.write_all(line.as_bytes()).await?;
        tx.writer.write_all(b"\n").await?;
        tx.writer.flush().await?;
        Ok(seq)
    }

    /// Spawn the receive loop and return its event channel.
    ///
    /// Callable once; a second call returns a channel that is already
    /// closed. The loop runs until end-of-stream, an unrecoverable error,
    /// or `close`.
    pub fn run_receiver(&mut self) -> mpsc::Receiver<SessionEvent> {
        let (event_tx, event_rx) = mpsc::channel(64);
        let Some(mut reader) = self.reader.take() else {
            return event_rx;
        };
        let Some(shared) = self.shared.clone() else {
            return event_rx;
        };
        let handle = tokio::spawn(async move {
            let mut gate = SequenceGate::new();
            let outcome: Option<SessionError> = loop {
                let line = match reader.read_line().await {
                    Ok(Some(line)) => line,
                    Ok(None) => break None,
                    Err(e) if is_clean_disconnect(&e) => break None,
                    Err(e) => break Some(SessionError::Io(e)),
                };

                // Malformed lines never terminate the session.
                let Some(frame) = DataFrame::parse(&line) else {
                    continue;
                };
                // Replays and stale frames are dropped without a callback.
                if !gate.admits(frame.seq) {
                    debug!(seq = frame.seq, "dropping replayed or stale frame");
                    continue;
                }

                let aad = aad_for(frame.seq);
                match aead::open_from_base64(shared.key.as_bytes(), frame.body, &aad) {
                    Ok(plain) => {
                        gate.record(frame.seq);
                        // The channel carries text; an authenticated frame
                        // that is not UTF-8 is dropped, never mangled.
                        let Ok(text) = String::from_utf8(plain) else {
                            debug!(seq = frame.seq, "dropping non-text frame");
                            continue;
                        };
                        if event_tx.send(SessionEvent::Message(text)).await.is_err() {
                            // Receiver dropped: nobody is listening anymore.
                            break None;
                        }
                    }
                    // A frame that parses but fails to authenticate is
                    // treated as an attack: tear the session down.
                    Err(e) => break Some(SessionError::Crypto(e)),
                }
            };

            shutdown_transport(&shared).await;
            let _ = event_tx.send(SessionEvent::Closed(outcome)).await;
        });
        self.recv_task = Some(handle);
        event_rx
    }

    /// Close the session: release the transport, stop the receive loop,
    /// and drop this handle's share of the key. The key bytes are wiped
    /// once the aborted receiver releases its clone. Idempotent; safe to
    /// call from any path.
    pub async fn close(&mut self) {
        if let Some(shared) = self.shared.take() {
            shutdown_transport(&shared).await;
        }
        if let Some(handle) = self.recv_task.take() {
            handle.abort();
        }
    }

    pub fn is_closed(&self) -> bool {
        match &self.shared {
            Some(shared) => shared.closed.load(Ordering::SeqCst),
            None => true,
        }
    }
}

/// Shut the transport down exactly once, even if invoked concurrently
/// from the send path and the receive loop.
async fn shutdown_transport<S>(shared: &Shared<S>)
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    if shared.closed.swap(true, Ordering::SeqCst) {
        return;
    }
    let mut tx = shared.tx.lock().await;
    let _ = tx.writer.shutdown().await;
}

async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, line: &str) -> io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}

async fn expect_line<R: AsyncRead + Unpin>(
    reader: &mut LineReader<R>,
) -> Result<String, SessionError> {
    reader.read_line().await?.ok_or(SessionError::HandshakeEof)
}

/// Peer hangups surface as reset-style I/O errors on some platforms;
/// treat them as a normal disconnect rather than a failure.
fn is_clean_disconnect(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
    )
}

/// Newline-delimited reader with a hard per-line cap.
///
/// A line longer than [`MAX_LINE_LEN`] is drained to its terminator and
/// returned as empty, so a hostile peer cannot force unbounded buffering.
struct LineReader<R> {
    inner: BufReader<R>,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    fn new(reader: R) -> Self {
        Self {
            inner: BufReader::new(reader),
        }
    }

    /// Read one line (without the terminator). Returns `None` at clean
    /// end-of-stream; a partial line at EOF is returned as-is.
    async fn read_line(&mut self) -> io::Result<Option<String>> {
        let mut buf: Vec<u8> = Vec::with_capacity(256);
        loop {
            // done = newline consumed or end-of-stream reached
            let (done, used) = {
                let chunk = self.inner.fill_buf().await?;
                if chunk.is_empty() {
                    (true, 0)
                } else if let Some(pos) = chunk.iter().position(|&b| b == b'\n') {
                    buf.extend_from_slice(&chunk[..pos]);
                    (true, pos + 1)
                } else {
                    buf.extend_from_slice(chunk);
                    (false, chunk.len())
                }
            };
            self.inner.consume(used);

            if buf.len() > MAX_LINE_LEN {
                self.drain_line(done).await?;
                return Ok(Some(String::new()));
            }
            if done {
                if used == 0 && buf.is_empty() {
                    return Ok(None);
                }
                break;
            }
        }

        // Invalid UTF-8 is indistinguishable from a malformed frame:
        // surface it as an empty (ignored) line.
        Ok(Some(String::from_utf8(buf).unwrap_or_default()))
    }

    /// Consume input up to and including the next newline (or EOF).
    /// No-op when the current line already ended.
    async fn drain_line(&mut self, already_done: bool) -> io::Result<()> {
        if already_done {
            return Ok(());
        }
        loop {
            let (done, used) = {
                let chunk = self.inner.fill_buf().await?;
                if chunk.is_empty() {
                    (true, 0)
                } else if let Some(pos) = chunk.iter().position(|&b| b == b'\n') {
                    (true, pos + 1)
                } else {
                    (false, chunk.len())
                }
            };
            self.inner.consume(used);
            if done {
                return Ok(());
            }
        }
    }
}
