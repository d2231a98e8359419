//! Connection race: one always-on listener, one optional dialer.
//!
//! Both paths attempt the authenticated handshake; the first to finish
//! claims a single-assignment winner slot through a compare-and-set, and
//! the loser is closed without delivering anything. The dialer retries
//! with exponential backoff and jitter until a winner exists.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time;
use tracing::{debug, info, warn};

use knot_crypto::{IdentityKeypair, PeerId};
use tether_common::{Error, Result};

use crate::session::{Role, SecureSession};

/// Timeout for a single outbound connect attempt.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Dialer backoff: initial delay, doubled per retry up to the cap, with
/// uniform jitter added to every wait.
const BACKOFF_INITIAL: Duration = Duration::from_millis(1000);
const BACKOFF_MAX: Duration = Duration::from_millis(5000);
const BACKOFF_JITTER_MS: u64 = 250;

/// Races a passive listener against an optional active dialer and hands
/// exactly one established [`SecureSession`] to the caller.
pub struct PeerRace {
    listener: TcpListener,
    identity: Arc<IdentityKeypair>,
    peer: PeerId,
}

impl PeerRace {
    /// Bind the listening socket. Port 0 picks an ephemeral port;
    /// `local_addr` reports the actual one.
    pub async fn bind(listen_port: u16, identity: Arc<IdentityKeypair>, peer: PeerId) -> Result<Self> {
        let listener = TcpListener::bind(("0.0.0.0", listen_port)).await?;
        Ok(Self {
            listener,
            identity,
            peer,
        })
    }

    /// The bound listen address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Run the race until one path delivers an established session.
    ///
    /// With no `remote`, only the listener runs and this waits for an
    /// inbound peer indefinitely. On return the listening socket is
    /// closed and both background tasks are stopped.
    pub async fn run(self, remote: Option<SocketAddr>) -> Result<SecureSession<TcpStream>> {
        let done = Arc::new(AtomicBool::new(false));
        let (winner_tx, mut winner_rx) = mpsc::channel::<SecureSession<TcpStream>>(1);

        let listen_task = tokio::spawn(accept_loop(
            self.listener,
            self.identity.clone(),
            self.peer.clone(),
            done.clone(),
            winner_tx.clone(),
        ));

        let dial_task = remote.map(|addr| {
            tokio::spawn(dial_loop(
                addr,
                self.identity.clone(),
                self.peer.clone(),
                done.clone(),
                winner_tx,
            ))
        });
        if remote.is_none() {
            info!("listen-only mode (no peer address supplied)");
        }

        let session = winner_rx
            .recv()
            .await
            .ok_or_else(|| Error::internal("race ended without a winning session"))?;

        // Stop the losers: dropping the listener task releases the port.
        done.store(true, Ordering::SeqCst);
        listen_task.abort();
        if let Some(task) = dial_task {
            task.abort();
        }

        Ok(session)
    }
}

/// Atomically claim the win. Exactly one caller per race succeeds.
fn claim(done: &AtomicBool) -> bool {
    done.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_ok()
}

async fn accept_loop(
    listener: TcpListener,
    identity: Arc<IdentityKeypair>,
    peer: PeerId,
    done: Arc<AtomicBool>,
    winner_tx: mpsc::Sender<SecureSession<TcpStream>>,
) {
    match listener.local_addr() {
        Ok(addr) => info!(%addr, "listening, waiting for the peer to connect"),
        Err(_) => info!("listening, waiting for the peer to connect"),
    }
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                if done.load(Ordering::SeqCst) {
                    break;
                }
                debug!(%addr, "inbound connection, attempting handshake");
                match SecureSession::establish(stream, &identity, &peer, Role::Responder).await {
                    Ok(mut session) => {
                        if claim(&done) {
                            let _ = winner_tx.send(session).await;
                        } else {
                            session.close().await;
                        }
                        break;
                    }
                    Err(e) => {
                        // Keep accepting: a failed attempt must not end the race.
                        warn!(%addr, "handshake failed on accept path: {e}");
                    }
                }
            }
            Err(e) => {
                if !done.load(Ordering::SeqCst) {
                    warn!("accept error: {e}");
                }
                break;
            }
        }
    }
}

async fn dial_loop(
    addr: SocketAddr,
    identity: Arc<IdentityKeypair>,
    peer: PeerId,
    done: Arc<AtomicBool>,
    winner_tx: mpsc::Sender<SecureSession<TcpStream>>,
) {
    let mut backoff = Backoff::new();
    info!(%addr, "dialing peer");
    while !done.load(Ordering::SeqCst) {
        match time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => {
                if done.load(Ordering::SeqCst) {
                    break;
                }
                match SecureSession::establish(stream, &identity, &peer, Role::Initiator).await {
                    Ok(mut session) => {
                        if claim(&done) {
                            let _ = winner_tx.send(session).await;
                        } else {
                            session.close().await;
                        }
                        break;
                    }
                    // Failed handshakes retry like failed connects.
                    Err(e) => warn!(%addr, "handshake failed on dial path: {e}"),
                }
            }
            Ok(Err(e)) => debug!(%addr, "connect failed: {e}"),
            Err(_) => debug!(%addr, "connect timed out"),
        }
        time::sleep(backoff.next_delay()).await;
    }
}

/// Exponential backoff with jitter for the dialer.
struct Backoff {
    current: Duration,
}

impl Backoff {
    fn new() -> Self {
        Self {
            current: BACKOFF_INITIAL,
        }
    }

    /// Delay before the next attempt: current backoff plus 0..=250 ms of
    /// jitter. Doubles the base afterwards, capped at 5000 ms.
    fn next_delay(&mut self) -> Duration {
        let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..=BACKOFF_JITTER_MS));
        let delay = self.current + jitter;
        self.current = (self.current * 2).min(BACKOFF_MAX);
        delay
    }
}
