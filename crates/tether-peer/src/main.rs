//! Tether peer: authenticated, forward-secret P2P chat over TCP.
//!
//! Generates a fresh identity at startup, prints the public key for
//! out-of-band exchange, then races an always-on listener against an
//! optional dialer and chats over the winning secure session.

#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

use knot_core::READY_PROBE;
use knot_crypto::{IdentityKeypair, PeerId};
use tether_common::Error;
use tether_peer::{PeerRace, SessionError, SessionEvent};

#[derive(Parser, Debug)]
#[command(name = "tether-peer")]
#[command(about = "Authenticated P2P encrypted chat between two known peers")]
struct Args {
    /// Local TCP port to listen on (0 picks an ephemeral port)
    #[arg(short, long, env = "TETHER_LISTEN_PORT")]
    listen_port: u16,

    /// The peer's public key (base64) — who you are willing to talk to
    #[arg(short = 'k', long, env = "TETHER_PEER_KEY")]
    peer_key: String,

    /// Peer address to dial (ip:port); omit to only wait for inbound
    #[arg(short = 'p', long, env = "TETHER_PEER_ADDR")]
    peer_addr: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tether_common::init_tracing();

    let args = Args::parse();
    let peer = PeerId::parse(args.peer_key.trim()).map_err(|e| {
        Error::config(format!(
            "peer key must be the base64 public key your peer printed at startup ({e})"
        ))
    })?;

    let identity = Arc::new(IdentityKeypair::generate());
    println!("Your public key (share with your peer): {}", identity.peer_id());

    let race = PeerRace::bind(args.listen_port, identity, peer).await?;
    info!("bound {}", race.local_addr()?);

    let mut session = race.run(args.peer_addr).await?;
    println!("Secure session established with {}. Type /exit to quit.", session.peer_id());

    let mut events = session.run_receiver();
    let mut printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                SessionEvent::Message(text) if text == READY_PROBE => {
                    info!("peer channel ready");
                }
                SessionEvent::Message(text) => println!("Peer: {text}"),
                SessionEvent::Closed(None) => {
                    println!("[p2p] session ended by peer.");
                    break;
                }
                SessionEvent::Closed(Some(e)) => {
                    eprintln!("[p2p] receive error: {e}");
                    break;
                }
            }
        }
    });

    // Liveness probe: best-effort, ignore failures.
    let _ = session.send(READY_PROBE).await;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = &mut printer => break,
            line = lines.next_line() => {
                let Some(input) = line? else { break };
                let input = input.trim();
                if input.eq_ignore_ascii_case("/exit") || input.eq_ignore_ascii_case("exit") {
                    break;
                }
                if input.is_empty() {
                    continue;
                }
                match session.send(input).await {
                    Ok(_) => {}
                    Err(SessionError::Closed) => {
                        println!("[p2p] send path closed.");
                        break;
                    }
                    Err(e) => {
                        eprintln!("[p2p] failed to send: {e}");
                        break;
                    }
                }
            }
        }
    }

    session.close().await;
    println!("Session closed.");
    Ok(())
}
