//! Tether peer library: the secure session layer and the connection race.
//!
//! A peer always listens, and optionally dials a known address at the
//! same time. Whichever path completes an authenticated handshake first
//! wins; the losing connection is closed without ever delivering data.

#![forbid(unsafe_code)]

pub mod connector;
pub mod session;

pub use connector::PeerRace;
pub use session::{Role, SecureSession, SessionError, SessionEvent};
