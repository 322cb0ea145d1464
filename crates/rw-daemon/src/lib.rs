//! The runwarden daemon: storage selection, engine wiring, and the HTTP
//! server with graceful shutdown.

pub mod daemon;
