//! Attested shape request demo client.
//!
//! Fetches an attestation token, sends it in the `ApproovToken` header of a
//! single GET to the shapes server and shows the returned shape.

pub mod attestation;
pub mod config;
pub mod dispatch;
pub mod handshake;
pub mod headless;
pub mod screens;
pub mod session;
