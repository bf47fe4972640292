//! Client-side Bolt plumbing for the driver.
//!
//! [`BoltConnection`] owns the socket and enforces the pipelining
//! discipline; [`BoltClient`] drives the message exchanges on top of it.
//! The pool hands out clients, never raw connections.

pub mod client;
pub mod connection;

pub use client::{BoltClient, PullBatch, StreamHeader};
pub use connection::{BoltConnection, ConnectionState};
