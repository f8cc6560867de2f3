//! Connection Module
//!
//! Each client connection is handled by its own async task.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 TCP Listener (accept_loop)                  │
//! └──────────────────────┬──────────────────────────────────────┘
//!                        │ spawn task per client
//!                        ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 ConnectionHandler                           │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐     │
//! │  │ Read bytes  │───>│ Split lines │───>│ Execute cmd │     │
//! │  └─────────────┘    └─────────────┘    └──────┬──────┘     │
//! │                                               ▼             │
//! │                                      ┌─────────────┐        │
//! │                                      │ Send reply  │        │
//! │                                      └─────────────┘        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! `ConnectionHandler` is generic over the stream, so it runs on a
//! `TcpStream` in the server and on mock I/O in tests.

pub mod handler;

pub use handler::{
    accept_loop, handle_connection, log_stats, ConnectionError, ConnectionHandler,
    ConnectionStats,
};
