//! Command Module
//!
//! Sits between the protocol and the database:
//!
//! ```text
//! Client Request
//!       │
//!       ▼
//! ┌─────────────────┐
//! │  Line Parser    │  (protocol module)
//! └────────┬────────┘
//!          │ Command
//!          ▼
//! ┌─────────────────┐
//! │ CommandHandler  │  (this module)
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │       Db        │  store + AOF
//! └─────────────────┘
//! ```

pub mod handler;

pub use handler::{CommandHandler, NOT_DURABLE, PERSISTENCE_FAILURE};
