//! Routing services used by the connection worker.
//!
//! ARCHITECTURE
//! ============
//! Service modules own table mutations and cross-connection delivery so the
//! worker in `broker` can stay focused on the handshake, the select loop,
//! and turning outcomes into replies.

pub mod invoke;
pub mod registry;
pub mod session;
pub mod topic;
