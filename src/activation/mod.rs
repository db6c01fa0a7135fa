//! Socket activation: inheriting listeners and announcing readiness.
//!
//! - [`listen_fds`]: descriptor acquisition and validation
//! - [`notify`]: the `READY=1` notification

pub mod listen_fds;
pub mod notify;
