//! Built-in agent handlers.
//!
//! Domain agents (payroll, scheduling, HR) live outside this crate and are
//! registered by the embedding binary. The one handler shipped here watches
//! the agent fleet itself.

pub mod system_monitor;
