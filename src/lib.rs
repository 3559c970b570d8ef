//! Agent dispatch and proposal workflow core.
//!
//! Background agents registered in a database-backed registry run on cron
//! schedules (or events, or manual triggers), spend from daily token
//! budgets, and emit proposals that flow through a reviewed state machine
//! before appliers execute them. An external scheduler drives the system
//! through three cron endpoints; admins watch and steer it through a
//! bearer-authenticated HTTP API.

pub mod agents;
pub mod api;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod llm;
pub mod notify;
