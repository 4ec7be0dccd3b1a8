//! Sandbox gateway server: accepts HTTP invocations, dispatches them onto
//! the sandbox queue, and correlates results back to waiting callers.

pub mod app;
pub mod datalayer;
pub mod network;
pub mod queue;
pub mod service;
pub mod traits;

pub use app::{Gateway, GatewayPorts};
pub use traits::{Datalayer, QueuePort};
