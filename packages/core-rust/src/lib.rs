//! Sandbox gateway core: execution tokens, invocation messages, control
//! actions, and the queue wire framing shared by producers and consumers.

pub mod control;
pub mod id;
pub mod message;
pub mod wire;

pub use control::{ActionKind, ControlAction, ControlError, PostParallel, SessionUpdate};
pub use id::ExecutionId;
pub use message::{InvocationMessage, Metadata};
pub use wire::{FramedMessage, WireError};

