//! Type definitions

pub mod messages;
pub mod publisher;
pub mod queue;
pub mod upload;

pub use messages::*;
pub use publisher::*;
pub use queue::*;
pub use upload::*;
