mod event;
mod identity;
mod job;
mod message;
pub(crate) mod serde_helpers;

// Re-export all types
pub use event::*;
pub use identity::*;
pub use job::*;
pub use message::*;
