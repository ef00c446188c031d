mod service;
mod store;

pub use service::{EventHandler, EventService, ForwardStatus, HandlerError, ProcessOutcome};
pub use store::PersistentStateStore;
