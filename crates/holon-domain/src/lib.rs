pub mod config;
mod envelope;
mod error;
mod state;
pub mod token_exchange;

pub use envelope::{next_id, EventEnvelope, Scope, Subject};
pub use error::{Error, Result, SkipEventError};
pub use state::{AckStatus, PersistentState, RunState, RuntimeState, TurnAckRecord};
