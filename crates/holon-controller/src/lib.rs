//! The controller session driver (component H): bridges the durable
//! file-based event channel to a long-lived agent session via the
//! [`client::AgentClient`] seam.

mod ack;
mod client;
mod cursor;
mod driver;
mod sdk_client;
mod session_state;

pub use ack::AckWriter;
pub use client::{AgentClient, ClientError, TurnStreamEvent};
pub use cursor::Cursor;
pub use driver::Driver;
pub use sdk_client::{ProcessAgentClient, SdkClientConfig};
pub use session_state::SessionState;
