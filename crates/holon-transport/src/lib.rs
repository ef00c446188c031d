//! Transport sources (component E): the forwarder-subprocess (E1) and
//! websocket (E2) producers of raw, not-yet-normalized events.

mod forwarder;
mod websocket;

pub use forwarder::{
    Forwarder, ForwarderConfig, ForwarderError, GithubHookLister, HookInfo, HookLister,
};
pub use websocket::{merge_headers_into_payload, WebsocketSource, WebsocketStatus};
