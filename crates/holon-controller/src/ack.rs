//! Ack-file writer: appends one [`TurnAckRecord`] per processed event to
//! `ack_channel_path`, the file [`crate::driver`] tails the other side of.

use std::path::Path;

use holon_audit::NdjsonSink;
use holon_domain::{AckStatus, TurnAckRecord};

pub struct AckWriter {
    sink: Option<NdjsonSink>,
}

impl AckWriter {
    /// `None` path means acks are dropped — the ack channel is optional
    /// per §6.2 (externally supplied, not required).
    pub fn open(path: Option<&Path>) -> holon_domain::Result<Self> {
        let sink = match path {
            Some(p) => Some(NdjsonSink::open(p)?),
            None => None,
        };
        Ok(Self { sink })
    }

    pub fn ack(
        &self,
        event_id: Option<String>,
        turn_id: String,
        thread_id: Option<String>,
        status: AckStatus,
        message: Option<String>,
    ) -> holon_domain::Result<()> {
        let Some(sink) = &self.sink else {
            return Ok(());
        };
        sink.append(&TurnAckRecord {
            event_id,
            turn_id,
            thread_id,
            status,
            message,
            at: chrono::Utc::now(),
        })
    }
}
