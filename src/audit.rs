//! The audit-log collaborator (§6): an external sink that renders a completed request, carrying
//! its retained raw header bytes, into a durable record. Out of scope for serialization format
//! beyond "newline-delimited text somewhere"; a real deployment swaps in its own sink.

use std::fmt;
use std::io::Write;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::rpc::{Request, Response};

/// Accepts a completed request (which retained its raw header bytes because audit logging was
/// enabled at ingest time) and renders an audit record.
pub trait AuditSink: Send + Sync {
    /// Records one completed request/response pair.
    fn record(&self, request: &Request, response: &Response);
}

/// Writes newline-delimited audit records (unix timestamp, client IP, sequence, status, raw
/// header length, self-description) to any `Write` implementation.
pub struct WriterAuditSink<W> {
    writer: Mutex<W>,
}

impl<W: Write + Send> WriterAuditSink<W> {
    /// Wraps `writer` as an audit sink.
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }
}

impl<W: Write + Send> AuditSink for WriterAuditSink<W> {
    fn record(&self, request: &Request, response: &Response) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let raw_len = request.raw_header.as_ref().map(Vec::len).unwrap_or(0);

        let mut writer = match self.writer.lock() {
            Ok(w) => w,
            Err(_) => return,
        };

        let _ = writeln!(
            writer,
            "{} ip={} seq={} status={:?} raw_len={} op={}",
            now,
            request.client_ip,
            response.sequence,
            response.status,
            raw_len,
            request.self_description(),
        );
    }
}

impl<W> fmt::Debug for WriterAuditSink<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriterAuditSink").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roster::ConnectionId;
    use crate::rpc::RequestOp;

    fn sample_request() -> Request {
        Request {
            op: RequestOp::Get,
            args: vec!["/a".into()],
            client_version: 1,
            sequence: 1,
            client_ip: "10.0.0.1".into(),
            connection_id: ConnectionId(1),
            from_client: true,
            raw_header: Some(b"1 GET /a\n".to_vec()),
            home_affinity: 0,
        }
    }

    #[test]
    fn records_one_line_per_request() {
        let sink = WriterAuditSink::new(Vec::new());
        sink.record(&sample_request(), &Response::ok(1));
        let written = sink.writer.lock().unwrap().clone();
        assert_eq!(1, written.iter().filter(|&&b| b == b'\n').count());
    }
}
