//! The response object egress serializes into a connection's output buffer.

use std::io::{self, Write};

/// Outcome of processing a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// The request succeeded.
    Ok,
    /// The request failed; `egress` logs these unconditionally (§4.5 step 1).
    Failure,
}

/// A completed request's response, produced by the executor and serialized by egress.
#[derive(Debug, Clone)]
pub struct Response {
    /// Per-connection sequence number this response answers.
    pub sequence: u64,
    /// Success/failure outcome.
    pub status: Status,
    /// Human-readable status message.
    pub message: String,
}

impl Response {
    /// Builds a successful response with an empty message.
    pub fn ok(sequence: u64) -> Self {
        Self {
            sequence,
            status: Status::Ok,
            message: String::new(),
        }
    }

    /// Builds a failure response carrying `message`.
    pub fn failure(sequence: u64, message: impl Into<String>) -> Self {
        Self {
            sequence,
            status: Status::Failure,
            message: message.into(),
        }
    }

    /// Serializes this response into `out` (the connection's output buffer, via its buffered
    /// writer) as a single newline-terminated line (§4.5 step 4).
    pub fn serialize(&self, out: &mut impl Write) -> io::Result<()> {
        let status = match self.status {
            Status::Ok => "OK",
            Status::Failure => "ERR",
        };
        writeln!(out, "{} {} {}", self.sequence, status, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_ok_response() {
        let mut out = Vec::new();
        Response::ok(7).serialize(&mut out).unwrap();
        assert_eq!(b"7 OK \n".to_vec(), out);
    }

    #[test]
    fn serializes_failure_response_with_message() {
        let mut out = Vec::new();
        Response::failure(2, "not found").serialize(&mut out).unwrap();
        assert_eq!(b"2 ERR not found\n".to_vec(), out);
    }
}
