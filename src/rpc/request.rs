//! The parsed request object that flows from ingest, through the executor, to egress.

use crate::roster::ConnectionId;

use super::{ParseError, ParseResult, Parser};

/// The operation a request names. `Disconnect` is the synthetic request recognized at egress
/// time (§4.5 step 3) that marks the connection for graceful shutdown after its response is
/// flushed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestOp {
    /// Fetch metadata for a path.
    Get,
    /// Create or update metadata for a path.
    Put,
    /// Remove a path's metadata.
    Delete,
    /// Synthetic request asking the connection to disconnect once its response is flushed.
    Disconnect,
}

impl RequestOp {
    fn from_token(token: &str) -> ParseResult<Self> {
        match token {
            "GET" => Ok(RequestOp::Get),
            "PUT" => Ok(RequestOp::Put),
            "DELETE" => Ok(RequestOp::Delete),
            "DISCONNECT" => Ok(RequestOp::Disconnect),
            _ => Err(ParseError::Operation),
        }
    }

    /// Requests of this type are logged unconditionally at egress time (§4.5 step 1), regardless
    /// of status or debug-logging settings, because they change connection-level state.
    pub fn always_logged(&self) -> bool {
        matches!(self, RequestOp::Disconnect)
    }
}

/// A parsed request, annotated by ingest with connection context and carried through the
/// executor hand-off.
#[derive(Debug, Clone)]
pub struct Request {
    /// The operation requested.
    pub op: RequestOp,
    /// Whitespace-separated arguments following the operation name.
    pub args: Vec<String>,
    /// Protocol version the client advertised on this request.
    pub client_version: u32,
    /// Per-connection monotonic sequence number, assigned at ingest.
    pub sequence: u64,
    /// The client's IP, annotated at ingest (§4.4 step 4).
    pub client_ip: String,
    /// The connection this request was submitted from (§4.4 step 4).
    pub connection_id: ConnectionId,
    /// Always true for requests ingested from a client frame, as opposed to ones synthesized
    /// internally (§4.4 step 4: "came from client" marker).
    pub from_client: bool,
    /// Raw frame bytes, retained only when audit logging is enabled (§4.4 step 3).
    pub raw_header: Option<Vec<u8>>,
    /// The reactor shard this request was submitted from, so a completion arriving on the wrong
    /// worker can be re-routed home (§4.3 pre-dispatch, §5 "executor hand-off").
    pub home_affinity: usize,
}

impl Request {
    /// A short, human-readable description used in logs (§4.5 step 1, §4.6).
    pub fn self_description(&self) -> String {
        format!("{:?} {}", self.op, self.args.join(" "))
    }
}

/// Parses the newline-delimited grammar `<version> <OP> [args...]`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LineParser;

impl Parser for LineParser {
    fn parse(&self, buf: &[u8], frame_len: usize) -> ParseResult<Request> {
        let frame = &buf[..frame_len];
        let line = std::str::from_utf8(frame)
            .unwrap_or("")
            .trim_end_matches(['\n', '\r']);

        let mut tokens = line.split_whitespace();
        let version_token = tokens.next().ok_or(ParseError::Empty)?;
        let client_version: u32 = version_token.parse().map_err(|_| ParseError::Version)?;
        let op_token = tokens.next().ok_or(ParseError::Operation)?;
        let op = RequestOp::from_token(op_token)?;
        let args = tokens.map(str::to_owned).collect();

        Ok(Request {
            op,
            args,
            client_version,
            sequence: 0,
            client_ip: String::new(),
            connection_id: ConnectionId(0),
            from_client: true,
            raw_header: None,
            home_affinity: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_get_with_args() {
        let req = LineParser.parse(b"3 GET /foo/bar\n", 15).unwrap();
        assert_eq!(RequestOp::Get, req.op);
        assert_eq!(3, req.client_version);
        assert_eq!(vec!["/foo/bar".to_string()], req.args);
    }

    #[test]
    fn parses_disconnect_with_no_args() {
        let req = LineParser.parse(b"1 DISCONNECT\n", 13).unwrap();
        assert_eq!(RequestOp::Disconnect, req.op);
        assert!(req.args.is_empty());
    }

    #[test]
    fn rejects_unknown_operation() {
        let err = LineParser.parse(b"1 FROB x\n", 9).unwrap_err();
        assert_eq!(ParseError::Operation, err);
    }

    #[test]
    fn rejects_missing_version() {
        let err = LineParser.parse(b"\n", 1).unwrap_err();
        assert_eq!(ParseError::Empty, err);
    }

    #[test]
    fn rejects_non_numeric_version() {
        let err = LineParser.parse(b"abc GET /x\n", 11).unwrap_err();
        assert_eq!(ParseError::Version, err);
    }

    #[test]
    fn does_not_consume_from_buffer() {
        let buf = b"3 GET /foo\nPUT /bar\n";
        let before = buf.to_vec();
        let _ = LineParser.parse(buf, 11);
        assert_eq!(before, buf.to_vec());
    }
}
