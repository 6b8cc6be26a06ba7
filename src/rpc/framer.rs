//! Newline-delimited framing.

use super::Framer;

/// Detects a complete request frame as one line terminated by `\n`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LineFramer;

impl Framer for LineFramer {
    fn is_message_available(&self, buf: &[u8]) -> Option<usize> {
        buf.iter().position(|&b| b == b'\n').map(|pos| pos + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_newline_means_no_frame() {
        assert_eq!(None, LineFramer.is_message_available(b"GET foo"));
    }

    #[test]
    fn newline_terminated_frame_is_detected() {
        assert_eq!(Some(8), LineFramer.is_message_available(b"GET foo\n"));
    }

    #[test]
    fn only_the_first_frame_is_reported() {
        assert_eq!(
            Some(8),
            LineFramer.is_message_available(b"GET foo\nPUT bar\n")
        );
    }
}
