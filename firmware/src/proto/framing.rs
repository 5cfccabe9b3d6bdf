//! Delimiter framing for the command socket.
//!
//! Commands arrive as `0x02 <JSON> 0x03`.  Received bytes go into a circular
//! buffer; [`FrameExtractor::next_frame`] pulls out complete JSON payloads,
//! resynchronising on the next STX after anything malformed:
//!
//! * an ETX with no preceding STX is skipped without error
//! * a payload longer than [`MAX_CMD_LEN`] is dropped whole
//! * bytes in front of an STX are discarded

/// Start-of-command delimiter.
pub const STX: u8 = 0x02;
/// End-of-command delimiter.
pub const ETX: u8 = 0x03;

/// Longest permitted JSON command.
pub const MAX_CMD_LEN: usize = 256;

/// Receive buffer size — enough for a small number of queued commands.
pub const RX_BUF_LEN: usize = 1024;

pub struct FrameExtractor {
    buf: [u8; RX_BUF_LEN],
    push: usize,
    pop: usize,
}

impl FrameExtractor {
    pub fn new() -> Self {
        Self {
            buf: [0; RX_BUF_LEN],
            push: 0,
            pop: 0,
        }
    }

    /// Number of buffered bytes.
    pub fn len(&self) -> usize {
        (self.push + RX_BUF_LEN - self.pop) % RX_BUF_LEN
    }

    pub fn is_empty(&self) -> bool {
        self.push == self.pop
    }

    /// Append received bytes.  The buffer is sized for the protocol's
    /// one-command-at-a-time cadence; on overflow the oldest bytes are
    /// dropped, which the resync rules then recover from.
    pub fn push_bytes(&mut self, data: &[u8]) {
        for &b in data {
            self.buf[self.push] = b;
            self.push = (self.push + 1) % RX_BUF_LEN;
            if self.push == self.pop {
                self.pop = (self.pop + 1) % RX_BUF_LEN;
            }
        }
    }

    /// Pull the next complete JSON payload (delimiters stripped), if one is
    /// buffered.
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        loop {
            let end = self.find(ETX)?;
            match self.find_before(STX, end) {
                Some(begin) => {
                    // Drop everything up to and including the STX.
                    self.pop = (begin + 1) % RX_BUF_LEN;

                    let mut payload = Vec::new();
                    let mut oversize = false;
                    while self.pop != end {
                        if payload.len() < MAX_CMD_LEN {
                            payload.push(self.buf[self.pop]);
                        } else {
                            oversize = true;
                        }
                        self.pop = (self.pop + 1) % RX_BUF_LEN;
                    }
                    // Skip the ETX.
                    self.pop = (self.pop + 1) % RX_BUF_LEN;

                    if oversize {
                        log::error!("oversized command dropped");
                        continue;
                    }
                    return Some(payload);
                }
                None => {
                    // ETX with no STX: skip past it.
                    self.pop = (end + 1) % RX_BUF_LEN;
                }
            }
        }
    }

    fn find(&self, needle: u8) -> Option<usize> {
        let mut i = self.pop;
        while i != self.push {
            if self.buf[i] == needle {
                return Some(i);
            }
            i = (i + 1) % RX_BUF_LEN;
        }
        None
    }

    /// Find `needle` strictly before ring position `limit`.
    fn find_before(&self, needle: u8, limit: usize) -> Option<usize> {
        let mut i = self.pop;
        while i != limit {
            if self.buf[i] == needle {
                return Some(i);
            }
            i = (i + 1) % RX_BUF_LEN;
        }
        None
    }
}

impl Default for FrameExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn framed(json: &[u8]) -> Vec<u8> {
        let mut v = vec![STX];
        v.extend_from_slice(json);
        v.push(ETX);
        v
    }

    #[test]
    fn extracts_a_whole_frame() {
        let mut fx = FrameExtractor::new();
        fx.push_bytes(&framed(b"{\"cmd\":\"get_status\"}"));
        assert_eq!(fx.next_frame().unwrap(), b"{\"cmd\":\"get_status\"}");
        assert!(fx.next_frame().is_none());
    }

    #[test]
    fn reassembles_split_delivery() {
        let mut fx = FrameExtractor::new();
        let frame = framed(b"{\"cmd\":\"poweroff\"}");
        fx.push_bytes(&frame[..5]);
        assert!(fx.next_frame().is_none());
        fx.push_bytes(&frame[5..]);
        assert_eq!(fx.next_frame().unwrap(), b"{\"cmd\":\"poweroff\"}");
    }

    #[test]
    fn two_queued_commands_come_out_in_order() {
        let mut fx = FrameExtractor::new();
        let mut bytes = framed(b"{\"cmd\":\"record_on\"}");
        bytes.extend_from_slice(&framed(b"{\"cmd\":\"record_off\"}"));
        fx.push_bytes(&bytes);
        assert_eq!(fx.next_frame().unwrap(), b"{\"cmd\":\"record_on\"}");
        assert_eq!(fx.next_frame().unwrap(), b"{\"cmd\":\"record_off\"}");
        assert!(fx.next_frame().is_none());
    }

    #[test]
    fn spurious_etx_is_skipped_silently() {
        let mut fx = FrameExtractor::new();
        let mut bytes = vec![ETX, ETX];
        bytes.extend_from_slice(&framed(b"{}"));
        fx.push_bytes(&bytes);
        assert_eq!(fx.next_frame().unwrap(), b"{}");
    }

    #[test]
    fn leading_garbage_before_stx_is_discarded() {
        let mut fx = FrameExtractor::new();
        let mut bytes = b"noise".to_vec();
        bytes.extend_from_slice(&framed(b"{\"cmd\":\"get_wifi\"}"));
        fx.push_bytes(&bytes);
        assert_eq!(fx.next_frame().unwrap(), b"{\"cmd\":\"get_wifi\"}");
    }

    #[test]
    fn oversized_command_is_dropped_and_resyncs() {
        let mut fx = FrameExtractor::new();
        let big = vec![b'x'; MAX_CMD_LEN + 50];
        fx.push_bytes(&framed(&big));
        fx.push_bytes(&framed(b"{\"cmd\":\"get_status\"}"));
        assert_eq!(fx.next_frame().unwrap(), b"{\"cmd\":\"get_status\"}");
    }

    #[test]
    fn empty_frame_is_returned_empty() {
        let mut fx = FrameExtractor::new();
        fx.push_bytes(&[STX, ETX]);
        assert_eq!(fx.next_frame().unwrap(), b"");
    }
}
