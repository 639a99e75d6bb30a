//! Test frame generation and formatting.

use std::fmt::Write as _;

/// Bytes per transfer, matching the slave firmware's message size.
pub const FRAME_LEN: usize = 128;

pub type Frame = [u8; FRAME_LEN];

/// Wrapping 0..=255 counter that offsets each test frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameCounter(u8);

impl FrameCounter {
    pub fn new() -> Self {
        Self(0)
    }

    pub fn value(&self) -> u8 {
        self.0
    }

    /// Returns the current value and advances, wrapping 255 -> 0.
    pub fn advance(&mut self) -> u8 {
        let current = self.0;
        self.0 = self.0.wrapping_add(1);
        current
    }
}

/// Build a frame where byte[i] = (i + counter) mod 256.
pub fn build_test_frame(counter: u8) -> Frame {
    let mut frame = [0u8; FRAME_LEN];
    for (i, byte) in frame.iter_mut().enumerate() {
        *byte = (i as u8).wrapping_add(counter);
    }
    frame
}

/// Render bytes as a bracketed hex list: `[0x00, 0x01, ...]`
pub fn format_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(2 + bytes.len() * 6);
    out.push('[');
    for (i, byte) in bytes.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        let _ = write!(out, "{:#04x}", byte);
    }
    out.push(']');
    out
}

/// How a response relates to what was sent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EchoCheck {
    /// Response equals the frame sent in the same transfer
    Echo,
    /// Response equals the frame sent this many transfers earlier
    DelayedEcho(usize),
    /// All zeros, slave had nothing queued
    Zeros,
    Mismatch,
}

/// `history` holds earlier frames, most recent first.
pub fn check_echo<'a, I>(sent: &[u8], history: I, received: &[u8]) -> EchoCheck
where
    I: IntoIterator<Item = &'a Frame>,
{
    if received == sent {
        return EchoCheck::Echo;
    }
    if let Some(pos) = history.into_iter().position(|f| f.as_slice() == received) {
        return EchoCheck::DelayedEcho(pos + 1);
    }
    if received.iter().all(|&b| b == 0) {
        EchoCheck::Zeros
    } else {
        EchoCheck::Mismatch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn counter_zero_frame_counts_up() {
        let frame = build_test_frame(0);
        let expected: Vec<u8> = (0..128u8).collect();
        assert_eq!(frame.as_slice(), expected.as_slice());
        assert_eq!(frame[127], 0x7f);
    }

    #[test]
    fn counter_200_wraps_mid_frame() {
        let frame = build_test_frame(200);
        assert_eq!(frame[0], 200);
        assert_eq!(frame[55], 255);
        assert_eq!(frame[56], 0);
        assert_eq!(frame[60], 0x04);
    }

    #[test]
    fn counter_has_period_256() {
        let mut counter = FrameCounter::new();
        for expected in 0..=255u8 {
            assert_eq!(counter.advance(), expected);
        }
        assert_eq!(counter.value(), 0);
        assert_eq!(counter.advance(), 0);
        assert_eq!(counter.advance(), 1);
    }

    #[test]
    fn hex_formatting() {
        assert_eq!(format_hex(&[]), "[]");
        assert_eq!(format_hex(&[0x00, 0x0a, 0xff]), "[0x00, 0x0a, 0xff]");
    }

    #[test]
    fn echo_classification() {
        let sent = build_test_frame(5);
        let history = [build_test_frame(4), build_test_frame(3)];
        let zeros = [0u8; FRAME_LEN];
        let garbage = [0xA5u8; FRAME_LEN];

        assert_eq!(check_echo(&sent, &history, &sent), EchoCheck::Echo);
        assert_eq!(check_echo(&sent, &history, &history[0]), EchoCheck::DelayedEcho(1));
        assert_eq!(check_echo(&sent, &history, &history[1]), EchoCheck::DelayedEcho(2));
        assert_eq!(check_echo(&sent, &[], &zeros), EchoCheck::Zeros);
        assert_eq!(check_echo(&sent, &history, &garbage), EchoCheck::Mismatch);
    }

    proptest! {
        #[test]
        fn frame_bytes_follow_index_plus_counter(counter in any::<u8>()) {
            let frame = build_test_frame(counter);
            prop_assert_eq!(frame.len(), FRAME_LEN);
            for (i, &byte) in frame.iter().enumerate() {
                prop_assert_eq!(byte as usize, (i + counter as usize) % 256);
            }
        }

        #[test]
        fn counter_after_n_steps(steps in 0usize..2048) {
            let mut counter = FrameCounter::new();
            for _ in 0..steps {
                counter.advance();
            }
            prop_assert_eq!(counter.value() as usize, steps % 256);
        }
    }
}
