use bytes::{Buf, BufMut, BytesMut};
use tracing::{debug, trace};

use crate::codec::{Frame, CRC_SIZE, HEADER, PREFIX_SIZE};
use crate::crc::crc16;

/// Position of the decode cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeState {
    WaitHeader1,
    WaitHeader2,
    WaitLen,
    WaitData,
    WaitCrc,
    Received,
}

/// Resumable frame decoder.
///
/// Each call to [`step`](FrameDecoder::step) performs exactly one state
/// transition. A mismatch (wrong second header byte, short read, CRC
/// failure) returns the cursor to [`DecodeState::WaitHeader1`] and keeps
/// every byte consumed after the frame's first header byte in a replay
/// buffer, which later steps drain before asking for new input. A single
/// corrupted byte therefore never swallows the frame that follows it.
#[derive(Debug)]
pub struct FrameDecoder {
    state: DecodeState,
    expected_len: usize,
    acc: BytesMut,
    replay: BytesMut,
    completed: Option<Frame>,
    resyncs: u64,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            state: DecodeState::WaitHeader1,
            expected_len: 0,
            acc: BytesMut::with_capacity(PREFIX_SIZE + u8::MAX as usize),
            replay: BytesMut::new(),
            completed: None,
            resyncs: 0,
        }
    }

    /// Current state.
    pub fn state(&self) -> DecodeState {
        self.state
    }

    /// Number of times the cursor fell back to header search.
    pub fn resyncs(&self) -> u64 {
        self.resyncs
    }

    /// Bytes the current state consumes in one step.
    pub fn wanted(&self) -> usize {
        match self.state {
            DecodeState::WaitHeader1 | DecodeState::WaitHeader2 | DecodeState::WaitLen => 1,
            DecodeState::WaitData => self.expected_len,
            DecodeState::WaitCrc => CRC_SIZE,
            DecodeState::Received => 0,
        }
    }

    /// Bytes the next step needs from new input after draining the replay buffer.
    pub fn missing(&self) -> usize {
        self.wanted().saturating_sub(self.replay.len())
    }

    /// Bytes held for rescanning.
    pub fn pending(&self) -> usize {
        self.replay.len()
    }

    /// Drop all partial state and return to header search.
    pub fn reset(&mut self) {
        self.state = DecodeState::WaitHeader1;
        self.expected_len = 0;
        self.acc.clear();
        self.replay.clear();
        self.completed = None;
    }

    /// Perform one state transition.
    ///
    /// `input` holds bytes newly read from the link, normally
    /// [`missing`](FrameDecoder::missing) of them. Fewer is a short read;
    /// any surplus is kept for later steps. Returns the frame when the step
    /// leaves [`DecodeState::Received`].
    pub fn step(&mut self, input: &[u8]) -> Option<Frame> {
        let wanted = self.wanted();

        let from_replay = wanted.min(self.replay.len());
        let mut chunk = self.replay.split_to(from_replay);
        chunk.extend_from_slice(input);
        if chunk.len() > wanted {
            self.replay.extend_from_slice(&chunk.split_off(wanted));
        }
        let bytes = &chunk[..];

        match self.state {
            DecodeState::WaitHeader1 => {
                match bytes.first() {
                    Some(&b) if b == HEADER[0] => {
                        self.acc.clear();
                        self.acc.put_u8(b);
                        self.state = DecodeState::WaitHeader2;
                    }
                    Some(&b) => trace!(byte = b, "discarding byte outside frame"),
                    None => {}
                }
                None
            }
            DecodeState::WaitHeader2 => {
                match bytes.first() {
                    Some(&b) if b == HEADER[1] => {
                        self.acc.put_u8(b);
                        self.state = DecodeState::WaitLen;
                    }
                    _ => self.resync(bytes, "second header byte mismatch"),
                }
                None
            }
            DecodeState::WaitLen => {
                match bytes.first() {
                    Some(&n) => {
                        self.acc.put_u8(n);
                        self.expected_len = n as usize;
                        self.state = DecodeState::WaitData;
                    }
                    None => self.resync(bytes, "length byte missing"),
                }
                None
            }
            DecodeState::WaitData => {
                if bytes.len() < self.expected_len {
                    self.resync(bytes, "short payload read");
                } else {
                    self.acc.extend_from_slice(bytes);
                    self.state = DecodeState::WaitCrc;
                }
                None
            }
            DecodeState::WaitCrc => {
                if bytes.len() < CRC_SIZE {
                    self.resync(bytes, "short crc read");
                    return None;
                }
                let received = u16::from_be_bytes([bytes[0], bytes[1]]);
                let computed = crc16(&self.acc);
                if received == computed {
                    let payload = self.acc.split_off(PREFIX_SIZE).freeze();
                    self.acc.clear();
                    self.completed = Some(Frame { payload });
                    self.state = DecodeState::Received;
                } else {
                    trace!(received, computed, "crc check failed");
                    self.resync(bytes, "crc mismatch");
                }
                None
            }
            DecodeState::Received => {
                self.state = DecodeState::WaitHeader1;
                self.completed.take()
            }
        }
    }

    /// Decode from a buffer that only ever grows, such as a stream codec's
    /// read buffer. Incomplete input waits for more bytes instead of
    /// counting as a short read.
    pub fn decode(&mut self, src: &mut BytesMut) -> Option<Frame> {
        loop {
            let missing = self.missing();
            if missing > src.len() {
                return None;
            }
            let input = src.split_to(missing);
            if let Some(frame) = self.step(&input) {
                return Some(frame);
            }
        }
    }

    fn resync(&mut self, partial: &[u8], reason: &'static str) {
        let mut rescan =
            BytesMut::with_capacity(self.acc.len() + partial.len() + self.replay.len());
        if self.acc.len() > 1 {
            self.acc.advance(1);
            rescan.extend_from_slice(&self.acc);
        }
        rescan.extend_from_slice(partial);
        rescan.extend_from_slice(&self.replay);

        self.replay = rescan;
        self.acc.clear();
        self.expected_len = 0;
        self.state = DecodeState::WaitHeader1;
        self.resyncs += 1;
        debug!(reason, rescan = self.replay.len(), "frame desync, searching for header");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{encode, MAX_PAYLOAD};

    fn decode_all(wire: &[u8]) -> Vec<Frame> {
        let mut decoder = FrameDecoder::new();
        let mut buf = BytesMut::from(wire);
        let mut frames = Vec::new();
        while let Some(frame) = decoder.decode(&mut buf) {
            frames.push(frame);
        }
        frames
    }

    /// Feed `wire` the way a port would: each step gets at most what is
    /// left, so the tail end produces short reads.
    fn step_through(wire: &[u8]) -> Vec<Frame> {
        let mut decoder = FrameDecoder::new();
        let mut src = wire;
        let mut frames = Vec::new();
        loop {
            let missing = decoder.missing();
            if missing == 0 {
                frames.extend(decoder.step(&[]));
                continue;
            }
            if src.is_empty()
                && decoder.pending() == 0
                && decoder.state() == DecodeState::WaitHeader1
            {
                return frames;
            }
            let (chunk, rest) = src.split_at(missing.min(src.len()));
            src = rest;
            frames.extend(decoder.step(chunk));
        }
    }

    #[test]
    fn roundtrip_every_payload_length() {
        for len in 0..=MAX_PAYLOAD {
            let payload: Vec<u8> = (0..len).map(|i| (i * 7 + len) as u8).collect();
            let wire = encode(&payload).unwrap();
            let frames = decode_all(&wire);
            assert_eq!(frames.len(), 1, "payload length {len}");
            assert_eq!(frames[0].payload.as_ref(), payload.as_slice());
        }
    }

    #[test]
    fn one_transition_per_step() {
        let wire = encode(&[0x07, 0xAA]).unwrap();
        let mut decoder = FrameDecoder::new();

        assert_eq!(decoder.step(&wire[0..1]), None);
        assert_eq!(decoder.state(), DecodeState::WaitHeader2);
        assert_eq!(decoder.step(&wire[1..2]), None);
        assert_eq!(decoder.state(), DecodeState::WaitLen);
        assert_eq!(decoder.step(&wire[2..3]), None);
        assert_eq!(decoder.state(), DecodeState::WaitData);
        assert_eq!(decoder.wanted(), 2);
        assert_eq!(decoder.step(&wire[3..5]), None);
        assert_eq!(decoder.state(), DecodeState::WaitCrc);
        assert_eq!(decoder.step(&wire[5..7]), None);
        assert_eq!(decoder.state(), DecodeState::Received);
        assert_eq!(decoder.wanted(), 0);

        let frame = decoder.step(&[]).expect("received state yields the frame");
        assert_eq!(frame.payload.as_ref(), &[0x07, 0xAA]);
        assert_eq!(decoder.state(), DecodeState::WaitHeader1);
    }

    #[test]
    fn noise_before_header_is_skipped() {
        let mut wire = vec![0x00, 0x13, 0x59, 0x00, 0xFF];
        wire.extend_from_slice(&encode(b"\x42ok").unwrap());

        let frames = decode_all(&wire);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload.as_ref(), b"\x42ok");
    }

    #[test]
    fn corrupted_byte_anywhere_resyncs_to_next_frame() {
        let first = encode(&[0x07, 0x10, 0x20, 0x30]).unwrap();
        let second = encode(&[0x08, 0xBE, 0xEF]).unwrap();

        for pos in 0..first.len() {
            let mut wire = first.to_vec();
            wire[pos] ^= 0x5A;
            wire.extend_from_slice(&second);

            let frames = step_through(&wire);
            assert_eq!(frames.len(), 1, "corruption at byte {pos}");
            assert_eq!(frames[0].payload.as_ref(), &[0x08, 0xBE, 0xEF]);
        }
    }

    #[test]
    fn inflated_length_does_not_swallow_next_frame() {
        let mut wire = encode(&[0x01, 0x02]).unwrap().to_vec();
        wire[2] = 0x40;
        wire.extend_from_slice(&encode(&[0x03]).unwrap());
        wire.extend_from_slice(&[0u8; 64]);

        let frames = decode_all(&wire);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload.as_ref(), &[0x03]);
    }

    #[test]
    fn back_to_back_headers_return_to_header_search_on_short_read() {
        let mut decoder = FrameDecoder::new();

        decoder.step(&[0x59]);
        decoder.step(&[0x49]);
        decoder.step(&[0x59]);
        assert_eq!(decoder.state(), DecodeState::WaitData);
        assert_eq!(decoder.wanted(), 0x59);

        // Only one byte arrives where 0x59 were needed.
        decoder.step(&[0x49]);
        assert_eq!(decoder.state(), DecodeState::WaitHeader1);
        assert_eq!(decoder.resyncs(), 1);

        // Draining the rescan buffer with no new input never blocks progress.
        for _ in 0..16 {
            if decoder.missing() == 0 {
                assert_eq!(decoder.step(&[]), None);
            } else {
                assert_eq!(decoder.step(&[]), None);
                assert_eq!(decoder.state(), DecodeState::WaitHeader1);
            }
        }
        assert_eq!(decoder.state(), DecodeState::WaitHeader1);
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn surplus_input_is_kept_for_later_steps() {
        let wire = encode(b"\x05abc").unwrap();
        let mut decoder = FrameDecoder::new();

        assert_eq!(decoder.step(&wire), None);
        assert_eq!(decoder.pending(), wire.len() - 1);

        let mut frame = None;
        while frame.is_none() {
            frame = decoder.step(&[]);
        }
        assert_eq!(frame.unwrap().payload.as_ref(), b"\x05abc");
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn incremental_buffer_waits_for_more() {
        let wire = encode(b"\x09hello").unwrap();
        let mut decoder = FrameDecoder::new();
        let mut buf = BytesMut::new();

        for (i, byte) in wire.iter().enumerate() {
            buf.put_u8(*byte);
            let frame = decoder.decode(&mut buf);
            if i + 1 < wire.len() {
                assert!(frame.is_none());
            } else {
                assert_eq!(frame.unwrap().payload.as_ref(), b"\x09hello");
            }
        }
        assert_eq!(decoder.resyncs(), 0);
    }

    #[test]
    fn reset_clears_partial_frame() {
        let wire = encode(b"\x01\x02").unwrap();
        let mut decoder = FrameDecoder::new();
        decoder.step(&wire[..1]);
        decoder.step(&wire[1..2]);
        decoder.reset();
        assert_eq!(decoder.state(), DecodeState::WaitHeader1);
        assert_eq!(decoder.pending(), 0);
    }
}
