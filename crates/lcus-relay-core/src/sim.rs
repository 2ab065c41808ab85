//! Simulated relay board
//!
//! An in-memory [`Transport`] that answers like a real board of either family, for tests
//! and for running the controller without hardware. Every write is recorded with a
//! timestamp so callers can assert on command order and spacing.
//!
//! Like the hardware, the simulation ignores frames with a bad checksum or a channel it
//! does not have, and a status reply ends with a read that returns nothing.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use crate::protocol::{
    frame::{checksum, FRAME_LEN, START_MARKER},
    OpCode, RelayError, RelayState, Transport, MAX_CHANNELS,
};

/// Which reply dialect the simulated board speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoardFamily {
    /// `CH<n>: ON|OFF` status lines, no feedback frames
    Ascii,
    /// Raw status bytes and feedback frames
    Feedback,
}

/// One write seen by the board
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRecord {
    /// When the write arrived
    pub at: Instant,
    /// Bytes written
    pub bytes: Vec<u8>,
}

#[derive(Debug)]
struct BoardInner {
    family: BoardFamily,
    relays: Vec<RelayState>,
    stuck: HashSet<usize>,
    rx: VecDeque<u8>,
    writes: Vec<WriteRecord>,
    connected: bool,
}

/// Cloneable handle to a simulated board; clones share the same relays
#[derive(Debug, Clone)]
pub struct SimulatedBoard {
    inner: Arc<Mutex<BoardInner>>,
}

impl SimulatedBoard {
    /// A board with `channels` relays, all de-energized
    pub fn new(family: BoardFamily, channels: usize) -> Self {
        let channels = channels.min(MAX_CHANNELS);
        Self {
            inner: Arc::new(Mutex::new(BoardInner {
                family,
                relays: vec![RelayState::Closed; channels],
                stuck: HashSet::new(),
                rx: VecDeque::new(),
                writes: Vec::new(),
                connected: true,
            })),
        }
    }

    /// Board that answers with `CH<n>: ON|OFF` lines
    pub fn ascii(channels: usize) -> Self {
        Self::new(BoardFamily::Ascii, channels)
    }

    /// Board that answers with status bytes and feedback frames
    pub fn feedback(channels: usize) -> Self {
        Self::new(BoardFamily::Feedback, channels)
    }

    /// Make a relay (0-based) ignore every command, as a failed coil would
    pub fn with_stuck_channel(self, channel: usize) -> Self {
        self.lock().stuck.insert(channel);
        self
    }

    fn lock(&self) -> MutexGuard<'_, BoardInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reply dialect
    pub fn family(&self) -> BoardFamily {
        self.lock().family
    }

    /// Number of relays
    pub fn channels(&self) -> usize {
        self.lock().relays.len()
    }

    /// Physical state of a relay (0-based)
    pub fn relay(&self, channel: usize) -> Option<RelayState> {
        self.lock().relays.get(channel).copied()
    }

    /// Physical state of every relay
    pub fn relays(&self) -> Vec<RelayState> {
        self.lock().relays.clone()
    }

    /// Change a relay behind the driver's back
    pub fn set_relay(&self, channel: usize, state: RelayState) {
        if let Some(slot) = self.lock().relays.get_mut(channel) {
            *slot = state;
        }
    }

    /// Queue raw bytes as if the board had sent them
    pub fn inject(&self, bytes: &[u8]) {
        self.lock().rx.extend(bytes.iter().copied());
    }

    /// Every write so far, oldest first
    pub fn writes(&self) -> Vec<WriteRecord> {
        self.lock().writes.clone()
    }

    /// Written bytes without timestamps
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.lock().writes.iter().map(|w| w.bytes.clone()).collect()
    }

    /// Forget recorded writes
    pub fn clear_writes(&self) {
        self.lock().writes.clear();
    }

    /// Unplug the board; later I/O fails with `NotConnected`
    pub fn disconnect(&self) {
        self.lock().connected = false;
    }

    fn connected(&self) -> Result<MutexGuard<'_, BoardInner>, RelayError> {
        let inner = self.inner.lock().map_err(|_| RelayError::LockPoisoned)?;
        if !inner.connected {
            return Err(RelayError::NotConnected);
        }
        Ok(inner)
    }
}

impl BoardInner {
    fn handle(&mut self, data: &[u8]) {
        match data.first().copied() {
            Some(0xFF) => self.answer_status(),
            Some(START_MARKER) if data.len() >= FRAME_LEN => self.handle_frame(&data[..FRAME_LEN]),
            _ => tracing::debug!("simulated board ignored {:02x?}", data),
        }
    }

    fn answer_status(&mut self) {
        match self.family {
            BoardFamily::Ascii => {
                for (i, state) in self.relays.iter().enumerate() {
                    let word = if state.is_open() { "ON" } else { "OFF" };
                    self.rx.extend(format!("CH{}: {}\r\n", i + 1, word).bytes());
                }
            }
            BoardFamily::Feedback => {
                let bytes: Vec<u8> = self.relays.iter().map(RelayState::as_bit).collect();
                self.rx.extend(bytes);
            }
        }
    }

    fn handle_frame(&mut self, frame: &[u8]) {
        if frame[3] != checksum(&frame[..3]) {
            return;
        }
        let Some(channel) = (frame[1] as usize).checked_sub(1) else {
            return;
        };
        if channel >= self.relays.len() {
            return;
        }
        let Some(op) = OpCode::from_byte(frame[2]) else {
            return;
        };
        if self.family == BoardFamily::Ascii && op.expects_feedback() {
            return;
        }

        let current = self.relays[channel];
        let next = match op {
            OpCode::Open | OpCode::OpenWithFeedback => RelayState::Open,
            OpCode::Close | OpCode::CloseWithFeedback => RelayState::Closed,
            OpCode::Invert => current.toggled(),
            OpCode::Check => current,
        };
        if !self.stuck.contains(&channel) {
            self.relays[channel] = next;
        }

        if op.expects_feedback() {
            let state = self.relays[channel].as_bit();
            let reply = [START_MARKER, frame[1], state];
            self.rx.extend(reply);
            self.rx.push_back(checksum(&reply));
        }
    }
}

impl Transport for SimulatedBoard {
    fn write_all(&mut self, data: &[u8]) -> Result<(), RelayError> {
        let mut inner = self.connected()?;
        inner.writes.push(WriteRecord {
            at: Instant::now(),
            bytes: data.to_vec(),
        });
        inner.handle(data);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), RelayError> {
        self.connected().map(|_| ())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, RelayError> {
        let mut inner = self.connected()?;
        let n = buf.len().min(inner.rx.len());
        for (slot, byte) in buf.iter_mut().zip(inner.rx.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn reset_input_buffer(&mut self) -> Result<(), RelayError> {
        self.connected()?.rx.clear();
        Ok(())
    }
}
