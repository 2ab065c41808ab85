//! Cached relay states

use crate::protocol::{RelayError, RelayState, MAX_CHANNELS};

/// Number of channels on a board, once detected
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ChannelCount {
    /// No status query has answered yet
    #[default]
    Unknown,
    /// Detected from the last status reply
    Known(usize),
}

impl ChannelCount {
    /// The detected count, if any
    pub fn known(&self) -> Option<usize> {
        match self {
            ChannelCount::Unknown => None,
            ChannelCount::Known(n) => Some(*n),
        }
    }
}

/// One decoded status reply: 0-based channel and reported state, in reply order
pub type StatusReport = [(usize, RelayState)];

/// A driver's belief about the physical board
///
/// Refreshed by status queries and updated optimistically by commands. Only the
/// owning driver mutates it. Alongside the cache it keeps what the last status
/// reply said per channel, with `None` for channels the reply did not mention.
#[derive(Debug, Clone, Default)]
pub struct DeviceState {
    slots: [RelayState; MAX_CHANNELS],
    reported: [Option<RelayState>; MAX_CHANNELS],
    count: ChannelCount,
}

impl DeviceState {
    /// All channels closed, count unknown
    pub fn new() -> Self {
        Self::default()
    }

    /// Channel count detected by the last status reply
    pub fn count(&self) -> ChannelCount {
        self.count
    }

    /// Exclusive upper bound for channel indices: the detected count, or the board maximum
    pub fn limit(&self) -> usize {
        self.count.known().unwrap_or(MAX_CHANNELS)
    }

    /// Reject a channel index outside the board
    pub fn ensure_valid(&self, channel: usize) -> Result<(), RelayError> {
        let limit = self.limit();
        if channel >= limit {
            return Err(RelayError::InvalidChannel { channel, limit });
        }
        Ok(())
    }

    /// Cached state of one channel
    pub fn get(&self, channel: usize) -> Result<RelayState, RelayError> {
        self.ensure_valid(channel)?;
        Ok(self.slots[channel])
    }

    /// Cached states of every channel within [`DeviceState::limit`]
    pub fn snapshot(&self) -> Vec<RelayState> {
        self.slots[..self.limit()].to_vec()
    }

    /// Cached states of the detected channels; empty while the count is unknown
    pub fn detected(&self) -> Vec<RelayState> {
        let count = self.count.known().unwrap_or(0);
        self.slots[..count].to_vec()
    }

    /// What the last status reply said about `channel`
    pub fn reported(&self, channel: usize) -> Option<RelayState> {
        self.reported.get(channel).copied().flatten()
    }

    pub(crate) fn set(&mut self, channel: usize, state: RelayState) -> Result<(), RelayError> {
        self.ensure_valid(channel)?;
        self.slots[channel] = state;
        Ok(())
    }

    /// Replace the cache with a complete status reply
    ///
    /// The reply is checked in full before anything changes. Channels the reply skips
    /// read as closed in the cache and as unreported in [`DeviceState::reported`]; the
    /// count becomes the highest reported channel.
    pub(crate) fn commit_report(&mut self, report: &StatusReport) -> Result<(), RelayError> {
        let reported = check_report(report)?;

        let detected = report.iter().map(|(channel, _)| channel + 1).max().unwrap_or(0);
        if detected != report.len() {
            tracing::warn!(
                "status reply covers {} of {} channels",
                report.len(),
                detected
            );
        }

        self.slots = [RelayState::Closed; MAX_CHANNELS];
        for (channel, state) in report {
            self.slots[*channel] = *state;
        }
        self.reported = reported;
        self.set_count(detected);
        Ok(())
    }

    /// Overwrite the reported channels without resetting the rest or the count
    pub(crate) fn merge_report(&mut self, report: &StatusReport) -> Result<(), RelayError> {
        let reported = check_report(report)?;
        for (channel, state) in report {
            self.slots[*channel] = *state;
        }
        for (slot, state) in self.reported.iter_mut().zip(reported) {
            if state.is_some() {
                *slot = state;
            }
        }
        Ok(())
    }

    /// Record how many channels the last status reply covered
    ///
    /// An empty reply leaves the count unknown so the next lookup queries again.
    fn set_count(&mut self, detected: usize) {
        match (self.count, detected) {
            (_, 0) => tracing::warn!("status query returned no channels"),
            (ChannelCount::Known(previous), n) if previous != n => tracing::warn!(
                "channel count changed from {} to {} between status queries",
                previous,
                n
            ),
            _ => {}
        }

        self.count = if detected == 0 {
            ChannelCount::Unknown
        } else {
            ChannelCount::Known(detected)
        };
    }
}

/// Reject replies naming a channel past the board maximum or naming one twice
fn check_report(report: &StatusReport) -> Result<[Option<RelayState>; MAX_CHANNELS], RelayError> {
    let mut reported = [None; MAX_CHANNELS];
    for (channel, state) in report {
        let slot = reported.get_mut(*channel).ok_or_else(|| {
            RelayError::UnrecognizedResponse(format!(
                "board reported channel {} beyond the {}-channel limit",
                channel + 1,
                MAX_CHANNELS
            ))
        })?;
        if slot.is_some() {
            return Err(RelayError::UnrecognizedResponse(format!(
                "board reported channel {} twice",
                channel + 1
            )));
        }
        *slot = Some(*state);
    }
    Ok(reported)
}

#[cfg(test)]
mod tests {
    use super::*;
    use RelayState::{Closed, Open};

    #[test]
    fn test_initial_state() {
        let state = DeviceState::new();
        assert_eq!(state.count(), ChannelCount::Unknown);
        assert_eq!(state.limit(), MAX_CHANNELS);
        assert_eq!(state.snapshot(), vec![Closed; MAX_CHANNELS]);
        assert!(state.detected().is_empty());
        assert_eq!(state.reported(0), None);
    }

    #[test]
    fn test_known_count_bounds_access() {
        let mut state = DeviceState::new();
        state.commit_report(&[(0, Closed), (1, Closed), (2, Closed), (3, Closed)]).unwrap();
        state.set(3, Open).unwrap();
        assert_eq!(state.get(3).unwrap(), Open);
        assert!(matches!(
            state.get(4),
            Err(RelayError::InvalidChannel {
                channel: 4,
                limit: 4
            })
        ));
        assert_eq!(state.snapshot().len(), 4);
    }

    #[test]
    fn test_sparse_report() {
        let mut state = DeviceState::new();
        state.commit_report(&[(1, Open)]).unwrap();
        assert_eq!(state.count(), ChannelCount::Known(2));
        assert_eq!(state.detected(), vec![Closed, Open]);
        assert_eq!(state.reported(0), None);
        assert_eq!(state.reported(1), Some(Open));
    }

    #[test]
    fn test_rejected_report_leaves_cache_untouched() {
        let mut state = DeviceState::new();
        state.commit_report(&[(0, Open), (1, Open)]).unwrap();

        assert!(matches!(
            state.commit_report(&[(0, Closed), (8, Open)]),
            Err(RelayError::UnrecognizedResponse(_))
        ));
        assert!(matches!(
            state.commit_report(&[(0, Closed), (0, Open)]),
            Err(RelayError::UnrecognizedResponse(_))
        ));
        assert_eq!(state.detected(), vec![Open, Open]);
        assert_eq!(state.reported(0), Some(Open));
    }

    #[test]
    fn test_empty_reply_leaves_count_unknown() {
        let mut state = DeviceState::new();
        state.commit_report(&[(0, Open), (1, Closed)]).unwrap();
        state.commit_report(&[]).unwrap();
        assert_eq!(state.count(), ChannelCount::Unknown);
        assert_eq!(state.get(0).unwrap(), Closed);
        assert_eq!(state.reported(0), None);
    }

    #[test]
    fn test_merge_keeps_other_channels() {
        let mut state = DeviceState::new();
        state.commit_report(&[(0, Open), (1, Open)]).unwrap();
        state.merge_report(&[(1, Closed)]).unwrap();
        assert_eq!(state.detected(), vec![Open, Closed]);
        assert_eq!(state.reported(0), Some(Open));
        assert_eq!(state.count(), ChannelCount::Known(2));
    }
}
