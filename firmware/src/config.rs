//! Operating state: the user-settable camera parameters.
//!
//! These are the values the settings screen and the `get_config`/`set_config`
//! commands trade in.  They are persisted in the battery-backed parameter
//! store and pushed to the orchestrator via its record-parameters-updated
//! signal whenever they change.

use serde::{Deserialize, Serialize};

use crate::render::palettes::Palette;

/// Recording intervals (seconds) the interval selector cycles through.
/// Anything else arriving over the wire or from a corrupted store snaps to
/// the first entry.
pub const RECORD_INTERVALS: [u16; 7] = [1, 5, 30, 60, 300, 1800, 3600];

/// Lepton gain mode.  The numeric values are the wire and store encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum GainMode {
    High = 0,
    Low = 1,
    Auto = 2,
}

impl GainMode {
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::High,
            1 => Self::Low,
            _ => Self::Auto,
        }
    }
}

/// Camera operating state (the original firmware's "GUI state").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpState {
    /// Include the ArduCAM JPEG in recorded files.
    pub rec_arducam_enable: bool,
    /// Include the Lepton radiometric data in recorded files.
    pub rec_lepton_enable: bool,
    pub gain_mode: GainMode,
    pub palette: Palette,
    /// Seconds between recorded files.  Always one of [`RECORD_INTERVALS`].
    pub record_interval: u16,
}

impl Default for OpState {
    fn default() -> Self {
        Self {
            rec_arducam_enable: true,
            rec_lepton_enable: true,
            gain_mode: GainMode::Auto,
            palette: Palette::Fusion,
            record_interval: 1,
        }
    }
}

/// Snap an arbitrary interval to the allowed set.  Values not in
/// [`RECORD_INTERVALS`] fall back to the first (shortest) entry.
pub fn snap_record_interval(secs: u16) -> u16 {
    if RECORD_INTERVALS.contains(&secs) {
        secs
    } else {
        RECORD_INTERVALS[0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_intervals_pass_through() {
        for secs in RECORD_INTERVALS {
            assert_eq!(snap_record_interval(secs), secs);
        }
    }

    #[test]
    fn invalid_interval_snaps_to_first() {
        assert_eq!(snap_record_interval(0), 1);
        assert_eq!(snap_record_interval(2), 1);
        assert_eq!(snap_record_interval(7200), 1);
    }

    #[test]
    fn default_state_is_the_cold_boot_state() {
        let st = OpState::default();
        assert!(st.rec_arducam_enable);
        assert!(st.rec_lepton_enable);
        assert_eq!(st.gain_mode, GainMode::Auto);
        assert_eq!(st.palette, Palette::Fusion);
        assert_eq!(st.record_interval, 1);
    }

    #[test]
    fn gain_mode_round_trips_through_store_encoding() {
        for mode in [GainMode::High, GainMode::Low, GainMode::Auto] {
            assert_eq!(GainMode::from_u8(mode as u8), mode);
        }
        // Out-of-range store bytes decode as Auto.
        assert_eq!(GainMode::from_u8(7), GainMode::Auto);
    }
}
