//! Byte layout of the persistent parameter store.
//!
//! The store is a fixed array in the RTC's battery-backed SRAM: magic word,
//! layout version, the fields below, and a final checksum byte (sum of all
//! other bytes mod 256).  Layout upgrades are additive — version 1 content
//! is kept and the new fields get defaults.
//!
//! ```text
//! 0   magic 0x12        3   rec enable        5..  AP SSID (33)
//! 1   magic 0x34        4   wifi flags        ...  AP PW, STA SSID, STA PW
//! 2   layout version                          ...  AP IP, STA IP (4+4)
//!                                             ...  rec enables, gain, palette
//!                                             ...  record interval (BE u16)
//! 235 checksum
//! ```

use heapless::String as HString;

use crate::clock::ds3232::SRAM_SIZE;
use crate::config::{snap_record_interval, GainMode, OpState, RECORD_INTERVALS};
use crate::net::wifi::{Ipv4, WifiInfo, FLAG_STARTUP_ENABLE, FLAG_USER_MASK};
use crate::render::palettes::Palette;

pub const MAGIC_WORD_0: u8 = 0x12;
pub const MAGIC_WORD_1: u8 = 0x34;
pub const LAYOUT_VERSION: u8 = 2;

pub const SSID_MAX_LEN: usize = 32;
pub const PW_MAX_LEN: usize = 32;
pub const PALETTE_NAME_LEN: usize = 16;

// String regions include an extra byte for a null terminator.
const ADDR_MAGIC_0: usize = 0;
const ADDR_MAGIC_1: usize = 1;
const ADDR_VERSION: usize = 2;
const ADDR_REC_EN: usize = 3;
const ADDR_WIFI_FLAGS: usize = 4;
const ADDR_AP_SSID: usize = 5;
const ADDR_AP_PW: usize = ADDR_AP_SSID + SSID_MAX_LEN + 1;
// Version 2 additions start here.
const ADDR_STA_SSID: usize = ADDR_AP_PW + PW_MAX_LEN + 1;
const ADDR_STA_PW: usize = ADDR_STA_SSID + SSID_MAX_LEN + 1;
const ADDR_AP_IP: usize = ADDR_STA_PW + PW_MAX_LEN + 1;
const ADDR_STA_IP: usize = ADDR_AP_IP + 4;
const ADDR_REC_ARD_EN: usize = ADDR_STA_IP + 4;
const ADDR_REC_LEP_EN: usize = ADDR_REC_ARD_EN + 1;
const ADDR_GAIN_MODE: usize = ADDR_REC_LEP_EN + 1;
const ADDR_PALETTE_NAME: usize = ADDR_GAIN_MODE + 1;
const ADDR_REC_INTERVAL: usize = ADDR_PALETTE_NAME + PALETTE_NAME_LEN + 1;
const ADDR_LAST_VALID: usize = ADDR_REC_INTERVAL + 2;
const ADDR_CHECKSUM: usize = SRAM_SIZE - 1;

/// A dirtied byte range to push back to the device (checksum excluded; the
/// store task always writes the checksum byte alongside).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub len: usize,
}

/// Whole-array span, used after (re)initialisation.
pub const SPAN_FULL: Span = Span {
    start: 0,
    len: SRAM_SIZE,
};
const SPAN_REC: Span = Span {
    start: ADDR_REC_EN,
    len: 1,
};
const SPAN_WIFI: Span = Span {
    start: ADDR_WIFI_FLAGS,
    len: ADDR_REC_ARD_EN - ADDR_WIFI_FLAGS,
};
const SPAN_GUI: Span = Span {
    start: ADDR_REC_ARD_EN,
    len: ADDR_LAST_VALID - ADDR_REC_ARD_EN,
};

/// The shadow copy of the store with typed accessors.
pub struct PsArray(pub [u8; SRAM_SIZE]);

impl PsArray {
    pub fn new(bytes: [u8; SRAM_SIZE]) -> Self {
        Self(bytes)
    }

    // ── Integrity ─────────────────────────────────────────────

    /// Sum of all bytes except the checksum byte, mod 256.
    pub fn checksum(&self) -> u8 {
        self.0[..ADDR_CHECKSUM]
            .iter()
            .fold(0u8, |acc, &b| acc.wrapping_add(b))
    }

    pub fn magic_valid(&self) -> bool {
        self.0[ADDR_MAGIC_0] == MAGIC_WORD_0 && self.0[ADDR_MAGIC_1] == MAGIC_WORD_1
    }

    /// Magic and checksum validate together.
    pub fn is_valid(&self) -> bool {
        self.magic_valid() && self.checksum() == self.0[ADDR_CHECKSUM]
    }

    pub fn version(&self) -> u8 {
        self.0[ADDR_VERSION]
    }

    fn update_checksum(&mut self) {
        self.0[ADDR_CHECKSUM] = self.checksum();
    }

    // ── Initialisation and upgrade ────────────────────────────

    /// Initialise the whole array from defaults.  `mac` is the base factory
    /// MAC; the soft-AP address (base + 1 in the last byte) derives the
    /// default SSID.
    pub fn init_defaults(&mut self, mac: [u8; 6]) {
        self.0.fill(0);
        self.0[ADDR_MAGIC_0] = MAGIC_WORD_0;
        self.0[ADDR_MAGIC_1] = MAGIC_WORD_1;
        self.0[ADDR_VERSION] = LAYOUT_VERSION;
        self.0[ADDR_REC_EN] = 0;
        self.0[ADDR_WIFI_FLAGS] = FLAG_STARTUP_ENABLE;
        let ssid = default_ap_ssid(mac);
        self.store_string(&ssid, ADDR_AP_SSID, SSID_MAX_LEN);
        self.store_string("", ADDR_AP_PW, PW_MAX_LEN);
        self.init_v2_fields();
        self.update_checksum();
    }

    /// Upgrade a valid version-1 array in place: keep its fields, default
    /// the additions, bump the version.
    pub fn upgrade_from_v1(&mut self) {
        self.0[ADDR_VERSION] = LAYOUT_VERSION;
        self.init_v2_fields();
        self.update_checksum();
    }

    fn init_v2_fields(&mut self) {
        self.store_string("", ADDR_STA_SSID, SSID_MAX_LEN);
        self.store_string("", ADDR_STA_PW, PW_MAX_LEN);
        self.set_ip(ADDR_AP_IP, Ipv4([1, 4, 168, 192])); // 192.168.4.1
        self.set_ip(ADDR_STA_IP, Ipv4([2, 4, 168, 192])); // 192.168.4.2
        self.0[ADDR_REC_ARD_EN] = 1;
        self.0[ADDR_REC_LEP_EN] = 1;
        self.0[ADDR_GAIN_MODE] = GainMode::Auto as u8;
        self.store_string(Palette::Fusion.name(), ADDR_PALETTE_NAME, PALETTE_NAME_LEN);
        self.0[ADDR_REC_INTERVAL] = 0;
        self.0[ADDR_REC_INTERVAL + 1] = 1;
    }

    // ── Wi-Fi ─────────────────────────────────────────────────

    pub fn wifi_info(&self) -> WifiInfo {
        WifiInfo {
            ap_ssid: self.read_string(ADDR_AP_SSID, SSID_MAX_LEN),
            ap_pw: self.read_string(ADDR_AP_PW, PW_MAX_LEN),
            sta_ssid: self.read_string(ADDR_STA_SSID, SSID_MAX_LEN),
            sta_pw: self.read_string(ADDR_STA_PW, PW_MAX_LEN),
            flags: self.0[ADDR_WIFI_FLAGS] & FLAG_USER_MASK,
            ap_ip: self.ip(ADDR_AP_IP),
            sta_ip: self.ip(ADDR_STA_IP),
        }
    }

    pub fn set_wifi_info(&mut self, info: &WifiInfo) -> Span {
        self.store_string(&info.ap_ssid, ADDR_AP_SSID, SSID_MAX_LEN);
        self.store_string(&info.ap_pw, ADDR_AP_PW, PW_MAX_LEN);
        self.store_string(&info.sta_ssid, ADDR_STA_SSID, SSID_MAX_LEN);
        self.store_string(&info.sta_pw, ADDR_STA_PW, PW_MAX_LEN);
        self.0[ADDR_WIFI_FLAGS] = info.flags & FLAG_USER_MASK;
        self.set_ip(ADDR_AP_IP, info.ap_ip);
        self.set_ip(ADDR_STA_IP, info.sta_ip);
        self.update_checksum();
        SPAN_WIFI
    }

    // ── Recording auto-resume flag ────────────────────────────

    pub fn rec_enable(&self) -> bool {
        self.0[ADDR_REC_EN] != 0
    }

    pub fn set_rec_enable(&mut self, en: bool) -> Span {
        self.0[ADDR_REC_EN] = en as u8;
        self.update_checksum();
        SPAN_REC
    }

    // ── Operating state ───────────────────────────────────────

    /// Read the operating state, repairing out-of-range fields in place.
    /// Returns the state and, when a repair happened, the span to write
    /// back.
    pub fn op_state(&mut self) -> (OpState, Option<Span>) {
        let mut repaired = false;

        let raw_interval =
            u16::from_be_bytes([self.0[ADDR_REC_INTERVAL], self.0[ADDR_REC_INTERVAL + 1]]);
        let record_interval = snap_record_interval(raw_interval);
        if record_interval != raw_interval {
            let be = record_interval.to_be_bytes();
            self.0[ADDR_REC_INTERVAL] = be[0];
            self.0[ADDR_REC_INTERVAL + 1] = be[1];
            repaired = true;
            log::error!("reset record_interval to legal value");
        }

        let name: HString<PALETTE_NAME_LEN> = self.read_string(ADDR_PALETTE_NAME, PALETTE_NAME_LEN);
        let palette = match Palette::by_name(name.as_str()) {
            Some(p) => p,
            None => {
                let p = Palette::Grayscale;
                self.store_string(p.name(), ADDR_PALETTE_NAME, PALETTE_NAME_LEN);
                repaired = true;
                log::error!("reset palette to legal value");
                p
            }
        };

        let state = OpState {
            rec_arducam_enable: self.0[ADDR_REC_ARD_EN] != 0,
            rec_lepton_enable: self.0[ADDR_REC_LEP_EN] != 0,
            gain_mode: GainMode::from_u8(self.0[ADDR_GAIN_MODE]),
            palette,
            record_interval,
        };

        let span = if repaired {
            self.update_checksum();
            Some(SPAN_GUI)
        } else {
            None
        };
        (state, span)
    }

    pub fn set_op_state(&mut self, state: &OpState) -> Span {
        self.0[ADDR_REC_ARD_EN] = state.rec_arducam_enable as u8;
        self.0[ADDR_REC_LEP_EN] = state.rec_lepton_enable as u8;
        self.0[ADDR_GAIN_MODE] = state.gain_mode as u8;
        self.store_string(state.palette.name(), ADDR_PALETTE_NAME, PALETTE_NAME_LEN);
        let be = state.record_interval.to_be_bytes();
        self.0[ADDR_REC_INTERVAL] = be[0];
        self.0[ADDR_REC_INTERVAL + 1] = be[1];
        self.update_checksum();
        SPAN_GUI
    }

    // ── Field helpers ─────────────────────────────────────────

    fn ip(&self, addr: usize) -> Ipv4 {
        Ipv4([
            self.0[addr],
            self.0[addr + 1],
            self.0[addr + 2],
            self.0[addr + 3],
        ])
    }

    fn set_ip(&mut self, addr: usize, ip: Ipv4) {
        self.0[addr..addr + 4].copy_from_slice(&ip.0);
    }

    /// Store `s` at `start`, null-terminated and null-padded to `max_len + 1`.
    fn store_string(&mut self, s: &str, start: usize, max_len: usize) {
        let bytes = s.as_bytes();
        let n = bytes.len().min(max_len);
        self.0[start..start + n].copy_from_slice(&bytes[..n]);
        self.0[start + n..start + max_len + 1].fill(0);
    }

    fn read_string<const N: usize>(&self, start: usize, max_len: usize) -> HString<N> {
        let mut out = HString::new();
        for &b in &self.0[start..start + max_len] {
            if b == 0 {
                break;
            }
            if out.push(b as char).is_err() {
                break;
            }
        }
        out
    }
}

/// `firecam-XXXX`: the last four hex nibbles of the soft-AP MAC (factory MAC
/// with the final byte incremented, matching the IDF's derived AP address).
pub fn default_ap_ssid(mac: [u8; 6]) -> heapless::String<SSID_MAX_LEN> {
    let ap_last = mac[5].wrapping_add(1);
    let mut s = heapless::String::new();
    let _ = s.push_str("firecam-");
    for nibble in [mac[4] >> 4, mac[4] & 0x0F, ap_last >> 4, ap_last & 0x0F] {
        let c = if nibble < 10 {
            (b'0' + nibble) as char
        } else {
            (b'A' + nibble - 10) as char
        };
        let _ = s.push(c);
    }
    s
}

/// Sanity guard: the layout must fit the SRAM with room for the checksum.
const _: () = assert!(ADDR_LAST_VALID < ADDR_CHECKSUM);
/// The allowed-interval table must start with the snap fallback.
const _: () = assert!(RECORD_INTERVALS[0] == 1);

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh() -> PsArray {
        let mut ps = PsArray::new([0; SRAM_SIZE]);
        ps.init_defaults([0x24, 0x6F, 0x28, 0xAA, 0x1B, 0xC3]);
        ps
    }

    #[test]
    fn zeroed_array_is_invalid() {
        let ps = PsArray::new([0; SRAM_SIZE]);
        assert!(!ps.is_valid());
    }

    #[test]
    fn defaults_validate_and_match_cold_boot_contract() {
        let mut ps = fresh();
        assert!(ps.is_valid());
        assert_eq!(ps.version(), 2);
        assert!(!ps.rec_enable());

        let wifi = ps.wifi_info();
        assert_eq!(wifi.ap_ssid.as_str(), "firecam-1BC4");
        assert_eq!(wifi.ap_pw.as_str(), "");
        assert_eq!(wifi.flags, FLAG_STARTUP_ENABLE);
        assert_eq!(wifi.ap_ip.to_string(), "192.168.4.1");
        assert_eq!(wifi.sta_ip.to_string(), "192.168.4.2");

        let (op, repaired) = ps.op_state();
        assert!(repaired.is_none());
        assert_eq!(op, OpState::default());
    }

    #[test]
    fn default_ssid_increments_mac_and_uppercases() {
        // Final byte 0xFF wraps to 0x00 in the soft-AP address.
        let s = default_ap_ssid([0, 0, 0, 0, 0xAB, 0xFF]);
        assert_eq!(s.as_str(), "firecam-AB00");
    }

    #[test]
    fn checksum_closure_holds_after_every_setter() {
        let mut ps = fresh();

        let mut wifi = ps.wifi_info();
        wifi.ap_ssid.clear();
        wifi.ap_ssid.push_str("cam").unwrap();
        wifi.flags = 0xFF; // everything set; only user bits may persist
        ps.set_wifi_info(&wifi);
        assert!(ps.is_valid());
        assert_eq!(ps.wifi_info().flags, 0x91);

        ps.set_rec_enable(true);
        assert!(ps.is_valid());
        assert!(ps.rec_enable());

        let mut op = OpState::default();
        op.record_interval = 300;
        op.palette = Palette::Ironblack;
        ps.set_op_state(&op);
        assert!(ps.is_valid());
        let (read_back, repaired) = ps.op_state();
        assert!(repaired.is_none());
        assert_eq!(read_back, op);
    }

    #[test]
    fn corrupt_byte_breaks_checksum() {
        let mut ps = fresh();
        ps.0[ADDR_AP_SSID] ^= 0x40;
        assert!(!ps.is_valid());
    }

    #[test]
    fn illegal_interval_is_repaired_to_first() {
        let mut ps = fresh();
        ps.0[ADDR_REC_INTERVAL] = 0x00;
        ps.0[ADDR_REC_INTERVAL + 1] = 0x07; // 7s is not an allowed interval
        ps.update_checksum();
        let (op, span) = ps.op_state();
        assert_eq!(op.record_interval, 1);
        assert_eq!(span, Some(SPAN_GUI));
        assert!(ps.is_valid());
    }

    #[test]
    fn unknown_palette_is_repaired_to_grayscale() {
        let mut ps = fresh();
        ps.store_string("Volcano", ADDR_PALETTE_NAME, PALETTE_NAME_LEN);
        ps.update_checksum();
        let (op, span) = ps.op_state();
        assert_eq!(op.palette, Palette::Grayscale);
        assert!(span.is_some());
        assert!(ps.is_valid());
    }

    #[test]
    fn v1_upgrade_keeps_old_fields_and_defaults_new_ones() {
        // Build a version-1 array: magic, version 1, rec flag, flags, AP
        // SSID/PW, checksum.
        let mut ps = PsArray::new([0; SRAM_SIZE]);
        ps.0[ADDR_MAGIC_0] = MAGIC_WORD_0;
        ps.0[ADDR_MAGIC_1] = MAGIC_WORD_1;
        ps.0[ADDR_VERSION] = 1;
        ps.0[ADDR_REC_EN] = 1;
        ps.0[ADDR_WIFI_FLAGS] = FLAG_STARTUP_ENABLE;
        ps.store_string("oldname", ADDR_AP_SSID, SSID_MAX_LEN);
        ps.store_string("oldsecret", ADDR_AP_PW, PW_MAX_LEN);
        ps.update_checksum();
        assert!(ps.is_valid());

        ps.upgrade_from_v1();
        assert!(ps.is_valid());
        assert_eq!(ps.version(), 2);
        assert!(ps.rec_enable());
        let wifi = ps.wifi_info();
        assert_eq!(wifi.ap_ssid.as_str(), "oldname");
        assert_eq!(wifi.ap_pw.as_str(), "oldsecret");
        assert_eq!(wifi.ap_ip.to_string(), "192.168.4.1");
        let (op, _) = ps.op_state();
        assert_eq!(op, OpState::default());
    }

    #[test]
    fn string_storage_truncates_and_terminates() {
        let mut ps = fresh();
        let long = "x".repeat(40);
        ps.store_string(&long, ADDR_AP_SSID, SSID_MAX_LEN);
        let s: HString<32> = ps.read_string(ADDR_AP_SSID, SSID_MAX_LEN);
        assert_eq!(s.len(), SSID_MAX_LEN);
        // Terminator slot stays null even at max length.
        assert_eq!(ps.0[ADDR_AP_SSID + SSID_MAX_LEN], 0);
    }
}
