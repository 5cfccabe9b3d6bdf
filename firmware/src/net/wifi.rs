//! Wi-Fi configuration and the soft-AP/station bring-up.
//!
//! The camera is normally its own access point (`firecam-XXXX`); client mode
//! joins an existing network instead.  Configuration lives in the persistent
//! parameter store; this module owns the runtime state (initialised,
//! connected, current IP) and the ESP-IDF driver calls.
//!
//! ## IP byte order
//!
//! [`Ipv4`] stores the least-significant octet at index 0 while the textual
//! form `"a.b.c.d"` leads with the most-significant octet: the renderer
//! prints indices `[3][2][1][0]` and the parser fills them in the same
//! order.  Existing clients depend on this exact asymmetry; do not reorder.

use core::fmt;

use heapless::String as HString;
use log::{error, info};

use crate::error::NetError;

// ── Flags ─────────────────────────────────────────────────────

/// Bring the interface up at boot / after `set_wifi`.
pub const FLAG_STARTUP_ENABLE: u8 = 0x01;
/// Driver resources allocated (runtime, not persisted).
pub const FLAG_INITIALIZED: u8 = 0x04;
/// A client is associated / station got an address (runtime, not persisted).
pub const FLAG_CONNECTED: u8 = 0x08;
/// Client mode uses the static address instead of DHCP.
pub const FLAG_CL_STATIC_IP: u8 = 0x10;
/// Join an existing network instead of running the soft-AP.
pub const FLAG_CLIENT_MODE: u8 = 0x80;

/// The only bits a `set_wifi` command or the store may carry.
pub const FLAG_USER_MASK: u8 = FLAG_STARTUP_ENABLE | FLAG_CL_STATIC_IP | FLAG_CLIENT_MODE;

pub const SSID_MAX_LEN: usize = 32;
pub const PW_MAX_LEN: usize = 32;

// ── IPv4 ──────────────────────────────────────────────────────

/// IPv4 address with the least-significant octet at index 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Ipv4(pub [u8; 4]);

impl Ipv4 {
    /// Parse `"a.b.c.d"`, `a` most significant.
    pub fn parse(s: &str) -> Option<Self> {
        let mut octets = [0u8; 4];
        let mut parts = s.split('.');
        for i in 0..4 {
            let part = parts.next()?;
            if part.is_empty() || part.len() > 3 || !part.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            octets[3 - i] = part.parse::<u8>().ok()?;
        }
        if parts.next().is_some() {
            return None;
        }
        Some(Self(octets))
    }
}

impl fmt::Display for Ipv4 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}.{}", self.0[3], self.0[2], self.0[1], self.0[0])
    }
}

// ── Configuration ─────────────────────────────────────────────

/// Persisted Wi-Fi configuration plus the runtime flag bits.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WifiInfo {
    pub ap_ssid: HString<SSID_MAX_LEN>,
    pub ap_pw: HString<PW_MAX_LEN>,
    pub sta_ssid: HString<SSID_MAX_LEN>,
    pub sta_pw: HString<PW_MAX_LEN>,
    pub flags: u8,
    pub ap_ip: Ipv4,
    pub sta_ip: Ipv4,
}

impl WifiInfo {
    pub fn enabled(&self) -> bool {
        self.flags & FLAG_STARTUP_ENABLE != 0
    }

    pub fn client_mode(&self) -> bool {
        self.flags & FLAG_CLIENT_MODE != 0
    }

    /// Network name the camera is reachable under (AP SSID, or the joined
    /// network's SSID in client mode).  Used as the camera name in records.
    pub fn active_ssid(&self) -> &str {
        if self.client_mode() {
            self.sta_ssid.as_str()
        } else {
            self.ap_ssid.as_str()
        }
    }
}

/// WPA2 requires 8..=32 byte passwords; empty means an open network.
pub fn validate_password(pw: &str) -> Result<(), NetError> {
    if pw.is_empty() || (8..=PW_MAX_LEN).contains(&pw.len()) {
        Ok(())
    } else {
        Err(NetError::InvalidPassword)
    }
}

pub fn validate_ssid(ssid: &str) -> Result<(), NetError> {
    if ssid.is_empty() || ssid.len() > SSID_MAX_LEN {
        Err(NetError::InvalidSsid)
    } else {
        Ok(())
    }
}

// ── Runtime manager ───────────────────────────────────────────

/// Owns the Wi-Fi driver state.  `init` runs once at boot; `reinit` tears the
/// interface down and brings it back up with fresh store contents after a
/// `set_wifi`.
pub struct Wifi {
    info: WifiInfo,
    cur_ip: Ipv4,
}

impl Wifi {
    pub fn new() -> Self {
        Self {
            info: WifiInfo::default(),
            cur_ip: Ipv4::default(),
        }
    }

    /// Power-on initialisation from persisted configuration.
    pub fn init(&mut self, info: WifiInfo) -> Result<(), NetError> {
        self.info = info;
        self.platform_alloc()?;
        self.info.flags |= FLAG_INITIALIZED;

        if self.info.enabled() {
            self.bring_up()?;
        }
        Ok(())
    }

    /// Reconfigure after the stored SSID/password/flags changed.  Returns
    /// `Err` if the new configuration could not be applied; the caller
    /// surfaces that to the user.
    pub fn reinit(&mut self, info: WifiInfo) -> Result<(), NetError> {
        let initialized = self.info.flags & FLAG_INITIALIZED != 0;
        let was_up = self.info.flags & FLAG_CONNECTED != 0 || self.info.enabled();
        self.info = info;

        if !initialized {
            self.platform_alloc()?;
        }
        self.info.flags |= FLAG_INITIALIZED;

        if was_up {
            self.platform_stop();
        }
        if self.info.enabled() {
            self.bring_up()?;
        }

        // Nothing can be associated right after a restart.
        self.info.flags &= !FLAG_CONNECTED;
        self.cur_ip = Ipv4::default();
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.info.flags & FLAG_CONNECTED != 0
    }

    /// Runtime flags merged over the persisted byte.
    pub fn flags(&self) -> u8 {
        self.info.flags
    }

    /// Address the command responder is reachable on right now.
    pub fn current_ip(&self) -> Ipv4 {
        if self.is_connected() {
            self.cur_ip
        } else if self.info.client_mode() {
            self.info.sta_ip
        } else {
            self.info.ap_ip
        }
    }

    fn bring_up(&mut self) -> Result<(), NetError> {
        if self.info.client_mode() {
            self.platform_start_sta()?;
            info!("WiFi station joining '{}'", self.info.sta_ssid);
        } else {
            self.platform_start_ap()?;
            self.cur_ip = self.info.ap_ip;
            info!("WiFi AP '{}' enabled", self.info.ap_ssid);
        }
        Ok(())
    }

    // ── Platform: ESP-IDF ─────────────────────────────────────

    #[cfg(target_os = "espidf")]
    fn platform_alloc(&mut self) -> Result<(), NetError> {
        use esp_idf_svc::sys::*;
        // SAFETY: one-time driver allocation from the boot path.
        unsafe {
            let ret = esp_netif_init();
            if ret != ESP_OK {
                error!("esp_netif_init failed ({ret})");
                return Err(NetError::InitFailed);
            }
            let ret = esp_event_loop_create_default();
            if ret != ESP_OK && ret != ESP_ERR_INVALID_STATE {
                error!("esp_event_loop_create_default failed ({ret})");
                return Err(NetError::InitFailed);
            }
            esp_netif_create_default_wifi_ap();
            esp_netif_create_default_wifi_sta();

            let cfg = wifi_init_config_t::default();
            let ret = esp_wifi_init(&cfg);
            if ret != ESP_OK {
                error!("esp_wifi_init failed ({ret})");
                return Err(NetError::InitFailed);
            }
            // Persistence is ours; keep the IDF's copy in RAM.
            let ret = esp_wifi_set_storage(wifi_storage_t_WIFI_STORAGE_RAM);
            if ret != ESP_OK {
                error!("esp_wifi_set_storage failed ({ret})");
                return Err(NetError::InitFailed);
            }
        }
        Ok(())
    }

    #[cfg(target_os = "espidf")]
    fn platform_start_ap(&mut self) -> Result<(), NetError> {
        use esp_idf_svc::sys::*;
        // SAFETY: wifi_config_t is a plain C union; the ap arm is fully
        // initialised before use.
        unsafe {
            let mut cfg: wifi_config_t = core::mem::zeroed();
            let ap = &mut cfg.ap;
            let ssid = self.info.ap_ssid.as_bytes();
            let pw = self.info.ap_pw.as_bytes();
            ap.ssid[..ssid.len()].copy_from_slice(ssid);
            ap.ssid_len = ssid.len() as u8;
            ap.password[..pw.len()].copy_from_slice(pw);
            ap.max_connection = 1;
            ap.authmode = if pw.is_empty() {
                wifi_auth_mode_t_WIFI_AUTH_OPEN
            } else {
                wifi_auth_mode_t_WIFI_AUTH_WPA_WPA2_PSK
            };

            if esp_wifi_set_mode(wifi_mode_t_WIFI_MODE_AP) != ESP_OK
                || esp_wifi_set_config(wifi_interface_t_WIFI_IF_AP, &mut cfg) != ESP_OK
                || esp_wifi_start() != ESP_OK
            {
                error!("soft-AP start failed");
                return Err(NetError::ConfigFailed);
            }
        }
        Ok(())
    }

    #[cfg(target_os = "espidf")]
    fn platform_start_sta(&mut self) -> Result<(), NetError> {
        use esp_idf_svc::sys::*;
        // SAFETY: as platform_start_ap, for the sta arm.
        unsafe {
            let mut cfg: wifi_config_t = core::mem::zeroed();
            let sta = &mut cfg.sta;
            let ssid = self.info.sta_ssid.as_bytes();
            let pw = self.info.sta_pw.as_bytes();
            sta.ssid[..ssid.len()].copy_from_slice(ssid);
            sta.password[..pw.len()].copy_from_slice(pw);

            if esp_wifi_set_mode(wifi_mode_t_WIFI_MODE_STA) != ESP_OK
                || esp_wifi_set_config(wifi_interface_t_WIFI_IF_STA, &mut cfg) != ESP_OK
                || esp_wifi_start() != ESP_OK
                || esp_wifi_connect() != ESP_OK
            {
                error!("station start failed");
                return Err(NetError::ConfigFailed);
            }
        }
        Ok(())
    }

    #[cfg(target_os = "espidf")]
    fn platform_stop(&mut self) {
        // SAFETY: stopping an already-stopped driver is harmless.
        unsafe {
            esp_idf_svc::sys::esp_wifi_stop();
        }
    }

    // ── Platform: host simulation ─────────────────────────────

    #[cfg(not(target_os = "espidf"))]
    fn platform_alloc(&mut self) -> Result<(), NetError> {
        info!("WiFi(sim): driver allocated");
        Ok(())
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_start_ap(&mut self) -> Result<(), NetError> {
        if self.info.ap_ssid.is_empty() {
            error!("WiFi(sim): empty AP SSID");
            return Err(NetError::ConfigFailed);
        }
        Ok(())
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_start_sta(&mut self) -> Result<(), NetError> {
        if self.info.sta_ssid.is_empty() {
            error!("WiFi(sim): empty station SSID");
            return Err(NetError::ConfigFailed);
        }
        Ok(())
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_stop(&mut self) {}

    /// Test hook: pretend a client associated and got `ip`.
    #[cfg(not(target_os = "espidf"))]
    pub fn sim_set_connected(&mut self, ip: Ipv4) {
        self.info.flags |= FLAG_CONNECTED;
        self.cur_ip = ip;
    }
}

impl Default for Wifi {
    fn default() -> Self {
        Self::new()
    }
}
