//! Typed commands and responses for the JSON-over-TCP interface.
//!
//! A command is `{"cmd": "<name>", "args": {...}}`.  Responses are compact
//! JSON wrapped in the same STX/ETX framing as commands.  In `set_*`
//! commands every argument is optional unless noted; omitted fields retain
//! their current value.

use serde::Deserialize;
use serde_json::{json, Value};

use crate::clock::time::TmElements;
use crate::config::{snap_record_interval, GainMode, OpState};
use crate::error::ProtoError;
use crate::net::wifi::{
    validate_password, validate_ssid, Ipv4, WifiInfo, FLAG_USER_MASK, PW_MAX_LEN, SSID_MAX_LEN,
};
use crate::tasks::sampler::{BattStatus, ChargeState};

use super::framing::{ETX, STX};

/// A parsed wire command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    GetStatus,
    GetImage,
    GetConfig,
    SetConfig(ConfigArgs),
    SetTime(TmElements),
    GetWifi,
    SetWifi(WifiArgs),
    RecordOn,
    RecordOff,
    Poweroff,
}

/// `set_config` arguments.  Enables are 0/1, gain mode 0/1/2.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ConfigArgs {
    pub arducam_enable: Option<u8>,
    pub lepton_enable: Option<u8>,
    pub gain_mode: Option<u8>,
    pub record_interval: Option<u16>,
}

/// `set_wifi` arguments.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct WifiArgs {
    pub ap_ssid: Option<String>,
    pub ap_pw: Option<String>,
    pub sta_ssid: Option<String>,
    pub sta_pw: Option<String>,
    pub flags: Option<u8>,
    pub ap_ip_addr: Option<String>,
    pub sta_ip_addr: Option<String>,
}

#[derive(Deserialize)]
struct Envelope {
    cmd: Option<String>,
    args: Option<Value>,
}

#[derive(Deserialize)]
struct TimeArgs {
    sec: u8,
    min: u8,
    hour: u8,
    /// 1 = Sunday .. 7 = Saturday.
    dow: u8,
    day: u8,
    mon: u8,
    /// Offset from 1970.
    year: u8,
}

/// Parse one framed payload into a [`Command`].
pub fn parse_command(payload: &[u8]) -> Result<Command, ProtoError> {
    let env: Envelope = serde_json::from_slice(payload).map_err(|_| ProtoError::BadJson)?;
    let cmd = env.cmd.ok_or(ProtoError::NoCommand)?;
    let args = env.args.unwrap_or(Value::Null);

    match cmd.as_str() {
        "get_status" => Ok(Command::GetStatus),
        "get_image" => Ok(Command::GetImage),
        "get_config" => Ok(Command::GetConfig),
        "set_config" => {
            let a: ConfigArgs = if args.is_null() {
                ConfigArgs::default()
            } else {
                serde_json::from_value(args).map_err(|_| ProtoError::BadArgs)?
            };
            Ok(Command::SetConfig(a))
        }
        "set_time" => {
            // All seven fields are required.
            let t: TimeArgs = serde_json::from_value(args).map_err(|_| ProtoError::BadArgs)?;
            if t.sec > 59
                || t.min > 59
                || t.hour > 23
                || !(1..=7).contains(&t.dow)
                || !(1..=31).contains(&t.day)
                || !(1..=12).contains(&t.mon)
            {
                return Err(ProtoError::BadArgs);
            }
            Ok(Command::SetTime(TmElements {
                second: t.sec,
                minute: t.min,
                hour: t.hour,
                wday: t.dow,
                day: t.day,
                month: t.mon,
                year: t.year,
            }))
        }
        "get_wifi" => Ok(Command::GetWifi),
        "set_wifi" => {
            let a: WifiArgs = if args.is_null() {
                WifiArgs::default()
            } else {
                serde_json::from_value(args).map_err(|_| ProtoError::BadArgs)?
            };
            Ok(Command::SetWifi(a))
        }
        "record_on" => Ok(Command::RecordOn),
        "record_off" => Ok(Command::RecordOff),
        "poweroff" => Ok(Command::Poweroff),
        _ => Err(ProtoError::UnknownCommand),
    }
}

/// Merge `set_config` arguments into the operating state.  Out-of-set
/// intervals snap to the first allowed value.
pub fn apply_config(args: &ConfigArgs, op: &mut OpState) {
    if let Some(en) = args.arducam_enable {
        op.rec_arducam_enable = en != 0;
    }
    if let Some(en) = args.lepton_enable {
        op.rec_lepton_enable = en != 0;
    }
    if let Some(mode) = args.gain_mode {
        op.gain_mode = GainMode::from_u8(mode);
    }
    if let Some(secs) = args.record_interval {
        op.record_interval = snap_record_interval(secs);
    }
}

/// Merge `set_wifi` arguments into the stored configuration.  Fields that
/// fail validation are dropped (logged) without rejecting the rest; only
/// user-settable flag bits are applied.
pub fn apply_wifi(args: &WifiArgs, info: &mut WifiInfo) {
    let set_ssid = |dst: &mut heapless::String<SSID_MAX_LEN>, src: &str| {
        if validate_ssid(src).is_ok() {
            dst.clear();
            let _ = dst.push_str(src);
        } else {
            log::error!("set_wifi: ignoring invalid ssid");
        }
    };
    let set_pw = |dst: &mut heapless::String<PW_MAX_LEN>, src: &str| {
        if validate_password(src).is_ok() {
            dst.clear();
            let _ = dst.push_str(src);
        } else {
            log::error!("set_wifi: ignoring invalid password");
        }
    };

    if let Some(s) = &args.ap_ssid {
        set_ssid(&mut info.ap_ssid, s);
    }
    if let Some(s) = &args.sta_ssid {
        set_ssid(&mut info.sta_ssid, s);
    }
    if let Some(s) = &args.ap_pw {
        set_pw(&mut info.ap_pw, s);
    }
    if let Some(s) = &args.sta_pw {
        set_pw(&mut info.sta_pw, s);
    }
    if let Some(flags) = args.flags {
        info.flags = flags & FLAG_USER_MASK;
    }
    if let Some(s) = &args.ap_ip_addr {
        match Ipv4::parse(s) {
            Some(ip) => info.ap_ip = ip,
            None => log::error!("set_wifi: ignoring invalid ap_ip_addr"),
        }
    }
    if let Some(s) = &args.sta_ip_addr {
        match Ipv4::parse(s) {
            Some(ip) => info.sta_ip = ip,
            None => log::error!("set_wifi: ignoring invalid sta_ip_addr"),
        }
    }
}

// ── Responses ─────────────────────────────────────────────────

/// Wrap compact JSON in the wire delimiters.
pub fn frame(json: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(json.len() + 2);
    out.push(STX);
    out.extend_from_slice(json.as_bytes());
    out.push(ETX);
    out
}

/// `"H:MM:SS"` — hours unpadded, exactly as clients expect.
pub fn time_string(te: &TmElements) -> String {
    format!("{}:{:02}:{:02}", te.hour, te.minute, te.second)
}

/// `"M/D/YY"` with the year relative to 2000.
pub fn date_string(te: &TmElements) -> String {
    format!("{}/{}/{:02}", te.month, te.day, te.year.saturating_sub(30))
}

pub fn charge_string(charge: ChargeState) -> &'static str {
    match charge {
        ChargeState::Off => "OFF",
        ChargeState::On => "ON",
        ChargeState::Fault => "FAULT",
    }
}

/// The `get_status` reply.
pub fn status_response(
    camera: &str,
    version: &str,
    recording: bool,
    te: &TmElements,
    batt: &BattStatus,
) -> Vec<u8> {
    let obj = json!({
        "status": {
            "Camera": camera,
            "Version": version,
            "Recording": recording as u8,
            "Time": time_string(te),
            "Date": date_string(te),
            "Battery": batt.voltage,
            "Charge": charge_string(batt.charge),
        }
    });
    frame(&obj.to_string())
}

/// The `get_config` reply.
pub fn config_response(op: &OpState) -> Vec<u8> {
    let obj = json!({
        "config": {
            "arducam_enable": op.rec_arducam_enable as u8,
            "lepton_enable": op.rec_lepton_enable as u8,
            "gain_mode": op.gain_mode as u8,
            "record_interval": op.record_interval,
        }
    });
    frame(&obj.to_string())
}

/// The `get_wifi` reply.
pub fn wifi_response(info: &WifiInfo, runtime_flags: u8, cur_ip: Ipv4) -> Vec<u8> {
    let obj = json!({
        "wifi": {
            "ap_ssid": info.ap_ssid.as_str(),
            "sta_ssid": info.sta_ssid.as_str(),
            "flags": runtime_flags,
            "ap_ip_addr": info.ap_ip.to_string(),
            "sta_ip_addr": info.sta_ip.to_string(),
            "cur_ip_addr": cur_ip.to_string(),
        }
    });
    frame(&obj.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_commands() {
        assert_eq!(
            parse_command(br#"{"cmd":"get_status"}"#).unwrap(),
            Command::GetStatus
        );
        assert_eq!(
            parse_command(br#"{"cmd":"poweroff"}"#).unwrap(),
            Command::Poweroff
        );
    }

    #[test]
    fn unknown_command_is_flagged() {
        assert_eq!(
            parse_command(br#"{"cmd":"selfdestruct"}"#),
            Err(ProtoError::UnknownCommand)
        );
    }

    #[test]
    fn missing_cmd_field() {
        assert_eq!(
            parse_command(br#"{"args":{}}"#),
            Err(ProtoError::NoCommand)
        );
    }

    #[test]
    fn malformed_json() {
        assert_eq!(parse_command(b"{nope"), Err(ProtoError::BadJson));
    }

    #[test]
    fn set_time_requires_all_fields() {
        let ok = br#"{"cmd":"set_time","args":{"sec":0,"min":30,"hour":8,"dow":2,"day":15,"mon":6,"year":55}}"#;
        match parse_command(ok).unwrap() {
            Command::SetTime(te) => {
                assert_eq!((te.hour, te.minute, te.year), (8, 30, 55));
            }
            other => panic!("unexpected {other:?}"),
        }
        let missing = br#"{"cmd":"set_time","args":{"sec":0,"min":30}}"#;
        assert_eq!(parse_command(missing), Err(ProtoError::BadArgs));
    }

    #[test]
    fn set_time_rejects_out_of_range() {
        let bad = br#"{"cmd":"set_time","args":{"sec":61,"min":0,"hour":0,"dow":1,"day":1,"mon":1,"year":50}}"#;
        assert_eq!(parse_command(bad), Err(ProtoError::BadArgs));
    }

    #[test]
    fn set_config_interval_snaps_to_allowed_set() {
        let mut op = OpState::default();
        apply_config(
            &ConfigArgs {
                record_interval: Some(7),
                ..Default::default()
            },
            &mut op,
        );
        assert_eq!(op.record_interval, 1);

        apply_config(
            &ConfigArgs {
                record_interval: Some(300),
                ..Default::default()
            },
            &mut op,
        );
        assert_eq!(op.record_interval, 300);
    }

    #[test]
    fn set_config_omitted_fields_retain_values() {
        let mut op = OpState::default();
        op.rec_arducam_enable = false;
        apply_config(
            &ConfigArgs {
                gain_mode: Some(1),
                ..Default::default()
            },
            &mut op,
        );
        assert!(!op.rec_arducam_enable);
        assert_eq!(op.gain_mode, GainMode::Low);
    }

    #[test]
    fn set_wifi_masks_flags_and_parses_ips() {
        let mut info = WifiInfo::default();
        apply_wifi(
            &WifiArgs {
                ap_ssid: Some("cam".into()),
                flags: Some(145),
                ap_ip_addr: Some("10.0.0.5".into()),
                ..Default::default()
            },
            &mut info,
        );
        assert_eq!(info.ap_ssid.as_str(), "cam");
        assert_eq!(info.flags, 0x91);
        assert_eq!(info.ap_ip.0, [5, 0, 0, 10]);
    }

    #[test]
    fn set_wifi_short_password_is_ignored() {
        let mut info = WifiInfo::default();
        info.ap_pw.push_str("original8").unwrap();
        apply_wifi(
            &WifiArgs {
                ap_pw: Some("short".into()),
                ..Default::default()
            },
            &mut info,
        );
        assert_eq!(info.ap_pw.as_str(), "original8");
    }

    #[test]
    fn status_response_is_framed_and_shaped() {
        let te = TmElements {
            second: 5,
            minute: 7,
            hour: 9,
            wday: 1,
            day: 15,
            month: 6,
            year: 55,
        };
        let batt = BattStatus {
            voltage: 3.87,
            state: crate::tasks::sampler::BattState::Pct75,
            charge: ChargeState::On,
        };
        let rsp = status_response("firecam-1BC4", "2.0.0", true, &te, &batt);
        assert_eq!(rsp[0], STX);
        assert_eq!(*rsp.last().unwrap(), ETX);
        let v: Value = serde_json::from_slice(&rsp[1..rsp.len() - 1]).unwrap();
        assert_eq!(v["status"]["Recording"], 1);
        assert_eq!(v["status"]["Time"], "9:07:05");
        assert_eq!(v["status"]["Date"], "6/15/25");
        assert_eq!(v["status"]["Charge"], "ON");
    }

    #[test]
    fn wifi_response_renders_ips_msb_first() {
        let mut info = WifiInfo::default();
        info.ap_ssid.push_str("firecam-1BC4").unwrap();
        info.ap_ip = Ipv4([1, 4, 168, 192]);
        let rsp = wifi_response(&info, info.flags, info.ap_ip);
        let v: Value = serde_json::from_slice(&rsp[1..rsp.len() - 1]).unwrap();
        assert_eq!(v["wifi"]["ap_ip_addr"], "192.168.4.1");
        assert_eq!(v["wifi"]["cur_ip_addr"], "192.168.4.1");
    }
}
