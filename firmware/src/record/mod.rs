//! Image-record construction: the self-describing JSON object written to
//! storage and returned by `get_image`.
//!
//! The metadata object is always present; the three payloads (`jpeg`,
//! `radiometric`, `telemetry`) are individually optional and base64-encoded
//! at record construction.  The encoded strings live only for the duration
//! of one serialisation.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::{json, Map, Value};

use crate::clock::time::TmElements;
use crate::config::GainMode;
use crate::proto::commands::{charge_string, date_string, time_string};
use crate::tasks::sampler::BattStatus;

/// TLinear radiometric resolution, from telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlinearResolution {
    /// 0.01 K per count (27315 ⇒ 0 °C).
    Centi,
    /// 0.1 K per count (2731.5 ⇒ 0 °C).
    Deci,
}

impl TlinearResolution {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Centi => "0.01",
            Self::Deci => "0.1",
        }
    }
}

/// Thermal-side metadata, present when the record carries a Lepton payload.
#[derive(Debug, Clone, Copy)]
pub struct LeptonMeta {
    pub fpa_temp_c: f32,
    pub aux_temp_c: f32,
    pub lens_temp_c: f32,
    /// Effective gain mode from telemetry; `None` renders as `"UNKNOWN"`.
    pub gain_mode: Option<GainMode>,
    pub resolution: TlinearResolution,
}

/// Everything the metadata object needs.
pub struct RecordMeta<'a> {
    pub camera: &'a str,
    pub version: &'a str,
    pub seq_num: u32,
    pub te: TmElements,
    pub batt: BattStatus,
    pub lepton: Option<LeptonMeta>,
}

fn gain_mode_string(mode: Option<GainMode>) -> &'static str {
    match mode {
        Some(GainMode::High) => "HIGH",
        Some(GainMode::Low) => "LOW",
        _ => "UNKNOWN",
    }
}

/// Build the record as pretty-printed UTF-8 JSON.
///
/// `radiometric` is the 160x120 grid as big-endian `u16` bytes (38400 of
/// them); `telemetry` is the 80-word block as big-endian bytes (160).
pub fn build_image_record(
    meta: &RecordMeta<'_>,
    jpeg: Option<&[u8]>,
    radiometric: Option<&[u8]>,
    telemetry: Option<&[u8]>,
) -> String {
    let mut metadata = Map::new();
    metadata.insert("Camera".into(), json!(meta.camera));
    metadata.insert("Version".into(), json!(meta.version));
    metadata.insert("Sequence Number".into(), json!(meta.seq_num));
    metadata.insert("Time".into(), json!(time_string(&meta.te)));
    metadata.insert("Date".into(), json!(date_string(&meta.te)));
    metadata.insert("Battery".into(), json!(meta.batt.voltage));
    metadata.insert("Charge".into(), json!(charge_string(meta.batt.charge)));

    if let Some(lep) = &meta.lepton {
        metadata.insert("FPA Temp".into(), json!(lep.fpa_temp_c));
        metadata.insert("AUX Temp".into(), json!(lep.aux_temp_c));
        metadata.insert("Lens Temp".into(), json!(lep.lens_temp_c));
        metadata.insert(
            "Lepton Gain Mode".into(),
            json!(gain_mode_string(lep.gain_mode)),
        );
        metadata.insert("Lepton Resolution".into(), json!(lep.resolution.as_str()));
    }

    let mut root = Map::new();
    root.insert("metadata".into(), Value::Object(metadata));
    if let Some(bytes) = jpeg {
        root.insert("jpeg".into(), json!(BASE64.encode(bytes)));
    }
    if let Some(bytes) = radiometric {
        root.insert("radiometric".into(), json!(BASE64.encode(bytes)));
    }
    if let Some(bytes) = telemetry {
        root.insert("telemetry".into(), json!(BASE64.encode(bytes)));
    }

    // Both map types preserve insertion order, so the metadata leads.
    serde_json::to_string_pretty(&Value::Object(root)).unwrap_or_default()
}

/// Repack a `u16` grid as big-endian bytes for encoding.
pub fn words_to_be_bytes(words: &[u16], out: &mut Vec<u8>) {
    out.clear();
    out.reserve(words.len() * 2);
    for w in words {
        out.extend_from_slice(&w.to_be_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::sampler::{BattState, ChargeState};

    fn meta_with_lepton(lepton: Option<LeptonMeta>) -> RecordMeta<'static> {
        RecordMeta {
            camera: "firecam-1BC4",
            version: "2.0.0",
            seq_num: 3,
            te: TmElements {
                second: 5,
                minute: 7,
                hour: 9,
                wday: 1,
                day: 15,
                month: 6,
                year: 55,
            },
            batt: BattStatus {
                voltage: 3.91,
                state: BattState::Pct100,
                charge: ChargeState::Off,
            },
            lepton,
        }
    }

    #[test]
    fn metadata_only_record_has_no_payload_fields() {
        let text = build_image_record(&meta_with_lepton(None), None, None, None);
        let v: Value = serde_json::from_str(&text).unwrap();
        assert!(v.get("jpeg").is_none());
        assert!(v.get("radiometric").is_none());
        assert!(v.get("telemetry").is_none());
        assert_eq!(v["metadata"]["Sequence Number"], 3);
        assert_eq!(v["metadata"]["Charge"], "OFF");
        // No lepton payload, no lepton temps.
        assert!(v["metadata"].get("FPA Temp").is_none());
    }

    #[test]
    fn payloads_round_trip_through_base64() {
        let jpeg = [0xFFu8, 0xD8, 0x01, 0x02, 0xFF, 0xD9];
        let words = [27315u16, 30000, 0x1234];
        let mut rad = Vec::new();
        words_to_be_bytes(&words, &mut rad);

        let lep = LeptonMeta {
            fpa_temp_c: 31.5,
            aux_temp_c: 28.25,
            lens_temp_c: 24.0,
            gain_mode: Some(GainMode::High),
            resolution: TlinearResolution::Centi,
        };
        let text = build_image_record(&meta_with_lepton(Some(lep)), Some(&jpeg), Some(&rad), None);
        let v: Value = serde_json::from_str(&text).unwrap();

        let jpeg_back = BASE64.decode(v["jpeg"].as_str().unwrap()).unwrap();
        assert_eq!(jpeg_back, jpeg);

        let rad_back = BASE64.decode(v["radiometric"].as_str().unwrap()).unwrap();
        assert_eq!(rad_back, rad);
        // Big-endian: 27315 = 0x6AB3.
        assert_eq!(&rad_back[..2], &[0x6A, 0xB3]);

        assert_eq!(v["metadata"]["Lepton Gain Mode"], "HIGH");
        assert_eq!(v["metadata"]["Lepton Resolution"], "0.01");
    }

    #[test]
    fn unknown_effective_gain_renders_unknown() {
        let lep = LeptonMeta {
            fpa_temp_c: 0.0,
            aux_temp_c: 0.0,
            lens_temp_c: 0.0,
            gain_mode: None,
            resolution: TlinearResolution::Deci,
        };
        let text = build_image_record(&meta_with_lepton(Some(lep)), None, None, None);
        let v: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(v["metadata"]["Lepton Gain Mode"], "UNKNOWN");
        assert_eq!(v["metadata"]["Lepton Resolution"], "0.1");
    }
}
