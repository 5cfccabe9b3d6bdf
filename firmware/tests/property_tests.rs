//! Property tests for the round-trip laws the external interfaces rely on.
//!
//! Host-only — proptest is not available for the ESP32 target.

#![cfg(not(target_os = "espidf"))]

use firecam::clock::ds3232::SRAM_SIZE;
use firecam::clock::time::{days_in_month, rtc_break, rtc_make, TmElements};
use firecam::config::OpState;
use firecam::net::wifi::Ipv4;
use firecam::proto::framing::{FrameExtractor, ETX, STX};
use firecam::render::palettes::Palette;
use firecam::store::layout::PsArray;
use proptest::prelude::*;

// ── IP rendering ──────────────────────────────────────────────

proptest! {
    /// parse ∘ render is the identity on every address, despite the
    /// LSB-first internal layout.
    #[test]
    fn ip_parse_render_round_trip(a in 0u8..=255, b in 0u8..=255, c in 0u8..=255, d in 0u8..=255) {
        let ip = Ipv4([d, c, b, a]);
        let rendered = ip.to_string();
        prop_assert_eq!(Ipv4::parse(&rendered), Some(ip));
        // And the text leads with the most significant octet.
        prop_assert!(rendered.starts_with(&a.to_string()));
    }
}

// ── Calendar time ─────────────────────────────────────────────

fn arb_tm_elements() -> impl Strategy<Value = TmElements> {
    (0u8..=129, 1u8..=12, 0u8..=23, 0u8..=59, 0u8..=59).prop_flat_map(
        |(year, month, hour, minute, second)| {
            let max_day = days_in_month(month, 1970 + year as i64);
            (1u8..=max_day).prop_map(move |day| TmElements {
                second,
                minute,
                hour,
                wday: 0, // filled in by rtc_break
                day,
                month,
                year,
            })
        },
    )
}

proptest! {
    /// rtc_make ∘ rtc_break == identity on all representable timestamps.
    #[test]
    fn time_conversion_round_trip(te in arb_tm_elements()) {
        let secs = rtc_make(&te);
        let back = rtc_break(secs);
        prop_assert_eq!(
            (back.year, back.month, back.day, back.hour, back.minute, back.second),
            (te.year, te.month, te.day, te.hour, te.minute, te.second)
        );
        prop_assert!((1..=7).contains(&back.wday));
        // And the other direction.
        prop_assert_eq!(rtc_make(&back), secs);
    }
}

// ── Persistent store ──────────────────────────────────────────

#[derive(Debug, Clone)]
enum StoreOp {
    RecEnable(bool),
    Interval(u16),
    Palette(usize),
    ApSsid(String),
    Flags(u8),
}

fn arb_store_op() -> impl Strategy<Value = StoreOp> {
    prop_oneof![
        any::<bool>().prop_map(StoreOp::RecEnable),
        prop_oneof![Just(1u16), Just(5), Just(30), Just(60), Just(300), Just(1800), Just(3600)]
            .prop_map(StoreOp::Interval),
        (0usize..6).prop_map(StoreOp::Palette),
        "[a-zA-Z0-9_-]{1,32}".prop_map(StoreOp::ApSsid),
        any::<u8>().prop_map(StoreOp::Flags),
    ]
}

proptest! {
    /// After any sequence of mutations the checksum closure holds, the
    /// array validates, and a byte-for-byte reload reads back the same
    /// state.
    #[test]
    fn store_mutations_preserve_integrity(ops in proptest::collection::vec(arb_store_op(), 1..20)) {
        let mut ps = PsArray::new([0; SRAM_SIZE]);
        ps.init_defaults([0x24, 0x6F, 0x28, 0xAA, 0x1B, 0xC3]);

        for op in &ops {
            match op {
                StoreOp::RecEnable(en) => { ps.set_rec_enable(*en); }
                StoreOp::Interval(secs) => {
                    let (mut op_state, _) = ps.op_state();
                    op_state.record_interval = *secs;
                    ps.set_op_state(&op_state);
                }
                StoreOp::Palette(idx) => {
                    let (mut op_state, _) = ps.op_state();
                    op_state.palette = firecam::render::palettes::ALL_PALETTES[*idx];
                    ps.set_op_state(&op_state);
                }
                StoreOp::ApSsid(ssid) => {
                    let mut wifi = ps.wifi_info();
                    wifi.ap_ssid.clear();
                    let _ = wifi.ap_ssid.push_str(ssid);
                    ps.set_wifi_info(&wifi);
                }
                StoreOp::Flags(flags) => {
                    let mut wifi = ps.wifi_info();
                    wifi.flags = *flags;
                    ps.set_wifi_info(&wifi);
                }
            }
            // Checksum closure: sum of all non-checksum bytes mod 256.
            let sum = ps.0[..SRAM_SIZE - 1]
                .iter()
                .fold(0u8, |acc, &b| acc.wrapping_add(b));
            prop_assert_eq!(sum, ps.0[SRAM_SIZE - 1]);
            prop_assert!(ps.is_valid());
        }

        // Write-then-read bit equality: a fresh shadow over the same bytes
        // decodes to the same state.
        let mut reloaded = PsArray::new(ps.0);
        prop_assert!(reloaded.is_valid());
        prop_assert_eq!(reloaded.wifi_info(), ps.wifi_info());
        prop_assert_eq!(reloaded.rec_enable(), ps.rec_enable());
        let (op_a, repair_a): (OpState, _) = reloaded.op_state();
        let (op_b, _) = ps.op_state();
        prop_assert!(repair_a.is_none());
        prop_assert_eq!(op_a, op_b);
    }
}

// ── Wire framing ──────────────────────────────────────────────

proptest! {
    /// Framed commands survive arbitrary chunking, with garbage in front
    /// and stray ETX bytes between frames.
    #[test]
    fn framing_survives_chunking(
        payloads in proptest::collection::vec("[a-z{}\":,0-9_]{0,64}", 1..5),
        chunk in 1usize..16,
        leading_noise in proptest::collection::vec(0x04u8..=0xFF, 0..8),
    ) {
        let mut wire = leading_noise.clone();
        for p in &payloads {
            wire.push(STX);
            wire.extend_from_slice(p.as_bytes());
            wire.push(ETX);
            wire.push(ETX); // spurious, must be skipped silently
        }

        let mut fx = FrameExtractor::new();
        let mut got = Vec::new();
        for piece in wire.chunks(chunk) {
            fx.push_bytes(piece);
            while let Some(frame) = fx.next_frame() {
                got.push(frame);
            }
        }

        let want: Vec<Vec<u8>> = payloads.iter().map(|p| p.as_bytes().to_vec()).collect();
        prop_assert_eq!(got, want);
    }
}

// ── Palettes ──────────────────────────────────────────────────

proptest! {
    /// Every palette maps every index to a colour, monotone in nothing but
    /// always defined — and the name round-trips.
    #[test]
    fn palette_lookup_is_total(idx in 0usize..256) {
        for p in firecam::render::palettes::ALL_PALETTES {
            let lut = p.lut();
            let _ = lut[idx];
            prop_assert_eq!(Palette::by_name(p.name()), Some(p));
        }
    }
}
