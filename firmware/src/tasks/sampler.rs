//! Sensor sampler: the periodic ADC scan.
//!
//! Every ~75 ms the six system channels are read and folded into moving
//! averages (battery 16 samples, temperature 16, charger status 8).  The
//! averages derive the discrete battery and charge states that records and
//! `get_status` report.  Two edge conditions shut the system down: a
//! critically low battery, and the power button held for ~1.5 s.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{info, warn};

use crate::drivers::adc128d818::{to_volts, Adc128d818};
use crate::error::ImagerError;
use crate::signals::app;
use crate::tasks::CoreContext;

pub const SAMPLE_MSEC: u64 = 75;
/// Power-button long-press period.
pub const PWROFF_PRESS_MSEC: u64 = 1500;

const NUM_BATT_SAMPLES: usize = 16;
const NUM_TEMP_SAMPLES: usize = 16;
const NUM_STAT_SAMPLES: usize = 8;

// Channel wiring.
const CH_BTN: usize = 0;
const CH_STAT2: usize = 1;
const CH_BATT: usize = 2;
#[allow(dead_code)]
const CH_PWREN: usize = 3;
const CH_STAT1: usize = 4;
const CH_TEMP: usize = 5;

/// Resistor-divider multiplier on the battery sense input.
const BATT_ADC_MULT: f32 = 5.02;

// State-of-charge thresholds (0.2C discharge curve; approximate).
const BATT_75_THRESHOLD: f32 = 3.9;
const BATT_50_THRESHOLD: f32 = 3.72;
const BATT_25_THRESHOLD: f32 = 3.66;
const BATT_0_THRESHOLD: f32 = 3.6;
const BATT_CRIT_THRESHOLD: f32 = 3.4;

// Divider thresholds for the digital senses.
const PWR_BTN_THRESHOLD: f32 = 1.3;
const STAT1_THRESHOLD: f32 = 1.0;
const STAT2_THRESHOLD: f32 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BattState {
    Pct100,
    Pct75,
    Pct50,
    Pct25,
    Pct0,
    Crit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChargeState {
    Off,
    On,
    Fault,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BattStatus {
    pub voltage: f32,
    pub state: BattState,
    pub charge: ChargeState,
}

impl Default for BattStatus {
    fn default() -> Self {
        Self {
            voltage: 0.0,
            state: BattState::Pct0,
            charge: ChargeState::Off,
        }
    }
}

/// Battery state from the averaged pack voltage.
pub fn batt_state_from_volts(v: f32) -> BattState {
    if v <= BATT_CRIT_THRESHOLD {
        BattState::Crit
    } else if v <= BATT_0_THRESHOLD {
        BattState::Pct0
    } else if v <= BATT_25_THRESHOLD {
        BattState::Pct25
    } else if v <= BATT_50_THRESHOLD {
        BattState::Pct50
    } else if v <= BATT_75_THRESHOLD {
        BattState::Pct75
    } else {
        BattState::Pct100
    }
}

/// Charger truth table (MCP73871, STAT1/STAT2 active low):
///
/// | STAT1 | STAT2 | state                         |
/// |-------|-------|-------------------------------|
/// |  H    |  H    | not charging                  |
/// |  L    |  H    | charging                      |
/// |  L    |  L    | fault                         |
/// |  H    |  L    | charge complete (not charging)|
pub fn charge_state_from_stats(s1_high: bool, s2_high: bool) -> ChargeState {
    if !s1_high {
        if s2_high {
            ChargeState::On
        } else {
            ChargeState::Fault
        }
    } else {
        ChargeState::Off
    }
}

/// LM36 conversion: 500 mV at 0 C, 10 mV per degree.
fn lm36_to_celsius(volts: f32) -> f32 {
    (volts * 1000.0 - 500.0) / 10.0
}

// ── Published readings ────────────────────────────────────────

struct ReadingsInner {
    batt: BattStatus,
    temp_c: f32,
}

/// Latest averaged readings, shared with the record builder and responder.
pub struct SensorReadings {
    inner: Mutex<ReadingsInner>,
}

impl SensorReadings {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(ReadingsInner {
                batt: BattStatus::default(),
                temp_c: 0.0,
            }),
        }
    }

    pub fn batt(&self) -> BattStatus {
        self.inner.lock().unwrap().batt
    }

    pub fn temp_c(&self) -> f32 {
        self.inner.lock().unwrap().temp_c
    }

    fn publish(&self, batt: BattStatus, temp_c: f32) {
        let mut inner = self.inner.lock().unwrap();
        inner.batt = batt;
        inner.temp_c = temp_c;
    }
}

impl Default for SensorReadings {
    fn default() -> Self {
        Self::new()
    }
}

// ── Sampler ───────────────────────────────────────────────────

struct Averager<const N: usize> {
    samples: [u16; N],
    index: usize,
}

impl<const N: usize> Averager<N> {
    fn seeded(value: u16) -> Self {
        Self {
            samples: [value; N],
            index: 0,
        }
    }

    fn push(&mut self, value: u16) {
        self.samples[self.index] = value;
        self.index = (self.index + 1) % N;
    }

    /// Rounded integer average.
    fn average(&self) -> u16 {
        let sum: u32 = self.samples.iter().map(|&s| s as u32).sum();
        let avg = sum / N as u32;
        if sum % N as u32 >= N as u32 / 2 {
            avg as u16 + 1
        } else {
            avg as u16
        }
    }
}

pub struct Sampler {
    adc: Adc128d818,
    batt_avg: Averager<NUM_BATT_SAMPLES>,
    temp_avg: Averager<NUM_TEMP_SAMPLES>,
    stat1_avg: Averager<NUM_STAT_SAMPLES>,
    stat2_avg: Averager<NUM_STAT_SAMPLES>,
    /// Two-sample button debounce.  Starts true: the user is still holding
    /// the power button at boot.
    button_prev: bool,
    poweroff_count: u32,
}

/// What one sample pass concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleOutcome {
    Nominal,
    /// Critical battery or completed power-button long-press.
    Shutdown,
}

impl Sampler {
    pub fn new(adc: Adc128d818) -> Result<Self, ImagerError> {
        adc.init()?;
        let batt = adc.read_channel(CH_BATT)?;
        let temp = adc.read_channel(CH_TEMP)?;
        let stat1 = adc.read_channel(CH_STAT1)?;
        let stat2 = adc.read_channel(CH_STAT2)?;
        Ok(Self {
            adc,
            batt_avg: Averager::seeded(batt),
            temp_avg: Averager::seeded(temp),
            stat1_avg: Averager::seeded(stat1),
            stat2_avg: Averager::seeded(stat2),
            button_prev: true,
            poweroff_count: (PWROFF_PRESS_MSEC / SAMPLE_MSEC) as u32,
        })
    }

    /// One scan: update averages, publish readings, evaluate the shutdown
    /// edges.
    pub fn sample(&mut self, readings: &SensorReadings) -> Result<SampleOutcome, ImagerError> {
        self.batt_avg.push(self.adc.read_channel(CH_BATT)?);
        self.temp_avg.push(self.adc.read_channel(CH_TEMP)?);
        self.stat1_avg.push(self.adc.read_channel(CH_STAT1)?);
        self.stat2_avg.push(self.adc.read_channel(CH_STAT2)?);
        let btn_raw = self.adc.read_channel(CH_BTN)?;

        let voltage = to_volts(self.batt_avg.average()) * BATT_ADC_MULT;
        let state = batt_state_from_volts(voltage);
        let charge = charge_state_from_stats(
            to_volts(self.stat1_avg.average()) >= STAT1_THRESHOLD,
            to_volts(self.stat2_avg.average()) >= STAT2_THRESHOLD,
        );
        let temp_c = lm36_to_celsius(to_volts(self.temp_avg.average()));
        readings.publish(
            BattStatus {
                voltage,
                state,
                charge,
            },
            temp_c,
        );

        // Two consecutive pressed samples count as pressed.
        let button_cur = to_volts(btn_raw) >= PWR_BTN_THRESHOLD;
        let pressed = button_cur && self.button_prev;
        self.button_prev = button_cur;

        if state == BattState::Crit {
            warn!("critical battery voltage");
            return Ok(SampleOutcome::Shutdown);
        }

        if pressed {
            self.poweroff_count -= 1;
            if self.poweroff_count == 0 {
                self.poweroff_count = (PWROFF_PRESS_MSEC / SAMPLE_MSEC) as u32;
                return Ok(SampleOutcome::Shutdown);
            }
        } else {
            self.poweroff_count = (PWROFF_PRESS_MSEC / SAMPLE_MSEC) as u32;
        }

        Ok(SampleOutcome::Nominal)
    }
}

/// Task entry: scan forever, signalling the orchestrator on shutdown edges.
pub fn sampler_task(ctx: Arc<CoreContext>, mut sampler: Sampler) {
    info!("start task");
    loop {
        std::thread::sleep(Duration::from_millis(SAMPLE_MSEC));
        match sampler.sample(&ctx.readings) {
            Ok(SampleOutcome::Shutdown) => ctx.sig.orchestrator.notify(app::SHUTDOWN),
            Ok(SampleOutcome::Nominal) => {}
            Err(e) => warn!("ADC scan failed: {e}"),
        }
    }
}
