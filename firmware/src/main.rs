//! FireCAM firmware entry point.
//!
//! Boot order: hold power on, bring up the buses, set the system clock from
//! the RTC, start the owning store task, initialise the imagers and Wi-Fi,
//! then spawn the task fabric.  The two imager drivers run at elevated
//! priority — the thermal driver pinned to its own core so GUI jitter
//! cannot break the VoSPI resynchronisation — and the orchestrator runs on
//! the main thread.

use std::sync::Arc;
use std::thread;

use anyhow::{anyhow, Result};
use log::{error, info, warn};

use firecam::clock::{self, ds3232::Ds3232};
use firecam::config::GainMode;
use firecam::drivers::adc128d818::Adc128d818;
use firecam::drivers::cci::Cci;
use firecam::drivers::ov2640::Ov2640;
use firecam::drivers::sdcard::SdCard;
use firecam::store::StoreTask;
use firecam::tasks::display::{display_task, LogSurface};
use firecam::tasks::orchestrator::Orchestrator;
use firecam::tasks::recorder::recorder_task;
use firecam::tasks::responder::responder_task;
use firecam::tasks::sampler::{sampler_task, Sampler};
use firecam::tasks::thermal::thermal_task;
use firecam::tasks::visual::visual_task;
use firecam::tasks::{CoreContext, EspSystemCtl};

/// Imager driver tasks preempt everything else.
const IMAGER_TASK_PRIORITY: u8 = 2;
const TASK_PRIORITY: u8 = 1;

const IMAGER_STACK: usize = 8 * 1024;
const TASK_STACK: usize = 12 * 1024;

fn main() -> Result<()> {
    #[cfg(target_os = "espidf")]
    {
        esp_idf_svc::sys::link_patches();
        esp_idf_logger::init()?;
    }
    #[cfg(not(target_os = "espidf"))]
    init_host_logger();

    info!("FireCAM v{}", env!("CARGO_PKG_VERSION"));

    // Keep the regulator on now, before the user releases the button.
    firecam::drivers::set_power_hold(true);

    if let Err(e) = init_peripherals() {
        // Nothing works without the buses; hold here for the watchdog.
        error!("peripheral initialization failed: {e}");
        loop {
            thread::sleep(std::time::Duration::from_secs(1));
        }
    }

    // System clock from the RTC, before anything stamps records.
    let rtc = Arc::new(Ds3232::new());
    if let Err(e) = clock::time_init(&rtc) {
        warn!("RTC time read failed ({e}); running on the default clock");
    }

    // The store task owns the RTC from here on.
    let (store_task, store) = StoreTask::new(Arc::clone(&rtc), soft_ap_base_mac())
        .map_err(|e| anyhow!("persistent store unavailable: {e}"))?;
    spawn("store", TASK_STACK, TASK_PRIORITY, None, move || {
        store_task.run()
    })?;

    let ctx = Arc::new(CoreContext::new(store));

    // Wi-Fi from persisted configuration.
    {
        let snap = ctx
            .store
            .snapshot()
            .map_err(|e| anyhow!("store snapshot failed: {e}"))?;
        if let Err(e) = ctx.wifi.lock().unwrap().init(snap.wifi) {
            error!("WiFi initialization failed: {e}");
        }
    }

    // Thermal imager: radiometric TLinear configuration plus the persisted
    // gain mode.
    let cci = Arc::new(Cci::new());
    match cci.init() {
        Ok(()) => {
            if let Ok(snap) = ctx.store.snapshot() {
                if snap.op.gain_mode != GainMode::Auto {
                    if let Err(e) = cci.set_gain_mode(snap.op.gain_mode) {
                        warn!("could not restore gain mode: {e}");
                    }
                }
            }
        }
        Err(e) => error!("Lepton initialization failed: {e}"),
    }

    let sampler = Sampler::new(Adc128d818::new())
        .map_err(|e| anyhow!("ADC subsystem initialization failed: {e}"))?;

    // ── Task fabric ───────────────────────────────────────────

    {
        let ctx = Arc::clone(&ctx);
        let cci = Arc::clone(&cci);
        let spi = lepton_packet_source()?;
        spawn(
            "lep",
            IMAGER_STACK,
            IMAGER_TASK_PRIORITY,
            Some(0),
            move || thermal_task(ctx, spi, cci),
        )?;
    }

    {
        let ctx = Arc::clone(&ctx);
        let cam = visual_imager()?;
        spawn("cam", IMAGER_STACK, IMAGER_TASK_PRIORITY, Some(1), move || {
            visual_task(ctx, cam)
        })?;
    }

    {
        let ctx = Arc::clone(&ctx);
        spawn("file", TASK_STACK, TASK_PRIORITY, Some(1), move || {
            recorder_task(ctx, SdCard::new())
        })?;
    }

    {
        let ctx = Arc::clone(&ctx);
        let cci = Arc::clone(&cci);
        spawn("cmd", TASK_STACK, TASK_PRIORITY, Some(1), move || {
            responder_task(ctx, cci)
        })?;
    }

    {
        let ctx = Arc::clone(&ctx);
        spawn("adc", TASK_STACK, TASK_PRIORITY, Some(1), move || {
            sampler_task(ctx, sampler)
        })?;
    }

    {
        let ctx = Arc::clone(&ctx);
        spawn("gui", TASK_STACK, TASK_PRIORITY, Some(1), move || {
            display_task(ctx, LogSurface)
        })?;
    }

    // The maestro runs here.
    Orchestrator::new(&ctx).run(ctx, &EspSystemCtl);
    Ok(())
}

/// Spawn a task thread, pinned and prioritised on the device.
fn spawn<F>(
    name: &'static str,
    stack: usize,
    priority: u8,
    core: Option<u8>,
    f: F,
) -> Result<()>
where
    F: FnOnce() + Send + 'static,
{
    #[cfg(target_os = "espidf")]
    {
        use esp_idf_svc::hal::cpu::Core;
        use esp_idf_svc::hal::task::thread::ThreadSpawnConfiguration;

        ThreadSpawnConfiguration {
            stack_size: stack,
            priority,
            pin_to_core: core.map(|c| if c == 0 { Core::Core0 } else { Core::Core1 }),
            ..Default::default()
        }
        .set()
        .map_err(|e| anyhow!("task config for {name}: {e}"))?;
    }
    #[cfg(not(target_os = "espidf"))]
    let _ = (priority, core);

    thread::Builder::new()
        .name(name.into())
        .stack_size(stack)
        .spawn(f)
        .map_err(|e| anyhow!("spawn {name}: {e}"))?;
    Ok(())
}

// ── Peripheral bring-up ───────────────────────────────────────

#[cfg(target_os = "espidf")]
fn init_peripherals() -> Result<()> {
    use esp_idf_svc::sys::*;
    use firecam::drivers::pins;

    // SAFETY: one-time pin and bus configuration from the boot path.
    unsafe {
        for (pin, mode, level) in [
            (pins::CAM_CSN, gpio_mode_t_GPIO_MODE_OUTPUT, 1),
            (pins::LCD_CSN, gpio_mode_t_GPIO_MODE_OUTPUT, 1),
            (pins::LEP_CSN, gpio_mode_t_GPIO_MODE_OUTPUT, 1),
            (pins::TS_CSN, gpio_mode_t_GPIO_MODE_OUTPUT, 1),
            (pins::LCD_DC, gpio_mode_t_GPIO_MODE_OUTPUT, 0),
        ] {
            gpio_set_direction(pin, mode);
            gpio_set_level(pin, level);
        }
        gpio_set_direction(pins::TS_IRQ, gpio_mode_t_GPIO_MODE_INPUT);
        gpio_set_direction(pins::LEP_VSYNC, gpio_mode_t_GPIO_MODE_INPUT);

        // I2C master: RTC, ADC, charger, Lepton CCI, camera SCCB.
        let i2c_cfg = i2c_config_t {
            mode: i2c_mode_t_I2C_MODE_MASTER,
            sda_io_num: pins::I2C_SDA,
            scl_io_num: pins::I2C_SCL,
            sda_pullup_en: true,
            scl_pullup_en: true,
            __bindgen_anon_1: i2c_config_t__bindgen_ty_1 {
                master: i2c_config_t__bindgen_ty_1__bindgen_ty_1 {
                    clk_speed: 100_000,
                },
            },
            ..Default::default()
        };
        if i2c_param_config(firecam::drivers::i2c::I2C_PORT, &i2c_cfg) != ESP_OK
            || i2c_driver_install(firecam::drivers::i2c::I2C_PORT, i2c_mode_t_I2C_MODE_MASTER, 0, 0, 0)
                != ESP_OK
        {
            return Err(anyhow!("I2C master initialization failed"));
        }

        // HSPI: Lepton only (no MOSI).
        let hspi = spi_bus_config_t {
            __bindgen_anon_1: spi_bus_config_t__bindgen_ty_1 { mosi_io_num: -1 },
            __bindgen_anon_2: spi_bus_config_t__bindgen_ty_2 {
                miso_io_num: pins::HSPI_MISO,
            },
            sclk_io_num: pins::HSPI_SCK,
            __bindgen_anon_3: spi_bus_config_t__bindgen_ty_3 { quadwp_io_num: -1 },
            __bindgen_anon_4: spi_bus_config_t__bindgen_ty_4 { quadhd_io_num: -1 },
            max_transfer_sz: firecam::drivers::vospi::LEP_PKT_LEN as i32,
            ..Default::default()
        };
        if spi_bus_initialize(spi_host_device_t_SPI2_HOST, &hspi, 1) != ESP_OK {
            return Err(anyhow!("HSPI master initialization failed"));
        }

        // VSPI: ArduCAM, LCD, touchscreen.
        let vspi = spi_bus_config_t {
            __bindgen_anon_1: spi_bus_config_t__bindgen_ty_1 {
                mosi_io_num: pins::VSPI_MOSI,
            },
            __bindgen_anon_2: spi_bus_config_t__bindgen_ty_2 {
                miso_io_num: pins::VSPI_MISO,
            },
            sclk_io_num: pins::VSPI_SCK,
            __bindgen_anon_3: spi_bus_config_t__bindgen_ty_3 { quadwp_io_num: -1 },
            __bindgen_anon_4: spi_bus_config_t__bindgen_ty_4 { quadhd_io_num: -1 },
            max_transfer_sz: (320 * 40 * 2) as i32,
            ..Default::default()
        };
        if spi_bus_initialize(spi_host_device_t_SPI3_HOST, &vspi, 2) != ESP_OK {
            return Err(anyhow!("VSPI master initialization failed"));
        }
    }
    Ok(())
}

#[cfg(not(target_os = "espidf"))]
fn init_peripherals() -> Result<()> {
    info!("host run: simulated peripherals");
    Ok(())
}

#[cfg(target_os = "espidf")]
fn lepton_packet_source() -> Result<firecam::drivers::vospi::LeptonSpi> {
    use esp_idf_svc::sys::spi_host_device_t_SPI2_HOST;
    firecam::drivers::vospi::LeptonSpi::new(
        spi_host_device_t_SPI2_HOST,
        firecam::drivers::pins::LEP_CSN,
    )
    .map_err(|e| anyhow!("Lepton SPI initialization failed: {e}"))
}

#[cfg(not(target_os = "espidf"))]
fn lepton_packet_source() -> Result<firecam::drivers::vospi::SimLepton> {
    Ok(firecam::drivers::vospi::SimLepton::new())
}

#[cfg(target_os = "espidf")]
fn visual_imager() -> Result<Ov2640> {
    use esp_idf_svc::sys::spi_host_device_t_SPI3_HOST;
    Ov2640::new(spi_host_device_t_SPI3_HOST, firecam::drivers::pins::CAM_CSN)
        .map_err(|e| anyhow!("ArduCAM initialization failed: {e}"))
}

#[cfg(not(target_os = "espidf"))]
fn visual_imager() -> Result<Ov2640> {
    Ok(Ov2640::new())
}

/// Factory base MAC; the soft-AP address derives from it.
#[cfg(target_os = "espidf")]
fn soft_ap_base_mac() -> [u8; 6] {
    let mut mac = [0u8; 6];
    // SAFETY: six-byte out buffer as the API requires.
    unsafe {
        esp_idf_svc::sys::esp_efuse_mac_get_default(mac.as_mut_ptr());
    }
    mac
}

#[cfg(not(target_os = "espidf"))]
fn soft_ap_base_mac() -> [u8; 6] {
    [0x24, 0x6F, 0x28, 0xAA, 0x1B, 0xC3]
}

#[cfg(not(target_os = "espidf"))]
fn init_host_logger() {
    // Tests and host runs: plain stderr logging at info level.
    struct StderrLog;
    impl log::Log for StderrLog {
        fn enabled(&self, metadata: &log::Metadata) -> bool {
            metadata.level() <= log::Level::Info
        }
        fn log(&self, record: &log::Record) {
            if self.enabled(record.metadata()) {
                eprintln!("{:5} {} - {}", record.level(), record.target(), record.args());
            }
        }
        fn flush(&self) {}
    }
    static LOGGER: StderrLog = StderrLog;
    let _ = log::set_logger(&LOGGER).map(|()| log::set_max_level(log::LevelFilter::Info));
}
