//! Roast monitor firmware entry point.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │                                                                │
//! │  SystemClock    WifiRadio     MqttSession    TcpServer         │
//! │  (TimePort)     (RadioPort)   (BrokerSession) (push server)    │
//! │  SpiDeviceDriver → Max31855   PinDriver → StatusIndicator      │
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  ┌────────────────────────────────────────────────────────┐    │
//! │  │        RoastController (pure logic)                    │    │
//! │  │  NetworkLink · OutputSink · fault cadence              │    │
//! │  └────────────────────────────────────────────────────────┘    │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Settings are compiled in from `settings.json` at the crate root.
#![deny(unused_must_use)]

use anyhow::Result;
use embassy_sync::signal::Signal;
use futures_lite::future::block_on;
use log::{error, info, LevelFilter};

use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::hal::delay::FreeRtos;
use esp_idf_svc::hal::gpio::{AnyIOPin, AnyOutputPin, Output, PinDriver};
use esp_idf_svc::hal::peripherals::Peripherals;
use esp_idf_svc::hal::spi::{config::Config as SpiConfig, SpiDeviceDriver, SpiDriver, SpiDriverConfig};
use esp_idf_svc::hal::units::Hertz;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use esp_idf_svc::wifi::{BlockingWifi, EspWifi};

use roastmon::adapters::device_id;
use roastmon::adapters::mqtt::MqttSession;
use roastmon::adapters::time::SystemClock;
use roastmon::adapters::wifi::WifiRadio;
use roastmon::app::controller::{RoastController, StopSignal};
use roastmon::app::ports::TimePort;
use roastmon::config::Configuration;
use roastmon::indicator::{Condition, StatusIndicator};
use roastmon::network::NetworkLink;
use roastmon::pins;
use roastmon::sensors::Max31855;
use roastmon::sinks::OutputSink;

const SETTINGS: &str = include_str!("../settings.json");

/// Never signalled on hardware; the monitor runs until power-off.
static STOP: StopSignal = Signal::new();

/// Play the fault pattern forever. Used when there is nothing to run.
fn halt_with_fault(
    mut indicator: StatusIndicator<PinDriver<'static, AnyOutputPin, Output>>,
    clock: &SystemClock,
) -> ! {
    indicator.show(Condition::Fault, clock.uptime_ms());
    loop {
        indicator.tick(clock.uptime_ms());
        FreeRtos::delay_ms(50);
    }
}

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;

    info!("╔══════════════════════════════════════╗");
    info!("║  Roast monitor v{}                ║", env!("CARGO_PKG_VERSION"));
    info!("╚══════════════════════════════════════╝");

    let clock = SystemClock::new();
    let peripherals = Peripherals::take()?;

    // ── 2. Status LED ─────────────────────────────────────────
    let led = PinDriver::output(unsafe { AnyOutputPin::new(pins::STATUS_LED_GPIO) })?;
    let indicator = StatusIndicator::new(led);

    // ── 3. Settings ───────────────────────────────────────────
    let board_id = device_id::local_device_id();
    let config = match Configuration::from_json(SETTINGS, &board_id) {
        Ok(c) => c,
        Err(e) => {
            error!("Config: {} (halting)", e);
            halt_with_fault(indicator, &clock);
        }
    };
    log::set_max_level(if config.debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    });
    info!(
        "Config: device '{}', mode {:?}, every {:.2} s",
        config.device_id, config.output_mode, config.read_interval_secs
    );

    // ── 4. Thermocouple on SPI2 ───────────────────────────────
    let spi_bus = SpiDriver::new_without_sdo(
        peripherals.spi2,
        unsafe { AnyOutputPin::new(pins::TC_SCK_GPIO) },
        unsafe { AnyIOPin::new(pins::TC_MISO_GPIO) },
        &SpiDriverConfig::new(),
    )?;
    let spi = SpiDeviceDriver::new(
        spi_bus,
        Some(unsafe { AnyOutputPin::new(pins::TC_CS_GPIO) }),
        &SpiConfig::new().baudrate(Hertz(pins::TC_SPI_HZ)),
    )?;
    let sensor = Max31855::new(spi);

    // ── 5. WiFi (only when credentials are configured) ────────
    let link = match &config.wifi {
        Some(creds) => {
            let sysloop = EspSystemEventLoop::take()?;
            let nvs = EspDefaultNvsPartition::take()?;
            let wifi = BlockingWifi::wrap(
                EspWifi::new(peripherals.modem, sysloop.clone(), Some(nvs))?,
                sysloop,
            )?;
            Some(NetworkLink::new(
                WifiRadio::new(wifi),
                &creds.ssid,
                &creds.password,
                config.link_policy,
            ))
        }
        None => None,
    };

    // ── 6. Output sink ────────────────────────────────────────
    let sink = match OutputSink::from_config(&config, MqttSession::new()) {
        Ok(s) => s,
        Err(e) => {
            error!("Config: {} (halting)", e);
            halt_with_fault(indicator, &clock);
        }
    };

    // ── 7. Run ────────────────────────────────────────────────
    let mut controller = RoastController::new(&config, sink, link, sensor, indicator, clock);
    block_on(async {
        if let Err(e) = controller.start(&STOP).await {
            error!("Startup failed: {}", e);
            controller.hold_fault(&STOP).await;
            return;
        }
        controller.run(&STOP).await;
    });

    info!("Roast monitor stopped");
    Ok(())
}
