#![deny(unsafe_code)]
#![deny(warnings)]
#![no_main]
#![no_std]

use defmt_rtt as _; // global logger
use panic_probe as _;
use rtic::app;
use rtic_monotonics::stm32::prelude::*;

mod board;
mod config;
mod modem;

stm32_tim2_monotonic!(Mono, 1_000_000);

#[app(device = embassy_stm32, peripherals = true, dispatchers = [USART2, USART3])]
mod app {
    use super::*;
    use defmt::{error, info, warn};
    use embassy_stm32::gpio::{Input, Level, Output, Pull, Speed};
    use embassy_stm32::rcc::{
        AHBPrescaler, APBPrescaler, Hse, HseMode, Pll, PllMul, PllPreDiv, PllSource, Sysclk,
    };
    use embassy_stm32::time::Hertz;
    use embassy_stm32::usart::{self, UartTx};

    use agrilink_core::{AtEngine, Link, LinkStatus};

    use board::{BoardActuators, BoardSensors};
    use modem::{ModemTx, MonoClock, MonoDelay, MODEM_RX};

    #[shared]
    struct Shared {}

    #[local]
    struct Local {}

    #[init]
    fn init(_cx: init::Context) -> (Shared, Local) {
        info!("Agrilink node starting...");

        // Blue Pill: 8 MHz HSE, PLL x9 = 72 MHz SYSCLK
        let mut config = embassy_stm32::Config::default();
        config.rcc.hse = Some(Hse {
            freq: Hertz(8_000_000),
            mode: HseMode::Oscillator,
        });
        config.rcc.pll = Some(Pll {
            src: PllSource::HSE,
            prediv: PllPreDiv::DIV1,
            mul: PllMul::MUL9,
        });
        config.rcc.sys = Sysclk::PLL1_P;
        config.rcc.ahb_pre = AHBPrescaler::DIV1; // 72 MHz
        config.rcc.apb1_pre = APBPrescaler::DIV2; // 36 MHz
        config.rcc.apb2_pre = APBPrescaler::DIV1; // 72 MHz

        let p = embassy_stm32::init(config);

        // TIM2 on APB1: timer clock = 2*APB1 when prescaler != 1
        let timer_clock_hz = 72_000_000;
        Mono::start(timer_clock_hz);
        info!("TIM2 monotonic timer initialized at 1 MHz");

        let mut uart_config = usart::Config::default();
        uart_config.baudrate = crate::config::MODEM_BAUD;
        let modem_tx = match UartTx::new_blocking(p.USART1, p.PA9, uart_config) {
            Ok(tx) => tx,
            Err(e) => defmt::panic!("USART1 configuration rejected: {:?}", e),
        };
        // RX pin only needs to be an input on F1; the USART samples it directly
        let modem_rx_pin = Input::new(p.PA10, Pull::Up);
        modem::enable_receive();
        info!("Modem UART up at {} baud", crate::config::MODEM_BAUD);

        let actuators = BoardActuators {
            led: Output::new(p.PC13, Level::High, Speed::Low),
            fan: Output::new(p.PB0, Level::Low, Speed::Low),
            sprinkler: Output::new(p.PB1, Level::Low, Speed::Low),
            heater: Output::new(p.PB10, Level::Low, Speed::Low),
        };
        let sensors = BoardSensors {
            sprinkler_ready: Input::new(p.PB12, Pull::Up),
            fan_ready: Input::new(p.PB13, Pull::Up),
            heater_ready: Input::new(p.PB14, Pull::Up),
        };

        modem_task::spawn(ModemTx::new(modem_tx), modem_rx_pin, actuators, sensors).ok();

        (Shared {}, Local {})
    }

    /// Byte-at-a-time receive from the modem
    #[task(binds = USART1, priority = 2)]
    fn usart1(_cx: usart1::Context) {
        modem::on_usart1_interrupt();
    }

    /// Modem task - brings the MQTT session up, then serves the cloud
    ///
    /// The engine is the only user of USART1 TX, so it lives here.
    #[task(priority = 1)]
    async fn modem_task(
        _cx: modem_task::Context,
        tx: ModemTx,
        _rx_pin: Input<'static>,
        actuators: BoardActuators,
        sensors: BoardSensors,
    ) -> ! {
        info!("Modem task started");

        let link_config = crate::config::link();
        let engine = AtEngine::new(&MODEM_RX, tx, MonoClock, MonoDelay, &link_config);
        let mut link = match Link::new(engine, crate::config::cloud(), link_config, actuators, sensors) {
            Ok(link) => link,
            Err(e) => {
                error!("Invalid cloud configuration: {}", e);
                loop {
                    Mono::delay(60_000.millis()).await;
                }
            }
        };

        match link.start().await {
            LinkStatus::Online => info!("Cloud link online"),
            LinkStatus::Degraded(e) => warn!("Cloud link degraded: {}", e),
            LinkStatus::Offline(e) => error!("Cloud link offline: {}", e),
        }

        link.run().await
    }
}
