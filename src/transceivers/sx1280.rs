//! SX1280 transceiver driver
//!
//! Drives the Semtech SX1280 2.4 GHz LoRa modem at command level over a
//! generic embedded-hal SPI bus with manual chip select. Every command is
//! strictly serialized behind the chip's readiness: when a BUSY line is
//! wired the driver polls it, otherwise it enforces the datasheet's
//! post-command settle times (t1/t8/t9 around chip select plus a fixed
//! settle after mode changes).
//!
//! The driver implements the `Transceiver` trait; it never decides link
//! policy. The modem's single RX/TX-timeout cause is split into the
//! trait-level TX-TIMEOUT and RX-TIMEOUT bits from the last armed
//! operation.

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};
use embedded_hal::spi::SpiBus;

use super::{irq, LoraConfiguration, PacketStatus, Transceiver};
use crate::frames::FRAME_TX_RX_LEN;

/// SX1280 command opcodes
mod cmd {
    pub const GET_STATUS: u8 = 0xC0;
    pub const WRITE_REGISTER: u8 = 0x18;
    pub const READ_REGISTER: u8 = 0x19;
    pub const WRITE_BUFFER: u8 = 0x1A;
    pub const READ_BUFFER: u8 = 0x1B;
    pub const SET_STANDBY: u8 = 0x80;
    pub const SET_FS: u8 = 0xC1;
    pub const SET_TX: u8 = 0x83;
    pub const SET_RX: u8 = 0x82;
    pub const SET_PACKET_TYPE: u8 = 0x8A;
    pub const SET_RF_FREQUENCY: u8 = 0x86;
    pub const SET_TX_PARAMS: u8 = 0x8E;
    pub const SET_BUFFER_BASE_ADDRESS: u8 = 0x8F;
    pub const SET_MODULATION_PARAMS: u8 = 0x8B;
    pub const SET_PACKET_PARAMS: u8 = 0x8C;
    pub const GET_RX_BUFFER_STATUS: u8 = 0x17;
    pub const GET_PACKET_STATUS: u8 = 0x1D;
    pub const GET_IRQ_STATUS: u8 = 0x15;
    pub const CLEAR_IRQ_STATUS: u8 = 0x97;
    pub const SET_DIO_IRQ_PARAMS: u8 = 0x8D;
    pub const SET_REGULATOR_MODE: u8 = 0x96;
    pub const SET_AUTO_FS: u8 = 0x9E;
}

/// SX1280 register addresses
mod reg {
    /// Firmware version, 16 bits
    pub const FIRMWARE_VERSION: u16 = 0x0153;
    /// LNA gain control
    pub const RX_GAIN: u16 = 0x0891;
    /// LoRa spreading-factor companion setting (datasheet table 14-47)
    pub const SF_ADDITIONAL_CONFIG: u16 = 0x0925;
    /// Frequency-error-correction mode
    pub const FREQ_ERR_CORRECTION: u16 = 0x093C;
}

/// Hardware IRQ bits as the chip reports them
mod hw_irq {
    pub const TX_DONE: u16 = 0x0001;
    pub const RX_DONE: u16 = 0x0002;
    pub const RX_TX_TIMEOUT: u16 = 0x4000;
    pub const ALL: u16 = 0xFFFF;
}

const PACKET_TYPE_LORA: u8 = 0x01;
const STDBY_RC: u8 = 0x00;
const REGULATOR_DCDC: u8 = 0x01;
const RAMPTIME_04_US: u8 = 0x20;
/// Timeout counter period base: 62.5 us steps
const PERIODBASE_62P5_US: u8 = 0x01;
/// Timeout steps per millisecond at the 62.5 us period base
const PERIODBASE_STEPS_PER_MS: u16 = 16;

const LORA_HEADER_IMPLICIT: u8 = 0x80;
const LORA_HEADER_EXPLICIT: u8 = 0x00;
const LORA_CRC_ENABLE: u8 = 0x20;
const LORA_CRC_DISABLE: u8 = 0x00;
const LORA_IQ_NORMAL: u8 = 0x40;
const LORA_IQ_INVERTED: u8 = 0x00;

/// PLL step: 52 MHz / 2^18. Converts a carrier frequency in Hz to the
/// 3-byte register value.
fn freq_reg_from_hz(freq_hz: u32) -> u32 {
    ((freq_hz as u64) * (1 << 18) / 52_000_000) as u32
}

/// The last armed operation, used to attribute the shared timeout cause
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LastOp {
    None,
    Tx,
    Rx,
}

/// SX1280 driver over generic SPI and control pins
///
/// `busy` is optional: boards without the BUSY line wired get the timed
/// settle fallback.
pub struct Sx1280<Spi, Nss, Rst, Busy, Delay> {
    spi: Spi,
    nss: Nss,
    rst: Rst,
    busy: Option<Busy>,
    delay: Delay,
    use_dcdc: bool,
    last_op: LastOp,
    /// Pending settle time before the next command, timed-wait mode only
    settle_us: u32,
}

impl<Spi, Nss, Rst, Busy, Delay> Sx1280<Spi, Nss, Rst, Busy, Delay>
where
    Spi: SpiBus,
    Nss: OutputPin,
    Rst: OutputPin,
    Busy: InputPin,
    Delay: DelayNs,
{
    pub fn new(spi: Spi, nss: Nss, rst: Rst, busy: Option<Busy>, delay: Delay, use_dcdc: bool) -> Self {
        Sx1280 {
            spi,
            nss,
            rst,
            busy,
            delay,
            use_dcdc,
            last_op: LastOp::None,
            settle_us: 0,
        }
    }

    /// Block until the chip accepts the next command
    fn wait_on_busy(&mut self) {
        match &mut self.busy {
            Some(pin) => while pin.is_high().unwrap_or(false) {},
            None => {
                if self.settle_us != 0 {
                    self.delay.delay_us(self.settle_us);
                    self.settle_us = 0;
                }
            }
        }
    }

    /// Schedule a settle for drivers without the BUSY line
    fn set_settle(&mut self, us: u32) {
        if self.busy.is_none() {
            self.settle_us = us;
        }
    }

    fn spi_select(&mut self) {
        self.wait_on_busy();
        if self.busy.is_none() {
            self.delay.delay_ns(150); // t9 = 100 ns per datasheet
        }
        let _ = self.nss.set_low();
        self.delay.delay_ns(50); // t1 = 25 ns per datasheet
    }

    fn spi_deselect(&mut self) {
        self.delay.delay_ns(50); // t8 = 25 ns per datasheet
        let _ = self.nss.set_high();
        if self.busy.is_none() {
            self.delay.delay_ns(100);
        }
    }

    /// One full SPI transaction; `buf` carries the command out and the
    /// response back in place
    fn transfer(&mut self, buf: &mut [u8]) {
        self.spi_select();
        let _ = self.spi.transfer_in_place(buf);
        let _ = self.spi.flush();
        self.spi_deselect();
    }

    fn write_command(&mut self, opcode: u8, args: &[u8]) {
        let mut buf = [0u8; 12];
        buf[0] = opcode;
        buf[1..1 + args.len()].copy_from_slice(args);
        self.transfer(&mut buf[..1 + args.len()]);
    }

    fn write_register(&mut self, addr: u16, value: u8) {
        let a = addr.to_be_bytes();
        self.write_command(cmd::WRITE_REGISTER, &[a[0], a[1], value]);
    }

    fn read_register(&mut self, addr: u16) -> u8 {
        let a = addr.to_be_bytes();
        let mut buf = [cmd::READ_REGISTER, a[0], a[1], 0, 0];
        self.transfer(&mut buf);
        buf[4]
    }

    fn read_register_u16(&mut self, addr: u16) -> u16 {
        let a = addr.to_be_bytes();
        let mut buf = [cmd::READ_REGISTER, a[0], a[1], 0, 0, 0];
        self.transfer(&mut buf);
        u16::from_be_bytes([buf[4], buf[5]])
    }

    fn write_buffer(&mut self, offset: u8, data: &[u8]) {
        let mut buf = [0u8; 2 + FRAME_TX_RX_LEN];
        let len = data.len().min(FRAME_TX_RX_LEN);
        buf[0] = cmd::WRITE_BUFFER;
        buf[1] = offset;
        buf[2..2 + len].copy_from_slice(&data[..len]);
        self.transfer(&mut buf[..2 + len]);
    }

    fn read_buffer(&mut self, offset: u8, data: &mut [u8]) {
        let mut buf = [0u8; 3 + FRAME_TX_RX_LEN];
        let len = data.len().min(FRAME_TX_RX_LEN);
        buf[0] = cmd::READ_BUFFER;
        buf[1] = offset;
        self.transfer(&mut buf[..3 + len]);
        data[..len].copy_from_slice(&buf[3..3 + len]);
    }

    fn clear_irq_status(&mut self, mask: u16) {
        let m = mask.to_be_bytes();
        self.write_command(cmd::CLEAR_IRQ_STATUS, &[m[0], m[1]]);
    }

    fn set_standby(&mut self) {
        self.write_command(cmd::SET_STANDBY, &[STDBY_RC]);
    }

    fn set_fs(&mut self) {
        self.write_command(cmd::SET_FS, &[]);
        self.set_settle(125);
    }

    /// Read the payload length and start pointer of the last reception
    fn get_rx_buffer_status(&mut self) -> (u8, u8) {
        let mut buf = [cmd::GET_RX_BUFFER_STATUS, 0, 0, 0];
        self.transfer(&mut buf);
        (buf[2], buf[3])
    }
}

impl<Spi, Nss, Rst, Busy, Delay> Transceiver for Sx1280<Spi, Nss, Rst, Busy, Delay>
where
    Spi: SpiBus,
    Nss: OutputPin,
    Rst: OutputPin,
    Busy: InputPin,
    Delay: DelayNs,
{
    fn reset(&mut self) {
        // 10 us low would be sufficient; play it safe
        let _ = self.rst.set_low();
        self.delay.delay_ms(5);
        let _ = self.rst.set_high();
        self.delay.delay_ms(50);
        self.wait_on_busy();
        self.last_op = LastOp::None;
    }

    fn is_ok(&mut self) -> bool {
        let firmware_rev = self.read_register_u16(reg::FIRMWARE_VERSION);
        firmware_rev != 0 && firmware_rev != 0xFFFF
    }

    fn configure(&mut self, config: &LoraConfiguration, power: u8) {
        self.set_standby();
        self.delay.delay_us(1000);

        if self.use_dcdc {
            self.write_command(cmd::SET_REGULATOR_MODE, &[REGULATOR_DCDC]);
        }

        self.write_command(cmd::SET_PACKET_TYPE, &[PACKET_TYPE_LORA]);
        self.write_command(cmd::SET_BUFFER_BASE_ADDRESS, &[0, 0]);
        self.write_command(cmd::SET_AUTO_FS, &[0x01]);

        // high-sensitivity LNA mode
        let gain = self.read_register(reg::RX_GAIN);
        self.write_register(reg::RX_GAIN, gain | 0xC0);

        self.write_command(
            cmd::SET_MODULATION_PARAMS,
            &[config.spreading_factor, config.bandwidth, config.coding_rate],
        );
        // spreading-factor companion setting, per datasheet
        let sf_fix = match config.spreading_factor {
            super::LORA_SF5 | super::LORA_SF6 => 0x1E,
            super::LORA_SF7 => 0x37,
            _ => 0x32,
        };
        self.write_register(reg::SF_ADDITIONAL_CONFIG, sf_fix);
        self.write_register(reg::FREQ_ERR_CORRECTION, 0x01);

        let header = if config.implicit_header { LORA_HEADER_IMPLICIT } else { LORA_HEADER_EXPLICIT };
        let crc = if config.crc_enabled { LORA_CRC_ENABLE } else { LORA_CRC_DISABLE };
        let iq = if config.invert_iq { LORA_IQ_INVERTED } else { LORA_IQ_NORMAL };
        self.write_command(
            cmd::SET_PACKET_PARAMS,
            &[config.preamble_length, header, config.payload_length, crc, iq, 0, 0],
        );

        self.write_command(cmd::SET_TX_PARAMS, &[power, RAMPTIME_04_US]);

        // route TX-done, RX-done and the timeout to DIO1
        let dio1 = (hw_irq::TX_DONE | hw_irq::RX_DONE | hw_irq::RX_TX_TIMEOUT).to_be_bytes();
        let all = hw_irq::ALL.to_be_bytes();
        self.write_command(
            cmd::SET_DIO_IRQ_PARAMS,
            &[all[0], all[1], dio1[0], dio1[1], 0, 0, 0, 0],
        );
        self.clear_irq_status(hw_irq::ALL);

        self.set_fs();
    }

    fn set_frequency(&mut self, freq_hz: u32) {
        let f = freq_reg_from_hz(freq_hz);
        self.write_command(
            cmd::SET_RF_FREQUENCY,
            &[(f >> 16) as u8, (f >> 8) as u8, f as u8],
        );
    }

    fn set_rf_power(&mut self, power: u8) {
        self.write_command(cmd::SET_TX_PARAMS, &[power, RAMPTIME_04_US]);
    }

    fn send_frame(&mut self, data: &[u8], tmo_ms: u16) {
        self.write_buffer(0, data);
        self.clear_irq_status(hw_irq::ALL);
        let count = (tmo_ms.saturating_mul(PERIODBASE_STEPS_PER_MS)).to_be_bytes();
        self.write_command(cmd::SET_TX, &[PERIODBASE_62P5_US, count[0], count[1]]);
        self.set_settle(125);
        self.last_op = LastOp::Tx;
    }

    fn set_to_rx(&mut self, tmo_ms: u16) {
        self.clear_irq_status(hw_irq::ALL);
        let count = (tmo_ms.saturating_mul(PERIODBASE_STEPS_PER_MS)).to_be_bytes();
        self.write_command(cmd::SET_RX, &[PERIODBASE_62P5_US, count[0], count[1]]);
        self.set_settle(125);
        self.last_op = LastOp::Rx;
    }

    fn read_frame(&mut self, data: &mut [u8]) {
        // the start pointer is always 0 with buffer base (0,0), but ask the
        // chip anyway; payload length is meaningless in implicit header mode
        let (_payload_len, start) = self.get_rx_buffer_status();
        self.read_buffer(start, data);
    }

    fn get_and_clear_irq(&mut self) -> u16 {
        let mut buf = [cmd::GET_IRQ_STATUS, 0, 0, 0];
        self.transfer(&mut buf);
        let hw = u16::from_be_bytes([buf[2], buf[3]]);
        self.clear_irq_status(hw_irq::ALL);

        let mut status = 0u16;
        if hw & hw_irq::TX_DONE != 0 {
            status |= irq::TX_DONE;
        }
        if hw & hw_irq::RX_DONE != 0 {
            status |= irq::RX_DONE;
        }
        if hw & hw_irq::RX_TX_TIMEOUT != 0 {
            status |= match self.last_op {
                LastOp::Tx => irq::TX_TIMEOUT,
                _ => irq::RX_TIMEOUT,
            };
        }
        status
    }

    fn get_packet_status(&mut self) -> PacketStatus {
        let mut buf = [cmd::GET_PACKET_STATUS, 0, 0, 0, 0, 0, 0];
        self.transfer(&mut buf);
        // LoRa packet status: rssiSync = -raw/2 dBm, snr = raw/4 dB signed
        let rssi = -((buf[2] as i16) / 2);
        let snr = (buf[3] as i8 as i16) / 4;
        PacketStatus {
            rssi: rssi as i8,
            snr: snr as i8,
        }
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;

    #[test]
    fn test_freq_reg_conversion() {
        // 2.4 GHz band, PLL step 52 MHz / 2^18
        let reg = freq_reg_from_hz(2_406_000_000);
        // 2406e6 * 2^18 / 52e6 = 12129201.2..
        assert_eq!(reg, 12_129_201);

        // one channel step is ~5042 register counts
        let step = freq_reg_from_hz(2_407_000_000) - reg;
        assert!((5041..=5043).contains(&step));
    }

    #[test]
    fn test_freq_reg_is_monotonic() {
        let mut prev = 0;
        for i in 0..68u32 {
            let reg = freq_reg_from_hz(2_406_000_000 + i * 1_000_000);
            assert!(reg > prev);
            prev = reg;
        }
    }
}
