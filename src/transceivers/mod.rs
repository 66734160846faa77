//! Transceiver implementations
//!
//! This module contains the modem abstraction of the link core and its
//! implementations:
//!
//! - `sx1280`: opcode-level driver for the Semtech SX1280 2.4 GHz LoRa
//!   transceiver over generic embedded-hal SPI and pins
//! - `simulator`: in-memory transceiver for host-side testing
//!
//! It also owns the ISR-side contract: the DIO service routine that reads
//! and clears the modem IRQ cause, performs the sync-word pre-check on
//! receive completion and posts the cause word to the main context through
//! an atomic slot.

use core::sync::atomic::{AtomicU16, Ordering};

#[cfg(feature = "transceiver-sx1280")]
pub mod sx1280;

#[cfg(feature = "transceiver-simulator")]
pub mod simulator;

// Re-export the simulated transceiver for the feature-selected supervisor
// task; the SX1280 driver is generic over HAL types and is wired up by the
// application instead.
#[cfg(feature = "transceiver-simulator")]
pub use simulator::SimTransceiver;

/// IRQ cause bits returned by `Transceiver::get_and_clear_irq`
pub mod irq {
    pub const TX_DONE: u16 = 0x0001;
    pub const RX_DONE: u16 = 0x0002;
    pub const TX_TIMEOUT: u16 = 0x0004;
    pub const RX_TIMEOUT: u16 = 0x0008;
    pub const TIMEOUT: u16 = TX_TIMEOUT | RX_TIMEOUT;
    pub const ALL: u16 = 0x000F;
}

/// Raw SX1280 spreading factor values
pub const LORA_SF5: u8 = 0x50;
pub const LORA_SF6: u8 = 0x60;
pub const LORA_SF7: u8 = 0x70;

/// Raw SX1280 bandwidth values
pub const LORA_BW_800: u8 = 0x18;
pub const LORA_BW_1600: u8 = 0x0A;

/// Raw SX1280 coding rate values (long-interleaved variants)
pub const LORA_CR_LI_4_5: u8 = 0x05;
pub const LORA_CR_LI_4_6: u8 = 0x06;
pub const LORA_CR_LI_4_8: u8 = 0x07;

/// One LoRa air configuration
///
/// Raw modem parameter bytes plus the precomputed time-over-air; the table
/// below is the single mode this link runs, sized so one frame plus its
/// receive window fit the frame period.
#[derive(Debug, Clone, Copy)]
pub struct LoraConfiguration {
    pub spreading_factor: u8,
    pub bandwidth: u8,
    pub coding_rate: u8,
    pub preamble_length: u8,
    pub implicit_header: bool,
    pub payload_length: u8,
    pub crc_enabled: bool,
    pub invert_iq: bool,
    /// Time over air of one frame in microseconds
    pub time_over_air_us: u32,
}

/// The air configurations this link may run
pub const LORA_CONFIGURATIONS: [LoraConfiguration; 1] = [LoraConfiguration {
    spreading_factor: LORA_SF5,
    bandwidth: LORA_BW_800,
    coding_rate: LORA_CR_LI_4_5,
    preamble_length: 12,
    implicit_header: true,
    payload_length: crate::frames::FRAME_TX_RX_LEN as u8,
    crc_enabled: false, // the frame carries its own CRC-16
    invert_iq: false,
    time_over_air_us: 7800,
}];

/// Transmit timeout handed to the modem with every frame, in milliseconds
pub const SEND_FRAME_TMO_MS: u16 = 10;

/// Signal measurements of the last received packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketStatus {
    pub rssi: i8,
    pub snr: i8,
}

/// Modem abstraction the link core drives
///
/// One instance per antenna. All operations are blocking but bounded by the
/// modem's command latency (tens of microseconds behind the BUSY line);
/// nothing here waits for air time.
pub trait Transceiver {
    /// Full hardware reset; returns when the modem is ready
    fn reset(&mut self);

    /// Firmware sanity check; false means the chip did not come up
    fn is_ok(&mut self) -> bool;

    /// Apply the LoRa air configuration and output power, arm the IRQ mask
    fn configure(&mut self, config: &LoraConfiguration, power: u8);

    fn set_frequency(&mut self, freq_hz: u32);

    fn set_rf_power(&mut self, power: u8);

    /// Load the payload and trigger transmission; a miss is reported via
    /// the TX-TIMEOUT IRQ after `tmo_ms`
    fn send_frame(&mut self, data: &[u8], tmo_ms: u16);

    /// Arm the receiver; `tmo_ms` of 0 means no timeout
    fn set_to_rx(&mut self, tmo_ms: u16);

    /// Copy the last received payload out of the modem FIFO; reading a
    /// prefix (the sync word pre-check) does not consume the buffer
    fn read_frame(&mut self, data: &mut [u8]);

    /// Fetch and clear the pending IRQ causes as `irq` bits
    fn get_and_clear_irq(&mut self) -> u16;

    fn get_packet_status(&mut self) -> PacketStatus;
}

/// ISR-to-main hand-off slot for one antenna's IRQ cause word
///
/// The ISR is the only producer, the supervisor the only consumer. A plain
/// atomic word is all the sharing the two contexts do.
pub struct IrqSlot(AtomicU16);

impl IrqSlot {
    pub const fn new() -> Self {
        IrqSlot(AtomicU16::new(0))
    }

    /// ISR side: publish the cause word
    pub fn post(&self, status: u16) {
        self.0.store(status, Ordering::Release);
    }

    /// Main side: consume and clear the cause word
    pub fn take(&self) -> u16 {
        self.0.swap(0, Ordering::Acquire)
    }

    /// Main side: drop any latched cause (used when re-arming the cycle)
    pub fn clear(&self) {
        self.0.store(0, Ordering::Release);
    }
}

impl Default for IrqSlot {
    fn default() -> Self {
        Self::new()
    }
}

/// DIO rising-edge service routine, one call per edge per antenna.
///
/// Duties, in order: fetch and clear the modem IRQ status; if RX-done is
/// set, read the two sync-word bytes at buffer offset 0 and discard the
/// whole cause word on mismatch (the frame is not for this link); post the
/// result to the slot. The full buffer read, statistics and all FSM work
/// stay in main context.
pub fn service_dio_irq<T: Transceiver>(sx: &mut T, slot: &IrqSlot, frame_sync_word: u16) {
    let mut status = sx.get_and_clear_irq();
    if status & irq::RX_DONE != 0 {
        let mut sync_word = [0u8; 2];
        sx.read_frame(&mut sync_word);
        if u16::from_le_bytes(sync_word) != frame_sync_word {
            status = 0; // not for us, so ignore it
        }
    }
    slot.post(status);
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;

    #[test]
    fn test_irq_slot_take_clears() {
        let slot = IrqSlot::new();
        slot.post(irq::TX_DONE | irq::RX_DONE);
        assert_eq!(slot.take(), irq::TX_DONE | irq::RX_DONE);
        assert_eq!(slot.take(), 0);
    }

    #[test]
    fn test_irq_slot_clear() {
        let slot = IrqSlot::new();
        slot.post(irq::RX_TIMEOUT);
        slot.clear();
        assert_eq!(slot.take(), 0);
    }

    #[cfg(feature = "transceiver-simulator")]
    #[test]
    fn test_isr_discards_foreign_sync_word() {
        let mut sx = simulator::SimTransceiver::new();
        let slot = IrqSlot::new();
        sx.reset();
        sx.set_to_rx(0);

        // a frame for some other link: the ISR must zero the cause word
        let mut frame = [0u8; 91];
        frame[0..2].copy_from_slice(&0xBEEFu16.to_le_bytes());
        sx.inject_frame(&frame, PacketStatus { rssi: -50, snr: 9 });
        service_dio_irq(&mut sx, &slot, 0x1234);
        assert_eq!(slot.take(), 0);

        // a frame for us passes through with RX-done set
        let mut frame = [0u8; 91];
        frame[0..2].copy_from_slice(&0x1234u16.to_le_bytes());
        sx.inject_frame(&frame, PacketStatus { rssi: -50, snr: 9 });
        service_dio_irq(&mut sx, &slot, 0x1234);
        assert_eq!(slot.take(), irq::RX_DONE);
    }
}
