//! # Simulated Transceiver - Testing and Development Mock
//!
//! An in-memory implementation of the `Transceiver` trait for testing the
//! link core without hardware. Where the hardware modem raises DIO edges,
//! the test harness scripts events instead: it completes or fails
//! transmissions, injects received frames with chosen signal measurements
//! and forces receive timeouts. The supervisor is tick-stepped by the same
//! tests, so every scenario is fully deterministic - no timers, no tasks.
//!
//! The modem state is modeled explicitly so tests can assert the
//! state/FSM consistency invariant after every transition.

use super::{irq, LoraConfiguration, PacketStatus, Transceiver};
use crate::frames::FRAME_TX_RX_LEN;

/// Modem operating states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModemState {
    Off,
    Standby,
    Fs,
    Tx,
    Rx,
}

/// A transmission captured by the simulator
#[derive(Clone)]
#[cfg_attr(feature = "std", derive(Debug))]
pub struct TxRecord {
    pub data: [u8; FRAME_TX_RX_LEN],
    pub len: usize,
    pub freq_hz: u32,
    pub tmo_ms: u16,
}

/// Simulated transceiver
pub struct SimTransceiver {
    state: ModemState,
    ok: bool,
    freq_hz: u32,
    power: u8,
    pending_irq: u16,
    rx_buffer: [u8; FRAME_TX_RX_LEN],
    last_tx: Option<TxRecord>,
    packet_status: PacketStatus,
    /// When set (the default), a transmission immediately queues TX-done;
    /// clear it to script timeouts by hand
    pub auto_tx_complete: bool,
}

impl SimTransceiver {
    pub const fn new() -> Self {
        SimTransceiver {
            state: ModemState::Off,
            ok: true,
            freq_hz: 0,
            power: 0,
            pending_irq: 0,
            rx_buffer: [0u8; FRAME_TX_RX_LEN],
            last_tx: None,
            packet_status: PacketStatus { rssi: -60, snr: 8 },
            auto_tx_complete: true,
        }
    }

    // -- harness hooks --

    /// Simulate a chip that never came up
    pub fn set_ok(&mut self, ok: bool) {
        self.ok = ok;
    }

    pub fn state(&self) -> ModemState {
        self.state
    }

    pub fn current_freq(&self) -> u32 {
        self.freq_hz
    }

    /// Take the last transmitted frame, if any
    pub fn take_transmitted(&mut self) -> Option<TxRecord> {
        self.last_tx.take()
    }

    /// Queue a TX-done cause for a transmission in flight
    pub fn complete_tx(&mut self) {
        if self.state == ModemState::Tx {
            self.pending_irq |= irq::TX_DONE;
        }
    }

    /// Queue a TX-timeout cause for a transmission in flight
    pub fn fail_tx(&mut self) {
        if self.state == ModemState::Tx {
            self.pending_irq |= irq::TX_TIMEOUT;
        }
    }

    /// Deliver a frame into the receive buffer with the given measurements
    ///
    /// Only lands while the modem is armed to receive, like the real chip.
    pub fn inject_frame(&mut self, data: &[u8], status: PacketStatus) {
        if self.state != ModemState::Rx {
            return;
        }
        let len = data.len().min(FRAME_TX_RX_LEN);
        self.rx_buffer[..len].copy_from_slice(&data[..len]);
        self.packet_status = status;
        self.pending_irq |= irq::RX_DONE;
    }

    /// Queue an RX-timeout cause
    pub fn rx_timeout(&mut self) {
        if self.state == ModemState::Rx {
            self.pending_irq |= irq::RX_TIMEOUT;
        }
    }

    /// True if a DIO edge would be pending on hardware
    pub fn dio_pending(&self) -> bool {
        self.pending_irq != 0
    }
}

impl Default for SimTransceiver {
    fn default() -> Self {
        Self::new()
    }
}

impl Transceiver for SimTransceiver {
    fn reset(&mut self) {
        self.state = ModemState::Standby;
        self.pending_irq = 0;
        self.last_tx = None;
    }

    fn is_ok(&mut self) -> bool {
        self.ok
    }

    fn configure(&mut self, _config: &LoraConfiguration, power: u8) {
        self.power = power;
        self.state = ModemState::Fs;
    }

    fn set_frequency(&mut self, freq_hz: u32) {
        self.freq_hz = freq_hz;
    }

    fn set_rf_power(&mut self, power: u8) {
        self.power = power;
    }

    fn send_frame(&mut self, data: &[u8], tmo_ms: u16) {
        let len = data.len().min(FRAME_TX_RX_LEN);
        let mut record = TxRecord {
            data: [0u8; FRAME_TX_RX_LEN],
            len,
            freq_hz: self.freq_hz,
            tmo_ms,
        };
        record.data[..len].copy_from_slice(&data[..len]);
        self.last_tx = Some(record);
        self.state = ModemState::Tx;
        if self.auto_tx_complete {
            self.pending_irq |= irq::TX_DONE;
        }
    }

    fn set_to_rx(&mut self, _tmo_ms: u16) {
        self.state = ModemState::Rx;
    }

    fn read_frame(&mut self, data: &mut [u8]) {
        let len = data.len().min(FRAME_TX_RX_LEN);
        data[..len].copy_from_slice(&self.rx_buffer[..len]);
    }

    fn get_and_clear_irq(&mut self) -> u16 {
        let status = self.pending_irq;
        self.pending_irq = 0;
        // auto-FS: the modem falls back to frequency synthesis after a
        // completed operation
        if status & (irq::TX_DONE | irq::TIMEOUT) != 0 {
            self.state = ModemState::Fs;
        }
        status
    }

    fn get_packet_status(&mut self) -> PacketStatus {
        self.packet_status
    }
}
