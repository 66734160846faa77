//! Link statistics: LQ rings over the configured averaging window, byte
//! rate counters, per-antenna signal measurements and the 1 Hz telemetry
//! snapshot. Statistics never alter link behavior; they only feed the
//! telemetry surfacing.

use crate::connection::ConnectionState;
use crate::link_state::Antenna;

/// Upper bound of the LQ averaging window
pub const LQ_MAX_PERIOD: usize = 127;

/// Minimum RSSI for a decodable signal (dBm), lower bound for scaling
const RSSI_MIN: i16 = -120;

/// RSSI of a very strong signal (dBm), upper bound for scaling
const RSSI_MAX: i16 = -30;

/// Minimum SNR for a decodable signal (dB); negative is normal for LoRa
const SNR_MIN: i16 = -20;

/// SNR of a very clean signal (dB)
const SNR_MAX: i16 = 10;

/// Normalize a value to a 0-100 scale based on min/max bounds
///
/// Clamps the input within the range and linearly scales it. Values below
/// `min` give 0, above `max` give 100.
pub fn normalize(value: i16, min: i16, max: i16) -> u8 {
    let clamped_value = value.max(min).min(max);
    let shifted_value = clamped_value - min;
    let scaled_value = (shifted_value as u32 * 100) / (max - min) as u32;
    scaled_value as u8
}

/// Combined signal quality from RSSI and SNR on a 0-100 scale
///
/// Weighted average favoring SNR (70%) over RSSI (30%), SNR being the
/// better indicator of link reliability on a spread-spectrum channel.
pub fn calculate_signal_quality(rssi: i8, snr: i8) -> u8 {
    let norm_rssi = normalize(rssi as i16, RSSI_MIN, RSSI_MAX);
    let norm_snr = normalize(snr as i16, SNR_MIN, SNR_MAX);
    let quality = (3 * norm_rssi as u32 + 7 * norm_snr as u32) / 10;
    quality as u8
}

/// Ring of per-frame outcomes over a sliding window
///
/// One slot per link cycle; `next()` advances the ring and clears the new
/// slot, `hit()` marks the current one.
pub struct LqCounter {
    hits: [bool; LQ_MAX_PERIOD],
    window: u16,
    pos: u16,
}

impl LqCounter {
    pub const fn new() -> Self {
        LqCounter {
            hits: [false; LQ_MAX_PERIOD],
            window: LQ_MAX_PERIOD as u16,
            pos: 0,
        }
    }

    /// Set the averaging window, clamped to `1..=LQ_MAX_PERIOD`, and clear
    pub fn set_period(&mut self, window: u16) {
        self.window = window.clamp(1, LQ_MAX_PERIOD as u16);
        self.clear();
    }

    pub fn clear(&mut self) {
        self.hits = [false; LQ_MAX_PERIOD];
        self.pos = 0;
    }

    pub fn hit(&mut self) {
        self.hits[self.pos as usize] = true;
    }

    pub fn next(&mut self) {
        self.pos = (self.pos + 1) % self.window;
        self.hits[self.pos as usize] = false;
    }

    /// Percentage of marked slots over the window, 0..=100
    pub fn lq(&self) -> u8 {
        let count = self.hits[..self.window as usize].iter().filter(|&&h| h).count();
        ((count as u32 * 100) / self.window as u32) as u8
    }
}

/// Bytes-per-second counter with a one-second tumbling window
pub struct ByteRate {
    accum: u32,
    per_sec: u32,
}

impl ByteRate {
    pub const fn new() -> Self {
        ByteRate { accum: 0, per_sec: 0 }
    }

    pub fn add(&mut self, bytes: usize) {
        self.accum = self.accum.saturating_add(bytes as u32);
    }

    pub fn update_1hz(&mut self) {
        self.per_sec = self.accum;
        self.accum = 0;
    }

    pub fn bytes_per_sec(&self) -> u32 {
        self.per_sec
    }

    pub fn clear(&mut self) {
        self.accum = 0;
        self.per_sec = 0;
    }
}

/// Shared link statistics updated by the supervisor each cycle
pub struct LinkStats {
    // last packet status per antenna, kept even for invalid frames
    pub last_rx_rssi1: i8,
    pub last_rx_snr1: i8,
    pub last_rx_rssi2: i8,
    pub last_rx_snr2: i8,

    // values mirrored from the receiver's frame status
    pub received_rssi: i8,
    pub received_lq: u8,
    pub received_lq_serial: u8,
    pub received_antenna: Antenna,
    pub received_transmit_antenna: Antenna,
    pub received_seq_no_last: u8,
    pub received_ack_last: bool,

    pub transmit_seq_no: u8,
    pub last_tx_antenna: Antenna,
    pub last_rx_antenna: Antenna,

    pub bytes_transmitted: ByteRate,
    pub bytes_received: ByteRate,
}

impl LinkStats {
    pub const fn new() -> Self {
        LinkStats {
            last_rx_rssi1: i8::MIN,
            last_rx_snr1: 0,
            last_rx_rssi2: i8::MIN,
            last_rx_snr2: 0,
            received_rssi: i8::MIN,
            received_lq: 0,
            received_lq_serial: 0,
            received_antenna: Antenna::One,
            received_transmit_antenna: Antenna::One,
            received_seq_no_last: u8::MAX,
            received_ack_last: false,
            transmit_seq_no: 0,
            last_tx_antenna: Antenna::One,
            last_rx_antenna: Antenna::One,
            bytes_transmitted: ByteRate::new(),
            bytes_received: ByteRate::new(),
        }
    }

    /// RSSI of the antenna the last frame was taken from
    pub fn last_rx_rssi(&self) -> i8 {
        match self.last_rx_antenna {
            Antenna::One => self.last_rx_rssi1,
            Antenna::Two => self.last_rx_rssi2,
        }
    }

    /// SNR of the antenna the last frame was taken from
    pub fn last_rx_snr(&self) -> i8 {
        match self.last_rx_antenna {
            Antenna::One => self.last_rx_snr1,
            Antenna::Two => self.last_rx_snr2,
        }
    }

    /// Reset everything except the transmit sequence number, which keeps
    /// counting across disconnects
    pub fn clear(&mut self) {
        let transmit_seq_no = self.transmit_seq_no;
        *self = LinkStats::new();
        self.transmit_seq_no = transmit_seq_no;
    }
}

/// Transmitter-side LQ bookkeeping over the averaging window
pub struct TxStats {
    frames_received: LqCounter,
    valid_frames_received: LqCounter,
    serial_data_received: LqCounter,
    pub fhss_curr_i: u16,
    pub rx1_valid: bool,
    pub rx2_valid: bool,
}

impl TxStats {
    pub const fn new() -> Self {
        TxStats {
            frames_received: LqCounter::new(),
            valid_frames_received: LqCounter::new(),
            serial_data_received: LqCounter::new(),
            fhss_curr_i: 0,
            rx1_valid: false,
            rx2_valid: false,
        }
    }

    pub fn init(&mut self, lq_averaging_period: u16) {
        self.frames_received.set_period(lq_averaging_period);
        self.valid_frames_received.set_period(lq_averaging_period);
        self.serial_data_received.set_period(lq_averaging_period);
    }

    /// A frame arrived on some antenna, valid or not
    pub fn do_frame_received(&mut self) {
        self.frames_received.hit();
    }

    pub fn do_valid_frame_received(&mut self) {
        self.valid_frames_received.hit();
    }

    /// A valid frame carried fresh serial payload
    pub fn do_serial_data_received(&mut self) {
        self.serial_data_received.hit();
    }

    /// Advance the rings at the end of each link cycle
    pub fn next(&mut self) {
        self.frames_received.next();
        self.valid_frames_received.next();
        self.serial_data_received.next();
    }

    pub fn lq(&self) -> u8 {
        self.valid_frames_received.lq()
    }

    pub fn lq_serial(&self) -> u8 {
        self.serial_data_received.lq()
    }

    pub fn lq_frames(&self) -> u8 {
        self.frames_received.lq()
    }
}

/// Periodic telemetry snapshot emitted at 1 Hz
#[derive(Debug, Clone, Copy)]
pub struct TelemetrySnapshot {
    pub connection: ConnectionState,
    pub lq: u8,
    pub lq_serial: u8,
    pub received_lq: u8,
    pub received_lq_serial: u8,
    pub rssi1: i8,
    pub snr1: i8,
    pub rssi2: i8,
    pub snr2: i8,
    pub received_rssi: i8,
    pub signal_quality: u8,
    pub bytes_transmitted_per_sec: u32,
    pub bytes_received_per_sec: u32,
    pub transmit_seq_no: u8,
    pub received_seq_no_last: u8,
    pub fhss_curr_i: u16,
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_bounds() {
        assert_eq!(normalize(RSSI_MIN, RSSI_MIN, RSSI_MAX), 0);
        assert_eq!(normalize(RSSI_MAX, RSSI_MIN, RSSI_MAX), 100);
        assert_eq!(normalize(-150, RSSI_MIN, RSSI_MAX), 0);
        assert_eq!(normalize(-20, RSSI_MIN, RSSI_MAX), 100);
    }

    #[test]
    fn test_signal_quality_weighting() {
        assert_eq!(calculate_signal_quality(RSSI_MAX as i8, SNR_MAX as i8), 100);
        assert_eq!(calculate_signal_quality(RSSI_MIN as i8, SNR_MIN as i8), 0);

        // SNR must outweigh RSSI
        let high_snr = calculate_signal_quality(RSSI_MIN as i8, SNR_MAX as i8);
        let high_rssi = calculate_signal_quality(RSSI_MAX as i8, SNR_MIN as i8);
        assert!(high_snr > high_rssi);
    }

    #[test]
    fn test_lq_counter_window() {
        let mut lq = LqCounter::new();
        lq.set_period(10);
        assert_eq!(lq.lq(), 0);

        // 7 valid frames out of 10
        for i in 0..10 {
            if i < 7 {
                lq.hit();
            }
            lq.next();
        }
        assert_eq!(lq.lq(), 70);
    }

    #[test]
    fn test_lq_counter_single_loss_recovers() {
        let mut lq = LqCounter::new();
        lq.set_period(10);
        for _ in 0..10 {
            lq.hit();
            lq.next();
        }
        assert_eq!(lq.lq(), 100);

        // one corrupt frame costs exactly one window slot
        lq.next();
        assert_eq!(lq.lq(), 90);

        // a full window of valid frames restores 100
        for _ in 0..10 {
            lq.hit();
            lq.next();
        }
        assert_eq!(lq.lq(), 100);
    }

    #[test]
    fn test_lq_stays_in_range_and_serial_leq_lq() {
        let mut tx = TxStats::new();
        tx.init(16);

        // pseudo-random pattern of outcomes
        let mut x: u32 = 0x1234_5678;
        for _ in 0..200 {
            x = x.wrapping_mul(1664525).wrapping_add(1013904223);
            tx.do_frame_received();
            if x & 0x3 != 0 {
                tx.do_valid_frame_received();
                if x & 0x4 != 0 {
                    tx.do_serial_data_received();
                }
            }
            assert!(tx.lq() <= 100);
            assert!(tx.lq_serial() <= tx.lq());
            tx.next();
        }
    }

    #[test]
    fn test_byte_rate_tumbling_window() {
        let mut rate = ByteRate::new();
        rate.add(100);
        rate.add(28);
        assert_eq!(rate.bytes_per_sec(), 0);
        rate.update_1hz();
        assert_eq!(rate.bytes_per_sec(), 128);
        rate.update_1hz();
        assert_eq!(rate.bytes_per_sec(), 0);
    }

    #[test]
    fn test_stats_clear_keeps_seq_no() {
        let mut stats = LinkStats::new();
        stats.transmit_seq_no = 42;
        stats.received_lq = 88;
        stats.clear();
        assert_eq!(stats.transmit_seq_no, 42);
        assert_eq!(stats.received_lq, 0);
    }
}
