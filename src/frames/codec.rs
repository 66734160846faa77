//! # Frame Codec
//!
//! Packs and unpacks the fixed-size over-the-air frame. The downlink (TX)
//! frame carries the bit-packed RC channels plus a serial payload window;
//! the uplink (RX) frame carries telemetry status plus an opaque serial
//! payload. Reserved command sub-frames replace the payload window with a
//! parameter-exchange TLV.
//!
//! ## Layout (`FRAME_TX_RX_LEN` = 91 bytes, both directions)
//!
//! | bytes     | field                                                    |
//! |-----------|----------------------------------------------------------|
//! | 0..2      | sync word, little-endian u16 link identifier             |
//! | 2         | status byte (frame type, seq_no, ack, antenna ids)       |
//! | 3         | RSSI as u7                                               |
//! | 4         | LQ                                                       |
//! | 5         | LQ_serial                                                |
//! | 6         | payload_len                                              |
//! | 7..29     | TX only: 16 channels x 11 bits, MSB-first                |
//! | 7/29..89  | payload window (82 bytes RX, 60 bytes TX), zero padded   |
//! | 89..91    | CRC-16 over bytes 0..89, little-endian                   |
//!
//! Status byte: bit 0 frame type (0 normal, 1 cmd), bits 1..=3 seq_no mod 8,
//! bit 4 ack, bit 5 receive antenna, bit 6 transmit antenna, bit 7 spare.

use crate::channel_source::RcData;
use crate::link_state::Antenna;

use super::{
    FRAME_CHANNEL_REGION_LEN, FRAME_HEADER_LEN, FRAME_RX_PAYLOAD_LEN, FRAME_TX_PAYLOAD_LEN,
    FRAME_TX_RX_LEN, RC_CHANNEL_BITS, RC_CHANNEL_COUNT,
};

/// Offset of the channel region in a TX frame
const CHANNELS_POS: usize = FRAME_HEADER_LEN;

/// Offset of the payload window in a TX frame
const TX_PAYLOAD_POS: usize = FRAME_HEADER_LEN + FRAME_CHANNEL_REGION_LEN;

/// Offset of the payload window in an RX frame
const RX_PAYLOAD_POS: usize = FRAME_HEADER_LEN;

/// Offset of the CRC in both frame directions
const CRC_POS: usize = FRAME_TX_RX_LEN - 2;

/// Command id placed at payload byte 0 of a TX command frame
pub const CMD_GET_RX_SETUPDATA: u8 = 0x01;
pub const CMD_SET_RX_PARAMS: u8 = 0x02;
pub const CMD_STORE_RX_PARAMS: u8 = 0x03;

/// Command id placed at payload byte 0 of an RX command frame
pub const CMD_RX_SETUPDATA: u8 = 0x81;
pub const CMD_RX_ACK: u8 = 0x82;

/// Calculate CRC-16-CCITT for frame integrity checking
///
/// Polynomial 0x1021, initial value 0xFFFF, no final XOR. Both endpoints
/// must use this exact variant; the modem's hardware CRC is disabled in
/// favor of it so that the sync-word pre-check in the ISR stays cheap.
fn checksum16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ 0x1021;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

/// Encode an i8 dBm RSSI into the u7 wire representation
///
/// RSSI is always negative in practice; the wire carries its magnitude,
/// saturated to 127.
pub fn rssi_u7_from_i8(rssi: i8) -> u8 {
    if rssi >= 0 {
        0
    } else {
        let mag = -(rssi as i16);
        if mag > 127 { 127 } else { mag as u8 }
    }
}

/// Decode the u7 wire representation back into an i8 dBm RSSI
pub fn rssi_i8_from_u7(rssi_u7: u8) -> i8 {
    -((rssi_u7 & 0x7F) as i8)
}

/// Frame type carried in bit 0 of the status byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Normal,
    Cmd,
}

/// Result of validating a received frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameCheckError {
    /// The frame is not for this link; dropped silently
    SyncWord,
    /// The frame is for this link but corrupt; counted as invalid
    Crc,
}

#[cfg(feature = "std")]
impl std::fmt::Display for FrameCheckError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameCheckError::SyncWord => write!(f, "frame sync word mismatch"),
            FrameCheckError::Crc => write!(f, "frame CRC mismatch"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for FrameCheckError {}

/// Per-frame status the transmitter reports to the receiver
///
/// These values end up in the status byte and status extension of every
/// outgoing frame; the receiver mirrors the same structure back.
#[derive(Debug, Clone, Copy)]
pub struct FrameStats {
    pub seq_no: u8,
    pub ack: bool,
    /// Antenna the last valid frame was received on
    pub antenna: Antenna,
    /// Antenna this frame is transmitted on
    pub transmit_antenna: Antenna,
    pub rssi: i8,
    pub lq: u8,
    pub lq_serial: u8,
}

/// Wire-format TX frame ready for the modem FIFO
///
/// The `data` field is intentionally public for zero-copy hand-off to the
/// transceiver.
#[derive(Clone)]
#[cfg_attr(feature = "std", derive(Debug))]
pub struct TxFrame {
    pub data: [u8; FRAME_TX_RX_LEN],
}

/// Status fields extracted from a received frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RxFrameStatus {
    pub frame_type: FrameType,
    pub seq_no: u8,
    pub ack: bool,
    pub antenna: Antenna,
    pub transmit_antenna: Antenna,
    pub rssi: i8,
    pub lq: u8,
    pub lq_serial: u8,
}

/// A validated received frame
#[derive(Clone)]
#[cfg_attr(feature = "std", derive(Debug))]
pub struct RxFrame {
    pub status: RxFrameStatus,
    pub payload: [u8; FRAME_RX_PAYLOAD_LEN],
    pub payload_len: u8,
}

impl RxFrame {
    /// The valid payload bytes of this frame
    pub fn payload_bytes(&self) -> &[u8] {
        &self.payload[..self.payload_len as usize]
    }

    /// Decode the command TLV of an RX command frame
    ///
    /// Returns `None` for normal frames or unknown command ids.
    pub fn command(&self) -> Option<RxCmd> {
        if self.status.frame_type != FrameType::Cmd || self.payload_len == 0 {
            return None;
        }
        match self.payload[0] {
            CMD_RX_SETUPDATA => RxSetupData::from_bytes(&self.payload[1..self.payload_len as usize])
                .map(RxCmd::SetupData),
            CMD_RX_ACK => Some(RxCmd::Ack),
            _ => None,
        }
    }
}

/// Commands the receiver sends back in command frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxCmd {
    /// The receiver's setup data, answering `GetRxSetupData`
    SetupData(RxSetupData),
    /// Acknowledge of a `SetRxParams` or `StoreRxParams` command
    Ack,
}

/// Command frame kinds the transmitter can send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxCmd {
    GetRxSetupData,
    SetRxParams(RxParams),
    StoreRxParams,
}

/// Transmitter-side copy of the receiver parameters
///
/// Exchanged in `SetRxParams` command frames; the receiver applies them and
/// acknowledges. Layout on the wire is the field order below, one byte each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RxParams {
    pub power: u8,
    pub diversity_mode: u8,
    pub failsafe_mode: u8,
    pub channel_order: u8,
}

impl RxParams {
    pub const WIRE_LEN: usize = 4;

    pub fn to_bytes(&self) -> [u8; Self::WIRE_LEN] {
        [self.power, self.diversity_mode, self.failsafe_mode, self.channel_order]
    }

    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < Self::WIRE_LEN {
            return None;
        }
        Some(RxParams {
            power: data[0],
            diversity_mode: data[1],
            failsafe_mode: data[2],
            channel_order: data[3],
        })
    }
}

/// Setup data reported by the receiver, answering `GetRxSetupData`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RxSetupData {
    pub firmware_version: u16,
    pub power_levels: u8,
    pub diversity_available: bool,
}

impl RxSetupData {
    pub const WIRE_LEN: usize = 4;

    pub fn to_bytes(&self) -> [u8; Self::WIRE_LEN] {
        let ver = self.firmware_version.to_le_bytes();
        [ver[0], ver[1], self.power_levels, self.diversity_available as u8]
    }

    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < Self::WIRE_LEN {
            return None;
        }
        Some(RxSetupData {
            firmware_version: u16::from_le_bytes([data[0], data[1]]),
            power_levels: data[2],
            diversity_available: data[3] != 0,
        })
    }
}

fn pack_status_byte(frame_type: FrameType, stats: &FrameStats) -> u8 {
    let ft = match frame_type {
        FrameType::Normal => 0u8,
        FrameType::Cmd => 1u8,
    };
    ft | ((stats.seq_no & 0x07) << 1)
        | ((stats.ack as u8) << 4)
        | ((stats.antenna.index() & 0x01) << 5)
        | ((stats.transmit_antenna.index() & 0x01) << 6)
}

fn pack_header(data: &mut [u8; FRAME_TX_RX_LEN], sync_word: u16, frame_type: FrameType, stats: &FrameStats, payload_len: u8) {
    data[0..2].copy_from_slice(&sync_word.to_le_bytes());
    data[2] = pack_status_byte(frame_type, stats);
    data[3] = rssi_u7_from_i8(stats.rssi);
    data[4] = stats.lq;
    data[5] = stats.lq_serial;
    data[6] = payload_len;
}

fn pack_crc(data: &mut [u8; FRAME_TX_RX_LEN]) {
    let crc = checksum16(&data[..CRC_POS]);
    data[CRC_POS..].copy_from_slice(&crc.to_le_bytes());
}

/// Bit-pack the RC channels into the channel region, MSB first
fn pack_channels(rc: &RcData, out: &mut [u8]) {
    let mut bitpos: usize = 0;
    for n in 0..RC_CHANNEL_COUNT {
        let v = rc.ch[n] & 0x07FF;
        for i in (0..RC_CHANNEL_BITS).rev() {
            if (v >> i) & 1 != 0 {
                out[bitpos / 8] |= 1 << (7 - (bitpos % 8));
            }
            bitpos += 1;
        }
    }
}

/// Unpack the channel region back into RC channel values
///
/// Only used by tests and by a receiver built against the same layout; kept
/// here so the packing stays bit-exact under refactoring.
pub fn unpack_channels(region: &[u8]) -> RcData {
    let mut rc = RcData::new();
    let mut bitpos: usize = 0;
    for n in 0..RC_CHANNEL_COUNT {
        let mut v: u16 = 0;
        for _ in 0..RC_CHANNEL_BITS {
            v <<= 1;
            if region[bitpos / 8] & (1 << (7 - (bitpos % 8))) != 0 {
                v |= 1;
            }
            bitpos += 1;
        }
        rc.ch[n] = v;
    }
    rc
}

/// Pack a normal TX frame: channels plus serial payload
///
/// `payload` is truncated to the TX payload window; the window is zero
/// padded so equal inputs always produce byte-identical frames.
pub fn pack_tx_frame(sync_word: u16, stats: &FrameStats, rc: &RcData, payload: &[u8]) -> TxFrame {
    let mut data = [0u8; FRAME_TX_RX_LEN];
    let payload_len = payload.len().min(FRAME_TX_PAYLOAD_LEN);

    pack_header(&mut data, sync_word, FrameType::Normal, stats, payload_len as u8);
    pack_channels(rc, &mut data[CHANNELS_POS..TX_PAYLOAD_POS]);
    data[TX_PAYLOAD_POS..TX_PAYLOAD_POS + payload_len].copy_from_slice(&payload[..payload_len]);
    pack_crc(&mut data);

    TxFrame { data }
}

/// Pack a TX command frame: channels plus a parameter-exchange TLV
///
/// The payload window carries the command id and, for `SetRxParams`, the
/// serialized transmitter-side copy of the receiver parameters.
pub fn pack_tx_cmd_frame(sync_word: u16, stats: &FrameStats, rc: &RcData, cmd: &TxCmd) -> TxFrame {
    let mut data = [0u8; FRAME_TX_RX_LEN];

    let payload_len = match cmd {
        TxCmd::GetRxSetupData => {
            data[TX_PAYLOAD_POS] = CMD_GET_RX_SETUPDATA;
            1
        }
        TxCmd::StoreRxParams => {
            data[TX_PAYLOAD_POS] = CMD_STORE_RX_PARAMS;
            1
        }
        TxCmd::SetRxParams(params) => {
            data[TX_PAYLOAD_POS] = CMD_SET_RX_PARAMS;
            data[TX_PAYLOAD_POS + 1..TX_PAYLOAD_POS + 1 + RxParams::WIRE_LEN]
                .copy_from_slice(&params.to_bytes());
            1 + RxParams::WIRE_LEN
        }
    };

    pack_header(&mut data, sync_word, FrameType::Cmd, stats, payload_len as u8);
    pack_channels(rc, &mut data[CHANNELS_POS..TX_PAYLOAD_POS]);
    pack_crc(&mut data);

    TxFrame { data }
}

/// Pack an uplink (receiver-side) frame: telemetry status plus payload
///
/// The codec is shared by both ends of the link; the transmitter only
/// consumes these frames, but packing them here keeps the layout in one
/// place and gives loopback tests a receiver to talk to.
pub fn pack_rx_frame(sync_word: u16, stats: &FrameStats, payload: &[u8]) -> [u8; FRAME_TX_RX_LEN] {
    let mut data = [0u8; FRAME_TX_RX_LEN];
    let payload_len = payload.len().min(FRAME_RX_PAYLOAD_LEN);

    pack_header(&mut data, sync_word, FrameType::Normal, stats, payload_len as u8);
    data[RX_PAYLOAD_POS..RX_PAYLOAD_POS + payload_len].copy_from_slice(&payload[..payload_len]);
    pack_crc(&mut data);
    data
}

/// Pack an uplink command frame answering a parameter exchange
pub fn pack_rx_cmd_frame(sync_word: u16, stats: &FrameStats, cmd: &RxCmd) -> [u8; FRAME_TX_RX_LEN] {
    let mut data = [0u8; FRAME_TX_RX_LEN];

    let payload_len = match cmd {
        RxCmd::Ack => {
            data[RX_PAYLOAD_POS] = CMD_RX_ACK;
            1
        }
        RxCmd::SetupData(setup) => {
            data[RX_PAYLOAD_POS] = CMD_RX_SETUPDATA;
            data[RX_PAYLOAD_POS + 1..RX_PAYLOAD_POS + 1 + RxSetupData::WIRE_LEN]
                .copy_from_slice(&setup.to_bytes());
            1 + RxSetupData::WIRE_LEN
        }
    };

    pack_header(&mut data, sync_word, FrameType::Cmd, stats, payload_len as u8);
    pack_crc(&mut data);
    data
}

/// Validate and unpack a received frame
///
/// Checks the sync word first (a mismatch normally never reaches main
/// context, the ISR already discards those), then the CRC, then extracts
/// status and payload.
pub fn unpack_rx_frame(sync_word: u16, data: &[u8; FRAME_TX_RX_LEN]) -> Result<RxFrame, FrameCheckError> {
    if u16::from_le_bytes([data[0], data[1]]) != sync_word {
        return Err(FrameCheckError::SyncWord);
    }

    let crc = u16::from_le_bytes([data[CRC_POS], data[CRC_POS + 1]]);
    if crc != checksum16(&data[..CRC_POS]) {
        return Err(FrameCheckError::Crc);
    }

    let status_byte = data[2];
    let status = RxFrameStatus {
        frame_type: if status_byte & 0x01 != 0 { FrameType::Cmd } else { FrameType::Normal },
        seq_no: (status_byte >> 1) & 0x07,
        ack: status_byte & 0x10 != 0,
        antenna: Antenna::from_index((status_byte >> 5) & 0x01),
        transmit_antenna: Antenna::from_index((status_byte >> 6) & 0x01),
        rssi: rssi_i8_from_u7(data[3]),
        lq: data[4],
        lq_serial: data[5],
    };

    let payload_len = (data[6] as usize).min(FRAME_RX_PAYLOAD_LEN);
    let mut payload = [0u8; FRAME_RX_PAYLOAD_LEN];
    payload[..payload_len].copy_from_slice(&data[RX_PAYLOAD_POS..RX_PAYLOAD_POS + payload_len]);

    Ok(RxFrame {
        status,
        payload,
        payload_len: payload_len as u8,
    })
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;

    fn test_stats() -> FrameStats {
        FrameStats {
            seq_no: 5,
            ack: true,
            antenna: Antenna::Two,
            transmit_antenna: Antenna::One,
            rssi: -73,
            lq: 98,
            lq_serial: 71,
        }
    }

    #[test]
    fn test_checksum16_known_value() {
        // CRC-16-CCITT with init 0xFFFF for "123456789" is 0x29B1
        assert_eq!(checksum16(b"123456789"), 0x29B1);
    }

    #[test]
    fn test_rssi_u7_round_trip() {
        assert_eq!(rssi_i8_from_u7(rssi_u7_from_i8(-73)), -73);
        assert_eq!(rssi_i8_from_u7(rssi_u7_from_i8(-1)), -1);
        assert_eq!(rssi_i8_from_u7(rssi_u7_from_i8(0)), 0);
        // out of range values saturate at the wire limit
        assert_eq!(rssi_i8_from_u7(rssi_u7_from_i8(i8::MIN)), -127);
        assert_eq!(rssi_i8_from_u7(rssi_u7_from_i8(42)), 0);
    }

    #[test]
    fn test_channel_pack_round_trip() {
        let mut rc = RcData::new();
        for n in 0..RC_CHANNEL_COUNT {
            rc.ch[n] = ((n as u16) * 131 + 7) & 0x07FF;
        }
        let mut region = [0u8; FRAME_CHANNEL_REGION_LEN];
        pack_channels(&rc, &mut region);
        let unpacked = unpack_channels(&region);
        assert_eq!(unpacked.ch, rc.ch);
    }

    #[test]
    fn test_channel_packing_is_msb_first() {
        let mut rc = RcData::new();
        rc.ch = [0; RC_CHANNEL_COUNT];
        rc.ch[0] = 0x400; // only the MSB of channel 0 set
        let mut region = [0u8; FRAME_CHANNEL_REGION_LEN];
        pack_channels(&rc, &mut region);
        assert_eq!(region[0], 0x80);
        assert!(region[1..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_pack_is_deterministic() {
        let mut rc = RcData::new();
        rc.ch[2] = 1700;
        let a = pack_tx_frame(0xA55A, &test_stats(), &rc, b"hello");
        let b = pack_tx_frame(0xA55A, &test_stats(), &rc, b"hello");
        assert_eq!(a.data, b.data);
    }

    #[test]
    fn test_rx_frame_round_trip() {
        let stats = test_stats();
        let payload = b"telemetry bytes";
        let data = pack_rx_frame(0xC3D2, &stats, payload);

        let frame = unpack_rx_frame(0xC3D2, &data).unwrap();
        assert_eq!(frame.status.seq_no, stats.seq_no);
        assert_eq!(frame.status.ack, stats.ack);
        assert_eq!(frame.status.antenna, stats.antenna);
        assert_eq!(frame.status.transmit_antenna, stats.transmit_antenna);
        assert_eq!(frame.status.rssi, stats.rssi);
        assert_eq!(frame.status.lq, stats.lq);
        assert_eq!(frame.status.lq_serial, stats.lq_serial);
        assert_eq!(frame.payload_bytes(), payload);
    }

    #[test]
    fn test_sync_word_mismatch() {
        let data = pack_rx_frame(0x1111, &test_stats(), b"x");
        assert!(matches!(unpack_rx_frame(0x2222, &data), Err(FrameCheckError::SyncWord)));
    }

    #[test]
    fn test_any_single_bit_flip_fails_crc() {
        let data = pack_rx_frame(0x55AA, &test_stats(), b"payload");
        assert!(unpack_rx_frame(0x55AA, &data).is_ok());

        // flipping any single bit in the CRC-covered region must be caught
        for byte in 2..CRC_POS {
            for bit in 0..8 {
                let mut corrupted = data;
                corrupted[byte] ^= 1 << bit;
                assert_eq!(
                    unpack_rx_frame(0x55AA, &corrupted).err(),
                    Some(FrameCheckError::Crc),
                    "bit {} of byte {} not detected",
                    bit,
                    byte
                );
            }
        }
    }

    #[test]
    fn test_cmd_frame_set_rx_params() {
        let params = RxParams {
            power: 3,
            diversity_mode: 1,
            failsafe_mode: 0,
            channel_order: 2,
        };
        let rc = RcData::new();
        let frame = pack_tx_cmd_frame(0x55AA, &test_stats(), &rc, &TxCmd::SetRxParams(params));

        assert_eq!(frame.data[2] & 0x01, 1); // cmd frame type
        assert_eq!(frame.data[6], (1 + RxParams::WIRE_LEN) as u8);
        assert_eq!(frame.data[TX_PAYLOAD_POS], CMD_SET_RX_PARAMS);
        let decoded = RxParams::from_bytes(&frame.data[TX_PAYLOAD_POS + 1..]).unwrap();
        assert_eq!(decoded, params);
    }

    #[test]
    fn test_rx_cmd_decoding() {
        let setup = RxSetupData {
            firmware_version: 0x0104,
            power_levels: 4,
            diversity_available: true,
        };
        let data = pack_rx_cmd_frame(0x55AA, &test_stats(), &RxCmd::SetupData(setup));
        let frame = unpack_rx_frame(0x55AA, &data).unwrap();
        assert_eq!(frame.command(), Some(RxCmd::SetupData(setup)));

        let ack = pack_rx_cmd_frame(0x55AA, &test_stats(), &RxCmd::Ack);
        let frame = unpack_rx_frame(0x55AA, &ack).unwrap();
        assert_eq!(frame.command(), Some(RxCmd::Ack));

        // a normal frame never decodes as a command
        let normal = pack_rx_frame(0x55AA, &test_stats(), &[CMD_RX_ACK]);
        let frame = unpack_rx_frame(0x55AA, &normal).unwrap();
        assert_eq!(frame.command(), None);
    }

    #[test]
    fn test_payload_truncated_to_window() {
        let rc = RcData::new();
        let long = [0xABu8; FRAME_TX_PAYLOAD_LEN + 20];
        let frame = pack_tx_frame(0x55AA, &test_stats(), &rc, &long);
        assert_eq!(frame.data[6] as usize, FRAME_TX_PAYLOAD_LEN);
    }
}
