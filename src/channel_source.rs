//! RC channel data, the channel-order permutation and the channel source
//! multiplexer.
//!
//! The handset protocols themselves (mBridge, CRSF) live outside this
//! crate; their bridges deliver already-parsed channel packets through a
//! queue. The in-port variant decodes raw SBUS bytes from a byte pipe.
//! All variants share the `update(&mut RcData) -> bool` contract and are
//! polled once per supervisor iteration.

use crate::{InPortPipeReader, RcChannelsQueueReceiver};

/// Number of RC channels carried by the link
pub const RC_DATA_COUNT: usize = 16;

/// Center value of the 11-bit channel range
pub const RC_DATA_CENTER: u16 = 1024;

/// Maximum value of the 11-bit channel range
pub const RC_DATA_MAX: u16 = 2047;

/// Normalized stick/switch values, 11 bits per channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RcData {
    pub ch: [u16; RC_DATA_COUNT],
}

impl RcData {
    /// All channels at center
    pub const fn new() -> Self {
        RcData {
            ch: [RC_DATA_CENTER; RC_DATA_COUNT],
        }
    }
}

impl Default for RcData {
    fn default() -> Self {
        Self::new()
    }
}

/// Convention the first four channels arrive in from the handset
///
/// The link-internal convention is AETR (aileron, elevator, throttle,
/// rudder); `apply` permutes an incoming packet into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelOrder {
    Aetr,
    Taer,
    Etar,
}

impl ChannelOrder {
    /// Permutation map: internal channel n is read from input `map()[n]`
    pub fn map(&self) -> [usize; 4] {
        match self {
            ChannelOrder::Aetr => [0, 1, 2, 3],
            ChannelOrder::Taer => [1, 2, 0, 3],
            ChannelOrder::Etar => [2, 0, 1, 3],
        }
    }

    /// Reorder the first four channels in place
    pub fn apply(&self, rc: &mut RcData) {
        let map = self.map();
        let ch = [rc.ch[0], rc.ch[1], rc.ch[2], rc.ch[3]];
        for n in 0..4 {
            rc.ch[n] = ch[map[n]];
        }
    }
}

/// SBUS frame length: lead-in, 22 channel bytes, flags, trailer
const SBUS_FRAME_LEN: usize = 25;

const SBUS_HEADER: u8 = 0x0F;
const SBUS_FOOTER: u8 = 0x00;

const SBUS_FLAG_FRAME_LOST: u8 = 0x04;
const SBUS_FLAG_FAILSAFE: u8 = 0x08;

/// A decoded SBUS frame
#[derive(Debug, Clone, Copy)]
pub struct SbusFrame {
    pub rc: RcData,
    pub frame_lost: bool,
    pub failsafe: bool,
}

/// Byte-fed SBUS frame parser
///
/// Accumulates bytes until a complete frame is seen; resynchronizes on a
/// bad lead-in or trailer by dropping bytes until the next lead-in.
pub struct SbusParser {
    buf: [u8; SBUS_FRAME_LEN],
    pos: usize,
}

impl SbusParser {
    pub const fn new() -> Self {
        SbusParser {
            buf: [0u8; SBUS_FRAME_LEN],
            pos: 0,
        }
    }

    /// Push one received byte.
    ///
    /// Returns `Some(frame)` when the byte completes a well-formed frame.
    pub fn push(&mut self, byte: u8) -> Option<SbusFrame> {
        if self.pos == 0 && byte != SBUS_HEADER {
            return None; // wait for lead-in
        }

        self.buf[self.pos] = byte;
        self.pos += 1;

        if self.pos < SBUS_FRAME_LEN {
            return None;
        }
        self.pos = 0;

        if self.buf[SBUS_FRAME_LEN - 1] != SBUS_FOOTER {
            return None; // framing lost, resync from next lead-in
        }

        let mut rc = RcData::new();
        for n in 0..RC_DATA_COUNT {
            let mut value: u16 = 0;
            for bit in 0..11 {
                let stream_bit = n * 11 + bit;
                if self.buf[1 + stream_bit / 8] & (1 << (stream_bit % 8)) != 0 {
                    value |= 1 << bit; // SBUS packs LSB first
                }
            }
            rc.ch[n] = value;
        }

        let flags = self.buf[SBUS_FRAME_LEN - 2];
        Some(SbusFrame {
            rc,
            frame_lost: flags & SBUS_FLAG_FRAME_LOST != 0,
            failsafe: flags & SBUS_FLAG_FAILSAFE != 0,
        })
    }
}

impl Default for SbusParser {
    fn default() -> Self {
        Self::new()
    }
}

/// SBUS input port: raw bytes in, channel packets out
pub struct InPort {
    reader: InPortPipeReader,
    parser: SbusParser,
}

impl InPort {
    pub fn new(reader: InPortPipeReader) -> Self {
        InPort {
            reader,
            parser: SbusParser::new(),
        }
    }

    fn update(&mut self, rc: &mut RcData) -> bool {
        let mut updated = false;
        let mut chunk = [0u8; 16];
        loop {
            let n = match self.reader.try_read(&mut chunk) {
                Ok(n) if n > 0 => n,
                _ => break,
            };
            for &byte in &chunk[..n] {
                if let Some(frame) = self.parser.push(byte) {
                    if !frame.failsafe {
                        *rc = frame.rc;
                        updated = true;
                    }
                }
            }
        }
        updated
    }
}

/// Channel producers, multiplexed behind one update contract
///
/// The mBridge and CRSF bridges parse their own wire protocols and hand
/// finished channel packets over a queue; the in-port variant owns the SBUS
/// decoding itself.
pub enum ChannelsSource {
    MBridge(RcChannelsQueueReceiver),
    Crsf(RcChannelsQueueReceiver),
    InPort(InPort),
}

impl ChannelsSource {
    /// Poll for fresh channel data.
    ///
    /// Non-blocking; drains everything available and keeps the newest
    /// packet. Returns true if `rc` was updated.
    pub fn update(&mut self, rc: &mut RcData) -> bool {
        match self {
            ChannelsSource::MBridge(receiver) | ChannelsSource::Crsf(receiver) => {
                let mut updated = false;
                while let Ok(data) = receiver.try_receive() {
                    *rc = data;
                    updated = true;
                }
                updated
            }
            ChannelsSource::InPort(port) => port.update(rc),
        }
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;

    /// Build an SBUS frame carrying the given channel values
    fn encode_sbus(ch: &[u16; RC_DATA_COUNT], flags: u8) -> [u8; SBUS_FRAME_LEN] {
        let mut frame = [0u8; SBUS_FRAME_LEN];
        frame[0] = SBUS_HEADER;
        for n in 0..RC_DATA_COUNT {
            for bit in 0..11 {
                if ch[n] & (1 << bit) != 0 {
                    let stream_bit = n * 11 + bit;
                    frame[1 + stream_bit / 8] |= 1 << (stream_bit % 8);
                }
            }
        }
        frame[SBUS_FRAME_LEN - 2] = flags;
        frame[SBUS_FRAME_LEN - 1] = SBUS_FOOTER;
        frame
    }

    #[test]
    fn test_channel_order_aetr_is_identity() {
        let mut rc = RcData::new();
        rc.ch[0] = 100;
        rc.ch[1] = 200;
        rc.ch[2] = 300;
        rc.ch[3] = 400;
        let before = rc;
        ChannelOrder::Aetr.apply(&mut rc);
        assert_eq!(rc, before);
    }

    #[test]
    fn test_channel_order_etar() {
        let mut rc = RcData::new();
        // input in ETAR order: E, T, A, R
        rc.ch[0] = 2; // elevator
        rc.ch[1] = 3; // throttle
        rc.ch[2] = 1; // aileron
        rc.ch[3] = 4; // rudder
        ChannelOrder::Etar.apply(&mut rc);
        // internal order is AETR
        assert_eq!(&rc.ch[..4], &[1, 2, 3, 4]);
    }

    #[test]
    fn test_taer_is_inverse_of_etar() {
        let mut rc = RcData::new();
        rc.ch[0] = 11;
        rc.ch[1] = 22;
        rc.ch[2] = 33;
        rc.ch[3] = 44;
        let before = rc;
        // applying a permutation followed by its inverse restores the input
        ChannelOrder::Etar.apply(&mut rc);
        assert_ne!(rc, before);
        ChannelOrder::Taer.apply(&mut rc);
        assert_eq!(rc, before);
    }

    #[test]
    fn test_sbus_round_trip() {
        let mut ch = [0u16; RC_DATA_COUNT];
        for n in 0..RC_DATA_COUNT {
            ch[n] = ((n as u16) * 113 + 17) & 0x07FF;
        }
        let frame = encode_sbus(&ch, 0);

        let mut parser = SbusParser::new();
        let mut result = None;
        for &byte in frame.iter() {
            result = parser.push(byte);
        }
        let decoded = result.expect("frame not recognized");
        assert_eq!(decoded.rc.ch, ch);
        assert!(!decoded.frame_lost);
        assert!(!decoded.failsafe);
    }

    #[test]
    fn test_sbus_resync_after_garbage() {
        let ch = [1500u16; RC_DATA_COUNT];
        let frame = encode_sbus(&ch, 0);

        let mut parser = SbusParser::new();
        // garbage before the frame must be skipped
        for &byte in [0x55u8, 0xAA, 0x01].iter() {
            assert!(parser.push(byte).is_none());
        }
        let mut result = None;
        for &byte in frame.iter() {
            result = parser.push(byte);
        }
        assert!(result.is_some());
    }

    #[test]
    fn test_sbus_flags_decoded() {
        let ch = [1024u16; RC_DATA_COUNT];
        let frame = encode_sbus(&ch, SBUS_FLAG_FRAME_LOST | SBUS_FLAG_FAILSAFE);

        let mut parser = SbusParser::new();
        let mut result = None;
        for &byte in frame.iter() {
            result = parser.push(byte);
        }
        let decoded = result.unwrap();
        assert!(decoded.frame_lost);
        assert!(decoded.failsafe);
    }
}
