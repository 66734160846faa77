//! # Frames Module
//!
//! Wire format of the fixed-length over-the-air frame exchanged once per
//! link period, in both directions.
//!
//! ## Architecture
//!
//! The frames module is organized around one component:
//!
//! - **codec**: Packing and unpacking of TX and RX frames, including the
//!   in-band command sub-frames used for parameter exchange
//!
//! ## Frame Geometry
//!
//! Both directions use the same total length (`FRAME_TX_RX_LEN`). A TX frame
//! dedicates part of its body to the bit-packed RC channel region; an RX
//! frame uses the whole body as payload window. The last two bytes always
//! carry a CRC-16 over everything before them.
//!
//! A receiver built to the same layout produces byte-identical frames for
//! equal inputs; the codec is therefore the compatibility-critical part of
//! the crate and its layout constants must not be changed independently.

// Module declarations
pub mod codec;

// Re-export public types for convenient access
pub use codec::{
    pack_rx_cmd_frame, pack_rx_frame, pack_tx_cmd_frame, pack_tx_frame, rssi_i8_from_u7,
    rssi_u7_from_i8, unpack_channels, unpack_rx_frame, FrameCheckError, FrameStats, FrameType,
    RxCmd, RxFrame, RxFrameStatus, RxParams, RxSetupData, TxCmd, TxFrame,
};

/// Total over-the-air frame length in bytes, both directions
pub const FRAME_TX_RX_LEN: usize = 91;

/// Header length: sync word (2) + status byte (1) + status extension (4)
pub const FRAME_HEADER_LEN: usize = 7;

/// Payload window of a TX frame (what remains after header, channels, CRC)
pub const FRAME_TX_PAYLOAD_LEN: usize = 60;

/// Payload window of an RX frame (no channel region on the uplink)
pub const FRAME_RX_PAYLOAD_LEN: usize = 82;

/// Size of the bit-packed RC channel region in a TX frame
pub const FRAME_CHANNEL_REGION_LEN: usize = 22;

/// Number of RC channels carried in every TX frame
pub const RC_CHANNEL_COUNT: usize = 16;

/// Bits per RC channel in the channel region
pub const RC_CHANNEL_BITS: usize = 11;
