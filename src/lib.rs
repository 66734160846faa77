#![cfg_attr(not(feature = "std"), no_std)]

//! # uavlink-radio-lib
//!
//! Transmitter half of a bidirectional half-duplex 2.4 GHz LoRa control
//! link for unmanned aerial vehicles. Control channels travel downstream
//! and telemetry plus arbitrary serial payload upstream, inside a fixed
//! periodic TDD frame that hops frequency every cycle.
//!
//! The crate is the *link core*: the frame scheduler, the link and
//! connection state machines, the frequency-hopping sequencer, the frame
//! codec with in-band parameter sync, the antenna diversity arbiter and
//! the link statistics. Handset protocols, serial drivers, LED driving,
//! parameter persistence and the MAVLink router are external collaborators
//! that talk to the core through pipes and queues.
//!
//! The `LinkManager` is the application-facing entry point: it boots the
//! supervisor, spawns the link task on the embassy executor and hands out
//! the queue endpoints. Hardware applications whose transceivers are
//! generic over their HAL construct a [`supervisor::LinkSupervisor`]
//! directly and host [`supervisor::run_link_loop`] in their own task.

#[cfg(all(feature = "transceiver-sx1280", feature = "transceiver-simulator"))]
compile_error!("Only one transceiver implementation feature can be enabled at a time");

#[cfg(all(
    not(test),
    not(any(feature = "transceiver-sx1280", feature = "transceiver-simulator"))
))]
compile_error!("At least one transceiver implementation feature must be enabled");

#[cfg(feature = "transceiver-simulator")]
use embassy_executor::Spawner;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::pipe::Pipe;
#[cfg(feature = "transceiver-simulator")]
use log::log;

pub mod channel_source;
pub mod connection;
pub mod fhss;
pub mod frames;
pub mod link_state;
pub mod param_sync;
pub mod stats;
pub mod supervisor;
pub mod transceivers;

// Re-export the types an application touches
pub use channel_source::{ChannelOrder, ChannelsSource, InPort, RcData, SbusParser};
pub use connection::ConnectionState;
pub use frames::{RxParams, RxSetupData};
pub use link_state::Antenna;
pub use param_sync::TransmitFrameType;
pub use stats::TelemetrySnapshot;
pub use supervisor::{run_link_loop, LinkLeds, LinkSupervisor};
pub use transceivers::Transceiver;

#[cfg(feature = "transceiver-simulator")]
pub use transceivers::SimTransceiver;

/// Where the uplink serial payload is routed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerialDestination {
    /// Back over the handset bridge
    MBridge,
    /// A dedicated serial port
    SerialPort,
    /// Nowhere; the payload window stays empty
    None,
}

/// Framing of the serial payload stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerialLinkMode {
    /// Raw byte pass-through
    Transparent,
    /// An external router re-segments MAVLink messages across frames
    Mavlink,
}

/// Electrical mode of the in-port UART
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InMode {
    Sbus,
    SbusInverted,
}

/// Which producer feeds the RC channels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelsSourceKind {
    MBridge,
    Crsf,
    InPort,
}

/// Configuration of one link endpoint
///
/// Both ends must agree on `frame_sync_word`, `fhss_seed`, `fhss_num` and
/// `frame_rate_ms`; the rest is transmitter-local.
#[derive(Debug, Clone, Copy)]
pub struct LinkConfiguration {
    /// Per-link identifier placed at the start of every frame
    pub frame_sync_word: u16,
    /// Seed of the frequency hop table
    pub fhss_seed: u32,
    /// Number of channels in the hop set
    pub fhss_num: u16,
    /// Nominal link period in milliseconds
    pub frame_rate_ms: u16,
    /// LQ averaging window in frames
    pub lq_averaging_period: u16,
    /// Transmitter output power setting
    pub tx_power: u8,
    pub serial_destination: SerialDestination,
    pub serial_link_mode: SerialLinkMode,
    pub channels_source: ChannelsSourceKind,
    pub channel_order: ChannelOrder,
    pub in_mode: InMode,
    pub use_antenna1: bool,
    pub use_antenna2: bool,
}

impl Default for LinkConfiguration {
    fn default() -> Self {
        LinkConfiguration {
            frame_sync_word: 0x1234,
            fhss_seed: 0x0001_8000,
            fhss_num: 24,
            frame_rate_ms: 20,
            lq_averaging_period: 100,
            tx_power: 10,
            serial_destination: SerialDestination::SerialPort,
            serial_link_mode: SerialLinkMode::Transparent,
            channels_source: ChannelsSourceKind::MBridge,
            channel_order: ChannelOrder::Aetr,
            in_mode: InMode::Sbus,
            use_antenna1: true,
            use_antenna2: false,
        }
    }
}

/// Operator commands consumed by the supervisor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkCommand {
    /// A receiver parameter changed; sync it over the air
    SetRxParams(RxParams),
    /// Ask the receiver to persist its parameters, and persist ours
    StoreRxParams,
}

/// Events the supervisor surfaces to its collaborators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    /// Persist the local parameter copy now; the flash driver is external
    StoreParams,
}

/// Boot failures; all of them are fatal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitializeError {
    /// A transceiver's firmware-revision read came back 0 or 0xFFFF
    TransceiverFailed,
    /// Both antennas are disabled in the configuration
    NoAntennaEnabled,
    TaskSpawnFailed,
}

#[cfg(feature = "std")]
impl std::fmt::Display for InitializeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InitializeError::TransceiverFailed => write!(f, "transceiver failed the firmware check"),
            InitializeError::NoAntennaEnabled => write!(f, "no antenna enabled"),
            InitializeError::TaskSpawnFailed => write!(f, "failed to spawn the link task"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for InitializeError {}

/// Errors of the non-blocking producer-side manager calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendError {
    QueueFull,
    NotInited,
}

/// Errors of the consumer-side manager calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveError {
    NotInited,
}

/// Byte pipe between the serial collaborator and the link core
pub const SERIAL_PIPE_SIZE: usize = 256;
pub type SerialPipe = Pipe<CriticalSectionRawMutex, SERIAL_PIPE_SIZE>;

/// Byte pipe carrying raw in-port (SBUS) bytes into the channel source
pub const IN_PORT_PIPE_SIZE: usize = 128;
pub type InPortPipe = Pipe<CriticalSectionRawMutex, IN_PORT_PIPE_SIZE>;
pub type InPortPipeReader = &'static InPortPipe;

const RC_CHANNELS_QUEUE_SIZE: usize = 4;
pub type RcChannelsQueue = Channel<CriticalSectionRawMutex, RcData, RC_CHANNELS_QUEUE_SIZE>;
pub type RcChannelsQueueReceiver =
    embassy_sync::channel::Receiver<'static, CriticalSectionRawMutex, RcData, RC_CHANNELS_QUEUE_SIZE>;
pub type RcChannelsQueueSender =
    embassy_sync::channel::Sender<'static, CriticalSectionRawMutex, RcData, RC_CHANNELS_QUEUE_SIZE>;

const LINK_COMMAND_QUEUE_SIZE: usize = 4;
pub type LinkCommandQueue = Channel<CriticalSectionRawMutex, LinkCommand, LINK_COMMAND_QUEUE_SIZE>;
pub type LinkCommandQueueReceiver =
    embassy_sync::channel::Receiver<'static, CriticalSectionRawMutex, LinkCommand, LINK_COMMAND_QUEUE_SIZE>;
pub type LinkCommandQueueSender =
    embassy_sync::channel::Sender<'static, CriticalSectionRawMutex, LinkCommand, LINK_COMMAND_QUEUE_SIZE>;

const TELEMETRY_QUEUE_SIZE: usize = 2;
pub type TelemetryQueue = Channel<CriticalSectionRawMutex, TelemetrySnapshot, TELEMETRY_QUEUE_SIZE>;
pub type TelemetryQueueReceiver =
    embassy_sync::channel::Receiver<'static, CriticalSectionRawMutex, TelemetrySnapshot, TELEMETRY_QUEUE_SIZE>;
pub type TelemetryQueueSender =
    embassy_sync::channel::Sender<'static, CriticalSectionRawMutex, TelemetrySnapshot, TELEMETRY_QUEUE_SIZE>;

const LINK_EVENT_QUEUE_SIZE: usize = 4;
pub type LinkEventQueue = Channel<CriticalSectionRawMutex, LinkEvent, LINK_EVENT_QUEUE_SIZE>;
pub type LinkEventQueueReceiver =
    embassy_sync::channel::Receiver<'static, CriticalSectionRawMutex, LinkEvent, LINK_EVENT_QUEUE_SIZE>;
pub type LinkEventQueueSender =
    embassy_sync::channel::Sender<'static, CriticalSectionRawMutex, LinkEvent, LINK_EVENT_QUEUE_SIZE>;

#[cfg(all(feature = "embedded", feature = "transceiver-simulator"))]
static SERIAL_TX_PIPE: SerialPipe = Pipe::new();
#[cfg(all(feature = "embedded", feature = "transceiver-simulator"))]
static SERIAL_RX_PIPE: SerialPipe = Pipe::new();
#[cfg(all(feature = "embedded", feature = "transceiver-simulator"))]
static IN_PORT_PIPE: InPortPipe = Pipe::new();
#[cfg(all(feature = "embedded", feature = "transceiver-simulator"))]
static RC_CHANNELS_QUEUE: RcChannelsQueue = Channel::new();
#[cfg(all(feature = "embedded", feature = "transceiver-simulator"))]
static LINK_COMMAND_QUEUE: LinkCommandQueue = Channel::new();
#[cfg(all(feature = "embedded", feature = "transceiver-simulator"))]
static TELEMETRY_QUEUE: TelemetryQueue = Channel::new();
#[cfg(all(feature = "embedded", feature = "transceiver-simulator"))]
static LINK_EVENT_QUEUE: LinkEventQueue = Channel::new();

/// The spawnable supervisor task for the simulated transceiver
///
/// The SX1280 driver is generic over HAL types, so hardware applications
/// wrap [`run_link_loop`] in their own task instead.
#[cfg(feature = "transceiver-simulator")]
#[embassy_executor::task]
async fn link_supervisor_task(supervisor: LinkSupervisor<SimTransceiver>) -> ! {
    run_link_loop(supervisor).await
}

#[cfg(feature = "transceiver-simulator")]
enum LinkManagerState {
    Uninitialized,
    Initialized {
        serial_tx_pipe: &'static SerialPipe,
        serial_rx_pipe: &'static SerialPipe,
        in_port_pipe: &'static InPortPipe,
        rc_channels_sender: RcChannelsQueueSender,
        command_sender: LinkCommandQueueSender,
        telemetry_receiver: TelemetryQueueReceiver,
        event_receiver: LinkEventQueueReceiver,
    },
}

/// Application-facing entry point of the link core
#[cfg(feature = "transceiver-simulator")]
pub struct LinkManager {
    state: LinkManagerState,
}

#[cfg(feature = "transceiver-simulator")]
impl LinkManager {
    pub const fn new() -> Self {
        LinkManager {
            state: LinkManagerState::Uninitialized,
        }
    }

    #[cfg(feature = "embedded")]
    pub fn initialize(
        &mut self,
        config: LinkConfiguration,
        spawner: Spawner,
        sx1: Option<SimTransceiver>,
        sx2: Option<SimTransceiver>,
    ) -> Result<(), InitializeError> {
        self.initialize_common(
            config,
            spawner,
            sx1,
            sx2,
            &SERIAL_TX_PIPE,
            &SERIAL_RX_PIPE,
            &IN_PORT_PIPE,
            &RC_CHANNELS_QUEUE,
            &LINK_COMMAND_QUEUE,
            &TELEMETRY_QUEUE,
            &LINK_EVENT_QUEUE,
        )
    }

    #[cfg(feature = "std")]
    pub fn initialize(
        &mut self,
        config: LinkConfiguration,
        spawner: Spawner,
        sx1: Option<SimTransceiver>,
        sx2: Option<SimTransceiver>,
    ) -> Result<(), InitializeError> {
        let serial_tx_pipe: &'static SerialPipe = Box::leak(Box::new(Pipe::new()));
        let serial_rx_pipe: &'static SerialPipe = Box::leak(Box::new(Pipe::new()));
        let in_port_pipe: &'static InPortPipe = Box::leak(Box::new(Pipe::new()));
        let rc_channels_queue: &'static RcChannelsQueue = Box::leak(Box::new(Channel::new()));
        let command_queue: &'static LinkCommandQueue = Box::leak(Box::new(Channel::new()));
        let telemetry_queue: &'static TelemetryQueue = Box::leak(Box::new(Channel::new()));
        let event_queue: &'static LinkEventQueue = Box::leak(Box::new(Channel::new()));
        self.initialize_common(
            config,
            spawner,
            sx1,
            sx2,
            serial_tx_pipe,
            serial_rx_pipe,
            in_port_pipe,
            rc_channels_queue,
            command_queue,
            telemetry_queue,
            event_queue,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn initialize_common(
        &mut self,
        config: LinkConfiguration,
        spawner: Spawner,
        sx1: Option<SimTransceiver>,
        sx2: Option<SimTransceiver>,
        serial_tx_pipe: &'static SerialPipe,
        serial_rx_pipe: &'static SerialPipe,
        in_port_pipe: &'static InPortPipe,
        rc_channels_queue: &'static RcChannelsQueue,
        command_queue: &'static LinkCommandQueue,
        telemetry_queue: &'static TelemetryQueue,
        event_queue: &'static LinkEventQueue,
    ) -> Result<(), InitializeError> {
        let channels_source = match config.channels_source {
            ChannelsSourceKind::MBridge => ChannelsSource::MBridge(rc_channels_queue.receiver()),
            ChannelsSourceKind::Crsf => ChannelsSource::Crsf(rc_channels_queue.receiver()),
            ChannelsSourceKind::InPort => ChannelsSource::InPort(InPort::new(in_port_pipe)),
        };

        let mut link_supervisor = LinkSupervisor::new(
            config,
            sx1,
            sx2,
            Some(channels_source),
            serial_tx_pipe,
            serial_rx_pipe,
            command_queue.receiver(),
            telemetry_queue.sender(),
            event_queue.sender(),
        );
        link_supervisor.start()?;

        if spawner.spawn(link_supervisor_task(link_supervisor)).is_err() {
            return Err(InitializeError::TaskSpawnFailed);
        }
        log!(log::Level::Info, "link supervisor task spawned");

        self.state = LinkManagerState::Initialized {
            serial_tx_pipe,
            serial_rx_pipe,
            in_port_pipe,
            rc_channels_sender: rc_channels_queue.sender(),
            command_sender: command_queue.sender(),
            telemetry_receiver: telemetry_queue.receiver(),
            event_receiver: event_queue.receiver(),
        };
        Ok(())
    }

    /// Queue serial payload bytes for the next downlink frames.
    ///
    /// Returns the number of bytes accepted; 0 when the pipe is full.
    pub fn write_serial(&self, data: &[u8]) -> Result<usize, SendError> {
        match &self.state {
            LinkManagerState::Uninitialized => Err(SendError::NotInited),
            LinkManagerState::Initialized { serial_tx_pipe, .. } => {
                Ok(serial_tx_pipe.try_write(data).unwrap_or(0))
            }
        }
    }

    /// Take uplink serial payload without waiting; 0 when nothing arrived.
    pub fn try_read_serial(&self, buf: &mut [u8]) -> Result<usize, ReceiveError> {
        match &self.state {
            LinkManagerState::Uninitialized => Err(ReceiveError::NotInited),
            LinkManagerState::Initialized { serial_rx_pipe, .. } => {
                Ok(serial_rx_pipe.try_read(buf).unwrap_or(0))
            }
        }
    }

    /// Wait for uplink serial payload.
    pub async fn read_serial(&self, buf: &mut [u8]) -> Result<usize, ReceiveError> {
        match &self.state {
            LinkManagerState::Uninitialized => Err(ReceiveError::NotInited),
            LinkManagerState::Initialized { serial_rx_pipe, .. } => Ok(serial_rx_pipe.read(buf).await),
        }
    }

    /// Feed raw in-port (SBUS) bytes from the UART collaborator.
    pub fn write_in_port(&self, data: &[u8]) -> Result<usize, SendError> {
        match &self.state {
            LinkManagerState::Uninitialized => Err(SendError::NotInited),
            LinkManagerState::Initialized { in_port_pipe, .. } => {
                Ok(in_port_pipe.try_write(data).unwrap_or(0))
            }
        }
    }

    /// Push a parsed channel packet from the mBridge/CRSF collaborator.
    pub fn push_channels(&self, rc: RcData) -> Result<(), SendError> {
        match &self.state {
            LinkManagerState::Uninitialized => Err(SendError::NotInited),
            LinkManagerState::Initialized { rc_channels_sender, .. } => {
                rc_channels_sender.try_send(rc).map_err(|_| SendError::QueueFull)
            }
        }
    }

    pub fn send_command(&self, command: LinkCommand) -> Result<(), SendError> {
        match &self.state {
            LinkManagerState::Uninitialized => Err(SendError::NotInited),
            LinkManagerState::Initialized { command_sender, .. } => {
                command_sender.try_send(command).map_err(|_| SendError::QueueFull)
            }
        }
    }

    /// Wait for the next 1 Hz telemetry snapshot.
    pub async fn next_telemetry(&self) -> Result<TelemetrySnapshot, ReceiveError> {
        match &self.state {
            LinkManagerState::Uninitialized => Err(ReceiveError::NotInited),
            LinkManagerState::Initialized { telemetry_receiver, .. } => Ok(telemetry_receiver.receive().await),
        }
    }

    /// Wait for the next link event (e.g. the deferred store-params job).
    pub async fn next_event(&self) -> Result<LinkEvent, ReceiveError> {
        match &self.state {
            LinkManagerState::Uninitialized => Err(ReceiveError::NotInited),
            LinkManagerState::Initialized { event_receiver, .. } => Ok(event_receiver.receive().await),
        }
    }
}

#[cfg(feature = "transceiver-simulator")]
impl Default for LinkManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(all(test, feature = "std", feature = "transceiver-simulator"))]
mod tests {
    use super::*;
    use futures::executor::block_on;

    #[test]
    fn link_configuration_constructs() {
        let config = LinkConfiguration {
            frame_sync_word: 0xA55A,
            fhss_num: 12,
            ..Default::default()
        };
        assert_eq!(config.frame_rate_ms, 20);
        assert_eq!(config.fhss_num, 12);
    }

    #[test]
    fn manager_write_serial_not_inited() {
        let manager = LinkManager::new();
        assert_eq!(manager.write_serial(b"abc"), Err(SendError::NotInited));
    }

    #[test]
    fn manager_send_command_not_inited() {
        let manager = LinkManager::new();
        assert_eq!(manager.send_command(LinkCommand::StoreRxParams), Err(SendError::NotInited));
    }

    #[test]
    fn manager_next_telemetry_not_inited() {
        let manager = LinkManager::new();
        let res = block_on(async { manager.next_telemetry().await });
        assert!(matches!(res, Err(ReceiveError::NotInited)));
    }

    #[test]
    fn manager_push_channels_not_inited() {
        let manager = LinkManager::new();
        assert_eq!(manager.push_channels(RcData::new()), Err(SendError::NotInited));
    }
}
