//! # Link Supervisor
//!
//! The cooperative super-loop of the transmitter, expressed as a
//! single-step state machine advanced by an external 1 ms tick. Each loop
//! iteration the host calls `tick_1ms()` to drain the time base, services
//! the DIO interrupt slots, then calls `poll()` which:
//!
//! 1. advances the link FSM out of its transient states (tune + transmit,
//!    or arm receive),
//! 2. reacts to modem IRQ causes (TX-done, RX-done, timeouts),
//! 3. on the frame tick runs the pre-transmit phase: antenna election,
//!    receive handling, connection FSM, statistics roll-over and TX rearm,
//! 4. polls the channel source and the operator command queue,
//! 5. steps the while-transmit deferred-task engine.
//!
//! Nothing in here blocks; every queue access is a try-operation. The
//! embassy host `run_link_loop` drives this from a 1 ms ticker, and the
//! tests drive it directly, which makes every scenario deterministic.
//!
//! ## Shared-state discipline
//!
//! The two `IrqSlot`s are the only words shared with interrupt context.
//! The platform's DIO ISR calls `service_dio_irq` with its own transceiver
//! handle; hosts that poll instead (simulator, bring-up) call
//! `service_dio` between tick and poll. Everything else - link FSM,
//! connection FSM, statistics, FHSS position - is owned by this struct and
//! touched from main context only.

use log::log;

use crate::channel_source::{ChannelsSource, RcData};
use crate::connection::{Connection, ConnectionState};
use crate::fhss::Fhss;
use crate::frames::{
    pack_tx_cmd_frame, pack_tx_frame, unpack_rx_frame, FrameCheckError, FrameStats, FrameType,
    RxFrame, FRAME_TX_PAYLOAD_LEN, FRAME_TX_RX_LEN,
};
use crate::link_state::{select_diversity_antenna, Antenna, LinkState, RxStatus};
use crate::param_sync::{ParamSync, TransmitFrameType, WhileTask, WhileTransmit};
use crate::stats::{calculate_signal_quality, LinkStats, TelemetrySnapshot, TxStats};
use crate::transceivers::{
    irq, service_dio_irq, IrqSlot, Transceiver, LORA_CONFIGURATIONS, SEND_FRAME_TMO_MS,
};
use crate::{
    InitializeError, LinkCommand, LinkCommandQueueReceiver, LinkConfiguration, LinkEvent,
    LinkEventQueueSender, SerialDestination, SerialPipe, TelemetryQueueSender,
};

/// LED cadence while connected, milliseconds per toggle
const LED_BLINK_CONNECTED_MS: u16 = 500;

/// LED cadence while searching, milliseconds per toggle
const LED_BLINK_SEARCHING_MS: u16 = 200;

/// User-visible link indication
///
/// Green toggles slowly while connected, red quickly otherwise; the LED
/// driving itself is the application's business.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkLeds {
    pub green: bool,
    pub red: bool,
}

/// The transmitter link core
///
/// Owns both antennas' transceivers, the FHSS sequencer, the frame cycle
/// and connection state machines and all statistics. Generic over the
/// transceiver so the same logic runs against hardware and the simulator.
pub struct LinkSupervisor<T: Transceiver> {
    config: LinkConfiguration,

    sx1: Option<T>,
    sx2: Option<T>,
    irq1: IrqSlot,
    irq2: IrqSlot,

    fhss: Fhss,
    connection: Connection,
    stats: LinkStats,
    txstats: TxStats,
    param_sync: ParamSync,
    while_transmit: WhileTransmit,

    link_state: LinkState,
    link_rx1_status: RxStatus,
    link_rx2_status: RxStatus,
    last_rx_frame1: Option<RxFrame>,
    last_rx_frame2: Option<RxFrame>,

    rc_data: RcData,
    channels_source: Option<ChannelsSource>,

    // 1 ms time base down-counters
    tx_tick: u16,
    tick_1hz: u16,
    led_blink: u16,
    do_pre_transmit: bool,
    leds: LinkLeds,

    serial_tx_pipe: &'static SerialPipe,
    serial_rx_pipe: &'static SerialPipe,
    command_receiver: LinkCommandQueueReceiver,
    telemetry_sender: TelemetryQueueSender,
    event_sender: LinkEventQueueSender,
}

impl<T: Transceiver> LinkSupervisor<T> {
    /// Assemble the supervisor. Antennas whose enable flag is off in the
    /// configuration are dropped here, so everything downstream can treat
    /// presence as enablement.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: LinkConfiguration,
        sx1: Option<T>,
        sx2: Option<T>,
        channels_source: Option<ChannelsSource>,
        serial_tx_pipe: &'static SerialPipe,
        serial_rx_pipe: &'static SerialPipe,
        command_receiver: LinkCommandQueueReceiver,
        telemetry_sender: TelemetryQueueSender,
        event_sender: LinkEventQueueSender,
    ) -> Self {
        let sx1 = if config.use_antenna1 { sx1 } else { None };
        let sx2 = if config.use_antenna2 { sx2 } else { None };

        LinkSupervisor {
            config,
            sx1,
            sx2,
            irq1: IrqSlot::new(),
            irq2: IrqSlot::new(),
            fhss: Fhss::new(),
            connection: Connection::new(),
            stats: LinkStats::new(),
            txstats: TxStats::new(),
            param_sync: ParamSync::new(),
            while_transmit: WhileTransmit::new(),
            link_state: LinkState::Idle,
            link_rx1_status: RxStatus::None,
            link_rx2_status: RxStatus::None,
            last_rx_frame1: None,
            last_rx_frame2: None,
            rc_data: RcData::new(),
            channels_source,
            tx_tick: 0,
            tick_1hz: 0,
            led_blink: 0,
            do_pre_transmit: false,
            leds: LinkLeds::default(),
            serial_tx_pipe,
            serial_rx_pipe,
            command_receiver,
            telemetry_sender,
            event_sender,
        }
    }

    /// Boot the link: reset and configure the modems, build the hop table,
    /// tune the first channel and arm the time base.
    ///
    /// A transceiver that fails its firmware check is fatal; the device
    /// must not begin operation.
    pub fn start(&mut self) -> Result<(), InitializeError> {
        if self.sx1.is_none() && self.sx2.is_none() {
            return Err(InitializeError::NoAntennaEnabled);
        }

        let power = self.config.tx_power;
        if let Some(sx) = self.sx1.as_mut() {
            sx.reset();
            if !sx.is_ok() {
                return Err(InitializeError::TransceiverFailed);
            }
            sx.configure(&LORA_CONFIGURATIONS[0], power);
        }
        if let Some(sx) = self.sx2.as_mut() {
            sx.reset();
            if !sx.is_ok() {
                return Err(InitializeError::TransceiverFailed);
            }
            sx.configure(&LORA_CONFIGURATIONS[0], power);
        }

        self.fhss.init(self.config.fhss_num, self.config.fhss_seed);
        self.fhss.start_tx();
        let freq = self.fhss.get_current_freq();
        if let Some(sx) = self.sx1.as_mut() {
            sx.set_frequency(freq);
        }
        if let Some(sx) = self.sx2.as_mut() {
            sx.set_frequency(freq);
        }

        self.txstats.init(self.config.lq_averaging_period);

        self.link_state = LinkState::Idle;
        self.link_rx1_status = RxStatus::None;
        self.link_rx2_status = RxStatus::None;
        self.do_pre_transmit = false;
        self.tx_tick = self.config.frame_rate_ms.max(1);
        self.tick_1hz = 1000;
        self.led_blink = LED_BLINK_SEARCHING_MS;

        log!(log::Level::Info, "link supervisor started, frame period {} ms", self.config.frame_rate_ms);
        Ok(())
    }

    // -- accessors --

    pub fn link_state(&self) -> LinkState {
        self.link_state
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub fn leds(&self) -> LinkLeds {
        self.leds
    }

    pub fn stats(&self) -> &LinkStats {
        &self.stats
    }

    pub fn tx_stats(&self) -> &TxStats {
        &self.txstats
    }

    pub fn rc_data(&self) -> &RcData {
        &self.rc_data
    }

    pub fn transmit_frame_type(&self) -> TransmitFrameType {
        self.param_sync.transmit_frame_type()
    }

    pub fn rx_status(&self, antenna: Antenna) -> RxStatus {
        match antenna {
            Antenna::One => self.link_rx1_status,
            Antenna::Two => self.link_rx2_status,
        }
    }

    pub fn fhss_curr_i(&self) -> u16 {
        self.fhss.curr_i()
    }

    /// The interrupt slot of an antenna, for wiring up a platform ISR
    pub fn irq_slot(&self, antenna: Antenna) -> &IrqSlot {
        match antenna {
            Antenna::One => &self.irq1,
            Antenna::Two => &self.irq2,
        }
    }

    pub fn transceiver_mut(&mut self, antenna: Antenna) -> Option<&mut T> {
        match antenna {
            Antenna::One => self.sx1.as_mut(),
            Antenna::Two => self.sx2.as_mut(),
        }
    }

    // -- time base --

    /// Drain the 1 ms system tick into the down-counters.
    pub fn tick_1ms(&mut self) {
        self.connection.tick_1ms();

        let led_period = if self.connection.is_connected() {
            LED_BLINK_CONNECTED_MS
        } else {
            LED_BLINK_SEARCHING_MS
        };
        self.led_blink = self.led_blink.saturating_sub(1);
        if self.led_blink == 0 {
            self.led_blink = led_period;
            if self.connection.is_connected() {
                self.leds.green = !self.leds.green;
            } else {
                self.leds.red = !self.leds.red;
            }
        }
        if self.connection.is_connected() {
            self.leds.red = false;
        } else {
            self.leds.green = false;
        }

        self.tick_1hz = self.tick_1hz.saturating_sub(1);
        if self.tick_1hz == 0 {
            self.tick_1hz = 1000;
            self.stats.bytes_transmitted.update_1hz();
            self.stats.bytes_received.update_1hz();
            self.emit_telemetry();
        }

        self.tx_tick = self.tx_tick.saturating_sub(1);
        if self.tx_tick == 0 {
            self.tx_tick = self.config.frame_rate_ms.max(1);
            self.do_pre_transmit = true; // trigger next cycle
        }
    }

    /// Service one antenna's DIO as the ISR would: fetch-and-clear the
    /// modem IRQ status, pre-check the sync word on RX-done, post the
    /// cause word. Polling hosts call this between tick and poll.
    pub fn service_dio(&mut self, antenna: Antenna) {
        let sync_word = self.config.frame_sync_word;
        match antenna {
            Antenna::One => {
                if let Some(sx) = self.sx1.as_mut() {
                    service_dio_irq(sx, &self.irq1, sync_word);
                }
            }
            Antenna::Two => {
                if let Some(sx) = self.sx2.as_mut() {
                    service_dio_irq(sx, &self.irq2, sync_word);
                }
            }
        }
    }

    // -- the cooperative loop body --

    /// One non-blocking supervisor step.
    pub fn poll(&mut self) {
        self.advance_link_state();
        self.handle_irq(Antenna::One);
        self.handle_irq(Antenna::Two);
        self.handle_pre_transmit();
        self.poll_channels();
        self.poll_commands();

        if let Some(task) = self.while_transmit.do_tasks() {
            match task {
                WhileTask::StoreParams => {
                    log!(log::Level::Debug, "running deferred store-params task");
                    if self.event_sender.try_send(LinkEvent::StoreParams).is_err() {
                        log!(log::Level::Warn, "event queue full, dropping store-params event");
                    }
                }
            }
        }
    }

    /// Execute the side effects of the transient link states.
    fn advance_link_state(&mut self) {
        match self.link_state {
            LinkState::Idle | LinkState::ReceiveDone | LinkState::TransmitWait | LinkState::ReceiveWait => {}

            LinkState::Transmit => {
                self.fhss.hop_to_next();
                let freq = self.fhss.get_current_freq();
                if let Some(sx) = self.sx1.as_mut() {
                    sx.set_frequency(freq);
                }
                if let Some(sx) = self.sx2.as_mut() {
                    sx.set_frequency(freq);
                }
                self.do_transmit();
                self.link_state = LinkState::TransmitWait;
                self.irq1.clear();
                self.irq2.clear();
                self.while_transmit.trigger();
            }

            LinkState::Receive => {
                if let Some(sx) = self.sx1.as_mut() {
                    sx.set_to_rx(0);
                }
                if let Some(sx) = self.sx2.as_mut() {
                    sx.set_to_rx(0);
                }
                self.link_state = LinkState::ReceiveWait;
                self.irq1.clear();
                self.irq2.clear();
            }
        }
    }

    /// React to one antenna's posted IRQ causes.
    fn handle_irq(&mut self, antenna: Antenna) {
        let status = match antenna {
            Antenna::One => self.irq1.take(),
            Antenna::Two => self.irq2.take(),
        };
        if status == 0 {
            return;
        }

        if self.link_state == LinkState::TransmitWait && status & irq::TX_DONE != 0 {
            self.link_state = LinkState::Receive;
        } else if self.link_state == LinkState::ReceiveWait && status & irq::RX_DONE != 0 {
            let rx_status = self.do_receive(antenna);
            match antenna {
                Antenna::One => self.link_rx1_status = rx_status,
                Antenna::Two => self.link_rx2_status = rx_status,
            }
        }

        if status & irq::TIMEOUT != 0 {
            if status & irq::TX_TIMEOUT != 0 {
                log!(log::Level::Warn, "transmit timed out, abandoning cycle");
            }
            // the cycle is over either way; a second timeout from the other
            // antenna finds the FSM already Idle, which is harmless
            self.link_state = LinkState::Idle;
            self.link_rx1_status = RxStatus::None;
            self.link_rx2_status = RxStatus::None;
        }
    }

    /// Read and classify the frame an antenna just received.
    fn do_receive(&mut self, antenna: Antenna) -> RxStatus {
        let sync_word = self.config.frame_sync_word;
        let mut buf = [0u8; FRAME_TX_RX_LEN];

        match antenna {
            Antenna::One => match self.sx1.as_mut() {
                Some(sx) => sx.read_frame(&mut buf),
                None => return RxStatus::None,
            },
            Antenna::Two => match self.sx2.as_mut() {
                Some(sx) => sx.read_frame(&mut buf),
                None => return RxStatus::None,
            },
        }

        let (rx_status, frame) = match unpack_rx_frame(sync_word, &buf) {
            Ok(frame) => (RxStatus::Valid, Some(frame)),
            Err(FrameCheckError::Crc) => {
                log!(log::Level::Debug, "rx frame failed CRC check");
                (RxStatus::Invalid, None)
            }
            Err(FrameCheckError::SyncWord) => {
                // the ISR discards foreign sync words before they get here
                log!(log::Level::Error, "sync word mismatch in main context");
                return RxStatus::None;
            }
        };

        // we want the signal measurements even for a bad packet
        match antenna {
            Antenna::One => {
                if let Some(sx) = self.sx1.as_mut() {
                    let ps = sx.get_packet_status();
                    self.stats.last_rx_rssi1 = ps.rssi;
                    self.stats.last_rx_snr1 = ps.snr;
                }
                self.last_rx_frame1 = frame;
            }
            Antenna::Two => {
                if let Some(sx) = self.sx2.as_mut() {
                    let ps = sx.get_packet_status();
                    self.stats.last_rx_rssi2 = ps.rssi;
                    self.stats.last_rx_snr2 = ps.snr;
                }
                self.last_rx_frame2 = frame;
            }
        }

        rx_status
    }

    /// The bookkeeping phase at the end of a cycle: elect the antenna,
    /// consume the received frame, advance the connection FSM and rearm
    /// the next transmission.
    fn handle_pre_transmit(&mut self) {
        if !self.do_pre_transmit {
            return;
        }
        self.do_pre_transmit = false;

        let use1 = self.sx1.is_some();
        let use2 = self.sx2.is_some();

        let frame_received = (use1 && self.link_rx1_status > RxStatus::None)
            || (use2 && self.link_rx2_status > RxStatus::None);
        let valid_frame_received = (use1 && self.link_rx1_status == RxStatus::Valid)
            || (use2 && self.link_rx2_status == RxStatus::Valid);

        if frame_received {
            let antenna = if use1 && use2 {
                select_diversity_antenna(
                    self.link_rx1_status,
                    self.link_rx2_status,
                    self.stats.last_rx_rssi1,
                    self.stats.last_rx_rssi2,
                )
            } else if use2 {
                Antenna::Two
            } else {
                Antenna::One
            };
            self.handle_receive(antenna);
        } else {
            self.handle_receive_none();
        }

        self.txstats.fhss_curr_i = self.fhss.curr_i();
        self.txstats.rx1_valid = self.link_rx1_status == RxStatus::Valid;
        self.txstats.rx2_valid = self.link_rx2_status == RxStatus::Valid;

        if self.connection.frame_cycle(valid_frame_received) {
            log!(log::Level::Info, "connection lost, back to listen");
        }

        self.link_state = LinkState::Transmit;
        self.link_rx1_status = RxStatus::None;
        self.link_rx2_status = RxStatus::None;
        self.last_rx_frame1 = None;
        self.last_rx_frame2 = None;

        if !self.connection.is_connected() {
            self.stats.clear();
        }
        self.txstats.next();
    }

    /// Consume the elected antenna's receive outcome.
    fn handle_receive(&mut self, antenna: Antenna) {
        let (rx_status, frame) = match antenna {
            Antenna::One => (self.link_rx1_status, self.last_rx_frame1.take()),
            Antenna::Two => (self.link_rx2_status, self.last_rx_frame2.take()),
        };

        if rx_status == RxStatus::Valid {
            if let Some(frame) = frame {
                self.process_received_frame(&frame);
                self.txstats.do_valid_frame_received();
                self.stats.received_seq_no_last = frame.status.seq_no;
                self.stats.received_ack_last = frame.status.ack;
            }
        } else {
            self.stats.received_seq_no_last = u8::MAX;
            self.stats.received_ack_last = false;
        }

        // set for all received frames, and count them all
        self.stats.last_rx_antenna = antenna;
        self.txstats.do_frame_received();
    }

    fn handle_receive_none(&mut self) {
        self.stats.received_seq_no_last = u8::MAX;
        self.stats.received_ack_last = false;
    }

    /// Mirror the receiver's status fields and route the payload.
    fn process_received_frame(&mut self, frame: &RxFrame) {
        self.stats.received_antenna = frame.status.antenna;
        self.stats.received_transmit_antenna = frame.status.transmit_antenna;
        self.stats.received_rssi = frame.status.rssi;
        self.stats.received_lq = frame.status.lq;
        self.stats.received_lq_serial = frame.status.lq_serial;

        if frame.status.frame_type == FrameType::Cmd {
            match frame.command() {
                Some(cmd) => self.param_sync.process_received_cmd(cmd),
                None => log!(log::Level::Warn, "unknown command id in rx cmd frame"),
            }
            return;
        }

        let payload = frame.payload_bytes();
        if self.config.serial_destination != SerialDestination::None && !payload.is_empty() {
            match self.serial_rx_pipe.try_write(payload) {
                Ok(n) if n < payload.len() => {
                    log!(log::Level::Warn, "serial rx pipe full, truncated {} bytes", payload.len() - n);
                }
                Err(_) => {
                    log!(log::Level::Warn, "serial rx pipe full, dropping payload");
                }
                _ => {}
            }
        }

        self.stats.bytes_received.add(payload.len());
        if !payload.is_empty() {
            self.txstats.do_serial_data_received();
        }
    }

    /// Send this cycle's frame to the receiver.
    fn do_transmit(&mut self) {
        let antenna = if self.sx1.is_some() { Antenna::One } else { Antenna::Two };
        self.stats.transmit_seq_no = self.stats.transmit_seq_no.wrapping_add(1);
        self.process_transmit_frame(antenna, true);
    }

    /// Build and submit the outgoing frame on the selected antenna.
    fn process_transmit_frame(&mut self, antenna: Antenna, ack: bool) {
        self.param_sync.before_transmit();
        let pending_cmd = self.param_sync.pending_cmd();

        let mut payload = [0u8; FRAME_TX_PAYLOAD_LEN];
        let mut payload_len = 0usize;

        if pending_cmd.is_none() {
            if self.connection.is_connected() {
                if self.config.serial_destination != SerialDestination::None {
                    while payload_len < FRAME_TX_PAYLOAD_LEN {
                        match self.serial_tx_pipe.try_read(&mut payload[payload_len..]) {
                            Ok(n) if n > 0 => payload_len += n,
                            _ => break,
                        }
                    }
                }
                self.stats.bytes_transmitted.add(payload_len);
            } else {
                // discard stale serial data so it doesn't burst on connect
                let mut scratch = [0u8; 32];
                while matches!(self.serial_tx_pipe.try_read(&mut scratch), Ok(n) if n > 0) {}
            }
        }

        self.stats.last_tx_antenna = antenna;

        let frame_stats = FrameStats {
            seq_no: self.stats.transmit_seq_no,
            ack,
            antenna: self.stats.last_rx_antenna,
            transmit_antenna: antenna,
            rssi: self.stats.last_rx_rssi(),
            lq: self.txstats.lq(),
            lq_serial: self.txstats.lq_serial(),
        };

        let sync_word = self.config.frame_sync_word;
        let frame = match &pending_cmd {
            None => pack_tx_frame(sync_word, &frame_stats, &self.rc_data, &payload[..payload_len]),
            Some(cmd) => pack_tx_cmd_frame(sync_word, &frame_stats, &self.rc_data, cmd),
        };

        match antenna {
            Antenna::One => {
                if let Some(sx) = self.sx1.as_mut() {
                    sx.send_frame(&frame.data, SEND_FRAME_TMO_MS);
                }
            }
            Antenna::Two => {
                if let Some(sx) = self.sx2.as_mut() {
                    sx.send_frame(&frame.data, SEND_FRAME_TMO_MS);
                }
            }
        }
    }

    /// Poll the channel source and apply the configured channel order.
    fn poll_channels(&mut self) {
        let updated = match self.channels_source.as_mut() {
            Some(source) => source.update(&mut self.rc_data),
            None => false,
        };
        if updated {
            self.config.channel_order.apply(&mut self.rc_data);
        }
    }

    /// Drain the operator command queue.
    fn poll_commands(&mut self) {
        while let Ok(command) = self.command_receiver.try_receive() {
            match command {
                LinkCommand::SetRxParams(params) => {
                    self.param_sync.set_rx_params(params);
                }
                LinkCommand::StoreRxParams => {
                    self.param_sync.request_store();
                    self.while_transmit.set_task(WhileTask::StoreParams);
                }
            }
        }
    }

    fn emit_telemetry(&mut self) {
        let snapshot = TelemetrySnapshot {
            connection: self.connection.state(),
            lq: self.txstats.lq(),
            lq_serial: self.txstats.lq_serial(),
            received_lq: self.stats.received_lq,
            received_lq_serial: self.stats.received_lq_serial,
            rssi1: self.stats.last_rx_rssi1,
            snr1: self.stats.last_rx_snr1,
            rssi2: self.stats.last_rx_rssi2,
            snr2: self.stats.last_rx_snr2,
            received_rssi: self.stats.received_rssi,
            signal_quality: calculate_signal_quality(self.stats.last_rx_rssi(), self.stats.last_rx_snr()),
            bytes_transmitted_per_sec: self.stats.bytes_transmitted.bytes_per_sec(),
            bytes_received_per_sec: self.stats.bytes_received.bytes_per_sec(),
            transmit_seq_no: self.stats.transmit_seq_no,
            received_seq_no_last: self.stats.received_seq_no_last,
            fhss_curr_i: self.fhss.curr_i(),
        };
        if self.telemetry_sender.try_send(snapshot).is_err() {
            log!(log::Level::Debug, "telemetry queue full, dropping snapshot");
        }
    }
}

/// Host the supervisor on the embassy time base.
///
/// Awaits the 1 ms system tick, services the DIO slots by polling and runs
/// one supervisor step. Hardware integrations that wire real DIO ISRs run
/// their own copy of this loop without the `service_dio` calls.
pub async fn run_link_loop<T: Transceiver>(mut supervisor: LinkSupervisor<T>) -> ! {
    let mut ticker = embassy_time::Ticker::every(embassy_time::Duration::from_millis(1));
    loop {
        ticker.next().await;
        supervisor.tick_1ms();
        supervisor.service_dio(Antenna::One);
        supervisor.service_dio(Antenna::Two);
        supervisor.poll();
    }
}
