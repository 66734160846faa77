//! Parameter synchronization over reserved command frames, and the
//! while-transmit deferred-task engine.
//!
//! One request type at a time is latched in the `transmit_frame_type` slot;
//! while it is not `Normal`, every outgoing frame is a command frame
//! instead of carrying serial payload. The slot is cleared back to `Normal`
//! only when the receiver's matching ack/data frame arrives, which makes a
//! missed ack retry itself for free on the next cycle.

use crate::frames::{RxCmd, RxParams, RxSetupData, TxCmd};

/// What the next outgoing frame carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransmitFrameType {
    Normal,
    CmdGetRxSetupData,
    CmdSetRxParams,
    CmdStoreRxParams,
}

/// Parameter-exchange state
pub struct ParamSync {
    transmit_frame_type: TransmitFrameType,
    rx_params: RxParams,
    rx_setup_data: Option<RxSetupData>,
    setup_rx_param_changed: bool,
}

impl ParamSync {
    /// Boot state: the transmitter starts by asking for the receiver's
    /// setup data.
    pub const fn new() -> Self {
        ParamSync {
            transmit_frame_type: TransmitFrameType::CmdGetRxSetupData,
            rx_params: RxParams {
                power: 0,
                diversity_mode: 0,
                failsafe_mode: 0,
                channel_order: 0,
            },
            rx_setup_data: None,
            setup_rx_param_changed: false,
        }
    }

    pub fn transmit_frame_type(&self) -> TransmitFrameType {
        self.transmit_frame_type
    }

    pub fn rx_setup_data(&self) -> Option<RxSetupData> {
        self.rx_setup_data
    }

    pub fn rx_params(&self) -> RxParams {
        self.rx_params
    }

    /// A user parameter changed; a `SetRxParams` command frame will be
    /// latched on the next free cycle.
    pub fn set_rx_params(&mut self, params: RxParams) {
        self.rx_params = params;
        self.setup_rx_param_changed = true;
    }

    /// Operator requested a store-to-flash on the receiver
    pub fn request_store(&mut self) {
        self.transmit_frame_type = TransmitFrameType::CmdStoreRxParams;
    }

    /// Called at the top of each transmit; promotes a pending parameter
    /// change into the latch when the slot is free.
    pub fn before_transmit(&mut self) {
        if self.setup_rx_param_changed && self.transmit_frame_type == TransmitFrameType::Normal {
            self.setup_rx_param_changed = false;
            self.transmit_frame_type = TransmitFrameType::CmdSetRxParams;
        }
    }

    /// The command to pack into this cycle's frame, or `None` for a normal
    /// payload frame.
    pub fn pending_cmd(&self) -> Option<TxCmd> {
        match self.transmit_frame_type {
            TransmitFrameType::Normal => None,
            TransmitFrameType::CmdGetRxSetupData => Some(TxCmd::GetRxSetupData),
            TransmitFrameType::CmdSetRxParams => Some(TxCmd::SetRxParams(self.rx_params)),
            TransmitFrameType::CmdStoreRxParams => Some(TxCmd::StoreRxParams),
        }
    }

    /// Handle a command frame from the receiver. Receipt of the matching
    /// answer clears the latch back to `Normal`.
    pub fn process_received_cmd(&mut self, cmd: RxCmd) {
        match cmd {
            RxCmd::SetupData(data) => {
                self.rx_setup_data = Some(data);
                self.transmit_frame_type = TransmitFrameType::Normal;
            }
            RxCmd::Ack => {
                self.transmit_frame_type = TransmitFrameType::Normal;
            }
        }
    }
}

impl Default for ParamSync {
    fn default() -> Self {
        Self::new()
    }
}

/// Deferred jobs executed in the quiet window after the RF exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WhileTask {
    /// Persist the local parameter copy
    StoreParams,
}

const WHILE_TASK_STORE_PARAMS: u16 = 0x0001;

/// Loop iterations a triggered task is postponed by
const WHILE_TRANSMIT_POSTPONE: u16 = 5;

/// While-transmit deferred-task engine
///
/// Flash-write-class work must not collide with the RF exchange; each
/// trigger postpones execution by a few loop iterations and at most one
/// task runs per cycle.
pub struct WhileTransmit {
    tasks: u16,
    do_cnt: u16,
}

impl WhileTransmit {
    pub const fn new() -> Self {
        WhileTransmit { tasks: 0, do_cnt: 0 }
    }

    /// Arm the countdown; called right after a transmit is submitted
    pub fn trigger(&mut self) {
        self.do_cnt = WHILE_TRANSMIT_POSTPONE;
    }

    pub fn set_task(&mut self, task: WhileTask) {
        match task {
            WhileTask::StoreParams => self.tasks |= WHILE_TASK_STORE_PARAMS,
        }
    }

    /// One engine step per main-loop iteration.
    ///
    /// Returns the single task to execute this cycle, if the countdown just
    /// expired and a task is pending.
    pub fn do_tasks(&mut self) -> Option<WhileTask> {
        if self.do_cnt == 0 {
            return None; // not triggered
        }
        self.do_cnt -= 1;
        if self.do_cnt != 0 {
            return None; // still postponing
        }

        if self.tasks & WHILE_TASK_STORE_PARAMS != 0 {
            self.tasks &= !WHILE_TASK_STORE_PARAMS;
            return Some(WhileTask::StoreParams);
        }
        None
    }
}

impl Default for WhileTransmit {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;

    #[test]
    fn test_boot_requests_rx_setup_data() {
        let sync = ParamSync::new();
        assert_eq!(sync.transmit_frame_type(), TransmitFrameType::CmdGetRxSetupData);
        assert!(matches!(sync.pending_cmd(), Some(TxCmd::GetRxSetupData)));
    }

    #[test]
    fn test_setup_data_clears_latch() {
        let mut sync = ParamSync::new();
        let data = RxSetupData {
            firmware_version: 0x0100,
            power_levels: 4,
            diversity_available: true,
        };
        sync.process_received_cmd(RxCmd::SetupData(data));
        assert_eq!(sync.transmit_frame_type(), TransmitFrameType::Normal);
        assert_eq!(sync.rx_setup_data(), Some(data));
        assert!(sync.pending_cmd().is_none());
    }

    #[test]
    fn test_missed_ack_keeps_latch() {
        let mut sync = ParamSync::new();
        sync.process_received_cmd(RxCmd::Ack);
        sync.request_store();

        // no ack arrives; the latch stays and the command is retried
        for _ in 0..4 {
            sync.before_transmit();
            assert!(matches!(sync.pending_cmd(), Some(TxCmd::StoreRxParams)));
        }
        sync.process_received_cmd(RxCmd::Ack);
        assert_eq!(sync.transmit_frame_type(), TransmitFrameType::Normal);
    }

    #[test]
    fn test_param_change_latched_when_slot_free() {
        let mut sync = ParamSync::new();
        let params = RxParams { power: 2, ..Default::default() };
        sync.set_rx_params(params);

        // slot is busy with the boot request; the change must wait
        sync.before_transmit();
        assert!(matches!(sync.pending_cmd(), Some(TxCmd::GetRxSetupData)));

        sync.process_received_cmd(RxCmd::Ack);
        sync.before_transmit();
        assert!(matches!(sync.pending_cmd(), Some(TxCmd::SetRxParams(p)) if p == params));
    }

    #[test]
    fn test_while_transmit_postpones_and_runs_once() {
        let mut wt = WhileTransmit::new();
        wt.set_task(WhileTask::StoreParams);
        wt.trigger();

        let mut executed = 0;
        for i in 0..20 {
            if let Some(task) = wt.do_tasks() {
                assert_eq!(task, WhileTask::StoreParams);
                // exactly when the postpone countdown expires
                assert_eq!(i + 1, WHILE_TRANSMIT_POSTPONE as usize);
                executed += 1;
            }
        }
        assert_eq!(executed, 1);
    }

    #[test]
    fn test_while_transmit_without_task_is_a_noop() {
        let mut wt = WhileTransmit::new();
        wt.trigger();
        for _ in 0..10 {
            assert!(wt.do_tasks().is_none());
        }
    }

    #[test]
    fn test_one_task_per_cycle() {
        let mut wt = WhileTransmit::new();
        wt.set_task(WhileTask::StoreParams);
        wt.trigger();
        let mut fired: usize = 0;
        for _ in 0..WHILE_TRANSMIT_POSTPONE {
            if wt.do_tasks().is_some() {
                fired += 1;
            }
        }
        assert_eq!(fired, 1);
        // re-triggering without a pending task does nothing
        wt.trigger();
        for _ in 0..WHILE_TRANSMIT_POSTPONE {
            assert!(wt.do_tasks().is_none());
        }
    }
}
