//! Link FSM states and the diversity antenna arbiter.
//!
//! The per-frame TX -> wait -> RX -> wait -> decide cycle is driven by the
//! supervisor; this module holds the state vocabulary and the post-hoc
//! antenna election used at the pre-transmit step.

/// Receiver chain identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Antenna {
    One,
    Two,
}

impl Antenna {
    /// Wire representation: 0 for antenna 1, 1 for antenna 2
    pub fn index(&self) -> u8 {
        match self {
            Antenna::One => 0,
            Antenna::Two => 1,
        }
    }

    pub fn from_index(index: u8) -> Self {
        if index & 0x01 != 0 { Antenna::Two } else { Antenna::One }
    }
}

/// State of the per-frame link cycle
///
/// `Transmit` and `Receive` are transient: the supervisor performs their
/// side effects inline and moves on to the corresponding wait state in the
/// same poll. The wait states are left on modem IRQ causes only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Idle,
    Transmit,
    TransmitWait,
    Receive,
    ReceiveWait,
    ReceiveDone,
}

/// Outcome of one receive window on one antenna
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RxStatus {
    /// No frame received
    None,
    /// A frame arrived but failed the CRC check
    Invalid,
    /// A frame arrived and validated
    Valid,
}

/// Elect the antenna whose receive buffer the cycle will use.
///
/// Truth table (rows antenna 1, columns antenna 2):
///
/// |         | None        | Invalid     | Valid |
/// |---------|-------------|-------------|-------|
/// | None    | either/rssi | either/rssi | 2     |
/// | Invalid | either/rssi | either/rssi | 2     |
/// | Valid   | 1           | 1           | rssi  |
///
/// "either/rssi" resolves to the antenna with the higher RSSI. With one
/// antenna enabled the choice is trivial and this function is not called.
pub fn select_diversity_antenna(rx1: RxStatus, rx2: RxStatus, rssi1: i8, rssi2: i8) -> Antenna {
    if rx1 == rx2 {
        if rssi1 > rssi2 { Antenna::One } else { Antenna::Two }
    } else if rx1 == RxStatus::Valid {
        Antenna::One
    } else if rx2 == RxStatus::Valid {
        Antenna::Two
    } else {
        if rssi1 > rssi2 { Antenna::One } else { Antenna::Two }
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;

    #[test]
    fn test_single_valid_antenna_always_wins() {
        // whenever exactly one antenna reports Valid it must be chosen,
        // regardless of RSSI
        for other in [RxStatus::None, RxStatus::Invalid] {
            assert_eq!(select_diversity_antenna(RxStatus::Valid, other, -110, -30), Antenna::One);
            assert_eq!(select_diversity_antenna(other, RxStatus::Valid, -30, -110), Antenna::Two);
        }
    }

    #[test]
    fn test_tie_resolves_by_rssi() {
        assert_eq!(
            select_diversity_antenna(RxStatus::Valid, RxStatus::Valid, -70, -65),
            Antenna::Two
        );
        assert_eq!(
            select_diversity_antenna(RxStatus::Valid, RxStatus::Valid, -65, -70),
            Antenna::One
        );
        assert_eq!(
            select_diversity_antenna(RxStatus::None, RxStatus::Invalid, -80, -90),
            Antenna::One
        );
    }

    #[test]
    fn test_equal_rssi_prefers_antenna_two() {
        // ties on RSSI fall through to antenna 2, matching the strict
        // greater-than comparison
        assert_eq!(
            select_diversity_antenna(RxStatus::Valid, RxStatus::Valid, -70, -70),
            Antenna::Two
        );
    }

    #[test]
    fn test_antenna_index_round_trip() {
        assert_eq!(Antenna::from_index(Antenna::One.index()), Antenna::One);
        assert_eq!(Antenna::from_index(Antenna::Two.index()), Antenna::Two);
    }
}
