//! Connection state machine: Listen -> Syncing -> Connected, with a tick
//! driven timeout back to Listen.
//!
//! Fed once per link cycle with whether a valid frame arrived, and once per
//! millisecond with the system tick. The sync counter is deliberately NOT
//! reset by a missed frame while still syncing; only the Connected timeout
//! restarts acquisition from Listen.

/// Number of valid frames required to promote the link to Connected
pub const CONNECT_SYNC_CNT: u8 = 5;

/// Milliseconds without a valid frame before a connected link drops to Listen
pub const CONNECT_TMO_MS: u16 = 750;

/// Classification of the link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Nothing heard yet
    Listen,
    /// Valid frames seen, counting up to the sync threshold
    Syncing(u8),
    Connected,
}

/// Connection FSM with its timeout down-counter
pub struct Connection {
    state: ConnectionState,
    tmo_cnt: u16,
}

impl Connection {
    pub const fn new() -> Self {
        Connection {
            state: ConnectionState::Listen,
            tmo_cnt: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state, ConnectionState::Connected)
    }

    /// Advance the timeout down-counter by one system tick
    pub fn tick_1ms(&mut self) {
        if self.tmo_cnt > 0 {
            self.tmo_cnt -= 1;
        }
    }

    /// Feed the outcome of one link cycle.
    ///
    /// Returns true if the link just dropped from Connected to Listen, so
    /// the caller can clear its statistics.
    pub fn frame_cycle(&mut self, valid_received: bool) -> bool {
        if valid_received {
            self.state = match self.state {
                ConnectionState::Listen => ConnectionState::Syncing(1),
                ConnectionState::Syncing(n) => {
                    if n + 1 >= CONNECT_SYNC_CNT {
                        ConnectionState::Connected
                    } else {
                        ConnectionState::Syncing(n + 1)
                    }
                }
                ConnectionState::Connected => ConnectionState::Connected,
            };
            // every valid frame re-arms the timeout, so the counter is
            // never zero while Connected
            self.tmo_cnt = CONNECT_TMO_MS;
        }

        if self.is_connected() && self.tmo_cnt == 0 {
            self.state = ConnectionState::Listen;
            return true;
        }

        false
    }
}

impl Default for Connection {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;

    fn run_cycles(conn: &mut Connection, valid: bool, cycles: usize, ms_per_cycle: u16) {
        for _ in 0..cycles {
            for _ in 0..ms_per_cycle {
                conn.tick_1ms();
            }
            conn.frame_cycle(valid);
        }
    }

    #[test]
    fn test_connects_after_sync_threshold() {
        let mut conn = Connection::new();
        assert_eq!(conn.state(), ConnectionState::Listen);

        for n in 1..CONNECT_SYNC_CNT {
            conn.frame_cycle(true);
            assert_eq!(conn.state(), ConnectionState::Syncing(n));
        }
        conn.frame_cycle(true);
        assert_eq!(conn.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_missed_frame_does_not_reset_sync_counter() {
        let mut conn = Connection::new();
        conn.frame_cycle(true);
        conn.frame_cycle(true);
        assert_eq!(conn.state(), ConnectionState::Syncing(2));

        // interleaved losses during acquisition are tolerated
        run_cycles(&mut conn, false, 3, 20);
        assert_eq!(conn.state(), ConnectionState::Syncing(2));

        for _ in 0..CONNECT_SYNC_CNT - 2 {
            conn.frame_cycle(true);
        }
        assert_eq!(conn.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_timeout_drops_to_listen() {
        let mut conn = Connection::new();
        run_cycles(&mut conn, true, CONNECT_SYNC_CNT as usize, 20);
        assert!(conn.is_connected());

        // short gaps survive as long as the timeout has not expired
        run_cycles(&mut conn, false, 3, 20);
        assert!(conn.is_connected());

        // once CONNECT_TMO_MS of ticks pass without a valid frame, Listen
        let cycles_to_expiry = (CONNECT_TMO_MS as usize / 20) + 1;
        let mut dropped = false;
        for _ in 0..cycles_to_expiry {
            for _ in 0..20 {
                conn.tick_1ms();
            }
            dropped |= conn.frame_cycle(false);
        }
        assert!(dropped);
        assert_eq!(conn.state(), ConnectionState::Listen);
    }

    #[test]
    fn test_valid_frame_rearms_timeout() {
        let mut conn = Connection::new();
        run_cycles(&mut conn, true, CONNECT_SYNC_CNT as usize, 20);
        assert!(conn.is_connected());

        // keep it just alive with one valid frame per near-timeout window
        for _ in 0..5 {
            for _ in 0..CONNECT_TMO_MS - 1 {
                conn.tick_1ms();
            }
            assert!(!conn.frame_cycle(true));
            assert!(conn.is_connected());
        }
    }
}
