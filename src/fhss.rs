//! Frequency-hopping sequencer.
//!
//! Builds a pseudorandom permutation of the legal 2.4 GHz channel set from a
//! shared seed and walks it one hop per transmitted frame. Both link ends
//! run the same construction with the same `(seed, num)` pair and therefore
//! meet on the same carrier every frame; the transmitter advances before
//! the transmission that uses the new channel, the receiver mirrors the
//! advance with the same formula.

use rand_core::RngCore;
use rand_core::SeedableRng;
use rand_wyrand::WyRand;

/// Number of carriers in the legal channel set
pub const FHSS_CHANNEL_COUNT: usize = 68;

/// First carrier of the band, in Hz
const FHSS_BASE_FREQ_HZ: u32 = 2_406_000_000;

/// Carrier spacing, in Hz
const FHSS_FREQ_STEP_HZ: u32 = 1_000_000;

const fn build_freq_list() -> [u32; FHSS_CHANNEL_COUNT] {
    let mut list = [0u32; FHSS_CHANNEL_COUNT];
    let mut i = 0;
    while i < FHSS_CHANNEL_COUNT {
        list[i] = FHSS_BASE_FREQ_HZ + (i as u32) * FHSS_FREQ_STEP_HZ;
        i += 1;
    }
    list
}

/// The legal carrier set both endpoints draw their hop tables from
pub const FHSS_FREQ_LIST: [u32; FHSS_CHANNEL_COUNT] = build_freq_list();

/// Hop sequencer state
pub struct Fhss {
    table: [u32; FHSS_CHANNEL_COUNT],
    num: u16,
    curr_i: u16,
}

impl Fhss {
    pub const fn new() -> Self {
        Fhss {
            table: FHSS_FREQ_LIST,
            num: FHSS_CHANNEL_COUNT as u16,
            curr_i: 0,
        }
    }

    /// Build the hop table: a seeded partial Fisher-Yates shuffle of the
    /// legal set, taking the first `num` carriers.
    ///
    /// `num` is clamped to `1..=FHSS_CHANNEL_COUNT`. Identical `(num, seed)`
    /// inputs yield identical tables on any implementation of this
    /// construction, which is what keeps the two ends phase-aligned.
    pub fn init(&mut self, num: u16, seed: u32) {
        let num = num.clamp(1, FHSS_CHANNEL_COUNT as u16);
        let mut rng = WyRand::seed_from_u64(seed as u64);

        let mut pool = FHSS_FREQ_LIST;
        for i in 0..num as usize {
            let j = i + (rng.next_u32() as usize) % (FHSS_CHANNEL_COUNT - i);
            pool.swap(i, j);
        }

        self.table = pool;
        self.num = num;
        self.curr_i = 0;
    }

    /// Position the sequencer at the start of the TX phase
    pub fn start_tx(&mut self) {
        self.curr_i = 0;
    }

    /// Advance to the next channel, wrapping at the table length
    pub fn hop_to_next(&mut self) {
        self.curr_i = (self.curr_i + 1) % self.num;
    }

    /// The currently tuned carrier frequency in Hz
    pub fn get_current_freq(&self) -> u32 {
        self.table[self.curr_i as usize]
    }

    /// Current position in the hop table, for telemetry
    pub fn curr_i(&self) -> u16 {
        self.curr_i
    }

    /// Number of channels in the hop set
    pub fn num(&self) -> u16 {
        self.num
    }
}

impl Default for Fhss {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;

    #[test]
    fn test_same_seed_same_table() {
        let mut a = Fhss::new();
        let mut b = Fhss::new();
        a.init(24, 0xDEAD_BEEF);
        b.init(24, 0xDEAD_BEEF);

        for _ in 0..100 {
            assert_eq!(a.get_current_freq(), b.get_current_freq());
            a.hop_to_next();
            b.hop_to_next();
        }
    }

    #[test]
    fn test_different_seeds_differ() {
        let mut a = Fhss::new();
        let mut b = Fhss::new();
        a.init(24, 1);
        b.init(24, 2);

        let mut all_equal = true;
        for _ in 0..24 {
            if a.get_current_freq() != b.get_current_freq() {
                all_equal = false;
            }
            a.hop_to_next();
            b.hop_to_next();
        }
        assert!(!all_equal);
    }

    #[test]
    fn test_table_is_a_permutation_of_the_legal_set() {
        let mut fhss = Fhss::new();
        fhss.init(FHSS_CHANNEL_COUNT as u16, 42);

        let mut seen = [false; FHSS_CHANNEL_COUNT];
        for _ in 0..FHSS_CHANNEL_COUNT {
            let freq = fhss.get_current_freq();
            let idx = FHSS_FREQ_LIST.iter().position(|&f| f == freq).expect("frequency outside legal set");
            assert!(!seen[idx], "carrier visited twice in one period");
            seen[idx] = true;
            fhss.hop_to_next();
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn test_hop_wraps_modulo_num() {
        let mut fhss = Fhss::new();
        fhss.init(7, 9);
        let first = fhss.get_current_freq();
        for _ in 0..7 {
            fhss.hop_to_next();
        }
        assert_eq!(fhss.curr_i(), 0);
        assert_eq!(fhss.get_current_freq(), first);
    }

    #[test]
    fn test_start_tx_resets_position() {
        let mut fhss = Fhss::new();
        fhss.init(12, 3);
        fhss.hop_to_next();
        fhss.hop_to_next();
        assert_ne!(fhss.curr_i(), 0);
        fhss.start_tx();
        assert_eq!(fhss.curr_i(), 0);
    }

    #[test]
    fn test_num_is_clamped() {
        let mut fhss = Fhss::new();
        fhss.init(0, 5);
        assert_eq!(fhss.num(), 1);
        fhss.init(500, 5);
        assert_eq!(fhss.num(), FHSS_CHANNEL_COUNT as u16);
    }
}
