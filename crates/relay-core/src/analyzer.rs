//! Per-stream RTP analyzer
//!
//! Tracks loss, duplicates and interarrival jitter (RFC 3550 §6.4.1) for the
//! RTP streams of a session. The data plane feeds already-parsed header
//! fields; the session reads the totals into its accounting record at
//! teardown.

use parking_lot::Mutex;

/// Basic packet statistics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnalyzerStats {
    /// Packets seen
    pub precvd: u64,
    /// Duplicate packets
    pub pdups: u64,
    /// Packets estimated lost from sequence gaps
    pub plost: u64,
    /// Packets arriving behind the highest sequence number
    pub preordered: u64,
    /// Number of times the sender SSRC changed
    pub ssrc_changes: u64,
    /// Most recent SSRC
    pub last_ssrc: Option<u32>,
}

/// Interarrival jitter statistics, in RTP timestamp units
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JitterStats {
    /// Current jitter estimate
    pub jlast: f64,
    /// Highest estimate seen
    pub jmax: f64,
    /// Average of all estimates
    pub javg: f64,
    /// Number of estimates averaged
    pub jvcount: u64,
}

#[derive(Debug, Default)]
struct AnalyzerState {
    stats: AnalyzerStats,
    jstats: JitterStats,
    highest_seq: Option<u16>,
    last_ts: u32,
    last_arrival: f64,
    jitter: f64,
    jsum: f64,
}

/// RTP stream analyzer
#[derive(Debug)]
pub struct RtpAnalyzer {
    clock_rate: u32,
    state: Mutex<AnalyzerState>,
}

impl RtpAnalyzer {
    /// Create an analyzer for a stream sampled at `clock_rate` Hz
    pub fn new(clock_rate: u32) -> Self {
        Self {
            clock_rate,
            state: Mutex::new(AnalyzerState::default()),
        }
    }

    /// Account one received packet; `arrival` is in seconds
    pub fn update(&self, seq: u16, ssrc: u32, timestamp: u32, arrival: f64) {
        let mut st = self.state.lock();
        st.stats.precvd += 1;

        if st.stats.last_ssrc != Some(ssrc) {
            if st.stats.last_ssrc.is_some() {
                st.stats.ssrc_changes += 1;
            }
            st.stats.last_ssrc = Some(ssrc);
            st.highest_seq = None;
        }

        let highest = match st.highest_seq {
            None => {
                st.highest_seq = Some(seq);
                st.last_ts = timestamp;
                st.last_arrival = arrival;
                return;
            }
            Some(highest) => highest,
        };

        if seq == highest {
            st.stats.pdups += 1;
            return;
        }
        if is_sequence_older(seq, highest) {
            st.stats.preordered += 1;
            st.stats.plost = st.stats.plost.saturating_sub(1);
            return;
        }

        let gap = seq.wrapping_sub(highest).wrapping_sub(1);
        st.stats.plost += gap as u64;
        st.highest_seq = Some(seq);

        // D(i-1,i) = (Rj - Ri) - (Sj - Si), in timestamp units
        let arrival_delta = (arrival - st.last_arrival) * self.clock_rate as f64;
        let ts_delta = timestamp.wrapping_sub(st.last_ts) as i32 as f64;
        let d = (arrival_delta - ts_delta).abs();
        st.jitter += (d - st.jitter) / 16.0;
        st.last_ts = timestamp;
        st.last_arrival = arrival;

        let jitter = st.jitter;
        st.jsum += jitter;
        st.jstats.jlast = jitter;
        if jitter > st.jstats.jmax {
            st.jstats.jmax = jitter;
        }
        st.jstats.jvcount += 1;
        st.jstats.javg = st.jsum / st.jstats.jvcount as f64;
    }

    /// Copy of the basic statistics
    pub fn get_stats(&self) -> AnalyzerStats {
        self.state.lock().stats.clone()
    }

    /// Copy of the jitter statistics
    pub fn get_jstats(&self) -> JitterStats {
        self.state.lock().jstats.clone()
    }
}

/// Check if sequence `a` is older than sequence `b`, handling wraparound
fn is_sequence_older(a: u16, b: u16) -> bool {
    if a == b {
        return false;
    }
    let half_range = 0x8000;
    (b > a && b - a < half_range) || (a > b && a - b >= half_range)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_comparison() {
        assert!(is_sequence_older(100, 101));
        assert!(!is_sequence_older(200, 100));
        assert!(is_sequence_older(65530, 10));
        assert!(!is_sequence_older(10, 65530));
        assert!(!is_sequence_older(100, 100));
    }

    #[test]
    fn test_loss_and_duplicates() {
        let analyzer = RtpAnalyzer::new(8000);
        // 20ms packets, 160 samples each
        analyzer.update(1, 0xabc, 0, 0.0);
        analyzer.update(2, 0xabc, 160, 0.02);
        analyzer.update(5, 0xabc, 640, 0.08);
        analyzer.update(5, 0xabc, 640, 0.08);

        let stats = analyzer.get_stats();
        assert_eq!(stats.precvd, 4);
        assert_eq!(stats.plost, 2);
        assert_eq!(stats.pdups, 1);
        assert_eq!(stats.ssrc_changes, 0);

        // A late arrival fills one of the gaps
        analyzer.update(3, 0xabc, 320, 0.09);
        let stats = analyzer.get_stats();
        assert_eq!(stats.preordered, 1);
        assert_eq!(stats.plost, 1);
    }

    #[test]
    fn test_perfect_pacing_has_no_jitter() {
        let analyzer = RtpAnalyzer::new(8000);
        for i in 0..10u16 {
            analyzer.update(i, 7, i as u32 * 160, i as f64 * 0.02);
        }
        let j = analyzer.get_jstats();
        assert_eq!(j.jvcount, 9);
        assert!(j.jmax < 1e-6);
    }

    #[test]
    fn test_late_packet_raises_jitter() {
        let analyzer = RtpAnalyzer::new(8000);
        analyzer.update(0, 7, 0, 0.0);
        // Arrives 10ms late: 80 timestamp units of transit change
        analyzer.update(1, 7, 160, 0.03);
        let j = analyzer.get_jstats();
        assert!((j.jlast - 5.0).abs() < 1e-6);
        assert_eq!(j.jmax, j.jlast);
    }

    #[test]
    fn test_ssrc_change_restarts_sequence_tracking() {
        let analyzer = RtpAnalyzer::new(8000);
        analyzer.update(100, 1, 0, 0.0);
        analyzer.update(7, 2, 0, 0.02);
        analyzer.update(8, 2, 160, 0.04);
        let stats = analyzer.get_stats();
        assert_eq!(stats.ssrc_changes, 1);
        assert_eq!(stats.plost, 0);
        assert_eq!(stats.last_ssrc, Some(2));
    }
}
