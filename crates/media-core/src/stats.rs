//! Session establishment statistics
//!
//! Latencies are in milliseconds with two sentinel values: `-1` not yet
//! measured, `-2` the step failed.

/// Sentinel: not measured yet
pub const STAT_INIT: i32 = -1;

/// Sentinel: the step failed
pub const STAT_ERROR: i32 = -2;

/// Establishment statistics snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaStats {
    /// TURN allocation latency in ms
    pub turn_alloc_ms: i32,

    /// NAT traversal (ICE nomination) latency in ms
    pub nat_estab_ms: i32,

    /// DTLS establishment latency in ms
    pub dtls_estab_ms: i32,

    /// DTLS handshake packets sent
    pub dtls_pkt_sent: u32,

    /// DTLS handshake packets received
    pub dtls_pkt_recv: u32,
}

impl Default for MediaStats {
    fn default() -> Self {
        Self {
            turn_alloc_ms: STAT_INIT,
            nat_estab_ms: STAT_INIT,
            dtls_estab_ms: STAT_INIT,
            dtls_pkt_sent: 0,
            dtls_pkt_recv: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_init_sentinels() {
        let stats = MediaStats::default();
        assert_eq!(stats.turn_alloc_ms, STAT_INIT);
        assert_eq!(stats.nat_estab_ms, STAT_INIT);
        assert_eq!(stats.dtls_estab_ms, STAT_INIT);
        assert_eq!(stats.dtls_pkt_sent, 0);
        assert_eq!(stats.dtls_pkt_recv, 0);
    }
}
