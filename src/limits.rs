//! Tunable knobs for the channel engine.
//!
//! This is deliberately narrow: it configures only the protocol-level
//! defaults spec.md calls out as implementation choices (window size,
//! max packet size, window replenishment threshold, fd/channel
//! capacity). It is not a stand-in for the ssh_config(5) host/user/port
//! loader that would configure the out-of-scope transport/auth layer —
//! that concern lives outside this crate entirely.

use crate::channel::{DEFAULT_MAX_PACKET, DEFAULT_WINDOW};

/// Engine-wide limits and flow-control defaults.
#[derive(Debug, Clone, Copy)]
pub struct EngineLimits {
    /// Window size advertised to the peer for each newly opened channel.
    pub window: u32,
    /// Max packet size advertised to the peer for each newly opened
    /// channel.
    pub max_packet: u32,
    /// Once `local_window` drops to this fraction of `window` (expressed
    /// as a denominator: `window / replenish_divisor`), the engine sends
    /// a `WINDOW_ADJUST` restoring the deficit. spec.md's default
    /// ("crosses half the default") is `replenish_divisor == 2`.
    pub replenish_divisor: u32,
    /// Upper bound on the number of channels a single connection may
    /// hold open at once (`REQUESTED` + `OPEN`, not counting swept
    /// `CLOSED` slots).
    pub max_channels: usize,
}

impl Default for EngineLimits {
    fn default() -> Self {
        Self {
            window: DEFAULT_WINDOW,
            max_packet: DEFAULT_MAX_PACKET,
            replenish_divisor: 2,
            max_channels: 64,
        }
    }
}

impl EngineLimits {
    pub fn replenish_threshold(&self) -> u32 {
        self.window / self.replenish_divisor.max(1)
    }
}
