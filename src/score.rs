//! Sender scoring.
//!
//! The score of a sender is an integer in [0, 100], derived from the average
//! price per gas unit (PPU) of its pending transactions. The scale is
//! logarithmic between a "worst" PPU (a maximum-gas transaction at the
//! minimum gas price) and an "excellent" PPU (a multiple of the minimum gas
//! price), so senders paying several times the base price saturate near 100
//! while subsidized heavy contract calls sit near 0. Senders whose nonce
//! sequence is not spotless are pinned to 0 regardless of price.

use crate::host::MempoolHost;
use crate::tx::Transaction;

/// Gas limit of the reference "worst" transaction (protocol maximum per tx).
const WORST_PPU_TX_GAS_LIMIT: u64 = 600_000_000;
/// A sender paying this multiple of the minimum gas price scores 100.
const EXCELLENT_GAS_PRICE_FACTOR: f64 = 5.0;
const NUM_DESIRED_SCORES: f64 = 100.0;

/// Aggregates of one sender, as needed by the score function.
#[derive(Debug, Clone, Default)]
pub struct SenderScoreParams {
    /// Sum of fees of the sender's transactions.
    pub avg_ppu_numerator: f64,
    /// Sum of gas limits of the sender's transactions.
    pub avg_ppu_denominator: u64,
    pub count: u64,
    pub total_bytes: u64,
    /// Whether the contained nonces form one contiguous run, starting at the
    /// account nonce when the latter is known.
    pub has_spotless_sequence_of_nonces: bool,
}

/// Stateless score function; constants are fixed at construction from the
/// host's fee model.
#[derive(Debug, Clone)]
pub struct ScoreComputer {
    worst_ppu_log: f64,
    score_scaling_factor: f64,
}

impl ScoreComputer {
    pub fn new(host: &dyn MempoolHost) -> Self {
        let worst_ppu = compute_worst_ppu(host);
        let worst_ppu_log = worst_ppu.ln();

        let excellent_ppu = host.min_gas_price() as f64 * EXCELLENT_GAS_PRICE_FACTOR;
        let excellent_ppu_normalized = excellent_ppu / worst_ppu;
        let score_scaling_factor = NUM_DESIRED_SCORES / excellent_ppu_normalized.ln();

        Self {
            worst_ppu_log,
            score_scaling_factor,
        }
    }

    /// Integer score in [0, 100].
    pub fn compute_score(&self, params: &SenderScoreParams) -> u32 {
        let raw = self.compute_raw_score(params);
        if raw <= 0.0 {
            return 0;
        }

        let truncated = raw as u32;
        truncated.min(NUM_DESIRED_SCORES as u32)
    }

    fn compute_raw_score(&self, params: &SenderScoreParams) -> f64 {
        if !params.has_spotless_sequence_of_nonces {
            return 0.0;
        }
        if params.avg_ppu_denominator == 0 || params.avg_ppu_numerator <= 0.0 {
            return 0.0;
        }

        let avg_ppu = params.avg_ppu_numerator / params.avg_ppu_denominator as f64;
        let avg_ppu_normalized_log = avg_ppu.ln() - self.worst_ppu_log;
        avg_ppu_normalized_log * self.score_scaling_factor
    }

    #[cfg(test)]
    pub(crate) fn worst_ppu_log(&self) -> f64 {
        self.worst_ppu_log
    }
}

/// PPU of the least attractive transaction the protocol accepts: maximum gas
/// limit, minimum gas price, no data.
fn compute_worst_ppu(host: &dyn MempoolHost) -> f64 {
    let worst_tx = Transaction {
        sender: Vec::new(),
        receiver: Vec::new(),
        nonce: 0,
        gas_limit: WORST_PPU_TX_GAS_LIMIT,
        gas_price: host.min_gas_price(),
        data: Vec::new(),
        value: 0,
        guardian: None,
    };

    let fee = host.compute_tx_fee(&worst_tx);
    fee as f64 / WORST_PPU_TX_GAS_LIMIT as f64
}
