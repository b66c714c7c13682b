//! Query-time scoring over quantized codes.
//!
//! The hardware provider selects one kernel implementation per process at
//! first use; scorers are cheap per-query objects that borrow a segment
//! reader's regions for the duration of a scan.

mod provider;
mod quantized;

pub use provider::{kernel, Kernel};
pub use quantized::QuantizedScorer;
