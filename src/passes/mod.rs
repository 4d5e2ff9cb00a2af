//! Optimization pipeline.
//!
//! The tool runs a single transformation: memory-to-register promotion.
//! The pipeline shape still follows the usual pass-runner conventions so
//! further passes slot in naturally: each pass takes the module, returns
//! a change count, and can be disabled or timed from the environment.
//!
//! - `IROPT_DISABLE_PASSES=mem2reg` (or `all`) skips passes by name.
//! - `IROPT_TIME_PASSES=1` prints per-pass wall-clock timing to stderr.

use crate::ir::mem2reg;
use crate::ir::module::IrModule;

/// Run the optimization pipeline. Returns the total change count.
pub fn run_passes(module: &mut IrModule) -> usize {
    let disabled = std::env::var("IROPT_DISABLE_PASSES").unwrap_or_default();
    if disabled.contains("all") {
        return 0;
    }
    let time_passes = std::env::var("IROPT_TIME_PASSES").is_ok();

    let mut total = 0;

    if !disabled.contains("mem2reg") {
        let t0 = if time_passes { Some(std::time::Instant::now()) } else { None };
        let n = mem2reg::promote_allocas(module);
        if let Some(t0) = t0 {
            eprintln!("[PASS] mem2reg: {:.4}s ({} changes)", t0.elapsed().as_secs_f64(), n);
        }
        total += n;
    }

    total
}
