//! iropt: a memory-to-register promotion tool for a small SSA IR.
//!
//! The library parses a textual IR, promotes stack cells (allocas) whose
//! only users are loads and stores into SSA values with phi nodes, and
//! prints the result. The core transformation lives in `ir::mem2reg`;
//! `driver` wires it into a CLI.

pub mod common;
pub mod driver;
pub mod frontend;
pub mod ir;
pub mod passes;

/// Shared entry point for the binary. CFG traversals recurse over block
/// graphs, so the real work runs on a thread with a large stack to keep
/// pathological inputs (machine-generated functions with huge CFGs) from
/// overflowing.
pub fn tool_main() {
    const STACK_SIZE: usize = 64 * 1024 * 1024; // 64 MB
    let builder = std::thread::Builder::new().stack_size(STACK_SIZE);
    let handler = builder
        .spawn(|| {
            let args: Vec<String> = std::env::args().collect();
            let mut driver = driver::Driver::new();
            if driver.parse_cli_args(&args)? {
                return Ok(());
            }
            if !driver.has_input_file() {
                return Err(common::error::Error::Usage("no input file".to_string()));
            }
            driver.run()
        })
        .expect("failed to spawn main thread");

    match handler.join() {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            eprintln!("iropt: error: {}", e);
            std::process::exit(1);
        }
        Err(e) => {
            if let Some(s) = e.downcast_ref::<&str>() {
                eprintln!("iropt: internal error: {}", s);
            } else if let Some(s) = e.downcast_ref::<String>() {
                eprintln!("iropt: internal error: {}", s);
            } else {
                eprintln!("iropt: internal error (thread panicked)");
            }
            std::process::exit(1);
        }
    }
}
