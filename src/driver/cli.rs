//! CLI argument parsing.
//!
//! A flat `while` loop with a `match` per argument; no argument-parser
//! library. Unknown flags are errors (this tool has no build-system
//! compatibility constraints that would force it to ignore them).

use super::driver::Driver;
use crate::common::error::{Error, Result};

const VERSION: &str = env!("CARGO_PKG_VERSION");

impl Driver {
    /// Parse command-line arguments into driver fields. Returns Ok(true)
    /// if an early-exit query flag (--version, --help) was handled.
    pub fn parse_cli_args(&mut self, args: &[String]) -> Result<bool> {
        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--version" => {
                    println!("iropt {}", VERSION);
                    return Ok(true);
                }
                "-h" | "--help" => {
                    print_usage();
                    return Ok(true);
                }
                "-o" => {
                    i += 1;
                    let path = args
                        .get(i)
                        .ok_or_else(|| Error::Usage("-o requires an output path".to_string()))?;
                    self.output = Some(path.clone());
                }
                "--verify" => self.verify = true,
                "--no-opt" => self.no_opt = true,
                "--time-passes" => std::env::set_var("IROPT_TIME_PASSES", "1"),
                flag if flag.starts_with('-') => {
                    return Err(Error::Usage(format!("unknown option '{}'", flag)));
                }
                input => {
                    if self.input.is_some() {
                        return Err(Error::Usage("more than one input file".to_string()));
                    }
                    self.input = Some(input.to_string());
                }
            }
            i += 1;
        }
        Ok(false)
    }
}

fn print_usage() {
    println!("usage: iropt [options] <input.ir>");
    println!();
    println!("options:");
    println!("  -o <file>      write output to <file> instead of stdout");
    println!("  --verify       verify the module before and after optimization");
    println!("  --no-opt       parse and print without optimizing");
    println!("  --time-passes  print per-pass timing to stderr");
    println!("  --version      print version and exit");
}
