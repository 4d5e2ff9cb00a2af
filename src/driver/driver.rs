//! The read -> parse -> optimize -> print pipeline.

use crate::common::error::{Error, Result};
use crate::frontend::parser::parse_module;
use crate::ir::print::print_module;
use crate::ir::verify::verify_module;
use crate::passes::run_passes;

/// Tool configuration and entry point, populated from CLI flags.
pub struct Driver {
    pub input: Option<String>,
    /// Output path; stdout when unset.
    pub output: Option<String>,
    /// Verify the module before and after optimization.
    pub verify: bool,
    /// Parse and print without running passes.
    pub no_opt: bool,
}

impl Driver {
    pub fn new() -> Self {
        Driver { input: None, output: None, verify: false, no_opt: false }
    }

    pub fn has_input_file(&self) -> bool {
        self.input.is_some()
    }

    pub fn run(&self) -> Result<()> {
        let input = self.input.as_ref().ok_or_else(|| Error::Usage("no input file".to_string()))?;
        let text = std::fs::read_to_string(input)?;
        let mut module = parse_module(&text)?;

        if self.verify {
            verify_module(&module)?;
        }
        if !self.no_opt {
            run_passes(&mut module);
            if self.verify {
                verify_module(&module)?;
            }
        }

        let printed = print_module(&module);
        match &self.output {
            Some(path) => std::fs::write(path, printed)?,
            None => print!("{}", printed),
        }
        Ok(())
    }
}

impl Default for Driver {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    #[test]
    fn test_driver_end_to_end() {
        let dir = std::env::temp_dir();
        let input = dir.join("iropt_driver_test_in.ir");
        let output = dir.join("iropt_driver_test_out.ir");
        std::fs::write(
            &input,
            indoc! {"
                define i32 @f() {
                bb0:
                  %0 = alloca i32
                  store i32 42, %0
                  %1 = load i32, %0
                  ret i32 %1
                }
            "},
        )
        .unwrap();

        let mut driver = Driver::new();
        driver.input = Some(input.display().to_string());
        driver.output = Some(output.display().to_string());
        driver.verify = true;
        driver.run().unwrap();

        let result = std::fs::read_to_string(&output).unwrap();
        assert_eq!(
            result,
            indoc! {"
                define i32 @f() {
                bb0:
                  ret i32 42
                }
            "}
        );
        let _ = std::fs::remove_file(&input);
        let _ = std::fs::remove_file(&output);
    }
}
