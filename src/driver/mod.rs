mod cli;
mod driver;

pub use driver::Driver;
