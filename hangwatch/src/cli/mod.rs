//! Command-line interface of the demo binary

pub mod args;

pub use args::{Args, Strategy};
