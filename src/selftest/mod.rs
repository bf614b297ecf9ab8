//! On-target driver self-tests
//!
//! Run by the board bring-up code after the drivers are probed. Each test
//! returns a typed error whose `code()` is what gets reported to the
//! external test runner.

pub mod timer;
