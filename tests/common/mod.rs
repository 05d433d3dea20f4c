//! Common test utilities for bunkr-dl integration tests

#[allow(dead_code)]
pub mod assertions;
#[allow(dead_code)]
pub mod site;

#[allow(unused_imports)]
pub use assertions::*;
#[allow(unused_imports)]
pub use site::*;
