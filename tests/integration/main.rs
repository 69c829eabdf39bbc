//! Integration test driver for the `tests/integration/` submodules.
//!
//! Each `mod` below exercises one service bridge end to end: an
//! application thread calls the public API while the test thread plays the
//! engine through [`mock_engine`]. Everything runs on the host.

mod datapoint_tests;
mod firmware_tests;
mod rci_tests;
mod receive_tests;
mod send_tests;
