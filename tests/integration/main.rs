//! Integration test driver for `tests/integration/` submodule.
//!
//! Each `mod` below maps to a file that exercises a specific subsystem
//! against the simulation adapters. All tests run on the host (x86_64)
//! with no radio required.

#![cfg(not(target_os = "espidf"))]

mod command_tests;
mod component_tests;
mod maintenance_tests;
mod pairing_tests;
