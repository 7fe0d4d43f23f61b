//! Common test utilities for the built-in integrations
//!
//! Harnesses, mocks and fixtures shared by the integration tests.

#![allow(dead_code)]

mod fixtures;
mod logs;
mod mock_bridge;
mod test_hass;

pub use logs::*;
pub use mock_bridge::*;
pub use test_hass::*;
