//! Testing utilities for mcplink.
//!
//! This crate provides:
//! - Mock tool-server transports and authorization servers
//! - A mock client factory for the session service
//! - Mock gateway and backend API for the client runtime
//! - Slow-writing storage for race tests
//! - Pre-built fixtures for common session setups

pub mod fixtures;
pub mod mocks;

pub use fixtures::*;
pub use mocks::{
    MockAuthorizationServer, MockBackend, MockClientFactory, MockGateway, MockTransport,
    SlowStorage, MOCK_AUTH_BASE,
};
