//! # dbpool-testing
//!
//! Test infrastructure for the `dbpool` connection pool.
//!
//! This crate provides an in-memory mock driver that implements the pool's
//! driver traits, so pool behavior can be tested without a database.
//!
//! ## Features
//!
//! - Scripted statement responses (rows, affected counts, errors)
//! - Connections that drop their link after a chosen statement
//! - Injected failures for connect, rollback, close and isolation changes
//! - A shared call log for asserting what the pool did to each connection

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod mock_driver;

pub use mock_driver::{
    MockCall, MockConnection, MockCursor, MockDriver, MockDriverBuilder, MockError, MockEvent,
    MockFactory, MockResponse, Row, Value,
};
