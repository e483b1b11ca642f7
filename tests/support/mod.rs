//! Shared helpers for integration tests.

#![allow(dead_code)]

pub mod raw_host;
pub mod site;
pub mod socket_guard;
