//! Shared helpers for telemux integration tests.

#![allow(dead_code)]

pub mod fixtures;
pub mod mock_apm;
