//! Common types used across the Keel kernel.

mod common;

pub use common::*;
