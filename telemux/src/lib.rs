//! Client library for the telemux agent; the binary is a thin wrapper.

pub mod render;
pub mod types;
pub mod ws;
