//! Core crate for the riffusion interpolation sampler.

pub mod assembler;
pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod manifest;
pub mod params;
pub mod pipeline;
pub mod request;
pub mod retry;
pub mod runtime;
pub mod sampler;
