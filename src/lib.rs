#![doc = include_str!("../README.md")]

pub mod archive;
pub mod batch;
pub mod blob;
pub mod cluster;
pub mod dispatch;
pub mod error;
pub mod job;
pub mod registry;
pub mod store;
pub mod workload;

pub use error::Error;
