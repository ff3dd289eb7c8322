//! # Formats Module
//!
//! On-disk encodings of a [`Dataset`](crate::Dataset).
//!
//! This module contains:
//! - NetCDF reader (classic, 64-bit offset, NetCDF-4) and NetCDF-4 writer
//!
//! `read_dataset` / `write_dataset` are the only file I/O in the crate.

pub mod netcdf;

pub use self::netcdf::{read_dataset, write_dataset};
