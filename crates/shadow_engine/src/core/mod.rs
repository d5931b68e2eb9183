//! Core crate-wide types

pub mod config;
