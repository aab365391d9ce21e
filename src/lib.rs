//! Ampoose library crate.
//!
//! The stable, supported API surface is exposed via [`crate::api`] and
//! [`crate::prelude`]. These modules are intended for embedding the exporter
//! in Rust applications and follow SemVer.
//!
//! Other modules are used by the CLI implementation and may change more
//! frequently.

pub mod api;
pub mod prelude;

pub mod artifact;
pub mod capture;
pub mod cli;
pub mod client;
pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod har;
pub mod path_query;
pub mod timeline;
