//! CLI subcommands.

pub mod common;
pub mod match_tile;
pub mod simulate;
