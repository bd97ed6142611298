//! Command-line interface for lingua-forge.
//!
//! Provides the scheduled generation commands plus database migration and
//! reference-data seeding.

mod commands;
pub mod seed;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
pub use seed::{SeedData, SeedSummary};
