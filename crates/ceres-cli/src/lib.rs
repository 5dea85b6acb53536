//! Ceres CLI - Command-line interface for the Ceres CKAN harvester
//!
//! This crate provides the CLI application that ties together all Ceres components.

pub mod config;
pub mod output;

pub use config::{Command, Config, HarvestArgs, MergeStrategyArg};
