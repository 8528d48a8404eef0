//! coding-agent - queue-driven issue fixing and pull request review for GitHub repositories

pub mod collab;
pub mod commands;
pub mod config;
pub mod convergence;
pub mod error;
pub mod intake;
pub mod prioritize;
pub mod queue;
pub mod runner;
pub mod subprocess;
pub mod telemetry;
pub mod template;
pub mod worker;

#[cfg(test)]
mod testing;
