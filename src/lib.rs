//! Revit Assistant - natural-language control of a running Revit instance
//!
//! This crate provides:
//! - HTTP transport to the Revit add-in (`/execute`, `/execute_code`)
//! - The fixed capability set exposed to the model as tools
//! - A tool-calling orchestrator that runs multi-step plans one tool at a time
//! - A code generator that writes C# for Revit with a single retry on failure

pub mod agent;
pub mod cli;
pub mod config;
pub mod paths;
pub mod revit;

pub use config::Config;
