//! Shared configuration, error taxonomy, data types and database helpers.

pub mod config;
pub mod db;
pub mod error;
pub mod types;
