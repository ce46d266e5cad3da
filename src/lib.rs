//! Curator - filename classification and quality reconciliation for a
//! movie and TV library

pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod services;
