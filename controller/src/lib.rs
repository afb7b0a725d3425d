//! Helmsman Library
//!
//! Core modules for the helmsman release lifecycle controller.

pub mod app;
pub mod deploy;
pub mod deployer;
pub mod errors;
pub mod filesys;
pub mod logs;
pub mod manifest;
pub mod models;
pub mod service;
pub mod storage;
pub mod utils;
pub mod workers;
