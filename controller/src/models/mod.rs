//! Data models

pub mod deployment;
pub mod machine;
pub mod release;
