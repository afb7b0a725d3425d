//! Request payloads accepted by the release controller.

pub mod models;
