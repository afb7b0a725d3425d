//! Release service and lifecycle controller

pub mod controller;
pub mod release_service;
