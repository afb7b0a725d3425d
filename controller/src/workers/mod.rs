//! Background workers

pub mod release_machine;
