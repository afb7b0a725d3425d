//! Release lifecycle steps

pub mod decision;
pub mod delete_step;
pub mod deploy_step;
pub mod fsm;
pub mod health_check;
pub mod release_manager;
pub mod strategy;
