//! Unit tests for the release lifecycle controller

mod support;
mod test_fsm;
mod test_machine;
mod test_stores;
