pub mod command;
pub mod config;
pub mod control;
pub mod fault;
pub mod messages;
pub mod motor;
pub mod runtime;
pub mod state;
