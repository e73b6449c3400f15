pub mod config;
pub mod jog;
pub mod messages;
pub mod motor;
pub mod runtime;
