pub mod command;
pub mod coordinator;
pub mod dispatcher;
pub mod ports;
