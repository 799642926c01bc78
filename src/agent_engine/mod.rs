pub mod engine;
pub mod loop_control;
pub mod planner;
pub mod session_log;
pub mod state;
