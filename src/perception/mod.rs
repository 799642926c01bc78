pub mod render;
pub mod resolver;
pub mod snapshot;
pub mod traits;
pub mod types;
