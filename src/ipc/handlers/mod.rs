pub mod core;
pub mod evaluation;
pub mod marks;
pub mod progress;
pub mod reports;
pub mod setup;
pub mod systems;
