pub mod plan;
pub mod setup;
