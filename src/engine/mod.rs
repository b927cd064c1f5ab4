pub mod assignment;
pub mod registry;
pub mod scoring;
pub mod tracking;
