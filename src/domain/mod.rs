// Domain layer - Plain data types with no I/O
pub mod aggregate;
pub mod error;
pub mod load_profile;
pub mod metrics;
pub mod report;
pub mod target;
