// Application layer - Use cases over the metrics store
pub mod aggregator;
pub mod collector;
pub mod metrics_repository;
pub mod report_service;
pub mod target_service;
