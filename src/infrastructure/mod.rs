// Infrastructure layer - External dependencies and adapters
pub mod artifact_writer;
pub mod config;
pub mod prometheus_repository;
