//! Pipeline components and the services that drive them.

pub mod auth;
pub mod ingest_service;
pub mod keys;
pub mod normalize;
pub mod probe;
pub mod process;
pub mod publish;
pub mod staging;
pub mod video_repository;
