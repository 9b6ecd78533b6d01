#![forbid(unsafe_code)]

pub mod aggregator;
pub mod app_services;
pub mod config;
pub mod error;
pub mod keys;
pub mod queries;
pub mod status;
pub mod view;
pub mod write;

pub use lms_core::Clock;

pub use aggregator::ProgressAggregator;
pub use app_services::{AppServices, build_cache};
pub use config::AppConfig;
pub use error::{AppServicesError, ConfigError, ProgressServiceError};
pub use queries::ProgressQueryService;
pub use status::AssignmentStatusResolver;
pub use view::{FormationProgressView, RecordedProgress};
pub use write::ProgressWriteService;
