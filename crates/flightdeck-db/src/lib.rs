pub mod config;
mod convert;
pub mod database;
pub mod posting_repository;
pub mod source_repository;

pub use config::DatabaseConfig;
pub use database::Database;
pub use posting_repository::PostingRepository;
pub use source_repository::SourceRepository;
