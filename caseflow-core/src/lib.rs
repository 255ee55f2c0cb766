pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod repos;
pub mod schema;
pub mod template;
pub mod types;

pub use config::Config;
pub use context::AppContext;
pub use db::DbPool;
pub use error::StoreError;
pub use repos::Repos;
