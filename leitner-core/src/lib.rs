pub mod cards;
pub mod errors;
pub mod models;
pub mod repo;
pub mod tagsync;

pub use cards::*;
pub use errors::*;
pub use models::*;
pub use repo::*;
pub use tagsync::{SyncOptions, SyncReport, TagSync};
