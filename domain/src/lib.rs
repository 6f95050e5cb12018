pub mod models;
pub mod repositories;
mod schema;

pub use models::*;
pub use repositories::{Repositories, RepositoryError};
