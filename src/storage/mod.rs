mod articles;
mod feeds;
mod repository;
mod schema;
mod types;

pub use repository::Repository;
pub use schema::Database;
pub use types::{Article, DatabaseError, Feed, NewArticle};
