pub mod database;
pub mod error;
pub mod messages;
pub mod password;
pub mod schema;
pub mod users;

pub use database::Database;
pub use error::StoreError;
pub use messages::{MessageRepo, NewMessage};
pub use users::{User, UserRepo};
