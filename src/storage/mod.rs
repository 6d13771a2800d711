mod durable;
mod keychain_backend;
mod postgres;
mod query;
pub(crate) mod upgrade;
mod volatile;

pub use durable::DurableKeychain;
pub use keychain_backend::KeychainBackend;
pub use postgres::PgProvider;
pub use query::{PostgreSql, DEFAULT_TABLE};
pub use volatile::VolatileKeychain;
