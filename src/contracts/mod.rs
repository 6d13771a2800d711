pub mod backend;
pub mod error;
pub mod keychain;
pub mod statement;

pub use backend::{Connection, ConnectionProvider};
pub use error::{BoxError, KeychainError, KeychainResult, Operation};
pub use keychain::Keychain;
pub use statement::{QueryKind, Statement};
