pub mod error;
pub mod types;

pub use error::{DbError, ErrorKind, Result};
pub use types::{
    DatabaseId, ExecuteResult, Operation, Row, TransactionHandle, TransactionKind,
};
