//! Command builders and reply parsers.
//!
//! Each command has an `*_args` builder producing the raw argument vector
//! (usable with [`crate::connection::Pipeline::queue`]) and an async helper
//! that runs it on a single [`crate::connection::Connection`].

pub mod streams;

use bytes::Bytes;

use crate::connection::Connection;
use crate::error::Result;
use crate::types::{ToArg, Value};

/// Execute a prepared argument vector.
pub(crate) async fn exec(conn: &mut Connection, args: Vec<Bytes>) -> Result<Value> {
    conn.execute(&args).await
}

/// Helper to create a Bytes arg from anything that implements ToArg.
#[inline]
pub(crate) fn arg<T: ToArg>(val: T) -> Bytes {
    val.to_arg()
}
