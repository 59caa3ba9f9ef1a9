//! Platform layer
//!
//! All raw process-table and file-descriptor operations live here so the
//! supervision levels only deal in `u32` pids and `Result`s.

#[cfg(unix)]
mod unix;

#[cfg(unix)]
pub use unix::*;
