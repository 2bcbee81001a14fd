//! CLI command implementations
//!
//! Each command is a thin layer over the pipeline: run the operation,
//! return a serializable result struct, and offer a `print_*` helper for
//! human-readable output.

mod event;
mod init;
mod issues;
mod organize;
mod similar;
mod status;
mod sync;

pub use event::*;
pub use init::*;
pub use issues::*;
pub use organize::*;
pub use similar::*;
pub use status::*;
pub use sync::*;
