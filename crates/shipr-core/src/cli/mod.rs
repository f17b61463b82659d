//! Console plumbing: progress bars and leveled operator output.

mod output;
mod progress;

pub use output::Output;
pub use progress::{format_bytes, ProgressManager};
