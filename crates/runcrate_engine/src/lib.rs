pub mod progress;
pub mod runner;

pub use progress::{ProgressChannel, ProgressRegistry, PROGRESS_CAPACITY};
pub use runner::{JobObserver, NoopObserver, Runner};
