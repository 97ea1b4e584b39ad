//! Value types returned by the clients.

mod batch;
mod entry;
pub mod key;
mod upload;

pub use batch::{BatchReport, KeyOutcome};
pub use entry::ObjectEntry;
pub use upload::UploadOutput;
