pub mod chunker;
pub mod semaphore;

pub use chunker::{NeverSplit, SplitOnDupId, SplitPolicy, bulk};
pub use semaphore::SemaphoreRegistry;
