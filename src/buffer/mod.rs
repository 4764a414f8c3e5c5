pub mod batch;
pub mod queue;

pub use batch::{Batch, BatchConfig, BatchFormer, SealReason};
pub use queue::{OverflowPolicy, PendingQueue, PushOutcome, QueueConfig, QueuedEvent};
