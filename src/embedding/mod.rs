mod locks;
pub mod queue;
pub mod retry;
pub mod runner;
pub mod similarity;
pub mod sweep;

pub use queue::EmbeddingQueue;
pub use retry::RetryPolicy;
pub use runner::EmbeddingRunner;
