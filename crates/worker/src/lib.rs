//! Long-running message consumer processes.

pub mod process;
pub mod source;
pub mod tail;
pub mod unit_of_work;

pub use process::{ConsumerProcess, MessageHandler, MessageProcessor, RunOptions, RunSummary};
pub use source::MessageSource;
pub use unit_of_work::{NoTransaction, UnitOfWork};
