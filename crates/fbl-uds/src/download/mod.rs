//! Flash download orchestration: step machine, background jobs, record commit

mod job;
mod orchestrator;
mod state;

pub use job::{CheckJob, EraseJob, FlashOperationJob, ProgramJob};
pub use orchestrator::DownloadOrchestrator;
pub use state::{DownloadTransferState, TransferStep};
