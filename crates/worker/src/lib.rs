pub mod processor;
pub mod reaper;
pub mod service;


pub use processor::{JobProcessor, ProcessedJob, RecipeJobProcessor};
pub use reaper::{StaleJobReaper, ABANDONED_WHILE_PROCESSING};
pub use service::{PollOutcome, WorkerService, WorkerServiceBuilder, WorkerState};
