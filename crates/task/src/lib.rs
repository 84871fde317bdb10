//! Job scheduling and process supervision for stackscore
//!
//! The [`scheduler`] drains a shuffled [`queue`] of references one job at a
//! time until the queue is empty, the global deadline passes or an
//! [`interrupt`] arrives. Each job runs the external tool twice through the
//! [`supervisor`], streaming the score phase into a [`score_writer`].

pub mod interrupt;
pub mod queue;
pub mod scheduler;
pub mod score_writer;
pub mod supervisor;

pub use interrupt::{Interrupt, InterruptDisposition};
pub use queue::WorkQueue;
pub use scheduler::{Scheduler, SchedulerConfig};
pub use score_writer::ScoreWriter;
pub use supervisor::{ChunkSink, ExitOutcome, JobCommand, Stdout, Supervisor};
