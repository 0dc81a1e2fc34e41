//! Orchestration core: the coordinator, its server slots and everything
//! they share.
//!
//! Processes are reached only through the [`WorkerLauncher`] seam; the
//! `suitepool-exec` crate provides the OS implementation.

pub mod error;
pub use error::CoreError;

pub mod launcher;
pub use launcher::{WorkerEvent, WorkerExit, WorkerLauncher, WorkerProcess};

pub mod ports;
pub use ports::PortAllocator;

pub mod registry;
pub use registry::WorkerRegistry;

pub mod batch;
pub use batch::Batch;

pub mod state;
pub use state::GlobalState;

pub mod slot;
pub use slot::{ServerSlot, SlotCommand, SlotEvent, SlotEventKind, SlotHandle, SlotId, SlotState};

pub mod reporter;
pub use reporter::{ReportSink, ReporterAggregator, RunStats};

pub mod coordinator;
pub use coordinator::{Coordinator, CoordinatorConfig, RunSummary};
