mod suite;
pub use suite::{SuiteRef, SuiteType};

mod worker;
pub use worker::{WorkerId, WorkerRecord, WorkerRole};

mod ports;
pub use ports::PortBlock;

mod limits;
pub use limits::WorkerLimits;

mod launch;
pub use launch::{WorkerEnv, vars};
