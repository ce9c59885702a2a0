//! Sessions: pending-call correlation, timeouts and lifecycle

pub mod connection;
pub mod pending;
pub mod registry;
pub mod supervisor;

pub use connection::{BusyPolicy, CallFuture, Session, SessionBuilder, SessionConfig};
pub use pending::{PendingCall, PendingCallTable, Settled};
pub use registry::{SessionRegistry, SharedSessionRegistry};
pub use supervisor::TimeoutSupervisor;
