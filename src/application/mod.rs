pub mod dispatcher;
pub mod events;
pub mod registry;
pub mod session;

// Re-export key types for convenience
pub use dispatcher::Dispatcher;
pub use events::{create_event_bus, EventBus, EventSubscriber, SessionEvent, SharedEventBus};
pub use registry::{
    handler_fn, ActionRegistry, ActionRegistryBuilder, RequestHandler, SharedActionRegistry,
};
pub use session::{
    BusyPolicy, CallFuture, Session, SessionConfig, SessionRegistry, SharedSessionRegistry,
    TimeoutSupervisor,
};
