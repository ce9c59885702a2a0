pub mod errors;
pub mod ocpp_frame;
pub mod payload;
pub mod retry;
pub mod shutdown;
