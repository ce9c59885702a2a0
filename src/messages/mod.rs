//! Typed OCPP payloads
//!
//! A representative catalog of request / confirmation pairs for both
//! protocol generations. Each type is a plain serde struct whose field
//! rules are declared with `validator`; the exchange engine only relies on
//! the [`OcppRequest`](crate::domain::OcppRequest) and
//! [`OcppConfirmation`](crate::domain::OcppConfirmation) contracts.

/// Binds a request type to its action name and confirmation type.
///
/// The `transaction` form marks the request as transaction-related.
macro_rules! ocpp_message {
    ($action:literal, $req:ty => $conf:ty) => {
        impl $crate::domain::OcppRequest for $req {
            const ACTION: &'static str = $action;
            type Confirmation = $conf;
        }

        impl $crate::domain::OcppConfirmation for $conf {}
    };
    ($action:literal, $req:ty => $conf:ty, transaction) => {
        impl $crate::domain::OcppRequest for $req {
            const ACTION: &'static str = $action;
            type Confirmation = $conf;

            fn is_transaction_related(&self) -> bool {
                true
            }
        }

        impl $crate::domain::OcppConfirmation for $conf {}
    };
}

pub mod v16;
pub mod v201;

use crate::domain::OcppVersion;

/// Every action name the given protocol generation defines.
///
/// Used to tell "known but unhandled" (`NotSupported`) apart from
/// "never heard of it" (`NotImplemented`).
pub fn known_actions(version: OcppVersion) -> &'static [&'static str] {
    match version {
        OcppVersion::V16 => v16::ACTIONS,
        OcppVersion::V201 => v201::ACTIONS,
    }
}
