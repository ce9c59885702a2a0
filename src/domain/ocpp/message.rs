//! Request / confirmation contracts
//!
//! Every OCPP payload type is a plain serde struct that also derives
//! [`validator::Validate`]. The exchange engine never looks at fields; it
//! only decodes, validates and encodes through these traits.

use serde::de::DeserializeOwned;
use serde::Serialize;
use validator::Validate;

/// A confirmation (response payload) for some [`OcppRequest`].
pub trait OcppConfirmation: Serialize + DeserializeOwned + Validate + Send + Sync + 'static {}

/// A request payload bound to its wire action name and confirmation type.
pub trait OcppRequest: Serialize + DeserializeOwned + Validate + Send + Sync + 'static {
    /// Wire action name, e.g. `"Authorize"`.
    const ACTION: &'static str;

    /// Payload expected in the matching `CallResult`.
    type Confirmation: OcppConfirmation;

    /// Whether this request belongs to a charging transaction.
    ///
    /// Transaction-related messages get retried on timeout
    /// (see `Session::call_with_retry`); everything else is sent once.
    fn is_transaction_related(&self) -> bool {
        false
    }
}
