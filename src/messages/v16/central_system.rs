//! Messages initiated by the central system

use serde::{Deserialize, Serialize};
use validator::Validate;

use super::types::*;

// ── RemoteStartTransaction ─────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RemoteStartTransactionRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 1))]
    pub connector_id: Option<i32>,
    #[validate(length(min = 1, max = 20))]
    pub id_tag: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct RemoteStartTransactionResponse {
    pub status: RemoteStartStopStatus,
}

ocpp_message!("RemoteStartTransaction", RemoteStartTransactionRequest => RemoteStartTransactionResponse);

// ── RemoteStopTransaction ──────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RemoteStopTransactionRequest {
    pub transaction_id: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct RemoteStopTransactionResponse {
    pub status: RemoteStartStopStatus,
}

ocpp_message!("RemoteStopTransaction", RemoteStopTransactionRequest => RemoteStopTransactionResponse);

// ── Reset ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct ResetRequest {
    #[serde(rename = "type")]
    pub kind: ResetType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct ResetResponse {
    pub status: ResetStatus,
}

ocpp_message!("Reset", ResetRequest => ResetResponse);

// ── ChangeAvailability ─────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ChangeAvailabilityRequest {
    #[validate(range(min = 0))]
    pub connector_id: i32,
    #[serde(rename = "type")]
    pub kind: AvailabilityType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct ChangeAvailabilityResponse {
    pub status: AvailabilityStatus,
}

ocpp_message!("ChangeAvailability", ChangeAvailabilityRequest => ChangeAvailabilityResponse);

// ── GetConfiguration ───────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
pub struct GetConfigurationRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct GetConfigurationResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(nested)]
    pub configuration_key: Option<Vec<KeyValue>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unknown_key: Option<Vec<String>>,
}

ocpp_message!("GetConfiguration", GetConfigurationRequest => GetConfigurationResponse);

// ── ChangeConfiguration ────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct ChangeConfigurationRequest {
    #[validate(length(min = 1, max = 50))]
    pub key: String,
    #[validate(length(max = 500))]
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct ChangeConfigurationResponse {
    pub status: ConfigurationStatus,
}

ocpp_message!("ChangeConfiguration", ChangeConfigurationRequest => ChangeConfigurationResponse);

// ── TriggerMessage ─────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct TriggerMessageRequest {
    pub requested_message: MessageTrigger,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 1))]
    pub connector_id: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct TriggerMessageResponse {
    pub status: TriggerMessageStatus,
}

ocpp_message!("TriggerMessage", TriggerMessageRequest => TriggerMessageResponse);

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reset_type_field_is_renamed() {
        let req: ResetRequest = serde_json::from_value(json!({"type": "Hard"})).unwrap();
        assert_eq!(req.kind, ResetType::Hard);
    }

    #[test]
    fn remote_start_connector_must_be_positive() {
        let req = RemoteStartTransactionRequest {
            connector_id: Some(0),
            id_tag: "ABC".into(),
        };
        assert!(req.validate().is_err());
    }
}
