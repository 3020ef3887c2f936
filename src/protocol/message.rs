//! Wire messages
//!
//! Outbound: the identity report (interface name to addresses) and
//! `{"value": ...}` keepalive frames. Inbound: JSON objects whose `value`
//! string field is the only part that matters.

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::identity::InterfaceIdentity;

#[derive(Debug, Serialize)]
struct InterfaceReport {
    mac: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    ipv4: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ipv6: Option<String>,
}

/// Serialize the identity report
pub fn identity_report(interfaces: &[InterfaceIdentity]) -> String {
    let report: BTreeMap<&str, InterfaceReport> = interfaces
        .iter()
        .map(|iface| {
            (
                iface.name.as_str(),
                InterfaceReport {
                    mac: iface.mac_string(),
                    ipv4: iface.ipv4.map(|addr| addr.to_string()),
                    ipv6: iface.ipv6.map(|addr| addr.to_string()),
                },
            )
        })
        .collect();

    // A map of plain strings always serializes
    serde_json::to_string(&report).unwrap_or_else(|_| "{}".to_string())
}

/// `{"value": <value>}`
pub fn value_frame(value: &str) -> String {
    serde_json::json!({ "value": value }).to_string()
}

/// The `value` string of an inbound message.
///
/// Malformed JSON, non-object documents and a missing or non-string
/// `value` all yield `None`.
pub fn extract_value(text: &str) -> Option<String> {
    match serde_json::from_str::<Value>(text).ok()? {
        Value::Object(mut fields) => match fields.remove("value")? {
            Value::String(value) => Some(value),
            _ => None,
        },
        _ => None,
    }
}
