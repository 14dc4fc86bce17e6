use serde_json::Value;

use crate::envelope::TelemetryEnvelope;

/// Stamp server-observed facts onto a validated envelope.
///
/// `receivedAt` and `clientV` are overwritten unconditionally and `meta.clientIp`
/// is set to the resolved source identity. An empty version token is stored as null.
pub fn enrich(
    mut envelope: TelemetryEnvelope,
    received_at: i64,
    client_version: Option<&str>,
    client_ip: &str,
) -> TelemetryEnvelope {
    envelope.received_at = Some(received_at);
    envelope.client_v = client_version
        .filter(|v| !v.is_empty())
        .map(str::to_string);
    envelope
        .meta
        .get_or_insert_with(Default::default)
        .insert("clientIp".to_string(), Value::String(client_ip.to_string()));
    envelope
}
