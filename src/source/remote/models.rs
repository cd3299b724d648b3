use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Serialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
struct GetWidgetParams {
    widget_id: String,
}

/// JSON-RPC 2.0 request resolving a feed identifier into its streaming endpoint.
#[derive(Serialize, Debug, PartialEq, Eq)]
pub(super) struct EndpointLookupRequest {
    id: Uuid,
    jsonrpc: &'static str,
    method: &'static str,
    params: GetWidgetParams,
}

impl EndpointLookupRequest {
    pub fn new(feed_id: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            jsonrpc: "2.0",
            method: "getWidget",
            params: GetWidgetParams {
                widget_id: feed_id.to_string(),
            },
        }
    }
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct WidgetInfo {
    ramiel_url: Option<String>,
}

#[derive(Deserialize, Debug)]
pub(super) struct EndpointLookupResponse {
    result: Option<WidgetInfo>,
    error: Option<Value>,
}

impl EndpointLookupResponse {
    /// Returns the RPC error or the endpoint URL. A missing URL yields an empty string.
    pub fn into_endpoint(self) -> Result<String, Value> {
        if let Some(error) = self.error {
            return Err(error);
        }

        Ok(self
            .result
            .and_then(|info| info.ramiel_url)
            .unwrap_or_default())
    }
}

#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum FeedPayload {
    Reading {
        #[serde(rename = "heartRate")]
        heart_rate: f64,
    },
    Bare(f64),
}

#[derive(Deserialize, Debug)]
struct FeedFrame {
    data: FeedPayload,
}

/// Extracts the heart rate from a feed text frame shaped
/// `{"data": {"heartRate": n}}` or `{"data": n}`.
pub(crate) fn parse_feed_frame(text: &str) -> serde_json::Result<f64> {
    let frame: FeedFrame = serde_json::from_str(text)?;

    let bpm = match frame.data {
        FeedPayload::Reading { heart_rate } => heart_rate,
        FeedPayload::Bare(bpm) => bpm,
    };

    Ok(bpm)
}
