//! Record of one paused exchange.

use serde::Serialize;
use serde_json::Value;

use crate::rules::InterceptStage;

/// Exactly one terminal disposition is applied per paused request. The claim
/// is taken before the terminal CDP call goes out, so racing resolvers (tool
/// calls, the delay task, the watchdog) collapse to a single winner.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    Pending,
    Resumed,
    Modified,
    Failed,
    Mocked,
    TimedOut,
}

#[derive(Clone, Debug, Serialize)]
pub struct PausedRequest {
    pub request_id: String,
    pub network_id: Option<String>,
    pub url: String,
    pub method: String,
    pub headers: Vec<(String, String)>,
    pub post_data: Option<String>,
    pub stage: InterceptStage,
    pub resource_type: Option<String>,
    pub response_status: Option<i64>,
    pub response_headers: Vec<(String, String)>,
    pub paused_at_ms: u64,
    pub rule_id: Option<String>,
    pub disposition: Disposition,
    pub warning: Option<String>,
}

impl PausedRequest {
    /// Parse a `Fetch.requestPaused` payload. Returns `None` when the payload
    /// lacks the request id (nothing can be resumed without it).
    pub fn from_event(params: &Value, now_ms: u64) -> Option<Self> {
        let request_id = params.get("requestId")?.as_str()?.to_string();
        let request = params.get("request").cloned().unwrap_or(Value::Null);
        let response_status = params.get("responseStatusCode").and_then(|v| v.as_i64());
        let has_response = response_status.is_some()
            || params.get("responseErrorReason").is_some()
            || params.get("responseHeaders").is_some();

        Some(Self {
            request_id,
            network_id: params
                .get("networkId")
                .and_then(|v| v.as_str())
                .map(String::from),
            url: request
                .get("url")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            method: request
                .get("method")
                .and_then(|v| v.as_str())
                .unwrap_or("GET")
                .to_string(),
            headers: header_map_to_list(request.get("headers")),
            post_data: request
                .get("postData")
                .and_then(|v| v.as_str())
                .map(String::from),
            stage: if has_response {
                InterceptStage::Response
            } else {
                InterceptStage::Request
            },
            resource_type: params
                .get("resourceType")
                .and_then(|v| v.as_str())
                .map(String::from),
            response_status,
            response_headers: header_list_from_value(params.get("responseHeaders")),
            paused_at_ms: now_ms,
            rule_id: None,
            disposition: Disposition::Pending,
            warning: None,
        })
    }

    /// Claim the terminal disposition. True exactly once per request.
    pub fn claim(&mut self, disposition: Disposition) -> bool {
        if self.disposition != Disposition::Pending {
            return false;
        }
        self.disposition = disposition;
        true
    }

    pub fn is_pending(&self) -> bool {
        self.disposition == Disposition::Pending
    }
}

/// `Request.headers` is an object; flatten to a name/value list.
pub fn header_map_to_list(headers: Option<&Value>) -> Vec<(String, String)> {
    headers
        .and_then(|v| v.as_object())
        .map(|map| {
            map.iter()
                .map(|(k, v)| (k.clone(), v.as_str().unwrap_or_default().to_string()))
                .collect()
        })
        .unwrap_or_default()
}

/// `Fetch.HeaderEntry` arrays come as `[{name, value}]`.
pub fn header_list_from_value(headers: Option<&Value>) -> Vec<(String, String)> {
    headers
        .and_then(|v| v.as_array())
        .map(|list| {
            list.iter()
                .filter_map(|entry| {
                    Some((
                        entry.get("name")?.as_str()?.to_string(),
                        entry.get("value")?.as_str()?.to_string(),
                    ))
                })
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_stage_pause_parses() {
        let params = json!({
            "requestId": "interception-1",
            "request": {
                "url": "https://example.com/api",
                "method": "POST",
                "headers": { "Cookie": "auth=1" },
                "postData": "a=b"
            },
            "resourceType": "XHR"
        });
        let paused = PausedRequest::from_event(&params, 7).unwrap();
        assert_eq!(paused.stage, InterceptStage::Request);
        assert_eq!(paused.method, "POST");
        assert_eq!(paused.headers, vec![("Cookie".to_string(), "auth=1".to_string())]);
        assert!(paused.is_pending());
    }

    #[test]
    fn response_stage_is_detected_from_status() {
        let params = json!({
            "requestId": "interception-2",
            "request": { "url": "https://example.com/", "method": "GET", "headers": {} },
            "responseStatusCode": 200,
            "responseHeaders": [ { "name": "Content-Type", "value": "text/html" } ]
        });
        let paused = PausedRequest::from_event(&params, 7).unwrap();
        assert_eq!(paused.stage, InterceptStage::Response);
        assert_eq!(paused.response_status, Some(200));
        assert_eq!(
            paused.response_headers,
            vec![("Content-Type".to_string(), "text/html".to_string())]
        );
    }

    #[test]
    fn claim_succeeds_exactly_once() {
        let params = json!({
            "requestId": "interception-3",
            "request": { "url": "https://x.test/", "method": "GET", "headers": {} }
        });
        let mut paused = PausedRequest::from_event(&params, 0).unwrap();
        assert!(paused.claim(Disposition::Resumed));
        assert!(!paused.claim(Disposition::Failed));
        assert!(!paused.claim(Disposition::TimedOut));
        assert_eq!(paused.disposition, Disposition::Resumed);
    }

    #[test]
    fn missing_request_id_is_rejected() {
        assert!(PausedRequest::from_event(&json!({}), 0).is_none());
    }
}
