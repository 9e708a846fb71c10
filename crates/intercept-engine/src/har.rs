//! HAR 1.2 recording from `Network.*` events.
//!
//! The recorder is pure bookkeeping: events in, a HAR `log` object out.
//! It rides the same persistent session the interception context owns and is
//! flushed and cleared by the stop operation.

use std::collections::HashMap;

use cdp_wire::TransportEvent;
use serde_json::{json, Value};

use crate::pause::header_map_to_list;

#[derive(Clone, Debug, Default)]
struct HarExchange {
    url: String,
    method: String,
    request_headers: Vec<(String, String)>,
    status: i64,
    status_text: String,
    response_headers: Vec<(String, String)>,
    mime_type: String,
    started_wall_ms: f64,
    started_monotonic: f64,
    finished_monotonic: f64,
    encoded_length: i64,
    failed: Option<String>,
}

#[derive(Debug, Default)]
pub struct HarRecorder {
    exchanges: HashMap<String, HarExchange>,
    order: Vec<String>,
}

impl HarRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn on_event(&mut self, event: &TransportEvent) {
        match event.method.as_str() {
            "Network.requestWillBeSent" => self.on_request(&event.params),
            "Network.responseReceived" => self.on_response(&event.params),
            "Network.loadingFinished" => self.on_finished(&event.params),
            "Network.loadingFailed" => self.on_failed(&event.params),
            _ => {}
        }
    }

    fn on_request(&mut self, params: &Value) {
        let Some(id) = params.get("requestId").and_then(|v| v.as_str()) else {
            return;
        };
        let request = params.get("request").cloned().unwrap_or(Value::Null);
        let exchange = HarExchange {
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
            request_headers: header_map_to_list(request.get("headers")),
            started_wall_ms: params
                .get("wallTime")
                .and_then(|v| v.as_f64())
                .map(|s| s * 1_000.0)
                .unwrap_or_default(),
            started_monotonic: params
                .get("timestamp")
                .and_then(|v| v.as_f64())
                .unwrap_or_default(),
            ..Default::default()
        };
        if !self.exchanges.contains_key(id) {
            self.order.push(id.to_string());
        }
        self.exchanges.insert(id.to_string(), exchange);
    }

    fn on_response(&mut self, params: &Value) {
        let Some(id) = params.get("requestId").and_then(|v| v.as_str()) else {
            return;
        };
        let Some(exchange) = self.exchanges.get_mut(id) else {
            return;
        };
        let response = params.get("response").cloned().unwrap_or(Value::Null);
        exchange.status = response.get("status").and_then(|v| v.as_i64()).unwrap_or(0);
        exchange.status_text = response
            .get("statusText")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        exchange.response_headers = header_map_to_list(response.get("headers"));
        exchange.mime_type = response
            .get("mimeType")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
    }

    fn on_finished(&mut self, params: &Value) {
        let Some(id) = params.get("requestId").and_then(|v| v.as_str()) else {
            return;
        };
        if let Some(exchange) = self.exchanges.get_mut(id) {
            exchange.finished_monotonic = params
                .get("timestamp")
                .and_then(|v| v.as_f64())
                .unwrap_or_default();
            exchange.encoded_length = params
                .get("encodedDataLength")
                .and_then(|v| v.as_f64())
                .unwrap_or_default() as i64;
        }
    }

    fn on_failed(&mut self, params: &Value) {
        let Some(id) = params.get("requestId").and_then(|v| v.as_str()) else {
            return;
        };
        if let Some(exchange) = self.exchanges.get_mut(id) {
            exchange.failed = Some(
                params
                    .get("errorText")
                    .and_then(|v| v.as_str())
                    .unwrap_or("failed")
                    .to_string(),
            );
        }
    }

    /// Render the accumulated exchanges as a HAR 1.2 `log` value without
    /// clearing them.
    pub fn snapshot(&self, creator: &str, version: &str) -> Value {
        let entries: Vec<Value> = self
            .order
            .iter()
            .filter_map(|id| self.exchanges.get(id))
            .map(render_entry)
            .collect();

        json!({
            "log": {
                "version": "1.2",
                "creator": { "name": creator, "version": version },
                "pages": [],
                "entries": entries,
            }
        })
    }

    /// Drain: snapshot then clear.
    pub fn take(&mut self, creator: &str, version: &str) -> Value {
        let har = self.snapshot(creator, version);
        self.exchanges.clear();
        self.order.clear();
        har
    }
}

fn render_entry(exchange: &HarExchange) -> Value {
    let time_ms = if exchange.finished_monotonic > exchange.started_monotonic {
        (exchange.finished_monotonic - exchange.started_monotonic) * 1_000.0
    } else {
        0.0
    };
    json!({
        "startedDateTime": iso8601_from_epoch_ms(exchange.started_wall_ms),
        "time": time_ms,
        "request": {
            "method": exchange.method,
            "url": exchange.url,
            "httpVersion": "HTTP/1.1",
            "headers": render_headers(&exchange.request_headers),
            "queryString": [],
            "cookies": [],
            "headersSize": -1,
            "bodySize": -1,
        },
        "response": {
            "status": exchange.status,
            "statusText": exchange.status_text,
            "httpVersion": "HTTP/1.1",
            "headers": render_headers(&exchange.response_headers),
            "cookies": [],
            "content": {
                "size": exchange.encoded_length,
                "mimeType": exchange.mime_type,
            },
            "redirectURL": "",
            "headersSize": -1,
            "bodySize": exchange.encoded_length,
        },
        "cache": {},
        "timings": { "send": 0, "wait": time_ms, "receive": 0 },
        "comment": exchange.failed.clone().unwrap_or_default(),
    })
}

fn render_headers(headers: &[(String, String)]) -> Vec<Value> {
    headers
        .iter()
        .map(|(name, value)| json!({ "name": name, "value": value }))
        .collect()
}

/// UTC ISO-8601 from epoch milliseconds, without a calendar dependency.
/// Uses the civil-from-days algorithm.
fn iso8601_from_epoch_ms(epoch_ms: f64) -> String {
    let total_ms = epoch_ms.max(0.0) as u64;
    let secs = total_ms / 1_000;
    let millis = total_ms % 1_000;
    let days = (secs / 86_400) as i64;
    let rem = secs % 86_400;
    let (hour, minute, second) = (rem / 3_600, (rem % 3_600) / 60, rem % 60);

    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1_460 + doe / 36_524 - doe / 146_096) / 365;
    let year = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = if month <= 2 { year + 1 } else { year };

    format!("{year:04}-{month:02}-{day:02}T{hour:02}:{minute:02}:{second:02}.{millis:03}Z")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(method: &str, params: Value) -> TransportEvent {
        TransportEvent {
            method: method.to_string(),
            params,
            session_id: None,
        }
    }

    #[test]
    fn full_exchange_produces_one_entry() {
        let mut recorder = HarRecorder::new();
        recorder.on_event(&event(
            "Network.requestWillBeSent",
            json!({
                "requestId": "r1",
                "request": { "url": "https://example.com/api", "method": "GET", "headers": { "Accept": "*/*" } },
                "wallTime": 1_700_000_000.0,
                "timestamp": 100.0,
            }),
        ));
        recorder.on_event(&event(
            "Network.responseReceived",
            json!({
                "requestId": "r1",
                "response": { "status": 200, "statusText": "OK", "headers": { "Content-Type": "application/json" }, "mimeType": "application/json" }
            }),
        ));
        recorder.on_event(&event(
            "Network.loadingFinished",
            json!({ "requestId": "r1", "timestamp": 100.25, "encodedDataLength": 512.0 }),
        ));

        let har = recorder.take("chromehand", "0.3.0");
        let entries = har["log"]["entries"].as_array().unwrap();
        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!(entry["request"]["url"], "https://example.com/api");
        assert_eq!(entry["response"]["status"], 200);
        assert_eq!(entry["response"]["bodySize"], 512);
        assert!((entry["time"].as_f64().unwrap() - 250.0).abs() < 1.0);
        assert_eq!(har["log"]["version"], "1.2");

        // drained
        assert!(recorder.is_empty());
    }

    #[test]
    fn unmatched_response_events_are_ignored() {
        let mut recorder = HarRecorder::new();
        recorder.on_event(&event(
            "Network.responseReceived",
            json!({ "requestId": "ghost", "response": { "status": 200 } }),
        ));
        assert!(recorder.is_empty());
    }

    #[test]
    fn epoch_formatting_matches_known_date() {
        // 2023-11-14T22:13:20Z
        assert_eq!(
            iso8601_from_epoch_ms(1_700_000_000_000.0),
            "2023-11-14T22:13:20.000Z"
        );
        assert_eq!(iso8601_from_epoch_ms(0.0), "1970-01-01T00:00:00.000Z");
    }
}
