//! WebSocket frame capture from `Network.webSocket*` events.

use std::collections::HashMap;

use cdp_wire::TransportEvent;
use serde::Serialize;
use serde_json::Value;

/// Frames above this size are stored truncated.
const MAX_PAYLOAD_BYTES: usize = 4096;
/// Ring capacity per target; older frames are dropped and counted.
const MAX_FRAMES: usize = 1000;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameDirection {
    Sent,
    Received,
}

#[derive(Clone, Debug, Serialize)]
pub struct WsFrame {
    pub socket_url: String,
    pub direction: FrameDirection,
    pub opcode: i64,
    pub payload: String,
    pub truncated: bool,
    pub timestamp: f64,
}

/// Per-target WebSocket log. Pure bookkeeping, fed from the capture session.
#[derive(Debug, Default)]
pub struct WsLog {
    sockets: HashMap<String, String>,
    frames: Vec<WsFrame>,
    dropped: u64,
}

impl WsLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_event(&mut self, event: &TransportEvent) {
        match event.method.as_str() {
            "Network.webSocketCreated" => {
                if let (Some(id), Some(url)) = (
                    event.params.get("requestId").and_then(Value::as_str),
                    event.params.get("url").and_then(Value::as_str),
                ) {
                    self.sockets.insert(id.to_string(), url.to_string());
                }
            }
            "Network.webSocketFrameSent" => self.push_frame(&event.params, FrameDirection::Sent),
            "Network.webSocketFrameReceived" => {
                self.push_frame(&event.params, FrameDirection::Received)
            }
            "Network.webSocketClosed" => {
                if let Some(id) = event.params.get("requestId").and_then(Value::as_str) {
                    self.sockets.remove(id);
                }
            }
            _ => {}
        }
    }

    fn push_frame(&mut self, params: &Value, direction: FrameDirection) {
        let socket_url = params
            .get("requestId")
            .and_then(Value::as_str)
            .and_then(|id| self.sockets.get(id))
            .cloned()
            .unwrap_or_default();
        let response = params.get("response").cloned().unwrap_or(Value::Null);
        let raw_payload = response
            .get("payloadData")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let truncated = raw_payload.len() > MAX_PAYLOAD_BYTES;
        let payload = if truncated {
            let mut cut = MAX_PAYLOAD_BYTES;
            while !raw_payload.is_char_boundary(cut) {
                cut -= 1;
            }
            raw_payload[..cut].to_string()
        } else {
            raw_payload.to_string()
        };

        if self.frames.len() >= MAX_FRAMES {
            self.frames.remove(0);
            self.dropped += 1;
        }
        self.frames.push(WsFrame {
            socket_url,
            direction,
            opcode: response.get("opcode").and_then(Value::as_i64).unwrap_or(1),
            payload,
            truncated,
            timestamp: params
                .get("timestamp")
                .and_then(Value::as_f64)
                .unwrap_or_default(),
        });
    }

    pub fn frames(&self) -> &[WsFrame] {
        &self.frames
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn clear(&mut self) {
        self.frames.clear();
        self.sockets.clear();
        self.dropped = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(method: &str, params: Value) -> TransportEvent {
        TransportEvent {
            method: method.to_string(),
            params,
            session_id: None,
        }
    }

    #[test]
    fn frames_carry_direction_and_socket_url() {
        let mut log = WsLog::new();
        log.on_event(&event(
            "Network.webSocketCreated",
            json!({ "requestId": "ws1", "url": "wss://feed.example.com/live" }),
        ));
        log.on_event(&event(
            "Network.webSocketFrameSent",
            json!({ "requestId": "ws1", "timestamp": 1.0, "response": { "opcode": 1, "payloadData": "ping" } }),
        ));
        log.on_event(&event(
            "Network.webSocketFrameReceived",
            json!({ "requestId": "ws1", "timestamp": 2.0, "response": { "opcode": 1, "payloadData": "pong" } }),
        ));

        let frames = log.frames();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].direction, FrameDirection::Sent);
        assert_eq!(frames[1].direction, FrameDirection::Received);
        assert_eq!(frames[0].socket_url, "wss://feed.example.com/live");
        assert_eq!(frames[1].payload, "pong");
    }

    #[test]
    fn oversized_payloads_are_truncated() {
        let mut log = WsLog::new();
        let big = "x".repeat(MAX_PAYLOAD_BYTES + 100);
        log.on_event(&event(
            "Network.webSocketFrameReceived",
            json!({ "requestId": "ws1", "response": { "opcode": 1, "payloadData": big } }),
        ));
        let frame = &log.frames()[0];
        assert!(frame.truncated);
        assert_eq!(frame.payload.len(), MAX_PAYLOAD_BYTES);
    }

    #[test]
    fn capacity_is_bounded_with_a_drop_counter() {
        let mut log = WsLog::new();
        for i in 0..(MAX_FRAMES + 5) {
            log.on_event(&event(
                "Network.webSocketFrameSent",
                json!({ "requestId": "ws1", "response": { "opcode": 1, "payloadData": format!("f{i}") } }),
            ));
        }
        assert_eq!(log.frames().len(), MAX_FRAMES);
        assert_eq!(log.dropped(), 5);
        assert_eq!(log.frames()[0].payload, "f5");
    }
}
