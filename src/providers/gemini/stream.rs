use futures::StreamExt;
use tokio::sync::mpsc;

use super::models::GeminiResponse;
use crate::providers::types::StreamEvent;

/// Incremental SSE decoder that yields the `data:` payload of each complete
/// event. Multi-byte characters split across chunks are held back until the
/// rest arrives.
#[derive(Default)]
pub struct SseDecoder {
    byte_buf: Vec<u8>,
    buffer: String,
}

impl SseDecoder {
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.byte_buf.extend_from_slice(bytes);

        let mut decoded = String::new();
        loop {
            match std::str::from_utf8(&self.byte_buf) {
                Ok(s) => {
                    decoded.push_str(s);
                    self.byte_buf.clear();
                    break;
                }
                Err(e) => {
                    let valid_up_to = e.valid_up_to();
                    decoded.push_str(&String::from_utf8_lossy(&self.byte_buf[..valid_up_to]));
                    match e.error_len() {
                        // Bytes that can never become valid are replaced, not kept
                        Some(invalid) => {
                            decoded.push(char::REPLACEMENT_CHARACTER);
                            self.byte_buf.drain(..valid_up_to + invalid);
                        }
                        // Incomplete sequence at the end: wait for the next chunk
                        None => {
                            self.byte_buf.drain(..valid_up_to);
                            break;
                        }
                    }
                }
            }
        }

        // Gemini uses \r\n line endings
        self.buffer.push_str(&decoded.replace("\r\n", "\n"));

        let mut payloads = Vec::new();
        while let Some(event_end) = self.buffer.find("\n\n") {
            let event_text: String = self.buffer.drain(..event_end + 2).collect();

            let mut data = String::new();
            for line in event_text.lines() {
                if let Some(payload) = line.strip_prefix("data: ") {
                    data.push_str(payload);
                } else if let Some(payload) = line.strip_prefix("data:") {
                    data.push_str(payload);
                }
            }

            if !data.is_empty() {
                payloads.push(data);
            }
        }
        payloads
    }
}

/// Turn one SSE payload into stream events.
fn payload_events(data: &str) -> Vec<StreamEvent> {
    match serde_json::from_str::<GeminiResponse>(data) {
        Ok(response) => {
            if let Some(error) = &response.error {
                let msg = error
                    .message
                    .clone()
                    .unwrap_or_else(|| "Unknown error".to_string());
                return vec![StreamEvent::Error(msg)];
            }
            response
                .texts()
                .map(|t| StreamEvent::Token(t.to_string()))
                .collect()
        }
        Err(e) => {
            // Partial events can occur; they are not fatal.
            tracing::warn!("Failed to parse SSE data: {}", e);
            Vec::new()
        }
    }
}

pub async fn parse_sse_stream(response: reqwest::Response, tx: mpsc::Sender<StreamEvent>) {
    let mut stream = response.bytes_stream();
    let mut decoder = SseDecoder::default();

    while let Some(chunk_result) = stream.next().await {
        let bytes = match chunk_result {
            Ok(b) => b,
            Err(e) => {
                let _ = tx
                    .send(StreamEvent::Error(format!("Stream error: {}", e)))
                    .await;
                return;
            }
        };

        for data in decoder.push(&bytes) {
            for event in payload_events(&data) {
                let is_error = matches!(event, StreamEvent::Error(_));
                if tx.send(event).await.is_err() {
                    return; // receiver dropped
                }
                if is_error {
                    return;
                }
            }
        }
    }

    let _ = tx.send(StreamEvent::Done).await;
}
