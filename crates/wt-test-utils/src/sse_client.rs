use std::collections::VecDeque;
use std::time::Duration;
use wt_protocol::StreamMessage;

/// Minimal event-stream client for `/events/{owner}`.
///
/// Buffers raw chunks and yields one parsed [`StreamMessage`] per
/// `data: <json>\n\n` frame.
pub struct SseClient {
    response: reqwest::Response,
    buffer: String,
    pending: VecDeque<StreamMessage>,
}

impl SseClient {
    /// Open a stream with a bearer token.  Fails unless the server answers 200.
    pub async fn connect(url: &str, token: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let response = reqwest::Client::new()
            .get(url)
            .header("Authorization", format!("Bearer {token}"))
            .send()
            .await?;
        if response.status() != reqwest::StatusCode::OK {
            return Err(format!("unexpected status {}", response.status()).into());
        }
        Ok(Self {
            response,
            buffer: String::new(),
            pending: VecDeque::new(),
        })
    }

    pub async fn recv_message(&mut self) -> Result<StreamMessage, Box<dyn std::error::Error>> {
        loop {
            if let Some(msg) = self.pending.pop_front() {
                return Ok(msg);
            }
            match self.response.chunk().await? {
                Some(chunk) => {
                    self.buffer.push_str(&String::from_utf8_lossy(&chunk));
                    for data in drain_frames(&mut self.buffer) {
                        self.pending.push_back(serde_json::from_str(&data)?);
                    }
                }
                None => return Err("event stream ended".into()),
            }
        }
    }

    /// Like [`recv_message`](Self::recv_message) but returns `Ok(None)` when
    /// nothing arrives within `timeout`.
    pub async fn recv_message_timeout(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<StreamMessage>, Box<dyn std::error::Error>> {
        match tokio::time::timeout(timeout, self.recv_message()).await {
            Ok(result) => result.map(Some),
            Err(_) => Ok(None),
        }
    }

    /// Receive messages until one of the given `type` arrives.
    pub async fn recv_kind(
        &mut self,
        kind: &str,
        timeout: Duration,
    ) -> Result<StreamMessage, Box<dyn std::error::Error>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            match self.recv_message_timeout(remaining).await? {
                Some(msg) if msg.kind() == kind => return Ok(msg),
                Some(_) => continue,
                None => return Err(format!("timed out waiting for {kind}").into()),
            }
        }
    }
}

/// Remove every complete frame from `buffer` and return the data payloads.
///
/// Multi-line `data:` fields are joined with `\n`; comment lines and frames
/// without data are skipped.  An incomplete trailing frame stays buffered.
pub fn drain_frames(buffer: &mut String) -> Vec<String> {
    let mut frames = Vec::new();
    while let Some(end) = buffer.find("\n\n") {
        let block: String = buffer.drain(..end + 2).collect();
        let data: Vec<&str> = block
            .lines()
            .filter_map(|line| {
                line.strip_prefix("data: ")
                    .or_else(|| line.strip_prefix("data:"))
            })
            .collect();
        if !data.is_empty() {
            frames.push(data.join("\n"));
        }
    }
    frames
}
