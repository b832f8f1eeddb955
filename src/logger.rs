use serde_json::json;
use tokio::sync::broadcast;

/// Human-readable run output.
///
/// Every line is written to stdout, indented by the current nesting depth and
/// prefixed with the request id when the run came in over HTTP. Lines can also
/// be mirrored as JSON records into a broadcast channel so embedders (and
/// tests) can follow a run without scraping stdout.
#[derive(Clone, Default)]
pub struct Logger {
    sender: Option<broadcast::Sender<String>>,
}

impl Logger {
    pub fn new() -> Self {
        Self { sender: None }
    }

    /// Create a logger that also mirrors every line into `sender`
    pub fn with_sender(sender: broadcast::Sender<String>) -> Self {
        Self {
            sender: Some(sender),
        }
    }

    pub fn subscribe(&self) -> Option<broadcast::Receiver<String>> {
        self.sender.as_ref().map(|s| s.subscribe())
    }

    /// Format a line the way it is printed
    pub fn format_line(indent: usize, payload_id: Option<&str>, text: &str) -> String {
        let prefix = payload_id.map(|id| format!("{}: ", id)).unwrap_or_default();
        format!("{}{}{}", " ".repeat(indent), prefix, text)
    }

    /// Print a trace line for a run
    pub fn display(&self, indent: usize, payload_id: Option<&str>, text: &str) {
        let line = Self::format_line(indent, payload_id, text);
        println!("{}", line);
        self.publish("info", &line, payload_id);
    }

    /// Print a line that belongs to no particular run (startup, help output)
    pub fn banner(&self, text: &str) {
        println!("{}", text);
        self.publish("info", text, None);
    }

    pub fn error(&self, payload_id: Option<&str>, message: &str) {
        let line = Self::format_line(0, payload_id, &format!("ERROR: {}", message));
        println!("{}", line);
        self.publish("error", &line, payload_id);
    }

    fn publish(&self, level: &str, line: &str, payload_id: Option<&str>) {
        if let Some(sender) = &self.sender {
            let record = json!({
                "type": "log",
                "level": level,
                "message": line,
                "payload_id": payload_id,
                "timestamp": chrono::Utc::now().to_rfc3339()
            });
            // No subscribers is fine; the line already went to stdout.
            let _ = sender.send(record.to_string());
        }
    }
}

/// Pull the `message` field out of every record currently queued on `rx`.
pub fn drain_messages(rx: &mut broadcast::Receiver<String>) -> Vec<String> {
    let mut lines = Vec::new();
    while let Ok(raw) = rx.try_recv() {
        if let Ok(record) = serde_json::from_str::<serde_json::Value>(&raw) {
            if let Some(message) = record["message"].as_str() {
                lines.push(message.to_string());
            }
        }
    }
    lines
}
