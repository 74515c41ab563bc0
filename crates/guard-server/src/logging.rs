use std::{collections::VecDeque, sync::Arc};

use tokio::sync::broadcast;

/// Lines of log history replayed to new `/api/logs` subscribers.
pub(crate) const LOG_RING_CAPACITY: usize = 500;

/// Mirrors log events as JSON lines into a ring buffer and a broadcast
/// channel for the SSE log stream.
pub(crate) struct BroadcastLayer {
    pub tx: broadcast::Sender<String>,
    pub ring: Arc<std::sync::Mutex<VecDeque<String>>>,
}

/// Collects the message plus any `run_id` / `stage` fields.
#[derive(Default)]
struct EventVisitor {
    message: String,
    run_id: Option<String>,
    stage: Option<String>,
}

impl EventVisitor {
    fn set(&mut self, name: &str, value: String) {
        match name {
            "message" => self.message = value,
            "run_id" => self.run_id = Some(value),
            "stage" => self.stage = Some(value),
            _ => {}
        }
    }
}

impl tracing::field::Visit for EventVisitor {
    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.set(field.name(), value.to_string());
    }

    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        let mut text = format!("{value:?}");
        // Strip surrounding quotes added by Debug on &str
        if text.len() >= 2 && text.starts_with('"') && text.ends_with('"') {
            text = text[1..text.len() - 1].to_string();
        }
        self.set(field.name(), text);
    }
}

/// Dashboard category for a log target.
fn category(target: &str) -> &'static str {
    if target.contains("pipeline") || target.contains("stages") || target.contains("resolution") {
        "pipeline"
    } else if target.starts_with("guard_agent") {
        "backend"
    } else {
        "system"
    }
}

impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for BroadcastLayer {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        let level = match *event.metadata().level() {
            tracing::Level::ERROR => "err",
            tracing::Level::WARN => "warn",
            tracing::Level::INFO => "info",
            tracing::Level::DEBUG => "debug",
            tracing::Level::TRACE => return,
        };

        let mut visitor = EventVisitor::default();
        event.record(&mut visitor);

        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        let json = serde_json::json!({
            "ts": ts,
            "level": level,
            "message": visitor.message,
            "category": category(event.metadata().target()),
            "run_id": visitor.run_id,
            "stage": visitor.stage,
        })
        .to_string();

        let _ = self.tx.send(json.clone());
        if let Ok(mut ring) = self.ring.lock() {
            ring.push_back(json);
            if ring.len() > LOG_RING_CAPACITY {
                ring.pop_front();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tracing_subscriber::prelude::*;

    use super::*;

    #[test]
    fn events_land_in_ring_and_channel() {
        let (tx, mut rx) = broadcast::channel(16);
        let ring = Arc::new(std::sync::Mutex::new(VecDeque::new()));
        let layer = BroadcastLayer { tx, ring: Arc::clone(&ring) };
        let subscriber = tracing_subscriber::registry().with(layer);

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(target: "guard_core::pipeline", run_id = "run-1", stage = "audit", "stage finished");
            tracing::trace!("dropped");
        });

        let line = rx.try_recv().unwrap();
        let v: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(v["message"], "stage finished");
        assert_eq!(v["category"], "pipeline");
        assert_eq!(v["run_id"], "run-1");
        assert_eq!(v["stage"], "audit");
        assert_eq!(ring.lock().unwrap().len(), 1);
    }

    #[test]
    fn categories_follow_targets() {
        assert_eq!(category("guard_agent::anthropic"), "backend");
        assert_eq!(category("guard_core::stages::audit"), "pipeline");
        assert_eq!(category("guard_server"), "system");
    }
}
