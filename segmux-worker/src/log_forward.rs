//! Tracing layer that mirrors log events to the host as `workerLog`.

use std::fmt::{self, Write as _};

use tracing::field::{Field, Visit};
use tracing::{Event as TracingEvent, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

use crate::protocol::{Event, LogData, Outbox};

pub struct ForwardLayer {
    outbox: Outbox,
}

impl ForwardLayer {
    pub fn new(outbox: Outbox) -> Self {
        Self { outbox }
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}

fn log_type(level: Level) -> &'static str {
    match level {
        Level::ERROR => "error",
        Level::WARN => "warn",
        _ => "log",
    }
}

impl<S: Subscriber> Layer<S> for ForwardLayer {
    fn on_event(&self, event: &TracingEvent<'_>, _ctx: Context<'_, S>) {
        let level = *event.metadata().level();
        if level > Level::INFO {
            return;
        }
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        let data = LogData {
            log_type: log_type(level),
            message: format!("[{}] {}{}", event.metadata().target(), visitor.message, visitor.fields),
        };
        // A closed stdout is noticed by the command loop.
        let _ = self.outbox.send(&Event::WorkerLog { data });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::tests::SharedBuf;
    use tracing_subscriber::layer::SubscriberExt;

    #[test]
    fn test_info_and_above_forwarded() {
        let buf = SharedBuf::default();
        let subscriber = tracing_subscriber::registry().with(ForwardLayer::new(Outbox::new(buf.clone())));
        tracing::subscriber::with_default(subscriber, || {
            tracing::debug!("not forwarded");
            tracing::info!(sn = 4, "segment parsed");
            tracing::warn!("Injecting 2 audio frames");
        });

        let events = buf.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0]["event"], "workerLog");
        assert_eq!(events[0]["data"]["logType"], "log");
        let message = events[0]["data"]["message"].as_str().unwrap();
        assert!(message.ends_with("segment parsed sn=4"));
        assert_eq!(events[1]["data"]["logType"], "warn");
    }
}
