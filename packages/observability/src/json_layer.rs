//! JSON-lines layer for the relay log file.
//!
//! One object per event. `error_class` is lifted out of the event fields to
//! the top level so failures can be filtered with a plain `jq 'select(.error_class)'`.

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use std::io::Write;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

/// Field name promoted to the top level of each line.
const ERROR_CLASS_FIELD: &str = "error_class";

/// One serialized log line.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub ts: String,
    pub level: String,
    pub service: String,
    pub pid: u32,
    pub target: String,
    pub msg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_class: Option<String>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub fields: Map<String, Value>,
    /// Innermost span name, if the event fired inside one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span: Option<String>,
    /// `file:line` of the callsite.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub at: Option<String>,
}

#[derive(Default)]
struct FieldCollector {
    msg: Option<String>,
    error_class: Option<String>,
    fields: Map<String, Value>,
}

impl FieldCollector {
    fn put(&mut self, field: &Field, value: Value) {
        match field.name() {
            "message" => self.msg = Some(as_text(value)),
            ERROR_CLASS_FIELD => self.error_class = Some(as_text(value)),
            name => {
                self.fields.insert(name.to_string(), value);
            }
        }
    }
}

fn as_text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

impl Visit for FieldCollector {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.put(field, Value::String(format!("{value:?}")));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.put(field, Value::String(value.to_string()));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.put(field, Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.put(field, Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.put(field, Value::Bool(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        let value = serde_json::Number::from_f64(value)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(value.to_string()));
        self.put(field, value);
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.put(field, Value::String(value.to_string()));
    }
}

/// Layer writing one [`LogEntry`] per event to `make_writer`.
pub struct JsonLayer<W> {
    service: String,
    pid: u32,
    make_writer: W,
}

impl<W> JsonLayer<W> {
    pub fn new(service: String, make_writer: W) -> Self {
        Self {
            service,
            pid: std::process::id(),
            make_writer,
        }
    }

    fn entry<S>(&self, event: &Event<'_>, ctx: &Context<'_, S>) -> LogEntry
    where
        S: Subscriber + for<'a> LookupSpan<'a>,
    {
        let mut collector = FieldCollector::default();
        event.record(&mut collector);
        let meta = event.metadata();

        LogEntry {
            ts: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            level: meta.level().to_string(),
            service: self.service.clone(),
            pid: self.pid,
            target: meta.target().to_string(),
            msg: collector.msg.unwrap_or_default(),
            error_class: collector.error_class,
            fields: collector.fields,
            span: ctx.event_span(event).map(|span| span.name().to_string()),
            at: meta
                .file()
                .zip(meta.line())
                .map(|(file, line)| format!("{file}:{line}")),
        }
    }
}

impl<S, W> Layer<S> for JsonLayer<W>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'writer> MakeWriter<'writer> + 'static,
{
    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let entry = self.entry(event, &ctx);
        let Ok(line) = serde_json::to_string(&entry) else {
            return;
        };
        let mut writer = self.make_writer.make_writer();
        let _ = writeln!(writer, "{line}");
    }
}
