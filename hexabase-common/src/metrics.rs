use prometheus::{HistogramVec, IntCounterVec, Registry};
use std::sync::OnceLock;
use std::time::Instant;
use tracing::Span;

/// Process-wide metric registry, created once in the binary's composition
/// root and handed to every service that wants to record something —
/// matches the teacher's `prometheus::Registry` threaded through
/// `CloudService`.
pub static TASK_DURATION: OnceLock<HistogramVec> = OnceLock::new();
pub static TASK_OUTCOME: OnceLock<IntCounterVec> = OnceLock::new();

pub fn register_task_metrics(registry: &Registry) {
    let duration = HistogramVec::new(
        prometheus::HistogramOpts::new(
            "hexabase_task_duration_seconds",
            "Duration of task engine executions by kind and outcome",
        ),
        &["kind", "outcome"],
    )
    .expect("valid histogram opts");
    let outcome = IntCounterVec::new(
        prometheus::Opts::new(
            "hexabase_task_outcome_total",
            "Count of task outcomes by kind and outcome",
        ),
        &["kind", "outcome"],
    )
    .expect("valid counter opts");

    registry
        .register(Box::new(duration.clone()))
        .expect("register task duration histogram");
    registry
        .register(Box::new(outcome.clone()))
        .expect("register task outcome counter");

    let _ = TASK_DURATION.set(duration);
    let _ = TASK_OUTCOME.set(outcome);
}

/// A single operation's timing/tracing handle, matching the teacher's
/// `recorded_http_api_request!` idiom (`cloud_service::api::account`) but
/// generalized to any named operation (task stage, service call).
pub struct OperationRecord {
    pub span: Span,
    kind: String,
    start: Instant,
}

impl OperationRecord {
    pub fn start(operation: &str, kind: impl Into<String>) -> Self {
        let kind = kind.into();
        let span = tracing::info_span!("operation", operation = %operation, kind = %kind);
        Self {
            span,
            kind,
            start: Instant::now(),
        }
    }

    pub fn finish<T, E>(self, result: Result<T, E>) -> Result<T, E> {
        let outcome = if result.is_ok() { "success" } else { "failure" };
        if let Some(hist) = TASK_DURATION.get() {
            hist.with_label_values(&[&self.kind, outcome])
                .observe(self.start.elapsed().as_secs_f64());
        }
        if let Some(counter) = TASK_OUTCOME.get() {
            counter.with_label_values(&[&self.kind, outcome]).inc();
        }
        result
    }
}

#[macro_export]
macro_rules! recorded_task {
    ($kind:expr) => {
        $crate::metrics::OperationRecord::start(stringify!($kind), $kind)
    };
}
