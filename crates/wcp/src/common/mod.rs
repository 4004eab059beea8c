pub mod telemetry;

pub use telemetry::TelemetryGuard;
pub use telemetry::init_tracing;
