//! Telemetry event emission.
//!
//! Emission only — transport is a host concern. Events are plain
//! `tracing` events under the `streamcore::telemetry` target; a host
//! process attaches whatever subscriber it wants (stdout,
//! OpenTelemetry, etc.) rather than this crate owning a bespoke
//! pub-sub type.

/// Process-wide toggle for the telemetry event set. Disabled by
/// default, opt-in rather than on by default.
#[derive(Debug, Clone, Copy, Default)]
pub struct TelemetryConfig {
    pub enabled: bool,
}

impl TelemetryConfig {
    #[must_use]
    pub fn enabled() -> Self {
        Self { enabled: true }
    }
}

/// Emits `metric.value` for an arbitrary named counter/gauge.
pub fn metric_value(config: TelemetryConfig, name: &str, value: f64) {
    if config.enabled {
        tracing::info!(target: "streamcore::telemetry", metric = name, value, "metric.value");
    }
}

/// Emits `link.new` when two pads are successfully linked.
pub fn link_new(config: TelemetryConfig, from: &str, to: &str) {
    if config.enabled {
        tracing::info!(target: "streamcore::telemetry", from, to, "link.new");
    }
}

/// Emits `element.init`.
pub fn element_init(config: TelemetryConfig, name: &str) {
    if config.enabled {
        tracing::info!(target: "streamcore::telemetry", element = name, "element.init");
    }
}

/// Emits `element.terminate`.
pub fn element_terminate(config: TelemetryConfig, name: &str, reason: &str) {
    if config.enabled {
        tracing::info!(target: "streamcore::telemetry", element = name, reason, "element.terminate");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_config_is_the_default() {
        assert!(!TelemetryConfig::default().enabled);
    }
}
