use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Registry, TextEncoder};

/// Process-wide counters and gauges exposed at `GET /metrics` (spec §6).
///
/// Unauthenticated by design (spec.md's external-interfaces table); the router never
/// applies the bearer-token extractor to this route.
pub struct Metrics {
    registry: Registry,
    pub scans_intake_total: IntCounter,
    pub scans_duplicate_total: IntCounter,
    pub scans_dispatched_total: IntCounter,
    pub scans_submitted_total: IntCounter,
    pub scans_failed_total: IntCounter,
    pub scans_reclaimed_total: IntCounter,
    pub reports_sent_total: IntCounter,
    pub reports_failed_total: IntCounter,
    pub scans_in_flight: IntGauge,
    pub scans_dispatch_to_finish_seconds: Histogram,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let scans_intake_total =
            IntCounter::new("scanhub_scans_intake_total", "Scans accepted by intake")?;
        let scans_duplicate_total = IntCounter::new(
            "scanhub_scans_duplicate_total",
            "Intake calls rejected as duplicate (name, version)",
        )?;
        let scans_dispatched_total = IntCounter::new(
            "scanhub_scans_dispatched_total",
            "Scans handed out by dispatch, including reclaims",
        )?;
        let scans_submitted_total =
            IntCounter::new("scanhub_scans_submitted_total", "Scans transitioned to FINISHED")?;
        let scans_failed_total =
            IntCounter::new("scanhub_scans_failed_total", "Scans transitioned to FAILED")?;
        let scans_reclaimed_total = IntCounter::new(
            "scanhub_scans_reclaimed_total",
            "PENDING scans reclaimed after lease expiry",
        )?;
        let reports_sent_total = IntCounter::new(
            "scanhub_reports_sent_total",
            "Reports successfully forwarded to the reporter service",
        )?;
        let reports_failed_total = IntCounter::new(
            "scanhub_reports_failed_total",
            "Reports that failed to forward and were rolled back",
        )?;
        let scans_in_flight = IntGauge::new(
            "scanhub_scans_in_flight",
            "Scans currently QUEUED or PENDING",
        )?;
        let scans_dispatch_to_finish_seconds = Histogram::with_opts(HistogramOpts::new(
            "scanhub_scans_dispatch_to_finish_seconds",
            "Time from a scan's most recent dispatch to its terminal (FINISHED or FAILED) transition",
        ))?;

        registry.register(Box::new(scans_intake_total.clone()))?;
        registry.register(Box::new(scans_duplicate_total.clone()))?;
        registry.register(Box::new(scans_dispatched_total.clone()))?;
        registry.register(Box::new(scans_submitted_total.clone()))?;
        registry.register(Box::new(scans_failed_total.clone()))?;
        registry.register(Box::new(scans_reclaimed_total.clone()))?;
        registry.register(Box::new(reports_sent_total.clone()))?;
        registry.register(Box::new(reports_failed_total.clone()))?;
        registry.register(Box::new(scans_in_flight.clone()))?;
        registry.register(Box::new(scans_dispatch_to_finish_seconds.clone()))?;

        Ok(Self {
            registry,
            scans_intake_total,
            scans_duplicate_total,
            scans_dispatched_total,
            scans_submitted_total,
            scans_failed_total,
            scans_reclaimed_total,
            reports_sent_total,
            reports_failed_total,
            scans_in_flight,
            scans_dispatch_to_finish_seconds,
        })
    }

    pub fn render(&self) -> anyhow::Result<String> {
        let metric_families = self.registry.gather();
        let mut buf = Vec::new();
        TextEncoder::new().encode(&metric_families, &mut buf)?;
        Ok(String::from_utf8(buf)?)
    }
}
