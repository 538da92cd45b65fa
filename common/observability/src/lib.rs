use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};

/// Counters for the client session core: credential refresh, request replay,
/// navigation decisions and permission fetches.
#[derive(Clone)]
pub struct SessionMetrics {
    registry: Registry,
    refresh_total: IntCounterVec,
    replayed_requests_total: IntCounterVec,
    navigation_total: IntCounterVec,
    permission_fetch_total: IntCounterVec,
}

impl SessionMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let refresh_total = IntCounterVec::new(
            Opts::new(
                "session_refresh_total",
                "Credential refresh attempts grouped by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(refresh_total.clone()))?;

        let replayed_requests_total = IntCounterVec::new(
            Opts::new(
                "session_replayed_requests_total",
                "Requests replayed after a 401, grouped by how the new token was obtained",
            ),
            &["source"],
        )?;
        registry.register(Box::new(replayed_requests_total.clone()))?;

        let navigation_total = IntCounterVec::new(
            Opts::new(
                "session_navigation_total",
                "Navigation guard decisions grouped by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(navigation_total.clone()))?;

        let permission_fetch_total = IntCounterVec::new(
            Opts::new(
                "session_permission_fetch_total",
                "Remote role-permission fetches grouped by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(permission_fetch_total.clone()))?;

        Ok(Self {
            registry,
            refresh_total,
            replayed_requests_total,
            navigation_total,
            permission_fetch_total,
        })
    }

    pub fn refresh(&self, outcome: &str) {
        self.refresh_total.with_label_values(&[outcome]).inc();
    }

    pub fn replayed(&self, source: &str) {
        self.replayed_requests_total.with_label_values(&[source]).inc();
    }

    pub fn navigation(&self, outcome: &str) {
        self.navigation_total.with_label_values(&[outcome]).inc();
    }

    pub fn permission_fetch(&self, outcome: &str) {
        self.permission_fetch_total.with_label_values(&[outcome]).inc();
    }

    pub fn refresh_count(&self, outcome: &str) -> u64 {
        self.refresh_total.with_label_values(&[outcome]).get()
    }

    pub fn navigation_count(&self, outcome: &str) -> u64 {
        self.navigation_total.with_label_values(&[outcome]).get()
    }

    /// Prometheus text exposition of every registered counter.
    pub fn render(&self) -> prometheus::Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}
