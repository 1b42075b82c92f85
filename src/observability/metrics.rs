use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub position_updates_total: IntCounter,
    pub nearby_queries_total: IntCounter,
    pub delivery_status_total: IntCounterVec,
    pub active_deliveries: IntGauge,
    pub sensor_errors_total: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let position_updates_total = IntCounter::new(
            "position_updates_total",
            "Total user position rows written",
        )
        .expect("valid position_updates_total metric");

        let nearby_queries_total = IntCounter::new(
            "nearby_queries_total",
            "Total proximity queries executed against the store",
        )
        .expect("valid nearby_queries_total metric");

        let delivery_status_total = IntCounterVec::new(
            Opts::new(
                "delivery_status_total",
                "Delivery status writes by target status",
            ),
            &["status"],
        )
        .expect("valid delivery_status_total metric");

        let active_deliveries = IntGauge::new(
            "active_deliveries",
            "Delivery records not yet in a terminal status",
        )
        .expect("valid active_deliveries metric");

        let sensor_errors_total = IntCounterVec::new(
            Opts::new("sensor_errors_total", "Location sensor failures by kind"),
            &["kind"],
        )
        .expect("valid sensor_errors_total metric");

        registry
            .register(Box::new(position_updates_total.clone()))
            .expect("register position_updates_total");
        registry
            .register(Box::new(nearby_queries_total.clone()))
            .expect("register nearby_queries_total");
        registry
            .register(Box::new(delivery_status_total.clone()))
            .expect("register delivery_status_total");
        registry
            .register(Box::new(active_deliveries.clone()))
            .expect("register active_deliveries");
        registry
            .register(Box::new(sensor_errors_total.clone()))
            .expect("register sensor_errors_total");

        Self {
            registry,
            position_updates_total,
            nearby_queries_total,
            delivery_status_total,
            active_deliveries,
            sensor_errors_total,
        }
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
