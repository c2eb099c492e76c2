use seeder_observability::Counter;

pub struct BulkMetrics {
    pub requests: Counter<u64>,
    pub request_bytes: Counter<u64>,
    pub overloaded: Counter<u64>,
}

impl Default for BulkMetrics {
    fn default() -> Self {
        let meter = seeder_observability::meter("bulk");
        Self {
            requests: meter
                .u64_counter("seeder.bulk.requests")
                .with_unit("{request}")
                .with_description("number of bulk requests sent to the sink")
                .build(),
            request_bytes: meter
                .u64_counter("seeder.bulk.bytes")
                .with_unit("By")
                .with_description("document bytes sent in bulk requests")
                .build(),
            overloaded: meter
                .u64_counter("seeder.bulk.overloaded")
                .with_unit("{request}")
                .with_description("bulk requests rejected because the sink was overloaded")
                .build(),
        }
    }
}
