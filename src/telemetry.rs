// SPDX-License-Identifier: Apache-2.0

//! Engine counters, recorded through the global meter provider. Without an
//! installed provider every counter is a no-op.

use opentelemetry::metrics::{Counter, Meter};
use opentelemetry::{KeyValue, global};

pub fn get_meter() -> Meter {
    global::meter("filetail")
}

#[derive(Clone)]
pub struct EngineMetrics {
    accepted: Counter<u64>,
    refused: Counter<u64>,
    read_errors: Counter<u64>,
    cycles: Counter<u64>,
    tags: [KeyValue; 1],
}

impl EngineMetrics {
    /// Counters tagged with the input id
    pub fn new(input_id: &str) -> Self {
        let meter = get_meter();
        Self {
            accepted: meter
                .u64_counter("filetail_accepted_log_records")
                .with_description("Number of log records handed to the output boundary.")
                .with_unit("log_records")
                .build(),
            refused: meter
                .u64_counter("filetail_refused_log_records")
                .with_description("Number of log records the output boundary refused.")
                .with_unit("log_records")
                .build(),
            read_errors: meter
                .u64_counter("filetail_read_errors")
                .with_description("Number of per-file read failures.")
                .build(),
            cycles: meter
                .u64_counter("filetail_poll_cycles")
                .with_description("Number of completed polling cycles.")
                .build(),
            tags: [KeyValue::new("input", input_id.to_string())],
        }
    }

    pub fn record_accepted(&self, count: u64) {
        if count > 0 {
            self.accepted.add(count, &self.tags);
        }
    }

    pub fn record_refused(&self, count: u64) {
        self.refused.add(count, &self.tags);
    }

    pub fn record_read_error(&self) {
        self.read_errors.add(1, &self.tags);
    }

    pub fn record_cycle(&self) {
        self.cycles.add(1, &self.tags);
    }
}
