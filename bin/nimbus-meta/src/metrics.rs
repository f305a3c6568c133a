//! Metadata store server metrics

use nimbus_meta_store::CacheStats;
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};

/// Request counters for one metadata store server
#[derive(Debug, Default)]
pub struct MetaMetrics {
    pub inserts_stored: AtomicU64,
    pub inserts_out_of_order: AtomicU64,
    pub inserts_failed: AtomicU64,
    pub space_usage_requests: AtomicU64,
    pub space_usage_failed: AtomicU64,
    pub lookups_found: AtomicU64,
    pub lookups_not_found: AtomicU64,
    pub lookups_failed: AtomicU64,
    pub malformed_messages: AtomicU64,
    pub unexpected_messages: AtomicU64,
}

impl MetaMetrics {
    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Export metrics in Prometheus text format
    #[must_use]
    pub fn export_prometheus(&self, node: &str, cache: &CacheStats) -> String {
        let mut output = String::with_capacity(2 * 1024);

        let _ = writeln!(
            output,
            "# HELP nimbus_meta_inserts_total Metadata inserts by outcome"
        );
        let _ = writeln!(output, "# TYPE nimbus_meta_inserts_total counter");
        for (outcome, counter) in [
            ("stored", &self.inserts_stored),
            ("invalid_duplicate", &self.inserts_out_of_order),
            ("store_failed", &self.inserts_failed),
        ] {
            let _ = writeln!(
                output,
                "nimbus_meta_inserts_total{{node=\"{}\",outcome=\"{}\"}} {}",
                node,
                outcome,
                counter.load(Ordering::Relaxed)
            );
        }

        let _ = writeln!(
            output,
            "# HELP nimbus_meta_lookups_total Key lookups by outcome"
        );
        let _ = writeln!(output, "# TYPE nimbus_meta_lookups_total counter");
        for (outcome, counter) in [
            ("found", &self.lookups_found),
            ("not_found", &self.lookups_not_found),
            ("store_failed", &self.lookups_failed),
        ] {
            let _ = writeln!(
                output,
                "nimbus_meta_lookups_total{{node=\"{}\",outcome=\"{}\"}} {}",
                node,
                outcome,
                counter.load(Ordering::Relaxed)
            );
        }

        let simple = [
            (
                "nimbus_meta_space_usage_requests_total",
                "Space usage requests received",
                &self.space_usage_requests,
            ),
            (
                "nimbus_meta_space_usage_failures_total",
                "Space usage requests that failed",
                &self.space_usage_failed,
            ),
            (
                "nimbus_meta_malformed_messages_total",
                "Payloads that could not be decoded",
                &self.malformed_messages,
            ),
            (
                "nimbus_meta_unexpected_messages_total",
                "Decoded messages of a kind this server does not handle",
                &self.unexpected_messages,
            ),
            (
                "nimbus_meta_index_cache_hits_total",
                "Index cache hits",
                &cache.hits,
            ),
            (
                "nimbus_meta_index_cache_misses_total",
                "Index cache misses",
                &cache.misses,
            ),
            (
                "nimbus_meta_index_evictions_total",
                "Namespace indexes closed by LRU eviction",
                &cache.evictions,
            ),
        ];
        for (name, help, counter) in simple {
            let _ = writeln!(output, "# HELP {name} {help}");
            let _ = writeln!(output, "# TYPE {name} counter");
            let _ = writeln!(
                output,
                "{}{{node=\"{}\"}} {}",
                name,
                node,
                counter.load(Ordering::Relaxed)
            );
        }

        let _ = writeln!(
            output,
            "# HELP nimbus_meta_index_cache_hit_ratio Fraction of index lookups served by an open handle"
        );
        let _ = writeln!(output, "# TYPE nimbus_meta_index_cache_hit_ratio gauge");
        let _ = writeln!(
            output,
            "nimbus_meta_index_cache_hit_ratio{{node=\"{}\"}} {:.4}",
            node,
            cache.hit_ratio()
        );

        let _ = writeln!(
            output,
            "# HELP nimbus_meta_open_indexes Namespace indexes currently open"
        );
        let _ = writeln!(output, "# TYPE nimbus_meta_open_indexes gauge");
        let _ = writeln!(
            output,
            "nimbus_meta_open_indexes{{node=\"{}\"}} {}",
            node,
            cache.open_handles.load(Ordering::Relaxed)
        );

        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_includes_counters_and_cache() {
        let metrics = MetaMetrics::default();
        MetaMetrics::incr(&metrics.inserts_stored);
        MetaMetrics::incr(&metrics.inserts_stored);
        MetaMetrics::incr(&metrics.lookups_not_found);
        let cache = CacheStats::default();
        cache.open_handles.store(4, Ordering::Relaxed);

        let text = metrics.export_prometheus("meta-1", &cache);
        assert!(text.contains("nimbus_meta_inserts_total{node=\"meta-1\",outcome=\"stored\"} 2"));
        assert!(text.contains("nimbus_meta_lookups_total{node=\"meta-1\",outcome=\"not_found\"} 1"));
        assert!(text.contains("nimbus_meta_open_indexes{node=\"meta-1\"} 4"));
        assert!(text.contains("# TYPE nimbus_meta_index_evictions_total counter"));
        assert!(text.contains("nimbus_meta_index_cache_hit_ratio{node=\"meta-1\"} 0.0000"));
    }
}
