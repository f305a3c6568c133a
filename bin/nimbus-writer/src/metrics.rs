//! Segment writer metrics

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct WriterMetrics {
    pub archives_received: AtomicU64,
    pub archives_stored: AtomicU64,
    pub archives_failed: AtomicU64,
    pub duplicate_requests: AtomicU64,
    pub write_failures: AtomicU64,
    pub rollbacks: AtomicU64,
    pub versions_pruned: AtomicU64,
    pub orphan_replies: AtomicU64,
    pub malformed_messages: AtomicU64,
    pub unexpected_messages: AtomicU64,
    pub bytes_written: AtomicU64,
    /// Archives waiting on the metadata store
    pub pending: AtomicU64,
}

impl WriterMetrics {
    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Export metrics in Prometheus text format
    #[must_use]
    pub fn export_prometheus(&self, node: &str) -> String {
        let mut output = String::with_capacity(2 * 1024);

        let counters = [
            (
                "nimbus_writer_archives_received_total",
                "Archive requests received",
                &self.archives_received,
            ),
            (
                "nimbus_writer_archives_stored_total",
                "Archives committed to content and metadata",
                &self.archives_stored,
            ),
            (
                "nimbus_writer_archives_failed_total",
                "Archives answered with an error",
                &self.archives_failed,
            ),
            (
                "nimbus_writer_duplicate_requests_total",
                "Archive requests whose correlation id was already in flight",
                &self.duplicate_requests,
            ),
            (
                "nimbus_writer_write_failures_total",
                "Content writes that failed the durability fence",
                &self.write_failures,
            ),
            (
                "nimbus_writer_rollbacks_total",
                "Committed blobs removed after a metadata insert failed",
                &self.rollbacks,
            ),
            (
                "nimbus_writer_versions_pruned_total",
                "Superseded content versions deleted after a newer insert",
                &self.versions_pruned,
            ),
            (
                "nimbus_writer_orphan_replies_total",
                "Insert replies with no pending archive",
                &self.orphan_replies,
            ),
            (
                "nimbus_writer_malformed_messages_total",
                "Payloads that could not be decoded",
                &self.malformed_messages,
            ),
            (
                "nimbus_writer_unexpected_messages_total",
                "Decoded messages of a kind the writer does not handle",
                &self.unexpected_messages,
            ),
            (
                "nimbus_writer_bytes_written_total",
                "Content bytes committed",
                &self.bytes_written,
            ),
        ];
        for (name, help, counter) in counters {
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
            "# HELP nimbus_writer_pending_archives Archives waiting on the metadata store"
        );
        let _ = writeln!(output, "# TYPE nimbus_writer_pending_archives gauge");
        let _ = writeln!(
            output,
            "nimbus_writer_pending_archives{{node=\"{}\"}} {}",
            node,
            self.pending.load(Ordering::Relaxed)
        );

        output
    }
}
