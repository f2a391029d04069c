//! Fan-out of one line to every registered client but the sender.

use std::sync::Arc;

use linechat_proto::line::ServerLine;

use crate::registry::ClientRegistry;

/// Outcome of a single [`Broadcaster::broadcast`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Recipients whose queue accepted the line.
    pub delivered: usize,
    /// Recipients whose delivery failed.
    pub failed: usize,
}

/// Delivers lines to the members of a [`ClientRegistry`].
///
/// Delivery to each recipient is independent. A failed recipient is logged
/// and left registered; its own connection handler notices the broken
/// connection and removes it.
#[derive(Clone)]
pub struct Broadcaster {
    registry: Arc<ClientRegistry>,
}

impl Broadcaster {
    /// Creates a broadcaster over `registry`.
    #[must_use]
    pub const fn new(registry: Arc<ClientRegistry>) -> Self {
        Self { registry }
    }

    /// Sends `line` to every registered client except `excluded`.
    pub fn broadcast(&self, line: &ServerLine, excluded: &str) -> BroadcastReport {
        tracing::info!(sender = %excluded, "{line}");

        let mut report = BroadcastReport::default();
        self.registry
            .for_each_except(excluded, |name, sink| match sink.send_line(line) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(
                        recipient = %name,
                        peer = %sink.peer(),
                        error = %e,
                        "failed to deliver line"
                    );
                }
            });

        tracing::debug!(
            delivered = report.delivered,
            failed = report.failed,
            "broadcast complete"
        );
        report
    }

    /// The registry this broadcaster delivers to.
    #[must_use]
    pub const fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }
}
