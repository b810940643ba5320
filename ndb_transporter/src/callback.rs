//! Upward interface from the transporter to the kernel scheduler

use crate::signal::{Priority, SignalHeader};
use ndb_common::error::TransporterError;
use ndb_common::ids::NodeId;

/// Implemented by the kernel; called from the thread driving the link.
///
/// `deliver` and the volume reports run on the execution thread. The
/// connect, disconnect and error reports may also come from the setup
/// watchdog thread.
pub trait TransportCallback: Send + Sync {
    /// Hand one decoded signal to the scheduler.
    fn deliver(&self, header: &SignalHeader, priority: Priority, body: &[u32], sections: &[&[u32]]);

    /// Signals and bytes flushed to `node` since the last report.
    fn report_send_volume(&self, _node: NodeId, _signals: u32, _bytes: u64) {}

    /// Signals and bytes received from `node` in one receive round.
    fn report_receive_volume(&self, _node: NodeId, _signals: u32, _bytes: u64) {}

    /// The link to `node` reached the connected state.
    fn report_connect(&self, node: NodeId);

    /// The link to `node` was torn down because of `error`.
    fn report_disconnect(&self, node: NodeId, error: TransporterError);

    /// A non-fatal or setup error on the link to `node`.
    fn report_error(&self, node: NodeId, error: TransporterError);

    /// True when the scheduler's job buffers are too full to accept more
    /// signals this round.
    fn has_pending_work(&self) -> bool {
        false
    }
}
