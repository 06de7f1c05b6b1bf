use tokio::sync::mpsc;
use tracing::warn;

use crate::types::TriggerRequest;

/// Hand-off point between the scheduler and whatever executes triggers.
///
/// Implementations must not block: the poller calls `submit` after its
/// transaction commits and the sweeper calls it on every tick.
pub trait TriggerDispatch: Send + Sync {
    fn submit(&self, request: TriggerRequest);
}

/// Bounded channel into the trigger pool. `try_send` never stalls the caller;
/// a full or closed channel is logged and the trigger is dropped.
impl TriggerDispatch for mpsc::Sender<TriggerRequest> {
    fn submit(&self, request: TriggerRequest) {
        let job_id = request.job_id;
        if let Err(e) = self.try_send(request) {
            warn!(job_id, "trigger queue full or closed, trigger dropped: {e}");
        }
    }
}
