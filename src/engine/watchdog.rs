//! Liveness watchdog.
//!
//! Runs next to the iteration loop for the duration of one run and only
//! talks to it through the command channel: when the heartbeat goes stale it
//! sends a restart request and exits.

use crate::error::Error;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::control::Control;
use super::worker::Heartbeat;

const MIN_CHECK_PERIOD: Duration = Duration::from_millis(1);

pub(crate) fn spawn(
    worker: String,
    heartbeat: Heartbeat,
    timeout: Duration,
    control: mpsc::UnboundedSender<Control>,
    token: CancellationToken,
) -> JoinHandle<()> {
    let period = (timeout / 4).max(MIN_CHECK_PERIOD);

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = sleep(period) => {}
            }

            let elapsed = heartbeat.elapsed();
            if elapsed > timeout {
                let elapsed_ms = elapsed.as_millis() as u64;
                warn!(
                    worker = %worker,
                    elapsed_ms,
                    timeout_ms = timeout.as_millis() as u64,
                    "runner heartbeat is stale, requesting restart"
                );
                let _ = control.send(Control::Restart(Error::LivenessTimeout { elapsed_ms }));
                return;
            }
        }
    })
}
