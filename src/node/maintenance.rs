//! Background loops keeping the ring state fresh, each on its own thread.
//!
//! Every loop waits on the stop channel between iterations. The channel never
//! carries messages: dropping its sender wakes all loops up at once.

use std::sync::Arc;
use std::time::Duration;

use flume::{Receiver, RecvTimeoutError, TryRecvError};
use tracing::{debug, trace};

use super::Ring;
use crate::rpc::Transport;
use crate::{server, Error};

/// How long the server loop blocks on the transport before checking for stop.
const SERVER_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Sleeps for `duration`, returns false if the node was stopped meanwhile.
fn wait(stop: &Receiver<()>, duration: Duration) -> bool {
    matches!(stop.recv_timeout(duration), Err(RecvTimeoutError::Timeout))
}

fn stopped(stop: &Receiver<()>) -> bool {
    !matches!(stop.try_recv(), Err(TryRecvError::Empty))
}

pub(super) fn serve(ring: Arc<Ring>, transport: Arc<dyn Transport>, stop: Receiver<()>) {
    while !stopped(&stop) {
        match transport.recv(SERVER_POLL_INTERVAL) {
            Ok(Some(frame)) => {
                if let Some(reply) = server::handle_frame(&ring, &frame) {
                    if let Err(error) = transport.send(reply) {
                        debug!(node = %ring.me(), ?error, "Failed to send response");
                    }
                }
            }
            Ok(None) => {}
            Err(Error::TransportClosed) => {
                debug!(node = %ring.me(), "Transport closed, no longer serving requests");
                break;
            }
            Err(error) => {
                debug!(node = %ring.me(), ?error, "Failed to receive request");
                if !wait(&stop, SERVER_POLL_INTERVAL) {
                    break;
                }
            }
        }
    }

    trace!(node = %ring.me(), "Server loop stopped");
}

pub(super) fn stabilize(ring: Arc<Ring>, interval: Duration, stop: Receiver<()>) {
    while wait(&stop, interval) {
        if let Err(error) = ring.stabilize() {
            debug!(node = %ring.me(), ?error, "Stabilize failed");
        }
    }

    trace!(node = %ring.me(), "Stabilize loop stopped");
}

/// Sweeps the finger table from the loosest finger down to the successor,
/// pausing `delay` between entries and `interval` between sweeps.
pub(super) fn fix_fingers(
    ring: Arc<Ring>,
    interval: Duration,
    delay: Duration,
    stop: Receiver<()>,
) {
    'sweeps: loop {
        for index in (0..ring.bits()).rev() {
            if !ring.fix_finger(index) {
                debug!(node = %ring.me(), index, "Could not resolve finger");
            }

            if !wait(&stop, delay) {
                break 'sweeps;
            }
        }

        if !wait(&stop, interval) {
            break;
        }
    }

    trace!(node = %ring.me(), "Fix fingers loop stopped");
}

pub(super) fn check_predecessor(ring: Arc<Ring>, interval: Duration, stop: Receiver<()>) {
    while wait(&stop, interval) {
        ring.check_predecessor();
    }

    trace!(node = %ring.me(), "Check predecessor loop stopped");
}
