use std::io::Read;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use groundlink_frame::{message_name, Frame, FrameError, FrameReader};
use tracing::{debug, info, trace, warn};

use crate::hub::Shared;
use crate::result::ResultCode;
use crate::router::Router;
use crate::signal::lock;
use crate::transfer;

/// The reader loop: decode frames, route them, run timers.
///
/// Runs until the terminate flag is set or the link fails. Every read is
/// bounded by the link's read timeout, so both the flag and the transfer
/// timers are checked at least that often.
pub(crate) fn run<R: Read>(shared: Arc<Shared>, mut reader: FrameReader<R>, router: Router) {
    info!(routes = router.len(), "dispatcher started");
    let mut seen_bytes = 0;

    while !shared.is_terminated() {
        let result = reader.read_frame();
        sync_counters(&shared, &reader, &mut seen_bytes);
        match result {
            Ok(frame) => dispatch(&shared, &router, &frame),
            Err(err) if err.is_timeout() => {}
            Err(err) => {
                if !shared.is_terminated() {
                    on_link_lost(&shared, &err);
                }
                break;
            }
        }
        poll_timers(&shared, Instant::now());
    }

    info!(
        frames = reader.counters().received,
        errors = reader.counters().errors,
        "dispatcher stopped"
    );
}

fn sync_counters<R: Read>(shared: &Shared, reader: &FrameReader<R>, seen_bytes: &mut u64) {
    let bytes = reader.bytes_read();
    let mut registry = lock(&shared.registry);
    let stats = registry.stats_mut();
    if bytes > *seen_bytes {
        stats.record_rx_bytes(bytes - *seen_bytes, Instant::now());
        *seen_bytes = bytes;
    }
    stats.set_frame_errors(reader.counters().errors);
}

fn dispatch(shared: &Shared, router: &Router, frame: &Frame) {
    trace!(
        id = frame.id,
        name = message_name(frame.id),
        len = frame.payload.len(),
        "frame received"
    );
    lock(&shared.registry).stats_mut().record_frame(frame.id);

    let Some(route) = router.lookup(frame) else {
        trace!(id = frame.id, subtype = ?frame.subtype(), "no route for frame");
        return;
    };
    match (route.handler)(shared, frame) {
        Ok(deferred) => deferred.run(shared),
        Err(err) => {
            warn!(
                id = frame.id,
                route = route.name,
                error = %err,
                "dropping malformed payload"
            );
            lock(&shared.registry).stats_mut().record_data_error();
        }
    }
}

/// Fail active transfers, abandon single-shot requests and stop.
fn on_link_lost(shared: &Shared, err: &FrameError) {
    warn!(error = %err, "link lost");
    shared.terminate.store(true, Ordering::Release);
    let jobs = transfer::fail_all(shared, ResultCode::Disconnected);
    let abandoned = lock(&shared.pending).clear();
    if abandoned > 0 {
        debug!(abandoned, "pending requests abandoned");
    }
    for job in jobs {
        job();
    }
    shared.signal.notify();
}

fn poll_timers(shared: &Shared, now: Instant) {
    transfer::poll(shared, now).run(shared);

    let Some(timeout) = shared.config.request_timeout else {
        return;
    };
    let expired = lock(&shared.pending).expire(now, timeout);
    if expired.is_empty() {
        return;
    }
    for (key, completion) in expired {
        debug!(%key, ?timeout, "request timed out");
        completion.fail(ResultCode::Timeout)();
    }
    shared.signal.notify();
}
