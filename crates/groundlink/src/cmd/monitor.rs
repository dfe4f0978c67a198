use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};

use groundlink_frame::message_name;
use groundlink_hub::{DeviceMessage, Hub};
use tracing::{debug, warn};

use crate::cmd::{parse_duration, LinkArgs, MonitorArgs};
use crate::exit::{CliError, CliResult, INTERNAL, SUCCESS, TRANSPORT_ERROR};
use crate::output::{
    print_device_message, print_field_update, print_stats, OutputFormat, StatsOutput,
};

const IDLE_WAIT: Duration = Duration::from_millis(200);

enum Event {
    Fields(u8),
    Device(DeviceMessage),
}

pub fn run(args: MonitorArgs, link: &LinkArgs, format: OutputFormat) -> CliResult<i32> {
    let interval = parse_duration(&args.interval)?;
    let session = link.connect_described()?;
    let hub = session.hub();

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let (tx, rx) = mpsc::channel();
    let fields_tx = tx.clone();
    hub.on_fields_changed(move |address| {
        let _ = fields_tx.send(Event::Fields(address));
    });
    hub.on_device_message(move |message| {
        let _ = tx.send(Event::Device(message.clone()));
    });

    let addresses: Vec<u8> = match args.components {
        Some(addresses) => addresses,
        None => hub.components().iter().map(|c| c.address).collect(),
    };

    let mut printed = 0usize;
    let mut next_poll = Instant::now();
    while running.load(Ordering::SeqCst) && hub.is_running() {
        if Instant::now() >= next_poll {
            poll_fields(hub, &addresses);
            next_poll += interval;
        }

        let timeout = next_poll
            .saturating_duration_since(Instant::now())
            .min(IDLE_WAIT);
        match rx.recv_timeout(timeout) {
            Ok(Event::Fields(address)) => {
                if !addresses.contains(&address) {
                    continue;
                }
                let snapshot = hub.registry().component(address).cloned();
                if let Some(component) = snapshot {
                    print_field_update(&component, format);
                    printed = printed.saturating_add(1);
                }
                if args.count.is_some_and(|count| printed >= count) {
                    break;
                }
            }
            Ok(Event::Device(message)) => print_device_message(&message, format),
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    print_stats(&stats(hub), format);
    if !hub.is_running() {
        return Err(CliError::new(TRANSPORT_ERROR, "link lost"));
    }
    Ok(SUCCESS)
}

fn poll_fields(hub: &Hub, addresses: &[u8]) {
    for &address in addresses {
        let component = match hub.component(address) {
            Ok(component) => component,
            Err(err) => {
                warn!(address, error = %err, "cannot poll component");
                continue;
            }
        };
        // The previous poll may still be outstanding on a slow link.
        if let Err(err) = component.read_fields(|_| {}) {
            debug!(address, error = %err, "field poll skipped");
        }
    }
}

fn stats(hub: &Hub) -> StatsOutput {
    let counters = hub.message_counters();
    let (unmatched, data_errors) = {
        let registry = hub.registry();
        (registry.stats().unmatched(), registry.stats().data_errors())
    };
    let rates = hub.message_rates();
    let seconds = rates.len().max(1) as f64;
    let (rx, tx) = rates
        .iter()
        .fold((0u64, 0u64), |(rx, tx), (r, t)| (rx + r, tx + t));

    StatsOutput {
        frames_received: counters.received,
        frames_sent: counters.sent,
        frame_errors: counters.errors,
        unmatched,
        data_errors,
        latency_ms: hub.message_latency().map(|secs| secs * 1000.0),
        rx_bytes_per_sec: rx as f64 / seconds,
        tx_bytes_per_sec: tx as f64 / seconds,
        per_message: hub
            .message_stats()
            .into_iter()
            .map(|(id, count)| (message_name(id).to_string(), count))
            .collect(),
    }
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
