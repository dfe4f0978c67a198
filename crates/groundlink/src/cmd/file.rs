use std::io::Write;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use groundlink_hub::{Hub, ResultCode, TransferOptions};
use tracing::info;

use crate::cmd::{FileAction, FileArgs, LinkArgs, TransferArgs};
use crate::exit::{
    check_result, hub_error, io_error, result_code, CliError, CliResult, TRANSPORT_ERROR,
};
use crate::output::{print_transfer, OutputFormat, TransferOutput};

const PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

impl TransferArgs {
    fn options(&self) -> TransferOptions {
        TransferOptions {
            chunk_size: self.chunk_size,
            burst_size: self.burst,
            verify: self.verify,
        }
    }
}

pub fn run(args: FileArgs, link: &LinkArgs, format: OutputFormat) -> CliResult<i32> {
    let session = link.connect_described()?;
    let hub = session.hub();

    match args.action {
        FileAction::Read { transfer, output } => {
            let stream = hub
                .stream(transfer.component, transfer.index)
                .map_err(|err| hub_error("stream lookup", err))?;
            let started = Instant::now();
            let (tx, rx) = mpsc::channel();
            stream
                .read(transfer.options(), move |result| {
                    let _ = tx.send(result);
                })
                .map_err(|err| hub_error("start read", err))?;
            let result = wait_transfer(hub, &rx)?;
            check_result("stream read", result)?;

            let data = stream.data().unwrap_or_default();
            let summary = TransferOutput {
                direction: "read",
                address: transfer.component,
                index: transfer.index,
                bytes: data.len(),
                result: result.to_string(),
                elapsed_ms: started.elapsed().as_millis(),
            };
            match output {
                Some(path) => {
                    std::fs::write(&path, &data)
                        .map_err(|err| io_error(&format!("write {}", path.display()), err))?;
                    print_transfer(&summary, format);
                }
                None => {
                    // Stdout carries the data itself.
                    let mut out = std::io::stdout();
                    out.write_all(&data)
                        .and_then(|()| out.flush())
                        .map_err(|err| io_error("write stdout", err))?;
                    info!(bytes = data.len(), elapsed_ms = summary.elapsed_ms, "stream read");
                }
            }
            Ok(result_code(result))
        }
        FileAction::Write {
            transfer,
            input,
            append,
        } => {
            let data = std::fs::read(&input)
                .map_err(|err| io_error(&format!("read {}", input.display()), err))?;
            let stream = hub
                .stream(transfer.component, transfer.index)
                .map_err(|err| hub_error("stream lookup", err))?;
            if append {
                // The write continues after the buffer this session knows about.
                let (tx, rx) = mpsc::channel();
                stream
                    .read(transfer.options(), move |result| {
                        let _ = tx.send(result);
                    })
                    .map_err(|err| hub_error("start read", err))?;
                check_result("stream read before append", wait_transfer(hub, &rx)?)?;
            }

            let bytes = data.len();
            let started = Instant::now();
            let (tx, rx) = mpsc::channel();
            stream
                .write(data, transfer.options(), append, move |result| {
                    let _ = tx.send(result);
                })
                .map_err(|err| hub_error("start write", err))?;
            let result = wait_transfer(hub, &rx)?;

            print_transfer(
                &TransferOutput {
                    direction: "write",
                    address: transfer.component,
                    index: transfer.index,
                    bytes,
                    result: result.to_string(),
                    elapsed_ms: started.elapsed().as_millis(),
                },
                format,
            );
            Ok(result_code(result))
        }
    }
}

/// Block until the transfer callback runs, logging progress meanwhile.
///
/// The engine always completes a transfer, so there is no overall deadline.
fn wait_transfer(hub: &Hub, rx: &Receiver<ResultCode>) -> CliResult<ResultCode> {
    loop {
        match rx.recv_timeout(PROGRESS_INTERVAL) {
            Ok(result) => return Ok(result),
            Err(RecvTimeoutError::Timeout) => {
                let (fraction, completed, total) = hub.progress();
                info!(
                    percent = (fraction * 100.0).round(),
                    completed,
                    total,
                    "transfer in progress"
                );
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(CliError::new(
                    TRANSPORT_ERROR,
                    "transfer abandoned: session stopped",
                ))
            }
        }
    }
}
