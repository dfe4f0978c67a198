use std::sync::mpsc;
use std::time::Duration;

use groundlink_hub::{Hub, ParamRef, PendingEdits, ResultCode};
use tracing::info;

use crate::cmd::{wait_for, LinkArgs, ParamsAction, ParamsArgs};
use crate::exit::{
    check_result, hub_error, io_error, result_code, CliError, CliResult, DATA_INVALID, SUCCESS,
    USAGE,
};
use crate::output::{print_params, print_results, OutputFormat, ResultOutput};

pub fn run(args: ParamsArgs, link: &LinkArgs, format: OutputFormat) -> CliResult<i32> {
    let wait = link.wait()?;
    match args.action {
        ParamsAction::List => {
            let session = link.connect()?;
            fetch(session.hub(), wait)?;
            print_params(&session.hub().get_param_list(), format);
            Ok(SUCCESS)
        }
        ParamsAction::Set {
            target,
            value,
            number,
        } => {
            let target = if number {
                let number = target.parse::<u16>().map_err(|_| {
                    CliError::new(USAGE, format!("invalid parameter number: {target}"))
                })?;
                ParamRef::Number(number)
            } else {
                ParamRef::Name(target)
            };
            let label = match &target {
                ParamRef::Name(name) => name.clone(),
                ParamRef::Number(number) => format!("#{number}"),
            };

            let session = link.connect()?;
            let (tx, rx) = mpsc::channel();
            session
                .hub()
                .set_param(value, target, move |result, param| {
                    let _ = tx.send((result, param));
                })
                .map_err(|err| hub_error("set parameter", err))?;
            let (result, param) = wait_for(&rx, wait, &format!("set {label}"))?;

            match param {
                Some(param) => print_params(&[param], format),
                None => print_results(&[ResultOutput::new("set", label, result)], format),
            }
            Ok(result_code(result))
        }
        ParamsAction::Save { path } => {
            let session = link.connect()?;
            let count = fetch(session.hub(), wait)?;
            std::fs::write(&path, session.hub().params_to_inf())
                .map_err(|err| io_error(&format!("write {}", path.display()), err))?;
            info!(count, path = %path.display(), "parameters saved");
            print_results(
                &[ResultOutput::new(
                    "save",
                    format!("{} ({count} parameters)", path.display()),
                    ResultCode::Success,
                )],
                format,
            );
            Ok(SUCCESS)
        }
        ParamsAction::Load { path, all, dry_run } => {
            let text = std::fs::read_to_string(&path)
                .map_err(|err| io_error(&format!("read {}", path.display()), err))?;
            let edits = PendingEdits::from_inf(&text).map_err(|err| {
                CliError::new(DATA_INVALID, format!("{}: {err}", path.display()))
            })?;

            let session = link.connect()?;
            let hub = session.hub();
            fetch(hub, wait)?;
            if !all {
                let changed = edits.select_changed(&hub.get_param_list());
                info!(changed, loaded = edits.len(), "parameters differing from device");
            }

            if dry_run {
                let pending: Vec<ResultOutput> = edits
                    .entries()
                    .into_iter()
                    .filter(|e| e.selected)
                    .map(|e| ResultOutput {
                        operation: "set",
                        target: format!("{}={}", e.name, e.value),
                        result: "PENDING".to_string(),
                        ok: true,
                    })
                    .collect();
                print_results(&pending, format);
                return Ok(SUCCESS);
            }

            flush(hub, &edits, wait, format)
        }
    }
}

/// Re-enumerate every parameter; returns how many the device reported.
fn fetch(hub: &Hub, wait: Duration) -> CliResult<usize> {
    hub.clear_param_list();
    let (tx, rx) = mpsc::channel();
    hub.fetch_params(move |result, count| {
        let _ = tx.send((result, count));
    })
    .map_err(|err| hub_error("parameter enumeration", err))?;
    let (result, count) = wait_for(&rx, wait, "parameter enumeration")?;
    check_result("parameter enumeration", result)?;
    Ok(count)
}

fn flush(hub: &Hub, edits: &PendingEdits, wait: Duration, format: OutputFormat) -> CliResult<i32> {
    let (tx, rx) = mpsc::channel();
    let issued = edits.flush(hub, move |name, result| {
        let _ = tx.send((name.to_string(), result));
    });

    let mut results = Vec::with_capacity(issued);
    let mut code = SUCCESS;
    for _ in 0..issued {
        let (name, result) = wait_for(&rx, wait, "parameter write")?;
        if code == SUCCESS {
            code = result_code(result);
        }
        results.push(ResultOutput::new("set", name, result));
    }
    print_results(&results, format);
    Ok(code)
}
