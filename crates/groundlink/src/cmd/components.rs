use std::sync::mpsc;

use tracing::warn;

use crate::cmd::{wait_for, ComponentsArgs, LinkArgs};
use crate::exit::{hub_error, CliResult, SUCCESS};
use crate::output::{print_components, OutputFormat};

pub fn run(args: ComponentsArgs, link: &LinkArgs, format: OutputFormat) -> CliResult<i32> {
    let wait = link.wait()?;
    let session = link.connect_described()?;
    let hub = session.hub();

    if !args.no_values {
        // Issue every read first; reports for different components are independent.
        let mut waits = Vec::new();
        for component in hub.components() {
            let handle = hub
                .component(component.address)
                .map_err(|err| hub_error("component lookup", err))?;
            let (tx, rx) = mpsc::channel();
            handle
                .read_fields(move |result| {
                    let _ = tx.send(result);
                })
                .map_err(|err| hub_error("read fields", err))?;
            waits.push((component.name, rx));
        }
        for (name, rx) in waits {
            let result = wait_for(&rx, wait, &format!("fields of {name}"))?;
            if !result.is_success() {
                warn!(component = %name, %result, "field read failed");
            }
        }
    }

    print_components(&hub.components(), format);
    Ok(SUCCESS)
}
