use std::sync::mpsc;

use crate::cmd::{wait_for, CommandArgs, LinkArgs};
use crate::exit::{hub_error, result_code, CliResult};
use crate::output::{print_results, OutputFormat, ResultOutput};

pub fn run(args: CommandArgs, link: &LinkArgs, format: OutputFormat) -> CliResult<i32> {
    let wait = link.wait()?;
    let session = link.connect()?;

    let (tx, rx) = mpsc::channel();
    session
        .hub()
        .send_command(args.code, move |result| {
            let _ = tx.send(result);
        })
        .map_err(|err| hub_error("send command", err))?;
    let result = wait_for(&rx, wait, &format!("command {}", args.code))?;

    print_results(
        &[ResultOutput::new("command", args.code.to_string(), result)],
        format,
    );
    Ok(result_code(result))
}
