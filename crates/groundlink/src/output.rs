use std::io::IsTerminal;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use groundlink_hub::{Component, DeviceMessage, Field, Parameter, ResultCode, TextLevel};
use serde::Serialize;

#[derive(Clone, Debug, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

fn table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header);
    table
}

#[derive(Serialize)]
struct FieldOutput<'a> {
    index: u8,
    name: &'a str,
    kind: String,
    value: Option<f64>,
    unit: &'a str,
    status: bool,
}

impl<'a> From<&'a Field> for FieldOutput<'a> {
    fn from(field: &'a Field) -> Self {
        Self {
            index: field.index,
            name: &field.name,
            kind: format!("{:?}", field.kind).to_lowercase(),
            value: field.value,
            unit: &field.unit,
            status: field.is_status(),
        }
    }
}

#[derive(Serialize)]
struct StreamOutput {
    index: u8,
    size: u32,
}

#[derive(Serialize)]
struct ComponentOutput<'a> {
    address: u8,
    name: &'a str,
    kind: String,
    hash: String,
    hw_version: String,
    sw_version: String,
    described: bool,
    fields: Vec<FieldOutput<'a>>,
    streams: Vec<StreamOutput>,
}

impl<'a> From<&'a Component> for ComponentOutput<'a> {
    fn from(c: &'a Component) -> Self {
        Self {
            address: c.address,
            name: &c.name,
            kind: format!("{:#06x}", c.kind),
            hash: format!("{:08x}", c.hash),
            hw_version: format!("{}.{}", c.hw_version.0, c.hw_version.1),
            sw_version: format!("{}.{}.{}", c.sw_version.0, c.sw_version.1, c.sw_version.2),
            described: c.is_described(),
            fields: c.fields.iter().map(FieldOutput::from).collect(),
            streams: c
                .files
                .values()
                .map(|s| StreamOutput {
                    index: s.index,
                    size: s.size,
                })
                .collect(),
        }
    }
}

/// Render a field value; status bit-fields are shown in hex.
pub fn field_value(field: &Field) -> String {
    match field.value {
        None => "-".to_string(),
        Some(value) if field.is_status() => format!("{:#04x}", value as u64),
        Some(value) if field.unit.is_empty() => format!("{value}"),
        Some(value) => format!("{value} {}", field.unit),
    }
}

pub fn print_components(components: &[Component], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out: Vec<ComponentOutput<'_>> =
                components.iter().map(ComponentOutput::from).collect();
            print_json(&out);
        }
        OutputFormat::Table => {
            let mut summary = table(vec![
                "ADDRESS", "NAME", "TYPE", "HW", "SW", "FIELDS", "STREAMS",
            ]);
            let mut fields = table(vec!["COMPONENT", "INDEX", "FIELD", "VALUE"]);
            for c in components {
                let out = ComponentOutput::from(c);
                summary.add_row(vec![
                    out.address.to_string(),
                    out.name.to_string(),
                    out.kind,
                    out.hw_version,
                    out.sw_version,
                    c.fields.len().to_string(),
                    c.files.len().to_string(),
                ]);
                for field in &c.fields {
                    fields.add_row(vec![
                        c.name.clone(),
                        field.index.to_string(),
                        field.name.clone(),
                        field_value(field),
                    ]);
                }
            }
            println!("{summary}");
            println!("{fields}");
        }
        OutputFormat::Pretty => {
            for c in components {
                println!(
                    "{} @{} type={:#06x} hw={}.{} sw={}.{}.{}",
                    c.name,
                    c.address,
                    c.kind,
                    c.hw_version.0,
                    c.hw_version.1,
                    c.sw_version.0,
                    c.sw_version.1,
                    c.sw_version.2
                );
                for field in &c.fields {
                    println!("  [{}] {} = {}", field.index, field.name, field_value(field));
                }
                for stream in c.files.values() {
                    println!("  stream {} ({} bytes)", stream.index, stream.size);
                }
            }
        }
    }
}

/// Print the fields of one component after a report.
pub fn print_field_update(component: &Component, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            #[derive(Serialize)]
            struct Update<'a> {
                event: &'static str,
                address: u8,
                component: &'a str,
                fields: Vec<FieldOutput<'a>>,
            }
            print_json(&Update {
                event: "fields",
                address: component.address,
                component: &component.name,
                fields: component.fields.iter().map(FieldOutput::from).collect(),
            });
        }
        OutputFormat::Table | OutputFormat::Pretty => {
            let values: Vec<String> = component
                .fields
                .iter()
                .map(|f| format!("{}={}", f.name, field_value(f)))
                .collect();
            println!("{}: {}", component.name, values.join(" "));
        }
    }
}

#[derive(Serialize)]
struct ParamOutput<'a> {
    number: u16,
    name: &'a str,
    value: f64,
}

pub fn print_params(params: &[Parameter], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out: Vec<ParamOutput<'_>> = params
                .iter()
                .map(|p| ParamOutput {
                    number: p.number,
                    name: &p.name,
                    value: p.value,
                })
                .collect();
            print_json(&out);
        }
        OutputFormat::Table => {
            let mut t = table(vec!["NUMBER", "NAME", "VALUE"]);
            for p in params {
                t.add_row(vec![p.number.to_string(), p.name.clone(), p.value.to_string()]);
            }
            println!("{t}");
        }
        OutputFormat::Pretty => {
            for p in params {
                println!("{:>4} {} = {}", p.number, p.name, p.value);
            }
        }
    }
}

#[derive(Serialize)]
pub struct ResultOutput {
    pub operation: &'static str,
    pub target: String,
    pub result: String,
    pub ok: bool,
}

impl ResultOutput {
    pub fn new(operation: &'static str, target: impl Into<String>, result: ResultCode) -> Self {
        Self {
            operation,
            target: target.into(),
            result: result.to_string(),
            ok: result.is_accepted(),
        }
    }
}

pub fn print_results(results: &[ResultOutput], format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&results),
        OutputFormat::Table => {
            let mut t = table(vec!["OPERATION", "TARGET", "RESULT"]);
            for r in results {
                t.add_row(vec![r.operation.to_string(), r.target.clone(), r.result.clone()]);
            }
            println!("{t}");
        }
        OutputFormat::Pretty => {
            for r in results {
                println!("{} {}: {}", r.operation, r.target, r.result);
            }
        }
    }
}

#[derive(Serialize)]
pub struct TransferOutput {
    pub direction: &'static str,
    pub address: u8,
    pub index: u8,
    pub bytes: usize,
    pub result: String,
    pub elapsed_ms: u128,
}

pub fn print_transfer(out: &TransferOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(out),
        OutputFormat::Table => {
            let mut t = table(vec![
                "DIRECTION",
                "COMPONENT",
                "STREAM",
                "BYTES",
                "RESULT",
                "ELAPSED",
            ]);
            t.add_row(vec![
                out.direction.to_string(),
                out.address.to_string(),
                out.index.to_string(),
                out.bytes.to_string(),
                out.result.clone(),
                format!("{} ms", out.elapsed_ms),
            ]);
            println!("{t}");
        }
        OutputFormat::Pretty => {
            println!(
                "{} component={} stream={} bytes={} result={} elapsed={}ms",
                out.direction, out.address, out.index, out.bytes, out.result, out.elapsed_ms
            );
        }
    }
}

pub fn print_device_message(message: &DeviceMessage, format: OutputFormat) {
    let (kind, detail) = match message {
        DeviceMessage::Text(text) => (
            match text.level {
                TextLevel::Debug => "text",
                TextLevel::Error => "error",
            },
            text.text.clone(),
        ),
        DeviceMessage::Status(raw) => ("status", hex(raw)),
        DeviceMessage::Calibration { kind, samples } => {
            ("calibration", format!("kind={kind} samples={}", hex(samples)))
        }
        DeviceMessage::CopyFinished => ("copy-finished", String::new()),
    };
    match format {
        OutputFormat::Json => {
            #[derive(Serialize)]
            struct Message<'a> {
                event: &'static str,
                kind: &'a str,
                detail: &'a str,
            }
            print_json(&Message {
                event: "device",
                kind,
                detail: &detail,
            });
        }
        OutputFormat::Table | OutputFormat::Pretty => println!("device {kind}: {detail}"),
    }
}

#[derive(Serialize)]
pub struct StatsOutput {
    pub frames_received: u64,
    pub frames_sent: u64,
    pub frame_errors: u64,
    pub unmatched: u64,
    pub data_errors: u64,
    pub latency_ms: Option<f64>,
    pub rx_bytes_per_sec: f64,
    pub tx_bytes_per_sec: f64,
    pub per_message: Vec<(String, u64)>,
}

pub fn print_stats(out: &StatsOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(out),
        OutputFormat::Table => {
            let mut t = table(vec!["METRIC", "VALUE"]);
            t.add_row(vec!["frames received".to_string(), out.frames_received.to_string()]);
            t.add_row(vec!["frames sent".to_string(), out.frames_sent.to_string()]);
            t.add_row(vec!["frame errors".to_string(), out.frame_errors.to_string()]);
            t.add_row(vec!["unmatched".to_string(), out.unmatched.to_string()]);
            t.add_row(vec!["data errors".to_string(), out.data_errors.to_string()]);
            t.add_row(vec![
                "latency".to_string(),
                out.latency_ms
                    .map(|ms| format!("{ms:.1} ms"))
                    .unwrap_or_else(|| "-".to_string()),
            ]);
            t.add_row(vec!["rx rate".to_string(), format!("{:.0} B/s", out.rx_bytes_per_sec)]);
            t.add_row(vec!["tx rate".to_string(), format!("{:.0} B/s", out.tx_bytes_per_sec)]);
            for (name, count) in &out.per_message {
                t.add_row(vec![name.clone(), count.to_string()]);
            }
            println!("{t}");
        }
        OutputFormat::Pretty => {
            println!(
                "frames rx={} tx={} errors={} unmatched={} data_errors={} rx={:.0}B/s tx={:.0}B/s",
                out.frames_received,
                out.frames_sent,
                out.frame_errors,
                out.unmatched,
                out.data_errors,
                out.rx_bytes_per_sec,
                out.tx_bytes_per_sec
            );
        }
    }
}

fn hex(data: &[u8]) -> String {
    data.iter().map(|b| format!("{b:02x}")).collect()
}
