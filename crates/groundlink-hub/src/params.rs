use std::fmt::Write as _;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use groundlink_frame::message::{param, PARAMETER};
use groundlink_frame::Frame;
use tracing::{debug, warn};

use crate::error::{HubError, PayloadError, Result};
use crate::hub::{Deferred, Hub, Shared};
use crate::pending::{Completion, MatchKey};
use crate::registry::Parameter;
use crate::result::ResultCode;
use crate::router::HandlerResult;
use crate::signal::lock;
use crate::wire::{param_from_raw, param_to_raw, ParamRequest, ParamResponse};

/// Relative tolerance for parameter comparisons.
///
/// Values come back from `i32` fixed point, so exact float equality is
/// meaningless.
pub const PARAM_TOLERANCE: f64 = 1e-5;

/// True when `candidate` differs from `stored` beyond [`PARAM_TOLERANCE`].
pub fn is_changed(stored: f64, candidate: f64) -> bool {
    let tolerance = PARAM_TOLERANCE * stored.abs().max(candidate.abs());
    (stored - candidate).abs() > tolerance
}

/// How a parameter is addressed in a set request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamRef {
    Name(String),
    Number(u16),
}

impl From<&str> for ParamRef {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<String> for ParamRef {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

impl From<u16> for ParamRef {
    fn from(number: u16) -> Self {
        Self::Number(number)
    }
}

impl Hub {
    /// Ask how many parameters the device exposes.
    pub fn get_param_count(
        &self,
        callback: impl FnOnce(ResultCode, u16) + Send + 'static,
    ) -> Result<()> {
        self.request(
            MatchKey::ParamCount,
            Completion::Count(Box::new(callback)),
            PARAMETER,
            &ParamRequest::Count.encode(),
        )
    }

    /// Fetch one parameter by enumeration number.
    ///
    /// Issue one call per number and let them complete in any order; the
    /// registry accumulates the answers by name.
    pub fn get_param(
        &self,
        number: u16,
        callback: impl FnOnce(ResultCode, Option<Parameter>) + Send + 'static,
    ) -> Result<()> {
        self.request(
            MatchKey::ParamGet(number),
            Completion::Param(Box::new(callback)),
            PARAMETER,
            &ParamRequest::Get { number }.encode(),
        )
    }

    /// Write one parameter; `callback` gets the confirmed name and value.
    pub fn set_param(
        &self,
        value: f64,
        target: impl Into<ParamRef>,
        callback: impl FnOnce(ResultCode, Option<Parameter>) + Send + 'static,
    ) -> Result<()> {
        let raw = param_to_raw(value).ok_or_else(|| {
            HubError::InvalidArgument(format!("parameter value {value} is out of range"))
        })?;
        let (key, request) = match target.into() {
            ParamRef::Name(name) => {
                if name.is_empty() || name.len() > 240 {
                    return Err(HubError::InvalidArgument(format!(
                        "parameter name '{name}' has invalid length"
                    )));
                }
                (
                    MatchKey::ParamSetByName(name.clone()),
                    ParamRequest::SetByName { raw, name },
                )
            }
            ParamRef::Number(number) => (
                MatchKey::ParamSetByNumber(number),
                ParamRequest::SetByNumber { number, raw },
            ),
        };
        debug!(%key, value, "setting parameter");
        self.request(
            key,
            Completion::Param(Box::new(callback)),
            PARAMETER,
            &request.encode(),
        )
    }

    /// Enumerate every parameter: count first, then one get per number.
    ///
    /// `done` runs once after the last answer with the first failure (or
    /// `Success`) and the number of parameters received. Each answer also
    /// advances the progress counters.
    pub fn fetch_params(
        &self,
        done: impl FnOnce(ResultCode, usize) + Send + 'static,
    ) -> Result<()> {
        let hub = self.clone();
        self.get_param_count(move |result, count| {
            if !result.is_success() || count == 0 {
                done(result, 0);
                return;
            }
            hub.shared.progress.add_total(u64::from(count));
            let fetch = Arc::new(Fetch {
                remaining: AtomicUsize::new(usize::from(count)),
                received: AtomicUsize::new(0),
                failure: Mutex::new(None),
                done: Mutex::new(Some(Box::new(done))),
            });
            for number in 0..count {
                let tracker = Arc::clone(&fetch);
                let progress_hub = hub.clone();
                let issued = hub.get_param(number, move |result, _| {
                    progress_hub.shared.progress.advance(1);
                    tracker.finish_one(result);
                });
                if let Err(err) = issued {
                    warn!(number, error = %err, "parameter request not sent");
                    hub.shared.progress.advance(1);
                    fetch.finish_one(ResultCode::Error);
                }
            }
        })
    }

    /// Parameters in enumeration order.
    pub fn get_param_list(&self) -> Vec<Parameter> {
        self.registry().parameters().cloned().collect()
    }

    /// Forget every parameter before a fresh enumeration.
    pub fn clear_param_list(&self) {
        lock(&self.shared.registry).clear_params();
        self.shared.signal.notify();
    }

    /// The current parameter list as `name=value` lines.
    pub fn params_to_inf(&self) -> String {
        params_to_inf(&self.get_param_list())
    }
}

type FetchDone = Box<dyn FnOnce(ResultCode, usize) + Send>;

struct Fetch {
    remaining: AtomicUsize,
    received: AtomicUsize,
    failure: Mutex<Option<ResultCode>>,
    done: Mutex<Option<FetchDone>>,
}

impl Fetch {
    fn finish_one(&self, result: ResultCode) {
        if result.is_success() {
            self.received.fetch_add(1, Ordering::AcqRel);
        } else {
            lock(&self.failure).get_or_insert(result);
        }
        if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            let outcome = lock(&self.failure).unwrap_or(ResultCode::Success);
            let received = self.received.load(Ordering::Acquire);
            if let Some(done) = lock(&self.done).take() {
                done(outcome, received);
            }
        }
    }
}

pub(crate) fn on_param_count(shared: &Shared, frame: &Frame) -> HandlerResult {
    let ParamResponse::Count { result, count } = ParamResponse::decode(&frame.payload)? else {
        return Err(PayloadError::UnknownSubtype {
            message: "PARAMETER",
            subtype: frame.payload.first().copied().unwrap_or_default(),
        });
    };
    if result.is_success() {
        lock(&shared.registry).set_param_count(count);
    }

    let mut deferred = Deferred::new();
    match shared.complete(&MatchKey::ParamCount) {
        Some(completion) => deferred.call(completion.with_count(result, count)),
        None => shared.note_unmatched(frame.id, "parameter count"),
    }
    deferred.changed();
    Ok(deferred)
}

pub(crate) fn on_param_value(shared: &Shared, frame: &Frame) -> HandlerResult {
    let ParamResponse::Value {
        subtype,
        result,
        number,
        raw,
        name,
    } = ParamResponse::decode(&frame.payload)?
    else {
        return Err(PayloadError::UnknownSubtype {
            message: "PARAMETER",
            subtype: frame.payload.first().copied().unwrap_or_default(),
        });
    };

    let parameter = if result.is_success() && !name.is_empty() {
        let value = param_from_raw(raw);
        lock(&shared.registry).apply_param(number, &name, value);
        Some(Parameter {
            number,
            name: name.clone(),
            value,
        })
    } else {
        debug!(number, name = %name, %result, "parameter request failed");
        None
    };

    let key = match subtype {
        param::GET => MatchKey::ParamGet(number),
        param::SET_BY_NAME => MatchKey::ParamSetByName(name),
        _ => MatchKey::ParamSetByNumber(number),
    };
    let mut deferred = Deferred::new();
    match shared.complete(&key) {
        Some(completion) => deferred.call(completion.with_param(result, parameter)),
        None => shared.note_unmatched(frame.id, "parameter value"),
    }
    deferred.changed();
    Ok(deferred)
}

/// Render parameters as `name=value` lines.
pub fn params_to_inf<'a>(params: impl IntoIterator<Item = &'a Parameter>) -> String {
    let mut out = String::new();
    for p in params {
        let _ = writeln!(out, "{}={}", p.name, p.value);
    }
    out
}

/// Parse `name=value` lines; `#` and `;` start comment lines.
pub fn params_from_inf(text: &str) -> Result<Vec<(String, f64)>> {
    let mut entries = Vec::new();
    for (number, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        let (name, value) = line.split_once('=').ok_or_else(|| {
            HubError::InvalidArgument(format!("line {}: expected name=value", number + 1))
        })?;
        let name = name.trim();
        if name.is_empty() {
            return Err(HubError::InvalidArgument(format!(
                "line {}: empty parameter name",
                number + 1
            )));
        }
        let value: f64 = value.trim().parse().map_err(|_| {
            HubError::InvalidArgument(format!(
                "line {}: '{}' is not a number",
                number + 1,
                value.trim()
            ))
        })?;
        entries.push((name.to_string(), value));
    }
    Ok(entries)
}

/// One loaded edit waiting to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingEdit {
    pub name: String,
    pub value: f64,
    pub selected: bool,
}

/// A set of parameter edits that can be marked and flushed to the device.
///
/// Clones share the same set, so confirmations arriving on the dispatcher
/// thread remove entries a front end is looking at.
#[derive(Debug, Clone, Default)]
pub struct PendingEdits {
    entries: Arc<Mutex<Vec<PendingEdit>>>,
}

impl PendingEdits {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load edits from an INF document, all selected.
    pub fn from_inf(text: &str) -> Result<Self> {
        let edits = Self::new();
        for (name, value) in params_from_inf(text)? {
            edits.insert(name, value);
        }
        Ok(edits)
    }

    /// Add or replace an edit; it starts selected.
    pub fn insert(&self, name: impl Into<String>, value: f64) {
        let name = name.into();
        let mut entries = lock(&self.entries);
        match entries.iter_mut().find(|e| e.name == name) {
            Some(entry) => {
                entry.value = value;
                entry.selected = true;
            }
            None => entries.push(PendingEdit {
                name,
                value,
                selected: true,
            }),
        }
    }

    pub fn entries(&self) -> Vec<PendingEdit> {
        lock(&self.entries).clone()
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.entries).is_empty()
    }

    pub fn selected(&self) -> usize {
        lock(&self.entries).iter().filter(|e| e.selected).count()
    }

    /// Flip one mark; returns the new state, or `None` for an unknown name.
    pub fn toggle(&self, name: &str) -> Option<bool> {
        let mut entries = lock(&self.entries);
        let entry = entries.iter_mut().find(|e| e.name == name)?;
        entry.selected = !entry.selected;
        Some(entry.selected)
    }

    pub fn invert(&self) {
        for entry in lock(&self.entries).iter_mut() {
            entry.selected = !entry.selected;
        }
    }

    /// Edits whose value differs from the device's, or that the device lacks.
    pub fn changed_against(&self, params: &[Parameter]) -> Vec<PendingEdit> {
        lock(&self.entries)
            .iter()
            .filter(|e| {
                params
                    .iter()
                    .find(|p| p.name == e.name)
                    .map_or(true, |p| is_changed(p.value, e.value))
            })
            .cloned()
            .collect()
    }

    /// Select exactly the edits that would change something; returns how many.
    pub fn select_changed(&self, params: &[Parameter]) -> usize {
        let changed: Vec<String> = self
            .changed_against(params)
            .into_iter()
            .map(|e| e.name)
            .collect();
        let mut entries = lock(&self.entries);
        for entry in entries.iter_mut() {
            entry.selected = changed.contains(&entry.name);
        }
        changed.len()
    }

    pub fn clear(&self) {
        lock(&self.entries).clear();
    }

    /// Write every selected edit with its own set request.
    ///
    /// Progress is reset first. Each confirmation removes its entry and
    /// reports through `on_result`; once no selected entry remains the whole
    /// set is cleared. An edit whose request cannot be sent is reported
    /// immediately with the matching failure code and stays selected, and
    /// the remaining edits are still sent. With nothing selected the set is
    /// cleared immediately.
    ///
    /// Returns the number of selected edits; `on_result` runs exactly once
    /// for each.
    pub fn flush(
        &self,
        hub: &Hub,
        on_result: impl Fn(&str, ResultCode) + Send + Sync + 'static,
    ) -> usize {
        hub.reset_progress();
        let selected: Vec<(String, f64)> = lock(&self.entries)
            .iter()
            .filter(|e| e.selected)
            .map(|e| (e.name.clone(), e.value))
            .collect();
        if selected.is_empty() {
            self.clear();
            return 0;
        }

        let on_result = Arc::new(on_result);
        let total = selected.len();
        for (name, value) in selected {
            let entries = Arc::clone(&self.entries);
            let reporter = Arc::clone(&on_result);
            let key = name.clone();
            let sent = hub.set_param(value, name.clone(), move |result, _| {
                {
                    let mut entries = lock(&entries);
                    entries.retain(|e| e.name != key);
                    if !entries.iter().any(|e| e.selected) {
                        entries.clear();
                    }
                }
                reporter(&key, result);
            });
            if let Err(err) = sent {
                warn!(name = %name, error = %err, "parameter edit not sent");
                on_result(&name, send_failure(&err));
            }
        }
        total
    }
}

fn send_failure(err: &HubError) -> ResultCode {
    match err {
        HubError::InvalidArgument(_) => ResultCode::InvalidArgument,
        HubError::RequestPending(_) => ResultCode::Busy,
        HubError::Disconnected | HubError::Transport(_) | HubError::Frame(_) | HubError::Io(_) => {
            ResultCode::Disconnected
        }
        _ => ResultCode::Error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn param(number: u16, name: &str, value: f64) -> Parameter {
        Parameter {
            number,
            name: name.into(),
            value,
        }
    }

    #[test]
    fn change_detection_uses_relative_tolerance() {
        assert!(!is_changed(10.0, 10.000001));
        assert!(!is_changed(10.000001, 10.0));
        assert!(is_changed(10.0, 10.1));
        assert!(is_changed(10.1, 10.0));
        assert!(!is_changed(0.0, 0.0));
        assert!(is_changed(0.0, 1e-9));
        assert!(!is_changed(-250.0, -250.0001));
    }

    #[test]
    fn inf_roundtrip_keeps_order() {
        let params = vec![param(0, "ROLL_P", 0.25), param(1, "YAW_D", -1.5)];
        let text = params_to_inf(&params);
        assert_eq!(text, "ROLL_P=0.25\nYAW_D=-1.5\n");

        let parsed = params_from_inf(&text).unwrap();
        assert_eq!(
            parsed,
            vec![("ROLL_P".to_string(), 0.25), ("YAW_D".to_string(), -1.5)]
        );
    }

    #[test]
    fn inf_skips_comments_and_blank_lines() {
        let text = "# saved\n\n; old\n  PITCH_I = 0.002 \n";
        let parsed = params_from_inf(text).unwrap();
        assert_eq!(parsed, vec![("PITCH_I".to_string(), 0.002)]);
    }

    #[test]
    fn inf_rejects_bad_lines() {
        let err = params_from_inf("ROLL_P=0.1\nnonsense\n").unwrap_err();
        assert!(matches!(err, HubError::InvalidArgument(ref m) if m.starts_with("line 2")));
        assert!(params_from_inf("=1").is_err());
        assert!(params_from_inf("A=abc").is_err());
    }

    #[test]
    fn param_ref_conversions() {
        assert_eq!(ParamRef::from("KP"), ParamRef::Name("KP".into()));
        assert_eq!(ParamRef::from(String::from("KI")), ParamRef::Name("KI".into()));
        assert_eq!(ParamRef::from(7u16), ParamRef::Number(7));
    }

    #[test]
    fn edits_marks() {
        let edits = PendingEdits::from_inf("A=1\nB=2\nC=3\n").unwrap();
        assert_eq!(edits.len(), 3);
        assert_eq!(edits.selected(), 3);

        assert_eq!(edits.toggle("B"), Some(false));
        assert_eq!(edits.toggle("Z"), None);
        assert_eq!(edits.selected(), 2);

        edits.invert();
        let marks: Vec<_> = edits.entries().iter().map(|e| e.selected).collect();
        assert_eq!(marks, vec![false, true, false]);

        edits.insert("A", 5.0);
        assert_eq!(edits.len(), 3);
        assert!(edits.entries()[0].selected);
        assert_eq!(edits.entries()[0].value, 5.0);
    }

    #[test]
    fn edits_changed_against_device() {
        let edits = PendingEdits::from_inf("A=1.000001\nB=2.5\nC=3\n").unwrap();
        let device = vec![param(0, "A", 1.0), param(1, "B", 2.0)];

        let changed: Vec<_> = edits
            .changed_against(&device)
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(changed, vec!["B", "C"]);

        assert_eq!(edits.select_changed(&device), 2);
        let marks: Vec<_> = edits.entries().iter().map(|e| e.selected).collect();
        assert_eq!(marks, vec![false, true, true]);
    }
}
