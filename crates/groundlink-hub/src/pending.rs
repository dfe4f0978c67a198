use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

use crate::error::{HubError, Result};
use crate::registry::Parameter;
use crate::result::ResultCode;

/// A unit of work run on the dispatcher thread once every lock is released.
pub(crate) type Job = Box<dyn FnOnce() + Send>;

/// What a response must carry to resolve an outstanding request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MatchKey {
    /// System command, by command code.
    Command(u8),
    ParamCount,
    ParamGet(u16),
    ParamSetByName(String),
    ParamSetByNumber(u16),
    /// Field read of one component.
    Fields(u8),
    /// Field write, by component address and field index.
    FieldWrite(u8, u8),
}

impl fmt::Display for MatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Command(code) => write!(f, "command {code}"),
            Self::ParamCount => f.write_str("parameter count"),
            Self::ParamGet(number) => write!(f, "get parameter #{number}"),
            Self::ParamSetByName(name) => write!(f, "set parameter '{name}'"),
            Self::ParamSetByNumber(number) => write!(f, "set parameter #{number}"),
            Self::Fields(address) => write!(f, "read fields of component {address}"),
            Self::FieldWrite(address, index) => {
                write!(f, "write field {index} of component {address}")
            }
        }
    }
}

pub type ResultCallback = Box<dyn FnOnce(ResultCode) + Send>;
pub type CountCallback = Box<dyn FnOnce(ResultCode, u16) + Send>;
pub type ParamCallback = Box<dyn FnOnce(ResultCode, Option<Parameter>) + Send>;

/// The callback of an outstanding request, typed by what the answer carries.
pub(crate) enum Completion {
    Result(ResultCallback),
    Count(CountCallback),
    Param(ParamCallback),
}

impl Completion {
    /// Resolve with an outcome and no payload.
    pub(crate) fn fail(self, result: ResultCode) -> Job {
        match self {
            Self::Result(cb) => Box::new(move || cb(result)),
            Self::Count(cb) => Box::new(move || cb(result, 0)),
            Self::Param(cb) => Box::new(move || cb(result, None)),
        }
    }

    pub(crate) fn with_result(self, result: ResultCode) -> Job {
        self.fail(result)
    }

    pub(crate) fn with_count(self, result: ResultCode, count: u16) -> Job {
        match self {
            Self::Count(cb) => Box::new(move || cb(result, count)),
            other => other.fail(result),
        }
    }

    pub(crate) fn with_param(self, result: ResultCode, param: Option<Parameter>) -> Job {
        match self {
            Self::Param(cb) => Box::new(move || cb(result, param)),
            other => other.fail(result),
        }
    }
}

pub(crate) struct Pending {
    pub(crate) issued_at: Instant,
    pub(crate) completion: Completion,
}

/// Outstanding requests, at most one per key.
#[derive(Default)]
pub(crate) struct PendingTable {
    entries: HashMap<MatchKey, Pending>,
}

impl PendingTable {
    pub(crate) fn insert(
        &mut self,
        key: MatchKey,
        completion: Completion,
        now: Instant,
    ) -> Result<()> {
        if self.entries.contains_key(&key) {
            return Err(HubError::RequestPending(key.to_string()));
        }
        self.entries.insert(
            key,
            Pending {
                issued_at: now,
                completion,
            },
        );
        Ok(())
    }

    pub(crate) fn take(&mut self, key: &MatchKey) -> Option<Pending> {
        self.entries.remove(key)
    }

    pub(crate) fn contains(&self, key: &MatchKey) -> bool {
        self.entries.contains_key(key)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Remove every request older than `timeout`.
    pub(crate) fn expire(
        &mut self,
        now: Instant,
        timeout: Duration,
    ) -> Vec<(MatchKey, Completion)> {
        let expired: Vec<MatchKey> = self
            .entries
            .iter()
            .filter(|(_, p)| now.saturating_duration_since(p.issued_at) >= timeout)
            .map(|(k, _)| k.clone())
            .collect();
        expired
            .into_iter()
            .filter_map(|key| self.entries.remove(&key).map(|p| (key, p.completion)))
            .collect()
    }

    /// Abandon everything; callbacks are dropped without being called.
    pub(crate) fn clear(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        count
    }
}
