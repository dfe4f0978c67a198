//! On-disk cache of component descriptions.
//!
//! A component's descriptors are fully determined by its `(kind, hash)`
//! pair, so once one has been described the answer is stored as JSON and
//! later sessions skip the describe round-trip.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;
use crate::registry::{Component, Field, FileStream};

/// Everything needed to rebuild a described component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedComponent {
    pub kind: u16,
    pub hash: u32,
    pub name: String,
    pub hw_version: (u8, u8),
    pub sw_version: (u8, u8, u8),
    pub fields: Vec<Field>,
    pub files: Vec<FileStream>,
}

impl CachedComponent {
    pub fn from_component(component: &Component) -> Self {
        Self {
            kind: component.kind,
            hash: component.hash,
            name: component.name.clone(),
            hw_version: component.hw_version,
            sw_version: component.sw_version,
            fields: component
                .fields
                .iter()
                .cloned()
                .map(|mut f| {
                    f.value = None;
                    f
                })
                .collect(),
            files: component
                .files
                .values()
                .cloned()
                .map(|mut s| {
                    s.data = None;
                    s
                })
                .collect(),
        }
    }

    /// False when a field's kind cannot have its declared size, which the
    /// wire decoder would have rejected.
    pub fn is_valid(&self) -> bool {
        self.fields.iter().all(|f| f.kind.accepts_size(f.size))
    }

    /// Fill `component` with the cached descriptors.
    ///
    /// Returns true when it is fully described afterwards. Nothing is
    /// touched if the identity does not match or the entry is invalid.
    pub(crate) fn restore(&self, component: &mut Component) -> bool {
        if component.kind != self.kind || component.hash != self.hash || !self.is_valid() {
            return false;
        }
        for field in &self.fields {
            component.insert_field(field.clone());
        }
        for stream in &self.files {
            let mut stream = stream.clone();
            stream.address = component.address;
            component.insert_stream(stream);
        }
        component.is_described()
    }
}

/// Directory of `<kind>-<hash>.json` description files.
#[derive(Debug, Clone)]
pub struct ComponentCache {
    dir: PathBuf,
}

impl ComponentCache {
    /// Use `dir`, creating it if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, kind: u16, hash: u32) -> PathBuf {
        self.dir.join(format!("{kind:04x}-{hash:08x}.json"))
    }

    /// Look up a description; `Ok(None)` when nothing is cached.
    pub fn load(&self, kind: u16, hash: u32) -> Result<Option<CachedComponent>> {
        let path = self.path(kind, hash);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let entry: CachedComponent = serde_json::from_str(&text)?;
        if entry.kind != kind || entry.hash != hash {
            debug!(path = %path.display(), "cache entry identity mismatch");
            return Ok(None);
        }
        if !entry.is_valid() {
            warn!(path = %path.display(), "cache entry has invalid field sizes");
            return Ok(None);
        }
        Ok(Some(entry))
    }

    /// Write a description, replacing any previous one atomically.
    pub fn store(&self, entry: &CachedComponent) -> Result<()> {
        let path = self.path(entry.kind, entry.hash);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(entry)?)?;
        fs::rename(&tmp, &path)?;
        debug!(path = %path.display(), "component description cached");
        Ok(())
    }
}
