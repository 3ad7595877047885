use serde_yaml::{Mapping, Value};
use std::{
    collections::HashSet,
    fs::{self, File},
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
};

use crate::{
    error::{Error, Result},
    node_record::{NodeRecord, NodeRole},
};

pub const CLUSTER_FILE: &str = "cluster.yaml";
pub const INFO_FILE: &str = "info.yaml";

const ID_KEY: &str = "ID";
const ADDRESS_KEY: &str = "Address";
const ROLE_KEY: &str = "Role";

/// File-resident membership records of the local node, kept in the engine's
/// data directory.
///
/// `cluster.yaml` holds the ordered member list and `info.yaml` the record
/// of the node itself. Both files are also read by the engine on startup, so
/// the layout must stay compatible with it.
#[derive(Debug, Clone)]
pub struct MembershipStore {
    dir: PathBuf,
}

impl MembershipStore {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn cluster_path(&self) -> PathBuf {
        self.dir.join(CLUSTER_FILE)
    }

    pub fn info_path(&self) -> PathBuf {
        self.dir.join(INFO_FILE)
    }

    /// Reads the member list. A missing file is an empty membership.
    pub fn load(&self) -> Result<Vec<NodeRecord>> {
        match read_optional(&self.cluster_path())? {
            Some(content) if !content.trim().is_empty() => Ok(serde_yaml::from_str(&content)?),
            _ => Ok(Vec::new()),
        }
    }

    /// Atomically replaces the member list.
    pub fn save(&self, records: &[NodeRecord]) -> Result<()> {
        validate_records(records)?;
        let yaml = serde_yaml::to_string(records)?;
        write_atomic(&self.cluster_path(), yaml.as_bytes())
    }

    pub fn load_self(&self) -> Result<Option<NodeRecord>> {
        match read_optional(&self.info_path())? {
            Some(content) if !content.trim().is_empty() => {
                Ok(Some(serde_yaml::from_str(&content)?))
            }
            _ => Ok(None),
        }
    }

    /// Replaces the `ID` and `Address` of the self record. Every other key of
    /// the file is written back unchanged, including keys owned by the engine.
    pub fn rewrite_self(&self, new_id: u64, new_address: &str) -> Result<()> {
        let mut mapping = match read_optional(&self.info_path())? {
            Some(content) => match serde_yaml::from_str::<Value>(&content)? {
                Value::Mapping(mapping) => mapping,
                Value::Null => Mapping::new(),
                _ => {
                    return Err(Error::InvalidMembership(format!(
                        "{} is not a mapping",
                        self.info_path().display()
                    )))
                }
            },
            None => Mapping::new(),
        };

        mapping.insert(Value::from(ID_KEY), Value::from(new_id));
        mapping.insert(Value::from(ADDRESS_KEY), Value::from(new_address));
        if !mapping.contains_key(ROLE_KEY) {
            mapping.insert(Value::from(ROLE_KEY), Value::from(u8::from(NodeRole::Voter)));
        }

        let yaml = serde_yaml::to_string(&mapping)?;
        write_atomic(&self.info_path(), yaml.as_bytes())
    }

    /// Removes the solo-era membership files. Returns true if any file existed.
    pub fn discard_solo_files(&self) -> Result<bool> {
        let mut removed = false;
        for path in [self.cluster_path(), self.info_path()] {
            match fs::remove_file(&path) {
                Ok(()) => removed = true,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(removed)
    }
}

fn validate_records(records: &[NodeRecord]) -> Result<()> {
    let mut addresses = HashSet::with_capacity(records.len());
    for record in records {
        if !addresses.insert(record.address.as_str()) {
            return Err(Error::InvalidMembership(format!(
                "duplicate address {}",
                record.address
            )));
        }
        if !record.has_derived_id() {
            return Err(Error::InvalidMembership(format!(
                "id {} does not belong to address {}",
                record.id, record.address
            )));
        }
    }
    Ok(())
}

fn read_optional(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Writes to a sibling temporary file and renames it over `path`.
fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| Error::Config(format!("invalid file path {}", path.display())))?;
    let tmp_path = dir.join(format!(".{}.tmp", file_name));

    {
        let mut file = File::create(&tmp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
    }
    fs::rename(&tmp_path, path)?;

    #[cfg(unix)]
    File::open(dir)?.sync_all()?;

    Ok(())
}
