//! Read-modify-write access to Java-style `.properties` files.
//!
//! hadoop-unit reads its settings from flat `key=value` files. The fixture
//! patches them before launch and keeps the merged mapping so ports chosen
//! there can be looked up later. Parsing and escaping are delegated to
//! `java-properties`, which reads and writes ISO-8859-1 like the JDK.
use std::{
    fs::File,
    io::{BufReader, Read, Write},
    path::{Path, PathBuf},
};

use java_properties::{PropertiesIter, PropertiesWriter};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::PropertiesError;

/// Insertion-ordered key/value mapping loaded from a property file.
///
/// Iteration follows file order, with keys added by an overlay appended at the
/// end. Replacing a key keeps its original position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties {
    entries: Vec<(String, String)>,
}

impl Properties {
    /// Creates an empty mapping.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value stored for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Inserts or replaces a value, returning the previous one.
    pub fn insert(
        &mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Option<String> {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => Some(std::mem::replace(existing, value)),
            None => {
                self.entries.push((key, value));
                None
            }
        }
    }

    /// Applies every pair of `overlay` on top of the current mapping.
    pub fn apply<I, K, V>(&mut self, overlay: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (key, value) in overlay {
            self.insert(key, value);
        }
    }

    /// Iterates entries in file order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Reads the `.properties` format from `reader`. Later duplicates of a
    /// key replace the earlier value in place.
    pub fn read<R: Read>(reader: R) -> Result<Self, java_properties::PropertiesError> {
        let mut properties = Self::new();
        PropertiesIter::new(reader).read_into(|key, value| {
            properties.insert(key, value);
        })?;
        Ok(properties)
    }

    /// Writes every entry in order, escaping as needed.
    pub fn write<W: Write>(&self, writer: W) -> Result<(), java_properties::PropertiesError> {
        let mut out = PropertiesWriter::new(writer);
        for (key, value) in &self.entries {
            out.write(key, value)?;
        }
        out.finish()
    }
}

impl<K, V> FromIterator<(K, V)> for Properties
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut properties = Self::new();
        properties.apply(iter);
        properties
    }
}

/// Loads a property file into memory.
pub fn load(path: &Path) -> Result<Properties, PropertiesError> {
    let file = File::open(path).map_err(|source| PropertiesError::ReadError {
        path: path.to_path_buf(),
        source,
    })?;
    Properties::read(BufReader::new(file)).map_err(|source| PropertiesError::Format {
        path: path.to_path_buf(),
        source,
    })
}

/// Writes the whole mapping to `path`, replacing the file in one rename.
pub fn store(path: &Path, properties: &Properties) -> Result<(), PropertiesError> {
    let write_error = |source: std::io::Error| PropertiesError::WriteError {
        path: path.to_path_buf(),
        source,
    };

    let parent = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };

    let mut staged = NamedTempFile::new_in(&parent).map_err(write_error)?;
    properties
        .write(&mut staged)
        .map_err(|source| PropertiesError::Format {
            path: path.to_path_buf(),
            source,
        })?;
    staged.as_file().sync_all().map_err(write_error)?;
    staged.persist(path).map_err(|err| write_error(err.error))?;
    Ok(())
}

/// Loads `path`, applies `overlay`, writes the merged mapping back and returns it.
///
/// Existing keys are overwritten in place and new keys are appended. The file
/// must already exist.
pub fn modify<I, K, V>(path: &Path, overlay: I) -> Result<Properties, PropertiesError>
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    let mut properties = load(path)?;
    properties.apply(overlay);
    store(path, &properties)?;
    debug!(
        "Updated {} ({} entries)",
        path.display(),
        properties.len()
    );
    Ok(properties)
}
