//! # Map and dataset files
//!
//! Maps and datasets are stored as JSON documents. Floating-point values are
//! written with shortest round-trip formatting and parsed with
//! `float_roundtrip`, so a save/load cycle reproduces every pixel and flux
//! bit for bit.
//!
//! File names follow two rules, both handled by [`StorageConfig::resolve`]:
//!
//! * a name without extension gets the configured one (`json` by default),
//! * a relative name is taken relative to the configured root directory.
//!
//! Everything read from disk is validated before it is returned.
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};

use camino::{Utf8Path, Utf8PathBuf};
use log::debug;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::dataset::Dataset;
use crate::doppler_errors::DopplerError;
use crate::map::Map;

/// Where map and dataset files live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    /// Directory relative names are resolved against
    pub root: Utf8PathBuf,
    /// Extension appended to names that have none, without the dot
    pub extension: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            root: Utf8PathBuf::from("."),
            extension: "json".into(),
        }
    }
}

impl StorageConfig {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        StorageConfig {
            root: root.into(),
            ..Default::default()
        }
    }

    pub fn with_extension(mut self, extension: &str) -> Self {
        self.extension = extension.trim_start_matches('.').to_string();
        self
    }

    /// Full path of the file called `name`.
    ///
    /// ```rust
    /// use doppler::storage::StorageConfig;
    ///
    /// let store = StorageConfig::new("/data/wz_sge");
    /// assert_eq!(store.resolve("map").as_str(), "/data/wz_sge/map.json");
    /// assert_eq!(store.resolve("/tmp/run.v2").as_str(), "/tmp/run.v2");
    /// ```
    pub fn resolve(&self, name: &str) -> Utf8PathBuf {
        let mut path = Utf8PathBuf::from(name);
        if path.extension().is_none() && !self.extension.is_empty() {
            path.set_extension(&self.extension);
        }
        if path.is_relative() {
            self.root.join(path)
        } else {
            path
        }
    }
}

fn read_json<T: DeserializeOwned>(path: &Utf8Path) -> Result<T, DopplerError> {
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}

fn write_json<T: Serialize>(path: &Utf8Path, value: &T) -> Result<(), DopplerError> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

/// Read and validate the map called `name`.
pub fn load_map(store: &StorageConfig, name: &str) -> Result<Map, DopplerError> {
    let path = store.resolve(name);
    debug!("reading map {path}");
    let map: Map = read_json(&path)?;
    map.validate()?;
    Ok(map)
}

/// Write `map` under `name` and return the path written.
pub fn save_map(store: &StorageConfig, name: &str, map: &Map) -> Result<Utf8PathBuf, DopplerError> {
    let path = store.resolve(name);
    debug!("writing map {path}");
    write_json(&path, map)?;
    Ok(path)
}

/// Read and validate the dataset called `name`.
pub fn load_data(store: &StorageConfig, name: &str) -> Result<Dataset, DopplerError> {
    let path = store.resolve(name);
    debug!("reading data {path}");
    let data: Dataset = read_json(&path)?;
    data.validate()?;
    Ok(data)
}

/// Write `data` under `name` and return the path written.
pub fn save_data(
    store: &StorageConfig,
    name: &str,
    data: &Dataset,
) -> Result<Utf8PathBuf, DopplerError> {
    let path = store.resolve(name);
    debug!("writing data {path}");
    write_json(&path, data)?;
    Ok(path)
}
