//! # Doppler maps
//!
//! A [`Map`] is a collection of one or more [`Image`]s reconstructed jointly
//! against a single dataset, plus free-form provenance metadata carried in a
//! [`MapHeader`].
//!
//! Supported configurations:
//!
//! 1. different images for different lines,
//! 2. one image shared by several lines with per-line scale factors,
//! 3. stacked (3D) images.
//!
//! ## Example
//!
//! ```rust
//! use doppler::map::{Dimensions, Image, Line, Map, MapHeader};
//!
//! let n = 50;
//! let image = Image::new(
//!     vec![1.0; n * n],
//!     Dimensions::Flat { nx: n, ny: n },
//!     40.0,
//!     vec![Line::scaled(486.2, 100.0, 1.0), Line::scaled(434.0, 100.0, 0.5)],
//! )
//! .unwrap();
//!
//! let mut header = MapHeader::default();
//! header.object = Some("IP Peg".into());
//! let map = Map::new(header, vec![image]).unwrap();
//! assert_eq!(map.total_pixels(), n * n);
//! ```
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::doppler_errors::DopplerError;

pub mod default_image;
pub mod image;

pub use default_image::DefaultImage;
pub use image::{Dimensions, Image, Line};

/// Provenance metadata of a [`Map`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MapHeader {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<String>,
    /// Free-form key/value records (telescope, instrument, ...)
    #[serde(default)]
    pub cards: BTreeMap<String, String>,
    /// One entry per processing step, oldest first
    #[serde(default)]
    pub history: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Map {
    #[serde(default)]
    pub header: MapHeader,
    images: Vec<Image>,
}

impl Map {
    pub fn new(header: MapHeader, images: Vec<Image>) -> Result<Self, DopplerError> {
        let map = Map { header, images };
        map.validate()?;
        Ok(map)
    }

    pub fn validate(&self) -> Result<(), DopplerError> {
        if self.images.is_empty() {
            return Err(DopplerError::InvalidMap(
                "a map needs at least one image".into(),
            ));
        }
        for (i, image) in self.images.iter().enumerate() {
            image.validate().map_err(|e| match e {
                DopplerError::InvalidImage(msg) => {
                    DopplerError::InvalidMap(format!("image {i}: {msg}"))
                }
                other => other,
            })?;
        }
        Ok(())
    }

    pub fn images(&self) -> &[Image] {
        &self.images
    }

    pub fn images_mut(&mut self) -> &mut [Image] {
        &mut self.images
    }

    /// Number of pixels summed over every image.
    pub fn total_pixels(&self) -> usize {
        self.images.iter().map(|im| im.dims().npix()).sum()
    }

    /// Concatenate the pixels of every image, in image order.
    pub(crate) fn flatten(&self) -> Vec<f64> {
        let mut out = Vec::with_capacity(self.total_pixels());
        for image in &self.images {
            out.extend_from_slice(image.data());
        }
        out
    }

    /// Inverse of [`Map::flatten`].
    pub(crate) fn scatter(&mut self, values: &[f64]) {
        let mut offset = 0;
        for image in &mut self.images {
            let data = image.data_mut();
            let n = data.len();
            data.copy_from_slice(&values[offset..offset + n]);
            offset += n;
        }
    }
}
