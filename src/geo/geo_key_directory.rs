//! Parses the `GeoKeyDirectoryTag` SHORT array into a lookup table of GeoTIFF configuration keys.
//!
//! Only the handful of keys most consumers reach for are promoted to named fields (model type,
//! raster type, the two citation strings, and the geographic/projected CRS type codes);
//! everything else in the directory folds into `other`.

use std::collections::HashMap;

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::value::Value;

/// The well-known GeoTIFF configuration keys this crate surfaces by name.
///
/// See <http://docs.opengeospatial.org/is/19-008r4/19-008r4.html#_requirements_class_geokeydirectorytag>.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u16)]
pub enum GeoKeyTag {
    ModelType = 1024,
    RasterType = 1025,
    Citation = 1026,
    GeographicType = 2048,
    GeogCitation = 2049,
    ProjectedType = 3072,
    ProjCitation = 3073,
}

/// A parsed `GeoKeyDirectoryTag`.
#[derive(Debug, Clone, Default)]
pub struct GeoKeyDirectory {
    model_type: Option<u16>,
    raster_type: Option<u16>,
    citation: Option<String>,
    geographic_type: Option<u16>,
    geog_citation: Option<String>,
    projected_type: Option<u16>,
    proj_citation: Option<String>,
    /// Every key not named above, by raw key id.
    other: HashMap<u16, Value>,
}

impl GeoKeyDirectory {
    pub fn model_type(&self) -> Option<u16> {
        self.model_type
    }

    pub fn raster_type(&self) -> Option<u16> {
        self.raster_type
    }

    pub fn citation(&self) -> Option<&str> {
        self.citation.as_deref()
    }

    /// The EPSG code for the geographic CRS, if this image declares one.
    pub fn geographic_type(&self) -> Option<u16> {
        self.geographic_type
    }

    pub fn geog_citation(&self) -> Option<&str> {
        self.geog_citation.as_deref()
    }

    /// The EPSG code for the projected CRS, if this image declares one.
    pub fn projected_type(&self) -> Option<u16> {
        self.projected_type
    }

    pub fn proj_citation(&self) -> Option<&str> {
        self.proj_citation.as_deref()
    }

    /// Look up a key not promoted to a named field above.
    pub fn get(&self, key_id: u16) -> Option<&Value> {
        self.other.get(&key_id)
    }

    /// Parse the three GeoTIFF tags that together encode the key directory.
    ///
    /// `geo_keys` is the resolved `GeoKeyDirectoryTag` SHORT array; `doubles` and `ascii` are the
    /// resolved `GeoDoubleParamsTag`/`GeoAsciiParamsTag` values, or empty/absent if the image
    /// doesn't carry them.
    pub fn from_tags(geo_keys: &[u16], doubles: &[f64], ascii: &str) -> Self {
        let mut dir = GeoKeyDirectory::default();
        if geo_keys.len() < 4 {
            return dir;
        }
        let num_keys = geo_keys[3] as usize;

        for i in 0..num_keys {
            let base = 4 + i * 4;
            if base + 3 >= geo_keys.len() {
                break;
            }
            let key_id = geo_keys[base];
            let location = geo_keys[base + 1];
            let count = geo_keys[base + 2] as usize;
            let value_offset = geo_keys[base + 3] as usize;

            let value = match location {
                0 => Value::Short(value_offset as u16),
                34736 => match doubles.get(value_offset) {
                    Some(d) => Value::Double(*d),
                    None => continue,
                },
                34737 => {
                    let end = (value_offset + count).min(ascii.len());
                    if value_offset >= ascii.len() {
                        continue;
                    }
                    let slice = &ascii[value_offset..end];
                    Value::Ascii(slice.trim_end_matches('|').to_string())
                }
                _ => continue,
            };

            match GeoKeyTag::try_from(key_id) {
                Ok(GeoKeyTag::ModelType) => dir.model_type = value.as_u32().map(|v| v as u16),
                Ok(GeoKeyTag::RasterType) => dir.raster_type = value.as_u32().map(|v| v as u16),
                Ok(GeoKeyTag::Citation) => {
                    dir.citation = value.as_ascii().map(str::to_string)
                }
                Ok(GeoKeyTag::GeographicType) => {
                    dir.geographic_type = value.as_u32().map(|v| v as u16)
                }
                Ok(GeoKeyTag::GeogCitation) => {
                    dir.geog_citation = value.as_ascii().map(str::to_string)
                }
                Ok(GeoKeyTag::ProjectedType) => {
                    dir.projected_type = value.as_u32().map(|v| v as u16)
                }
                Ok(GeoKeyTag::ProjCitation) => {
                    dir.proj_citation = value.as_ascii().map(str::to_string)
                }
                Err(_) => {
                    dir.other.insert(key_id, value);
                }
            }
        }

        dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_short_located_keys() {
        // header: version 1, revision 1.0, 2 keys
        let geo_keys = vec![
            1, 1, 0, 2, // header
            1024, 0, 1, 2, // ModelType = 2 (Geographic)
            2048, 0, 1, 4326, // GeographicType = EPSG:4326
        ];
        let dir = GeoKeyDirectory::from_tags(&geo_keys, &[], "");
        assert_eq!(dir.model_type(), Some(2));
        assert_eq!(dir.geographic_type(), Some(4326));
    }

    #[test]
    fn parses_ascii_located_citation() {
        let geo_keys = vec![1, 1, 0, 1, 1026, 34737, 8, 0];
        let dir = GeoKeyDirectory::from_tags(&geo_keys, &[], "WGS 84|");
        assert_eq!(dir.citation(), Some("WGS 84"));
    }

    #[test]
    fn unrecognized_key_id_falls_back_to_other() {
        let geo_keys = vec![1, 1, 0, 1, 2061, 0, 1, 7];
        let dir = GeoKeyDirectory::from_tags(&geo_keys, &[], "");
        assert_eq!(dir.get(2061).and_then(Value::as_u32), Some(7));
    }
}
