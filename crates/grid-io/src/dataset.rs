//! Dataset attributes stored alongside the Zarr array.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::chunk::AxisCoords;
use crate::error::{GridIoError, Result};

/// Attributes describing the variable and axes of a dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetAttributes {
    pub variable: String,
    /// Axis names in array order.
    pub dimensions: Vec<String>,
    /// Coordinate values per axis name.
    pub coordinates: BTreeMap<String, Vec<f64>>,
    /// Units per axis name, plus the variable's own units under its name.
    #[serde(default)]
    pub units: BTreeMap<String, String>,
}

impl DatasetAttributes {
    pub fn from_axes(variable: &str, axes: &[AxisCoords], units: Option<&str>) -> Self {
        let mut coordinates = BTreeMap::new();
        let mut unit_map = BTreeMap::new();
        for axis in axes {
            coordinates.insert(axis.name.clone(), axis.values.clone());
            if let Some(u) = &axis.units {
                unit_map.insert(axis.name.clone(), u.clone());
            }
        }
        if let Some(u) = units {
            unit_map.insert(variable.to_string(), u.to_string());
        }
        Self {
            variable: variable.to_string(),
            dimensions: axes.iter().map(|a| a.name.clone()).collect(),
            coordinates,
            units: unit_map,
        }
    }

    pub fn from_json(uri: &str, attrs: &serde_json::Map<String, serde_json::Value>) -> Result<Self> {
        serde_json::from_value(serde_json::Value::Object(attrs.clone()))
            .map_err(|e| GridIoError::invalid_metadata(uri, e))
    }

    pub fn to_json(&self) -> serde_json::Map<String, serde_json::Value> {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        }
    }

    /// Axis coordinates in array order, checked against the array shape.
    pub fn axes(&self, uri: &str, shape: &[u64]) -> Result<Vec<AxisCoords>> {
        if self.dimensions.len() != shape.len() {
            return Err(GridIoError::invalid_metadata(
                uri,
                format!(
                    "{} dimension names for a {}-dimensional array",
                    self.dimensions.len(),
                    shape.len()
                ),
            ));
        }
        self.dimensions
            .iter()
            .zip(shape)
            .map(|(name, &len)| {
                let values = self.coordinates.get(name).cloned().unwrap_or_else(|| {
                    // Axes without stored coordinates are indexed positionally
                    (0..len).map(|i| i as f64).collect()
                });
                if values.len() as u64 != len {
                    return Err(GridIoError::invalid_metadata(
                        uri,
                        format!(
                            "axis '{}' has {} coordinates but length {}",
                            name,
                            values.len(),
                            len
                        ),
                    ));
                }
                let mut axis = AxisCoords::new(name.clone(), values);
                axis.units = self.units.get(name).cloned();
                Ok(axis)
            })
            .collect()
    }

    pub fn variable_units(&self) -> Option<String> {
        self.units.get(&self.variable).cloned()
    }
}
