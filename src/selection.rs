//! Dependent device-type / measurement / device selection.
//!
//! Each change returns a fresh [`Selection`]; callers pick the derive function
//! matching the field the operator touched.

use tracing::warn;

use crate::types::DeviceTypeMapping;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Uninitialized,
    PartiallyLoaded,
    FullyLoaded,
    UserModified,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Selection {
    pub phase: Phase,
    pub device_type_list: Vec<String>,
    pub device_type: Option<String>,
    pub measurement_list: Vec<String>,
    pub measurement: Option<String>,
    pub device_list: Vec<String>,
    pub device: Option<String>,
}

/// Fully resolved selection, ready to parameterize a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRef {
    pub device_type: String,
    pub measurement: String,
    pub device: String,
}

fn measurements_of(mapping: &DeviceTypeMapping, device_type: &str) -> Vec<String> {
    mapping
        .get(device_type)
        .map(|m| m.keys().cloned().collect())
        .unwrap_or_default()
}

fn devices_of(mapping: &DeviceTypeMapping, device_type: &str, measurement: &str) -> Vec<String> {
    mapping
        .get(device_type)
        .and_then(|m| m.get(measurement))
        .cloned()
        .unwrap_or_default()
}

impl Selection {
    /// Runs the whole cascade from a freshly loaded catalog.
    pub fn from_mapping(mapping: &DeviceTypeMapping) -> Self {
        let device_type_list: Vec<String> = mapping.keys().cloned().collect();
        let Some(first) = device_type_list.first().cloned() else {
            return Selection::default();
        };

        let base = Selection {
            phase: Phase::PartiallyLoaded,
            device_type_list,
            ..Selection::default()
        };
        let mut selection = base.cascade_device_type(mapping, first);
        selection.phase = if selection.device.is_some() {
            Phase::FullyLoaded
        } else {
            Phase::PartiallyLoaded
        };
        selection
    }

    /// Recomputes the measurement and device levels for a new device type.
    pub fn derive_from_device_type(&self, mapping: &DeviceTypeMapping, device_type: &str) -> Self {
        if !self.device_type_list.iter().any(|d| d == device_type) {
            warn!(device_type, "ignoring unknown device type");
            return self.clone();
        }
        let mut next = self.cascade_device_type(mapping, device_type.to_string());
        next.phase = Phase::UserModified;
        next
    }

    /// Recomputes the device level for a new measurement.
    pub fn derive_from_measurement(&self, mapping: &DeviceTypeMapping, measurement: &str) -> Self {
        let (Some(device_type), true) = (
            self.device_type.as_deref(),
            self.measurement_list.iter().any(|m| m == measurement),
        ) else {
            warn!(measurement, "ignoring unknown measurement");
            return self.clone();
        };
        let device_list = devices_of(mapping, device_type, measurement);
        Selection {
            phase: Phase::UserModified,
            measurement: Some(measurement.to_string()),
            device: device_list.first().cloned(),
            device_list,
            ..self.clone()
        }
    }

    pub fn with_device(&self, device: &str) -> Self {
        if !self.device_list.iter().any(|d| d == device) {
            warn!(device, "ignoring unknown device");
            return self.clone();
        }
        Selection {
            phase: Phase::UserModified,
            device: Some(device.to_string()),
            ..self.clone()
        }
    }

    pub fn device_ref(&self) -> Option<DeviceRef> {
        Some(DeviceRef {
            device_type: self.device_type.clone()?,
            measurement: self.measurement.clone()?,
            device: self.device.clone()?,
        })
    }

    fn cascade_device_type(&self, mapping: &DeviceTypeMapping, device_type: String) -> Self {
        let measurement_list = measurements_of(mapping, &device_type);
        let measurement = measurement_list.first().cloned();
        let device_list = measurement
            .as_deref()
            .map(|m| devices_of(mapping, &device_type, m))
            .unwrap_or_default();
        Selection {
            phase: self.phase,
            device_type_list: self.device_type_list.clone(),
            device_type: Some(device_type),
            measurement_list,
            measurement,
            device: device_list.first().cloned(),
            device_list,
        }
    }
}
