//! Mapping from bridge accessory records to Prometheus metrics.
//!
//! Naming scheme: `homekit_{type}_{room}_{name}_{characteristic}`, all
//! lower-case. Room and accessory names lose every character that is not an
//! ASCII letter or digit; type and characteristic names have invalid
//! characters replaced by underscores. A component left empty becomes
//! `unnamed`. The result only ever contains
//! `[a-z0-9_]`, and is a pure function of the record, so series stay stable
//! across polls and restarts.

use homekit_common::{DeviceRecord, StateValue, TemperatureUnit};
use tracing::{debug, trace};

/// Prefix of every accessory metric.
pub const METRIC_PREFIX: &str = "homekit";

/// Suffix of the per-accessory reachability metric.
pub const REACHABLE_SUFFIX: &str = "reachable";

/// One metric observation derived from an accessory record.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSample {
    /// Full Prometheus metric name.
    pub name: String,
    /// Numeric value.
    pub value: f64,
    /// HELP text used when the metric is first registered.
    pub description: String,
}

/// Lower-case `value` and drop everything that is not an ASCII letter or digit.
///
/// Returns `unnamed` when nothing is left.
pub fn strip_non_alphanumeric(value: &str) -> String {
    let stripped: String = value
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect();

    if stripped.is_empty() {
        "unnamed".to_string()
    } else {
        stripped
    }
}

/// Sanitize a name component to `[a-z0-9_]`.
///
/// This function:
/// - Lower-cases ASCII letters
/// - Replaces invalid characters with underscores
/// - Collapses multiple underscores into one
/// - Trims leading and trailing underscores
pub fn sanitize_component(name: &str) -> String {
    let mut result = String::with_capacity(name.len());
    let mut last_was_underscore = true;

    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            result.push(c.to_ascii_lowercase());
            last_was_underscore = false;
        } else if !last_was_underscore {
            // Replace invalid char (or underscore run) with a single underscore
            result.push('_');
            last_was_underscore = true;
        }
    }

    // Remove trailing underscores
    while result.ends_with('_') {
        result.pop();
    }

    // Handle empty result
    if result.is_empty() {
        result.push_str("unnamed");
    }

    result
}

/// Build the base metric name shared by every metric of an accessory.
///
/// Format: `homekit_{type}_{room}_{name}`
pub fn base_metric_name(device: &DeviceRecord) -> String {
    format!(
        "{}_{}_{}_{}",
        METRIC_PREFIX,
        sanitize_component(&device.device_type),
        strip_non_alphanumeric(&device.room),
        strip_non_alphanumeric(&device.name)
    )
}

/// Build the HELP text for a characteristic of an accessory.
pub fn describe(key: &str, device: &DeviceRecord) -> String {
    format!("{} metric for device {}", capitalize_first(key), device.label())
}

/// Upper-case the first character, leaving the rest untouched.
pub fn capitalize_first(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Whether a characteristic holds a temperature.
pub fn is_temperature_key(key: &str) -> bool {
    key.to_lowercase().contains("temperature")
}

/// Numeric value of a characteristic, converted to the configured
/// temperature unit where it applies.
///
/// Strings (and nulls, arrays, objects) have no numeric form and yield
/// `None`. Booleans pass through as 1/0.
pub fn characteristic_value(key: &str, value: &StateValue, unit: TemperatureUnit) -> Option<f64> {
    match value {
        StateValue::Number(v) if is_temperature_key(key) => Some(unit.from_celsius(*v)),
        other => other.as_number(),
    }
}

/// Convert an accessory record into metric samples.
///
/// Always yields the reachability metric first, followed by one metric per
/// numeric or boolean characteristic in key order. A characteristic whose
/// name sanitizes to `reachable` is dropped; the record's own flag wins.
pub fn normalize(device: &DeviceRecord, unit: TemperatureUnit) -> Vec<MetricSample> {
    let base = base_metric_name(device);
    let state_len = device.state.as_ref().map_or(0, |s| s.len());
    let mut samples = Vec::with_capacity(1 + state_len);

    samples.push(MetricSample {
        name: format!("{}_{}", base, REACHABLE_SUFFIX),
        value: if device.reachable { 1.0 } else { 0.0 },
        description: format!("Reachable metric for device {}", device.label()),
    });

    let Some(state) = &device.state else {
        return samples;
    };

    for (key, value) in state {
        let Some(value) = characteristic_value(key, value, unit) else {
            trace!(
                device = %device.label(),
                characteristic = %key,
                kind = value.kind(),
                "Skipping non-numeric characteristic"
            );
            continue;
        };

        let suffix = sanitize_component(key);
        if suffix == REACHABLE_SUFFIX {
            debug!(
                device = %device.label(),
                characteristic = %key,
                "Dropping characteristic that shadows the reachability metric"
            );
            continue;
        }

        samples.push(MetricSample {
            name: format!("{}_{}", base, suffix),
            value,
            description: describe(key, device),
        });
    }

    samples
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kitchen_light() -> DeviceRecord {
        DeviceRecord::new("kitchen light", "Kitchen", "Light", true)
            .with_state("brightness", 80i64)
            .with_state("currentTemperature", 20i64)
    }

    fn find<'a>(samples: &'a [MetricSample], name: &str) -> Option<&'a MetricSample> {
        samples.iter().find(|s| s.name == name)
    }

    #[test]
    fn test_strip_non_alphanumeric() {
        assert_eq!(strip_non_alphanumeric("kitchen light"), "kitchenlight");
        assert_eq!(strip_non_alphanumeric("Kid's Room (2nd)"), "kidsroom2nd");
        assert_eq!(strip_non_alphanumeric("Küche"), "kche");
        assert_eq!(strip_non_alphanumeric("!!!"), "unnamed");
        assert_eq!(strip_non_alphanumeric("日本灯"), "unnamed");
    }

    #[test]
    fn test_sanitize_component() {
        assert_eq!(sanitize_component("Light"), "light");
        assert_eq!(sanitize_component("currentTemperature"), "currenttemperature");
        assert_eq!(sanitize_component("Current-Temp.Value"), "current_temp_value");
        assert_eq!(sanitize_component("__a__b__"), "a_b");
        assert_eq!(sanitize_component(""), "unnamed");
        assert_eq!(sanitize_component("%%%"), "unnamed");
    }

    #[test]
    fn test_base_metric_name() {
        assert_eq!(
            base_metric_name(&kitchen_light()),
            "homekit_light_kitchen_kitchenlight"
        );
    }

    #[test]
    fn test_capitalize_first() {
        assert_eq!(capitalize_first("brightness"), "Brightness");
        assert_eq!(capitalize_first("currentTemperature"), "CurrentTemperature");
        assert_eq!(capitalize_first(""), "");
    }

    #[test]
    fn test_is_temperature_key() {
        assert!(is_temperature_key("currentTemperature"));
        assert!(is_temperature_key("TEMPERATURE"));
        assert!(is_temperature_key("targettemperature"));
        assert!(!is_temperature_key("brightness"));
        assert!(!is_temperature_key("temp"));
    }

    #[test]
    fn test_normalize_fahrenheit() {
        let samples = normalize(&kitchen_light(), TemperatureUnit::Fahrenheit);

        assert_eq!(samples.len(), 3);
        let reachable = find(&samples, "homekit_light_kitchen_kitchenlight_reachable").unwrap();
        assert_eq!(reachable.value, 1.0);
        assert_eq!(
            reachable.description,
            "Reachable metric for device Kitchen/kitchen light"
        );

        let brightness = find(&samples, "homekit_light_kitchen_kitchenlight_brightness").unwrap();
        assert_eq!(brightness.value, 80.0);
        assert_eq!(
            brightness.description,
            "Brightness metric for device Kitchen/kitchen light"
        );

        let temp =
            find(&samples, "homekit_light_kitchen_kitchenlight_currenttemperature").unwrap();
        assert_eq!(temp.value, 68.0);
        assert_eq!(
            temp.description,
            "CurrentTemperature metric for device Kitchen/kitchen light"
        );
    }

    #[test]
    fn test_normalize_celsius_leaves_temperature() {
        let samples = normalize(&kitchen_light(), TemperatureUnit::Celsius);
        let temp =
            find(&samples, "homekit_light_kitchen_kitchenlight_currenttemperature").unwrap();
        assert_eq!(temp.value, 20.0);
    }

    #[test]
    fn test_non_temperature_keys_not_converted() {
        let device =
            DeviceRecord::new("fan", "Office", "Fan", true).with_state("rotationSpeed", 20i64);
        let samples = normalize(&device, TemperatureUnit::Fahrenheit);
        assert_eq!(
            find(&samples, "homekit_fan_office_fan_rotationspeed")
                .unwrap()
                .value,
            20.0
        );
    }

    #[test]
    fn test_normalize_without_state_yields_reachable_only() {
        let device = DeviceRecord::new("hub", "Hall", "Bridge", false);
        let samples = normalize(&device, TemperatureUnit::Fahrenheit);

        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].name, "homekit_bridge_hall_hub_reachable");
        assert_eq!(samples[0].value, 0.0);
    }

    #[test]
    fn test_string_values_are_skipped() {
        let device = DeviceRecord::new("lock", "Door", "LockMechanism", true)
            .with_state("lockState", "secured")
            .with_state("batteryLevel", 93i64);
        let samples = normalize(&device, TemperatureUnit::Fahrenheit);

        assert_eq!(samples.len(), 2);
        assert!(samples.iter().all(|s| !s.name.ends_with("_lockstate")));
        assert!(find(&samples, "homekit_lockmechanism_door_lock_batterylevel").is_some());
    }

    #[test]
    fn test_boolean_values_pass_through() {
        let device = DeviceRecord::new("plug", "Desk", "Outlet", true)
            .with_state("on", true)
            .with_state("outletInUse", false);
        let samples = normalize(&device, TemperatureUnit::Fahrenheit);

        assert_eq!(find(&samples, "homekit_outlet_desk_plug_on").unwrap().value, 1.0);
        assert_eq!(
            find(&samples, "homekit_outlet_desk_plug_outletinuse")
                .unwrap()
                .value,
            0.0
        );
    }

    #[test]
    fn test_boolean_temperature_not_converted() {
        let device =
            DeviceRecord::new("t", "r", "Sensor", true).with_state("temperatureFault", true);
        let samples = normalize(&device, TemperatureUnit::Fahrenheit);
        assert_eq!(samples[1].value, 1.0);
    }

    #[test]
    fn test_punctuation_yields_valid_names() {
        let device = DeviceRecord::new("Mom's Lamp (#2)", "Living-Room / Den", "Light Bulb", true)
            .with_state("Color.Temperature", 300i64)
            .with_state("hue°", 120i64);
        let samples = normalize(&device, TemperatureUnit::Celsius);

        assert_eq!(samples.len(), 3);
        for sample in &samples {
            assert!(
                sample
                    .name
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_'),
                "invalid metric name {}",
                sample.name
            );
        }
        assert_eq!(
            samples[0].name,
            "homekit_light_bulb_livingroomden_momslamp2_reachable"
        );
    }

    #[test]
    fn test_name_without_ascii_becomes_unnamed() {
        let device = DeviceRecord::new("日本灯", "Küche", "Light", true);
        let samples = normalize(&device, TemperatureUnit::Fahrenheit);

        assert_eq!(samples[0].name, "homekit_light_kche_unnamed_reachable");
        assert!(!samples[0].name.contains("__"));

        let room = DeviceRecord::new("lamp", "%%%", "Light", true);
        assert_eq!(base_metric_name(&room), "homekit_light_unnamed_lamp");
    }

    #[test]
    fn test_state_key_cannot_shadow_reachable() {
        let device = DeviceRecord::new("lamp", "Office", "Light", true)
            .with_state("Reachable", false)
            .with_state("brightness", 10i64);
        let samples = normalize(&device, TemperatureUnit::Fahrenheit);

        assert_eq!(samples.len(), 2);
        let reachable: Vec<_> = samples
            .iter()
            .filter(|s| s.name == "homekit_light_office_lamp_reachable")
            .collect();
        assert_eq!(reachable.len(), 1);
        assert_eq!(reachable[0].value, 1.0);
    }

    #[test]
    fn test_normalize_is_deterministic() {
        let first = normalize(&kitchen_light(), TemperatureUnit::Fahrenheit);
        let second = normalize(&kitchen_light(), TemperatureUnit::Fahrenheit);
        assert_eq!(first, second);
    }
}
