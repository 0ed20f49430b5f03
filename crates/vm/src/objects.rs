//! Runtime objects created by `Create`
//!
//! Spacecraft and propagators carry typed fields next to the raw property
//! map. A `Set` always lands in the map; recognised property names are also
//! coerced into the typed field, matched case-insensitively.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeDelta, TimeZone, Utc};
use mscript_dsl::ScriptValue;
use serde::{Deserialize, Serialize};

use crate::error::{Result, VMError};

/// Earth gravitational parameter, km^3/s^2
pub const EARTH_MU: f64 = 398_600.441_8;

/// Display format for epochs, GMAT UTCGregorian style
pub const EPOCH_FORMAT: &str = "%d %b %Y %H:%M:%S%.3f";

const SECONDS_PER_DAY: f64 = 86_400.0;

/// 01 Jan 2000 11:59:28.000 UTC
const DEFAULT_EPOCH_SECONDS: i64 = 946_727_968;

/// Parse an epoch in any of the accepted layouts
pub fn parse_epoch(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    for layout in ["%d %b %Y %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, layout) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

fn coerce_number(property: &str, value: &ScriptValue) -> Result<f64> {
    value.as_f64().ok_or_else(|| VMError::CoercionError {
        property: property.to_string(),
        value: value.to_string(),
        expected: "number",
    })
}

fn coerce_epoch(property: &str, value: &ScriptValue) -> Result<DateTime<Utc>> {
    parse_epoch(&value.as_text()).ok_or_else(|| VMError::CoercionError {
        property: property.to_string(),
        value: value.to_string(),
        expected: "epoch",
    })
}

/// Shift `epoch` by `seconds`, rejecting intervals chrono cannot represent
fn advance_epoch(epoch: DateTime<Utc>, seconds: f64) -> Result<DateTime<Utc>> {
    let millis = (seconds * 1000.0).round();
    let out_of_range = || {
        VMError::ExecutionError(format!("Propagation interval of {} s is out of range", seconds))
    };

    // `as` saturates, so anything at or past the i64 bounds is rejected first
    if !(millis.abs() < i64::MAX as f64) {
        return Err(out_of_range());
    }
    TimeDelta::try_milliseconds(millis as i64)
        .and_then(|delta| epoch.checked_add_signed(delta))
        .ok_or_else(out_of_range)
}

fn lookup_property<'a>(
    properties: &'a HashMap<String, ScriptValue>,
    name: &str,
) -> Option<&'a ScriptValue> {
    properties.get(name).or_else(|| {
        properties
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value)
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spacecraft {
    pub epoch: DateTime<Utc>,
    /// Cartesian position, km
    pub x: f64,
    pub y: f64,
    pub z: f64,
    /// Cartesian velocity, km/s
    pub vx: f64,
    pub vy: f64,
    pub vz: f64,
    /// kg
    pub fuel_mass: f64,
    pub dry_mass: f64,
    pub properties: HashMap<String, ScriptValue>,
}

impl Default for Spacecraft {
    fn default() -> Self {
        Self {
            epoch: Utc
                .timestamp_opt(DEFAULT_EPOCH_SECONDS, 0)
                .single()
                .unwrap_or_default(),
            x: 7100.0,
            y: 0.0,
            z: 1300.0,
            vx: 0.0,
            vy: 7.35,
            vz: 1.0,
            fuel_mass: 0.0,
            dry_mass: 850.0,
            properties: HashMap::new(),
        }
    }
}

impl Spacecraft {
    /// Update the typed field named `property`. Returns false for names
    /// outside the spacecraft vocabulary.
    fn set_typed(&mut self, property: &str, value: &ScriptValue) -> Result<bool> {
        let field = match property.to_ascii_lowercase().as_str() {
            "epoch" => {
                self.epoch = coerce_epoch(property, value)?;
                return Ok(true);
            }
            "x" => &mut self.x,
            "y" => &mut self.y,
            "z" => &mut self.z,
            "vx" => &mut self.vx,
            "vy" => &mut self.vy,
            "vz" => &mut self.vz,
            "fuelmass" => &mut self.fuel_mass,
            "drymass" => &mut self.dry_mass,
            _ => return Ok(false),
        };
        *field = coerce_number(property, value)?;
        Ok(true)
    }

    fn report_typed(&self, property: &str) -> Option<String> {
        let text = match property.to_ascii_lowercase().as_str() {
            "epoch" => self.epoch.format(EPOCH_FORMAT).to_string(),
            "x" => format!("{:.6}", self.x),
            "y" => format!("{:.6}", self.y),
            "z" => format!("{:.6}", self.z),
            "vx" => format!("{:.9}", self.vx),
            "vy" => format!("{:.9}", self.vy),
            "vz" => format!("{:.9}", self.vz),
            "fuelmass" => format!("{:.6}", self.fuel_mass),
            "drymass" => format!("{:.6}", self.dry_mass),
            _ => return None,
        };
        Some(text)
    }

    pub fn radius(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// Advance the state by `seconds` using a circular two-body
    /// approximation: position and velocity are rotated about Z by the mean
    /// motion at the current radius. Not a force model.
    pub fn propagate(&mut self, seconds: f64) -> Result<()> {
        if !seconds.is_finite() {
            return Err(VMError::ExecutionError(format!(
                "Invalid propagation interval: {}",
                seconds
            )));
        }

        let radius = self.radius();
        if !(radius.is_finite() && radius > 0.0) {
            return Err(VMError::ExecutionError(
                "Cannot propagate a spacecraft at zero radius".to_string(),
            ));
        }

        // Checked before any state changes so a failed step leaves the craft intact
        let epoch = advance_epoch(self.epoch, seconds)?;

        let mean_motion = (EARTH_MU / radius.powi(3)).sqrt();
        let (sin, cos) = (mean_motion * seconds).sin_cos();

        let (x, y) = (self.x, self.y);
        self.x = x * cos - y * sin;
        self.y = x * sin + y * cos;

        let (vx, vy) = (self.vx, self.vy);
        self.vx = vx * cos - vy * sin;
        self.vy = vx * sin + vy * cos;

        self.epoch = epoch;
        Ok(())
    }

    /// Propagate by a number of days
    pub fn propagate_days(&mut self, days: f64) -> Result<()> {
        self.propagate(days * SECONDS_PER_DAY)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Propagator {
    pub prop_type: String,
    /// Seconds
    pub step_size: f64,
    pub min_step: f64,
    pub max_step: f64,
    pub accuracy: f64,
    pub properties: HashMap<String, ScriptValue>,
}

impl Default for Propagator {
    fn default() -> Self {
        Self {
            prop_type: "RungeKutta89".to_string(),
            step_size: 60.0,
            min_step: 0.001,
            max_step: 2700.0,
            accuracy: 1e-11,
            properties: HashMap::new(),
        }
    }
}

impl Propagator {
    fn set_typed(&mut self, property: &str, value: &ScriptValue) -> Result<bool> {
        let field = match property.to_ascii_lowercase().as_str() {
            "type" => {
                self.prop_type = value.as_text();
                return Ok(true);
            }
            "stepsize" => &mut self.step_size,
            "minstep" => &mut self.min_step,
            "maxstep" => &mut self.max_step,
            "accuracy" => &mut self.accuracy,
            _ => return Ok(false),
        };
        *field = coerce_number(property, value)?;
        Ok(true)
    }

    fn report_typed(&self, property: &str) -> Option<String> {
        let text = match property.to_ascii_lowercase().as_str() {
            "type" => self.prop_type.clone(),
            "stepsize" => self.step_size.to_string(),
            "minstep" => self.min_step.to_string(),
            "maxstep" => self.max_step.to_string(),
            "accuracy" => self.accuracy.to_string(),
            _ => return None,
        };
        Some(text)
    }
}

/// Any other `Create` type; only the property map is kept
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenericObject {
    pub object_type: String,
    pub properties: HashMap<String, ScriptValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ScriptObject {
    Spacecraft(Spacecraft),
    Propagator(Propagator),
    Generic(GenericObject),
}

impl ScriptObject {
    /// Instantiate an object from a script type name
    pub fn create(object_type: &str) -> Self {
        match object_type.to_ascii_lowercase().as_str() {
            "spacecraft" => ScriptObject::Spacecraft(Spacecraft::default()),
            "propagator" => ScriptObject::Propagator(Propagator::default()),
            _ => ScriptObject::Generic(GenericObject {
                object_type: object_type.to_string(),
                properties: HashMap::new(),
            }),
        }
    }

    pub fn type_name(&self) -> &str {
        match self {
            ScriptObject::Spacecraft(_) => "Spacecraft",
            ScriptObject::Propagator(_) => "Propagator",
            ScriptObject::Generic(generic) => &generic.object_type,
        }
    }

    pub fn properties(&self) -> &HashMap<String, ScriptValue> {
        match self {
            ScriptObject::Spacecraft(sc) => &sc.properties,
            ScriptObject::Propagator(prop) => &prop.properties,
            ScriptObject::Generic(generic) => &generic.properties,
        }
    }

    fn properties_mut(&mut self) -> &mut HashMap<String, ScriptValue> {
        match self {
            ScriptObject::Spacecraft(sc) => &mut sc.properties,
            ScriptObject::Propagator(prop) => &mut prop.properties,
            ScriptObject::Generic(generic) => &mut generic.properties,
        }
    }

    /// Store a property. The raw map is updated before the typed field is
    /// coerced, so a failed coercion still leaves the raw value behind.
    pub fn set_property(&mut self, property: &str, value: ScriptValue) -> Result<()> {
        self.properties_mut().insert(property.to_string(), value.clone());

        match self {
            ScriptObject::Spacecraft(sc) => {
                sc.set_typed(property, &value)?;
            }
            ScriptObject::Propagator(prop) => {
                prop.set_typed(property, &value)?;
            }
            ScriptObject::Generic(_) => {}
        }
        Ok(())
    }

    /// Formatted value for `Report`, typed fields first, then the raw map
    pub fn report_property(&self, property: &str) -> Option<String> {
        let typed = match self {
            ScriptObject::Spacecraft(sc) => sc.report_typed(property),
            ScriptObject::Propagator(prop) => prop.report_typed(property),
            ScriptObject::Generic(_) => None,
        };
        typed.or_else(|| lookup_property(self.properties(), property).map(ToString::to_string))
    }

    pub fn as_spacecraft_mut(&mut self) -> Option<&mut Spacecraft> {
        match self {
            ScriptObject::Spacecraft(sc) => Some(sc),
            _ => None,
        }
    }

    pub fn as_propagator(&self) -> Option<&Propagator> {
        match self {
            ScriptObject::Propagator(prop) => Some(prop),
            _ => None,
        }
    }
}
