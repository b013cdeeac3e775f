//! Mapping of EnergyHub ExtApi measurement aggregates onto SunSpec points.

use crate::device::Device;
use crate::store::RegisterStore;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// The ExtApi reading names the bridge recognizes. The lowercased variant
/// name is exactly the key the hub publishes; anything else in a message is
/// ignored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum ReadingKey {
    GridFreq,
    IExt,
    IExtQ,
    Ul,
    PExt,
    PExtReactive,
    PLoad,
    PLoadReactive,
    SExt,
    State,
    UDc,
    WExtConsQ,
    WExtProdQ,
    WInvProdQ,
}

/// One parsed reading: either a plain scalar or a per-phase triplet.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Reading {
    Scalar(f64),
    ThreePhase { l1: f64, l2: f64, l3: f64 },
}

impl Reading {
    /// The ExtApi wraps scalars as `{"val": x}` and per-phase values as
    /// `{"L1": x, "L2": y, "L3": z}`, with the numbers themselves often
    /// delivered as strings.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, ReadingError> {
        let object = value.as_object().ok_or(ReadingError::NotAnObject)?;
        if let Some(scalar) = object.get("val") {
            return Ok(Self::Scalar(number(scalar, "val")?));
        }
        match (object.get("L1"), object.get("L2"), object.get("L3")) {
            (Some(l1), Some(l2), Some(l3)) => Ok(Self::ThreePhase {
                l1: number(l1, "L1")?,
                l2: number(l2, "L2")?,
                l3: number(l3, "L3")?,
            }),
            _ => Err(ReadingError::UnknownShape),
        }
    }

    fn sum(&self) -> f64 {
        match *self {
            Reading::Scalar(value) => value,
            Reading::ThreePhase { l1, l2, l3 } => l1 + l2 + l3,
        }
    }
}

fn number(value: &serde_json::Value, member: &'static str) -> Result<f64, ReadingError> {
    match value {
        serde_json::Value::Number(n) => n.as_f64().ok_or(ReadingError::NotANumber(member)),
        serde_json::Value::String(s) => {
            s.trim().parse().map_err(|_| ReadingError::NotANumber(member))
        }
        _ => Err(ReadingError::NotANumber(member)),
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ReadingError {
    #[error("the reading is not a JSON object")]
    NotAnObject,
    #[error("the reading has neither a `val` member nor all of `L1`/`L2`/`L3`")]
    UnknownShape,
    #[error("the `{0}` member does not hold a number")]
    NotANumber(&'static str),
}

#[derive(thiserror::Error, Debug)]
pub enum UpdateError {
    #[error("the telemetry payload is not valid JSON")]
    MalformedPayload(#[source] serde_json::Error),
}

/// ExtApi energy counters accumulate watt-seconds; SunSpec energy points
/// count watt-hours.
fn watt_hours(watt_seconds: f64) -> f32 {
    (watt_seconds / 3600.0) as f32
}

impl crate::models::InverterModel {
    /// Apply one recognized reading to this block. Returns false when the
    /// key does not target the inverter or arrived in the wrong shape.
    fn apply(&mut self, key: ReadingKey, reading: &Reading) -> bool {
        match (key, *reading) {
            (ReadingKey::GridFreq, Reading::Scalar(value)) => {
                self.hz = Some(value as f32);
            }
            // The aggregate current is the sum of the phase currents; both
            // views come from the same triplet.
            (ReadingKey::IExtQ, Reading::ThreePhase { l1, l2, l3 }) => {
                self.aph_a = Some(l1 as f32);
                self.aph_b = Some(l2 as f32);
                self.aph_c = Some(l3 as f32);
                self.a = Some(reading.sum() as f32);
            }
            (ReadingKey::Ul, Reading::ThreePhase { l1, l2, l3 }) => {
                self.ph_v_ph_a = Some(l1 as f32);
                self.ph_v_ph_b = Some(l2 as f32);
                self.ph_v_ph_c = Some(l3 as f32);
            }
            (ReadingKey::PLoad, Reading::ThreePhase { .. }) => {
                self.w = Some(reading.sum() as f32);
            }
            (ReadingKey::PLoadReactive, Reading::ThreePhase { .. }) => {
                self.var = Some(reading.sum() as f32);
            }
            (ReadingKey::SExt, Reading::Scalar(value)) => {
                self.va = Some(value as f32);
            }
            (ReadingKey::UDc, Reading::Scalar(value)) => {
                self.dcv = Some(value as f32);
            }
            // The hub's state word is not a SunSpec operating state, so it
            // lands in the vendor slot and `St` stays not-implemented.
            (ReadingKey::State, Reading::Scalar(value)) => {
                self.st_vnd = Some(value as u16);
            }
            (ReadingKey::WInvProdQ, Reading::ThreePhase { .. }) => {
                self.wh = Some(watt_hours(reading.sum()));
            }
            _ => return false,
        }
        true
    }
}

impl crate::models::MeterModel {
    /// The meter block mirrors the external (grid) side of the hub.
    fn apply(&mut self, key: ReadingKey, reading: &Reading) -> bool {
        match (key, *reading) {
            (ReadingKey::IExt, Reading::ThreePhase { l1, l2, l3 }) => {
                self.aph_a = Some(l1 as f32);
                self.aph_b = Some(l2 as f32);
                self.aph_c = Some(l3 as f32);
                self.a = Some(reading.sum() as f32);
            }
            (ReadingKey::Ul, Reading::ThreePhase { l1, l2, l3 }) => {
                self.ph_v_ph_a = Some(l1 as f32);
                self.ph_v_ph_b = Some(l2 as f32);
                self.ph_v_ph_c = Some(l3 as f32);
                self.ph_v = Some((reading.sum() / 3.0) as f32);
            }
            (ReadingKey::PExt, Reading::ThreePhase { l1, l2, l3 }) => {
                self.w_ph_a = Some(l1 as f32);
                self.w_ph_b = Some(l2 as f32);
                self.w_ph_c = Some(l3 as f32);
                self.w = Some(reading.sum() as f32);
            }
            (ReadingKey::PExtReactive, Reading::ThreePhase { l1, l2, l3 }) => {
                self.var_ph_a = Some(l1 as f32);
                self.var_ph_b = Some(l2 as f32);
                self.var_ph_c = Some(l3 as f32);
                self.var = Some(reading.sum() as f32);
            }
            (ReadingKey::WExtProdQ, Reading::ThreePhase { l1, l2, l3 }) => {
                self.tot_wh_exp_ph_a = Some(watt_hours(l1));
                self.tot_wh_exp_ph_b = Some(watt_hours(l2));
                self.tot_wh_exp_ph_c = Some(watt_hours(l3));
                self.tot_wh_exp = Some(watt_hours(reading.sum()));
            }
            (ReadingKey::WExtConsQ, Reading::ThreePhase { l1, l2, l3 }) => {
                self.tot_wh_imp_ph_a = Some(watt_hours(l1));
                self.tot_wh_imp_ph_b = Some(watt_hours(l2));
                self.tot_wh_imp_ph_c = Some(watt_hours(l3));
                self.tot_wh_imp = Some(watt_hours(reading.sum()));
            }
            _ => return false,
        }
        true
    }
}

/// Owns the device state and drives updates through to the register store.
///
/// Updates arrive serially from the single broker connection, so the
/// pipeline is the only mutator of the model fields. Readers only ever see
/// the images it publishes.
pub struct Pipeline {
    device: Device,
    store: Arc<RegisterStore>,
}

impl Pipeline {
    pub fn new(device: Device, store: Arc<RegisterStore>) -> Self {
        Self { device, store }
    }

    /// Apply one ExtApi message and publish the re-encoded image.
    ///
    /// A payload that is not a JSON object discards the whole update and
    /// leaves the previously published image in place. Individual readings
    /// that are unmapped, malformed, or of an unexpected shape are skipped
    /// without affecting the rest of the message. Returns how many readings
    /// were applied.
    pub fn apply(&mut self, payload: &[u8]) -> Result<usize, UpdateError> {
        let update: serde_json::Map<String, serde_json::Value> =
            serde_json::from_slice(payload).map_err(UpdateError::MalformedPayload)?;
        let mut applied = 0;
        for (name, value) in &update {
            let Ok(key) = name.parse::<ReadingKey>() else {
                trace!(key = name.as_str(), "ignoring unmapped reading");
                continue;
            };
            let reading = match Reading::from_json(value) {
                Ok(reading) => reading,
                Err(e) => {
                    warn!(
                        key = %key,
                        error = (&e as &dyn std::error::Error),
                        "skipping malformed reading"
                    );
                    continue;
                }
            };
            let mut routed = false;
            if let Some(inverter) = self.device.inverter_mut() {
                routed |= inverter.apply(key, &reading);
            }
            if let Some(meter) = self.device.meter_mut() {
                routed |= meter.apply(key, &reading);
            }
            if routed {
                applied += 1;
            } else {
                warn!(key = %key, "reading shape does not match its mapping");
            }
        }
        self.store.publish(self.device.compose());
        debug!(applied, total = update.len(), "republished the register image");
        Ok(applied)
    }
}
