//! Composition of SunSpec blocks into one contiguous register image.

use crate::models::{CommonModel, EndModel, InverterModel, MeterModel, Model};

/// The well-known "SunS" identifier clients probe for at the base address.
pub const SUNSPEC_MARKER: [u16; 2] = [0x5375, 0x6E53];

/// The absolute register span one encoded block occupies.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ModelRange {
    /// The block-type ID of the model mapped here.
    pub model: u16,
    pub start: u16,
    /// One past the last register of the block, i.e. `start + length`.
    pub end: u16,
    pub length: u16,
}

/// An ordered chain of models anchored at a base register address.
///
/// Field values are mutated by the update pipeline only; composition never
/// changes them, so [`Device::compose`] may run on any snapshot of the
/// state.
pub struct Device {
    base_address: u16,
    models: Vec<Model>,
}

impl Device {
    pub fn new(base_address: u16, models: Vec<Model>) -> Self {
        Self { base_address, models }
    }

    /// The Ferroamp EnergyHub device: identity, the inverter as seen from
    /// the hub, and the grid-side meter. All measurement points start out
    /// absent and stay so until telemetry arrives.
    pub fn energyhub(base_address: u16) -> Self {
        let common = CommonModel {
            manufacturer: "Ferroamp".to_string(),
            model: "EnergyHub 14".to_string(),
            options: String::new(),
            version: "1".to_string(),
            serial_number: "123456789".to_string(),
            device_address: Some(9999),
        };
        Self::new(
            base_address,
            vec![
                Model::Common(common),
                Model::Inverter(InverterModel::default()),
                Model::Meter(MeterModel::default()),
            ],
        )
    }

    pub fn base_address(&self) -> u16 {
        self.base_address
    }

    pub fn models(&self) -> &[Model] {
        &self.models
    }

    pub fn inverter_mut(&mut self) -> Option<&mut InverterModel> {
        self.models.iter_mut().find_map(|model| match model {
            Model::Inverter(inverter) => Some(inverter),
            _ => None,
        })
    }

    pub fn meter_mut(&mut self) -> Option<&mut MeterModel> {
        self.models.iter_mut().find_map(|model| match model {
            Model::Meter(meter) => Some(meter),
            _ => None,
        })
    }

    /// Encode every model in declared order into a fresh [`RegisterImage`].
    ///
    /// The image starts with the "SunS" marker, so the first model begins at
    /// `base + 2`; each following model starts exactly where the previous
    /// one ends, and the end marker closes the chain.
    pub fn compose(&self) -> RegisterImage {
        let mut words = Vec::new();
        words.extend_from_slice(&SUNSPEC_MARKER);
        let mut ranges = Vec::with_capacity(self.models.len() + 1);
        let mut cursor = self.base_address + SUNSPEC_MARKER.len() as u16;
        for model in &self.models {
            let encoded = model.encode();
            let length = encoded.len() as u16;
            ranges.push(ModelRange {
                model: model.id(),
                start: cursor,
                end: cursor + length,
                length,
            });
            words.extend_from_slice(&encoded);
            cursor += length;
        }
        let end = EndModel::encode();
        ranges.push(ModelRange {
            model: EndModel::ID,
            start: cursor,
            end: cursor + end.len() as u16,
            length: end.len() as u16,
        });
        words.extend_from_slice(&end);
        RegisterImage {
            base_address: self.base_address,
            words: words.into_boxed_slice(),
            ranges: ranges.into_boxed_slice(),
        }
    }
}

/// One complete encoded register map, immutable once composed.
///
/// Updates produce a whole new image; an image handed out to readers is
/// never touched again.
#[derive(Debug, Clone, PartialEq)]
pub struct RegisterImage {
    base_address: u16,
    words: Box<[u16]>,
    ranges: Box<[ModelRange]>,
}

impl RegisterImage {
    pub fn base_address(&self) -> u16 {
        self.base_address
    }

    pub fn words(&self) -> &[u16] {
        &self.words
    }

    pub fn ranges(&self) -> &[ModelRange] {
        &self.ranges
    }

    /// The registers at absolute addresses `address .. address + count`, or
    /// `None` if any part of that span lies outside the image.
    pub fn read(&self, address: u16, count: u16) -> Option<&[u16]> {
        let offset = usize::from(address.checked_sub(self.base_address)?);
        self.words.get(offset..offset.checked_add(usize::from(count))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_starts_with_the_marker_and_ends_with_the_end_model() {
        let image = Device::energyhub(40000).compose();
        assert_eq!(image.words()[..2], SUNSPEC_MARKER);
        assert_eq!(image.words()[image.words().len() - 2..], [0xFFFF, 0]);
    }

    #[test]
    fn model_ranges_are_contiguous() {
        let image = Device::energyhub(40000).compose();
        let ranges = image.ranges();
        assert_eq!(ranges[0].start, 40002);
        for pair in ranges.windows(2) {
            assert_eq!(pair[1].start, pair[0].end, "gap between {:?} and {:?}", pair[0], pair[1]);
        }
        let total: u16 = ranges.iter().map(|r| r.length).sum();
        assert_eq!(usize::from(total) + 2, image.words().len());
    }

    #[test]
    fn block_headers_sit_at_their_range_starts() {
        let image = Device::energyhub(40000).compose();
        for range in image.ranges() {
            let header = image.read(range.start, 2).unwrap();
            assert_eq!(header[0], range.model);
        }
    }

    #[test]
    fn energyhub_layout() {
        let image = Device::energyhub(40000).compose();
        // marker + (2 + 66) + (2 + 60) + (2 + 124) + end marker
        assert_eq!(image.words().len(), 260);
        assert_eq!(image.read(40002, 2).unwrap(), [1, 66]);
        assert_eq!(image.read(40070, 2).unwrap(), [113, 60]);
        assert_eq!(image.read(40132, 2).unwrap(), [214, 124]);
        assert_eq!(image.read(40258, 2).unwrap(), [0xFFFF, 0]);
    }

    #[test]
    fn reads_outside_the_image_are_rejected() {
        let image = Device::energyhub(40000).compose();
        assert!(image.read(39999, 2).is_none());
        assert!(image.read(40259, 2).is_none());
        assert!(image.read(40000, 261).is_none());
        assert_eq!(image.read(40000, 260).unwrap().len(), 260);
    }

    #[test]
    fn composition_is_pure() {
        let device = Device::energyhub(40000);
        assert_eq!(device.compose(), device.compose());
    }
}
