//! The SunSpec information-model blocks served by the bridge.
//!
//! Each block type has a fixed numeric ID and a fixed payload length `L` in
//! registers. Its shape never depends on which optional points currently
//! carry a value: absent points encode to their type's sentinel and still
//! occupy their reserved registers.

use crate::codec::{BlockBuilder, DataType};
use tracing::error;

/// One point of a block's fixed layout, in declaration order.
#[derive(Clone, Copy, Debug)]
pub struct FieldDef {
    /// The SunSpec point name, spelled the way the model definition does.
    pub point: &'static str,
    pub kind: DataType,
}

macro_rules! field_type {
    (Uint16) => { u16 };
    (Uint32) => { u32 };
    (Float32) => { f32 };
    (Bitfield32) => { u32 };
    (Enum16) => { u16 };
}

macro_rules! encode_field {
    ($builder:ident, $value:expr, Uint16) => { $builder.uint16($value) };
    ($builder:ident, $value:expr, Uint32) => { $builder.uint32($value) };
    ($builder:ident, $value:expr, Float32) => { $builder.float32($value) };
    ($builder:ident, $value:expr, Bitfield32) => { $builder.bitfield32($value) };
    ($builder:ident, $value:expr, Enum16) => { $builder.enum16($value) };
}

// Keeps the struct definition, the schema table and the encoding order in
// one place so the three can never drift apart.
macro_rules! point_model {
    (
        $(#[$meta:meta])*
        pub struct $name:ident: id $id:literal, len $len:literal {
            $($field:ident: $kind:ident, $point:literal;)*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Default, Clone, PartialEq)]
        pub struct $name {
            $(pub $field: Option<field_type!($kind)>,)*
        }

        impl $name {
            pub const ID: u16 = $id;
            pub const LEN: u16 = $len;
            pub const FIELDS: &'static [FieldDef] = &[
                $(FieldDef { point: $point, kind: DataType::$kind },)*
            ];

            fn encode_payload(&self, builder: &mut BlockBuilder) {
                $(encode_field!(builder, self.$field, $kind);)*
            }
        }
    };
}

point_model! {
    /// Three-phase inverter block with float representation (model 113).
    pub struct InverterModel: id 113, len 60 {
        a: Float32, "A";
        aph_a: Float32, "AphA";
        aph_b: Float32, "AphB";
        aph_c: Float32, "AphC";
        ppv_ph_ab: Float32, "PPVphAB";
        ppv_ph_bc: Float32, "PPVphBC";
        ppv_ph_ca: Float32, "PPVphCA";
        ph_v_ph_a: Float32, "PhVphA";
        ph_v_ph_b: Float32, "PhVphB";
        ph_v_ph_c: Float32, "PhVphC";
        w: Float32, "W";
        hz: Float32, "Hz";
        va: Float32, "VA";
        var: Float32, "VAr";
        pf: Float32, "PF";
        wh: Float32, "WH";
        dca: Float32, "DCA";
        dcv: Float32, "DCV";
        dcw: Float32, "DCW";
        tmp_cab: Float32, "TmpCab";
        tmp_snk: Float32, "TmpSnk";
        tmp_trns: Float32, "TmpTrns";
        tmp_ot: Float32, "TmpOt";
        st: Enum16, "St";
        st_vnd: Enum16, "StVnd";
        evt1: Bitfield32, "Evt1";
        evt2: Bitfield32, "Evt2";
        evt_vnd1: Bitfield32, "EvtVnd1";
        evt_vnd2: Bitfield32, "EvtVnd2";
        evt_vnd3: Bitfield32, "EvtVnd3";
        evt_vnd4: Bitfield32, "EvtVnd4";
    }
}

point_model! {
    /// Three-phase (delta) meter block with float representation (model 214).
    pub struct MeterModel: id 214, len 124 {
        a: Float32, "A";
        aph_a: Float32, "AphA";
        aph_b: Float32, "AphB";
        aph_c: Float32, "AphC";
        ph_v: Float32, "PhV";
        ph_v_ph_a: Float32, "PhVphA";
        ph_v_ph_b: Float32, "PhVphB";
        ph_v_ph_c: Float32, "PhVphC";
        ppv: Float32, "PPV";
        ph_v_ph_ab: Float32, "PhVphAB";
        ph_v_ph_bc: Float32, "PhVphBC";
        ph_v_ph_ca: Float32, "PhVphCA";
        hz: Float32, "Hz";
        w: Float32, "W";
        w_ph_a: Float32, "WphA";
        w_ph_b: Float32, "WphB";
        w_ph_c: Float32, "WphC";
        va: Float32, "VA";
        va_ph_a: Float32, "VAphA";
        va_ph_b: Float32, "VAphB";
        va_ph_c: Float32, "VAphC";
        var: Float32, "VAR";
        var_ph_a: Float32, "VARphA";
        var_ph_b: Float32, "VARphB";
        var_ph_c: Float32, "VARphC";
        pf: Float32, "PF";
        pf_ph_a: Float32, "PFphA";
        pf_ph_b: Float32, "PFphB";
        pf_ph_c: Float32, "PFphC";
        tot_wh_exp: Float32, "TotWhExp";
        tot_wh_exp_ph_a: Float32, "TotWhExpPhA";
        tot_wh_exp_ph_b: Float32, "TotWhExpPhB";
        tot_wh_exp_ph_c: Float32, "TotWhExpPhC";
        tot_wh_imp: Float32, "TotWhImp";
        tot_wh_imp_ph_a: Float32, "TotWhImpPhA";
        tot_wh_imp_ph_b: Float32, "TotWhImpPhB";
        tot_wh_imp_ph_c: Float32, "TotWhImpPhC";
        tot_va_h_exp: Float32, "TotVAhExp";
        tot_va_h_exp_ph_a: Float32, "TotVAhExpPhA";
        tot_va_h_exp_ph_b: Float32, "TotVAhExpPhB";
        tot_va_h_exp_ph_c: Float32, "TotVAhExpPhC";
        tot_va_h_imp: Float32, "TotVAhImp";
        tot_va_h_imp_ph_a: Float32, "TotVAhImpPhA";
        tot_va_h_imp_ph_b: Float32, "TotVAhImpPhB";
        tot_va_h_imp_ph_c: Float32, "TotVAhImpPhC";
        tot_var_h_imp_q1: Float32, "TotVArhImpQ1";
        tot_var_h_imp_q1_ph_a: Float32, "TotVArhImpQ1phA";
        tot_var_h_imp_q1_ph_b: Float32, "TotVArhImpQ1phB";
        tot_var_h_imp_q1_ph_c: Float32, "TotVArhImpQ1phC";
        tot_var_h_imp_q2: Float32, "TotVArhImpQ2";
        tot_var_h_imp_q2_ph_a: Float32, "TotVArhImpQ2phA";
        tot_var_h_imp_q2_ph_b: Float32, "TotVArhImpQ2phB";
        tot_var_h_imp_q2_ph_c: Float32, "TotVArhImpQ2phC";
        tot_var_h_exp_q3: Float32, "TotVArhExpQ3";
        tot_var_h_exp_q3_ph_a: Float32, "TotVArhExpQ3phA";
        tot_var_h_exp_q3_ph_b: Float32, "TotVArhExpQ3phB";
        tot_var_h_exp_q3_ph_c: Float32, "TotVArhExpQ3phC";
        tot_var_h_exp_q4: Float32, "TotVArhExpQ4";
        tot_var_h_exp_q4_ph_a: Float32, "TotVArhExpQ4phA";
        tot_var_h_exp_q4_ph_b: Float32, "TotVArhExpQ4phB";
        tot_var_h_exp_q4_ph_c: Float32, "TotVArhExpQ4phC";
        evt: Bitfield32, "Evt";
    }
}

/// Common identity block (model 1): who this device claims to be.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct CommonModel {
    pub manufacturer: String,
    pub model: String,
    pub options: String,
    pub version: String,
    pub serial_number: String,
    pub device_address: Option<u16>,
}

impl CommonModel {
    pub const ID: u16 = 1;
    pub const LEN: u16 = 66;
    pub const FIELDS: &'static [FieldDef] = &[
        FieldDef { point: "Mn", kind: DataType::String(16) },
        FieldDef { point: "Md", kind: DataType::String(16) },
        FieldDef { point: "Opt", kind: DataType::String(8) },
        FieldDef { point: "Vr", kind: DataType::String(8) },
        FieldDef { point: "SN", kind: DataType::String(16) },
        FieldDef { point: "DA", kind: DataType::Uint16 },
        FieldDef { point: "Pad", kind: DataType::Pad },
    ];

    fn encode_payload(&self, builder: &mut BlockBuilder) {
        builder.string(&self.manufacturer, 16);
        builder.string(&self.model, 16);
        builder.string(&self.options, 8);
        builder.string(&self.version, 8);
        builder.string(&self.serial_number, 16);
        builder.uint16(self.device_address);
        builder.pad();
    }
}

/// The end marker closing a SunSpec model chain.
pub struct EndModel;

impl EndModel {
    pub const ID: u16 = 0xFFFF;

    pub fn encode() -> [u16; 2] {
        [Self::ID, 0]
    }
}

/// A block of the composed device, dispatched by type.
#[derive(Debug, Clone, PartialEq)]
pub enum Model {
    Common(CommonModel),
    Inverter(InverterModel),
    Meter(MeterModel),
}

impl Model {
    pub fn id(&self) -> u16 {
        match self {
            Model::Common(_) => CommonModel::ID,
            Model::Inverter(_) => InverterModel::ID,
            Model::Meter(_) => MeterModel::ID,
        }
    }

    /// The declared payload length `L`, excluding the two header words.
    pub fn declared_len(&self) -> u16 {
        match self {
            Model::Common(_) => CommonModel::LEN,
            Model::Inverter(_) => InverterModel::LEN,
            Model::Meter(_) => MeterModel::LEN,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Model::Common(_) => "common",
            Model::Inverter(_) => "inverter",
            Model::Meter(_) => "meter",
        }
    }

    pub fn fields(&self) -> &'static [FieldDef] {
        match self {
            Model::Common(_) => CommonModel::FIELDS,
            Model::Inverter(_) => InverterModel::FIELDS,
            Model::Meter(_) => MeterModel::FIELDS,
        }
    }

    /// Encode the block as `[ID, L]` followed by every point in declaration
    /// order.
    ///
    /// The result is always exactly `L + 2` words. A payload that encodes to
    /// a different size is a structural defect in the block definition; it
    /// is reported at error level and the block is zero-padded or truncated
    /// to its declared size so the composed image keeps its fixed layout.
    pub fn encode(&self) -> Vec<u16> {
        let declared = self.declared_len();
        let expected = usize::from(declared) + 2;
        let mut builder = BlockBuilder::with_capacity(expected);
        builder.uint16(Some(self.id()));
        builder.uint16(Some(declared));
        match self {
            Model::Common(model) => model.encode_payload(&mut builder),
            Model::Inverter(model) => model.encode_payload(&mut builder),
            Model::Meter(model) => model.encode_payload(&mut builder),
        }
        let mut words = builder.finish();
        if words.len() != expected {
            error!(
                model = self.id(),
                declared = expected,
                encoded = words.len(),
                "encoded block length disagrees with its declared length"
            );
            words.resize(expected, 0);
        }
        words
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema_words(fields: &[FieldDef]) -> u16 {
        fields.iter().map(|f| f.kind.words()).sum()
    }

    #[test]
    fn schemas_cover_the_declared_lengths() {
        assert_eq!(schema_words(CommonModel::FIELDS), CommonModel::LEN);
        assert_eq!(schema_words(InverterModel::FIELDS), InverterModel::LEN);
        assert_eq!(schema_words(MeterModel::FIELDS), MeterModel::LEN);
    }

    #[test]
    fn encoded_length_is_declared_length_plus_header() {
        let empty = [
            Model::Common(CommonModel::default()),
            Model::Inverter(InverterModel::default()),
            Model::Meter(MeterModel::default()),
        ];
        for model in empty {
            let words = model.encode();
            assert_eq!(
                words.len(),
                usize::from(model.declared_len()) + 2,
                "model {} has the wrong encoded size",
                model.id()
            );
            assert_eq!(words[0], model.id());
            assert_eq!(words[1], model.declared_len());
        }
    }

    #[test]
    fn length_is_independent_of_which_points_are_present() {
        let mut inverter = InverterModel::default();
        let absent = Model::Inverter(inverter.clone()).encode();
        inverter.hz = Some(50.0);
        inverter.a = Some(21.7);
        inverter.st = Some(4);
        inverter.evt1 = Some(2);
        let populated = Model::Inverter(inverter).encode();
        assert_eq!(absent.len(), populated.len());
    }

    #[test]
    fn absent_inverter_points_encode_sentinels() {
        let words = Model::Inverter(InverterModel::default()).encode();
        // Every float point of an empty inverter is the quiet-NaN pair.
        for pair in words[2..48].chunks(2) {
            assert_eq!(pair, [0x7FC0, 0x0000]);
        }
        // Enums and bitfields all-ones.
        assert!(words[48..].iter().all(|w| *w == 0xFFFF));
    }

    #[test]
    fn populated_points_land_on_their_declared_offsets() {
        let inverter = InverterModel { hz: Some(50.0), ..InverterModel::default() };
        let words = Model::Inverter(inverter).encode();
        // Hz is the twelfth float: header 2 + 11 * 2 words in.
        assert_eq!(&words[24..26], [0x4248, 0x0000]);
    }

    #[test]
    fn common_block_layout() {
        let common = CommonModel {
            manufacturer: "Ferroamp".to_string(),
            model: "EnergyHub 14".to_string(),
            version: "1".to_string(),
            serial_number: "123456789".to_string(),
            device_address: Some(9999),
            ..CommonModel::default()
        };
        let words = Model::Common(common).encode();
        assert_eq!(words.len(), 68);
        assert_eq!(words[..2], [1, 66]);
        // Mn starts right after the header, DA and the pad close the block.
        assert_eq!(words[2], u16::from_be_bytes(*b"Fe"));
        assert_eq!(words[66], 9999);
        assert_eq!(words[67], 0);
    }

    #[test]
    fn end_model_is_fixed() {
        assert_eq!(EndModel::encode(), [0xFFFF, 0]);
    }
}
