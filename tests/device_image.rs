//! End-to-end checks of the telemetry → image → store path through the
//! public API, the way the serve command wires it up.

use ferroamp_sunspec_bridge::device::Device;
use ferroamp_sunspec_bridge::store::RegisterStore;
use ferroamp_sunspec_bridge::telemetry::Pipeline;
use std::sync::Arc;

fn words_of(value: f32) -> [u16; 2] {
    let bits = value.to_bits();
    [(bits >> 16) as u16, bits as u16]
}

#[test]
fn the_initial_image_is_a_complete_sentinel_map() {
    let image = Device::energyhub(40000).compose();
    assert_eq!(image.base_address(), 40000);
    assert_eq!(image.words().len(), 260);
    // "SunS", then the identity block header.
    assert_eq!(image.read(40000, 4).unwrap(), [0x5375, 0x6E53, 1, 66]);
    assert_eq!(image.read(40070, 2).unwrap(), [113, 60]);
    assert_eq!(image.read(40132, 2).unwrap(), [214, 124]);
    assert_eq!(image.read(40258, 2).unwrap(), [0xFFFF, 0]);
    // No measurement has arrived yet: the inverter's frequency is the
    // quiet-NaN sentinel, not zero.
    assert_eq!(image.read(40094, 2).unwrap(), [0x7FC0, 0x0000]);
}

#[test]
fn a_full_extapi_message_round_trips_into_registers() {
    let device = Device::energyhub(40000);
    let store = Arc::new(RegisterStore::new(device.compose()));
    let mut pipeline = Pipeline::new(device, Arc::clone(&store));

    // A trimmed-down version of a real `extapi/data/ehub` message: numbers
    // arrive as strings, and plenty of keys carry readings the bridge does
    // not map.
    let payload = br#"{
        "gridfreq": {"val": "50.04"},
        "iextq": {"L1": "1.5", "L2": "2.0", "L3": "2.5"},
        "ul": {"L1": "230.0", "L2": "231.0", "L3": "232.0"},
        "pload": {"L1": "1000.0", "L2": "1200.0", "L3": "800.0"},
        "sext": {"val": "5500.0"},
        "udc": {"val": "760.5"},
        "iext": {"L1": "4.0", "L2": "5.0", "L3": "6.0"},
        "pext": {"L1": "100.0", "L2": "200.0", "L3": "300.0"},
        "wextprodq": {"L1": "3600.0", "L2": "7200.0", "L3": "10800.0"},
        "soc": {"val": "87.3"},
        "pbat": {"val": "-1500.0"},
        "ts": {"val": "2024-05-12T12:00:00UTC"}
    }"#;
    let applied = pipeline.apply(payload).expect("the payload is well-formed");
    assert_eq!(applied, 9);

    let image = store.snapshot();
    // Inverter block (payload starts at 40072).
    assert_eq!(image.read(40072, 2).unwrap(), words_of(6.0)); // A
    assert_eq!(image.read(40074, 2).unwrap(), words_of(1.5)); // AphA
    assert_eq!(image.read(40086, 2).unwrap(), words_of(230.0)); // PhVphA
    assert_eq!(image.read(40092, 2).unwrap(), words_of(3000.0)); // W
    assert_eq!(image.read(40094, 2).unwrap(), words_of(50.04)); // Hz
    assert_eq!(image.read(40096, 2).unwrap(), words_of(5500.0)); // VA
    assert_eq!(image.read(40106, 2).unwrap(), words_of(760.5)); // DCV
    // Meter block (payload starts at 40134).
    assert_eq!(image.read(40134, 2).unwrap(), words_of(15.0)); // A
    assert_eq!(image.read(40142, 2).unwrap(), words_of(231.0)); // PhV
    assert_eq!(image.read(40160, 2).unwrap(), words_of(600.0)); // W
    assert_eq!(image.read(40192, 2).unwrap(), words_of(6.0)); // TotWhExp
    // Unmapped points keep their sentinels: inverter PF and the meter's
    // import energy were not in the message.
    assert_eq!(image.read(40100, 2).unwrap(), [0x7FC0, 0x0000]);
    assert_eq!(image.read(40200, 2).unwrap(), [0x7FC0, 0x0000]);
}

#[test]
fn updates_replace_rather_than_accumulate() {
    let device = Device::energyhub(40000);
    let store = Arc::new(RegisterStore::new(device.compose()));
    let mut pipeline = Pipeline::new(device, Arc::clone(&store));

    pipeline.apply(br#"{"gridfreq": {"val": "49.9"}}"#).unwrap();
    pipeline.apply(br#"{"gridfreq": {"val": "50.1"}}"#).unwrap();
    assert_eq!(store.snapshot().read(40094, 2).unwrap(), words_of(50.1));

    // A later message without the key leaves the last-known value standing.
    pipeline.apply(br#"{"sext": {"val": "5000"}}"#).unwrap();
    assert_eq!(store.snapshot().read(40094, 2).unwrap(), words_of(50.1));
}

#[test]
fn readers_holding_old_snapshots_are_unaffected_by_updates() {
    let device = Device::energyhub(40000);
    let store = Arc::new(RegisterStore::new(device.compose()));
    let mut pipeline = Pipeline::new(device, Arc::clone(&store));

    let old = store.snapshot();
    pipeline.apply(br#"{"gridfreq": {"val": "50.0"}}"#).unwrap();
    assert_eq!(old.read(40094, 2).unwrap(), [0x7FC0, 0x0000]);
    assert_eq!(store.snapshot().read(40094, 2).unwrap(), words_of(50.0));
}

#[test]
fn custom_base_addresses_shift_the_whole_map() {
    let image = Device::energyhub(50000).compose();
    assert_eq!(image.read(50000, 2).unwrap(), [0x5375, 0x6E53]);
    assert_eq!(image.read(50258, 2).unwrap(), [0xFFFF, 0]);
    assert!(image.read(40000, 2).is_none());
}
