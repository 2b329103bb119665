use std::sync::Arc;

use sda_agent::identity::IdentityRegistry;
use sda_agent::runtime::ObjectKind;
use sda_agent::testing::FakeRuntime;
use sda_agent::ProtocolError;

#[test]
fn reachable_objects_round_trip_through_their_ids() {
    let rt = Arc::new(FakeRuntime::new());
    let registry = IdentityRegistry::new(rt.clone());

    let objects: Vec<_> = (0..600).map(|_| rt.add_object(ObjectKind::Object)).collect();
    let ids: Vec<_> = objects.iter().map(|o| registry.id_for(Some(*o))).collect();

    // Allocation order is first-seen order.
    assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));
    assert!(ids.iter().all(|id| *id > 0));
    for (object, id) in objects.iter().zip(&ids) {
        assert_eq!(registry.object_for(*id), Ok(Some(*object)));
        assert_eq!(registry.id_for(Some(*object)), *id);
    }
}

#[test]
fn periodic_compaction_keeps_live_mappings() {
    let rt = Arc::new(FakeRuntime::new());
    let registry = IdentityRegistry::new(rt.clone());

    let keep = rt.add_object(ObjectKind::Object);
    let keep_id = registry.id_for(Some(keep));
    // Enough short-lived objects to cross several compaction rounds.
    for _ in 0..1_000 {
        let temp = rt.add_object(ObjectKind::Object);
        registry.id_for(Some(temp));
        rt.collect(temp);
    }
    assert!(registry.len() < 1_000);
    assert_eq!(registry.object_for(keep_id), Ok(Some(keep)));
}

#[test]
fn rom_and_heap_ids_live_in_disjoint_ranges() {
    let rt = Arc::new(FakeRuntime::new());
    let registry = IdentityRegistry::new(rt.clone());

    let rom = rt.add_rom_object(ObjectKind::Class, 3);
    let heap = rt.add_object(ObjectKind::Array);
    assert_eq!(registry.id_for(Some(rom)), -3);
    assert_eq!(registry.id_for(Some(heap)), 1);

    // ROM objects are never reclaimed.
    rt.collect(rom);
    assert_eq!(registry.object_for(-3), Ok(Some(rom)));
    assert_eq!(registry.object_for(0), Ok(None));
    assert_eq!(registry.id_for(None), 0);
}

#[test]
fn collected_object_stays_invalid_after_purge() {
    let rt = Arc::new(FakeRuntime::new());
    let registry = IdentityRegistry::new(rt.clone());
    let object = rt.add_object(ObjectKind::Object);
    let id = registry.id_for(Some(object));
    rt.collect(object);

    for _ in 0..3 {
        assert_eq!(registry.object_for(id), Err(ProtocolError::InvalidObject(id)));
    }
    assert!(registry.is_empty());
}
