use super::*;
use crate::refs::Ref;
use crate::value::Value;

fn memory_store() -> Store {
    Store::open(":memory:").unwrap()
}

fn cfg(x: i64) -> Value {
    Value::map([(Value::str("x"), Value::from(x))])
}

#[test]
fn announce_protocol_claims_exactly_once() {
    let store = memory_store();
    let r = Ref::new("f", 1, cfg(1), 0).unwrap();

    let (status, entry_id) = store.get_or_announce_entry(&r).unwrap();
    assert_eq!(status, ClaimStatus::ComputeHere);

    let r2 = Ref::new("f", 1, cfg(1), 0).unwrap();
    let (status2, entry_id2) = store.get_or_announce_entry(&r2).unwrap();
    assert_eq!(status2, ClaimStatus::ComputingElsewhere);
    assert_eq!(entry_id, entry_id2);
}

#[test]
fn finishing_then_announcing_returns_result() {
    let store = memory_store();
    let r = Ref::new("f", 1, cfg(1), 0).unwrap();
    let (_, entry_id) = store.get_or_announce_entry(&r).unwrap();
    store.finish_entry(entry_id, &Value::from(42i64), &Value::map([]), &[]).unwrap();

    let r2 = Ref::new("f", 1, cfg(1), 0).unwrap();
    let (status, _) = store.get_or_announce_entry(&r2).unwrap();
    assert_eq!(status, ClaimStatus::Finished { result: Value::from(42i64) });
}

#[test]
fn distinct_config_gets_distinct_entry() {
    let store = memory_store();
    let r1 = Ref::new("f", 1, cfg(1), 0).unwrap();
    let r2 = Ref::new("f", 1, cfg(2), 0).unwrap();
    let (_, id1) = store.get_or_announce_entry(&r1).unwrap();
    let (status, id2) = store.get_or_announce_entry(&r2).unwrap();
    assert_eq!(status, ClaimStatus::ComputeHere);
    assert_ne!(id1, id2);
}

#[test]
fn cancel_entry_allows_reannouncement() {
    let store = memory_store();
    let r = Ref::new("f", 1, cfg(1), 0).unwrap();
    let (_, entry_id) = store.get_or_announce_entry(&r).unwrap();
    store.cancel_entry(entry_id).unwrap();

    let r2 = Ref::new("f", 1, cfg(1), 0).unwrap();
    let (status, _) = store.get_or_announce_entry(&r2).unwrap();
    assert_eq!(status, ClaimStatus::ComputeHere);
}

#[test]
fn cancel_after_finish_is_a_no_op() {
    let store = memory_store();
    let r = Ref::new("f", 1, cfg(1), 0).unwrap();
    let (_, entry_id) = store.get_or_announce_entry(&r).unwrap();
    store.finish_entry(entry_id, &Value::from(1i64), &Value::map([]), &[]).unwrap();
    store.cancel_entry(entry_id).unwrap();

    let r2 = Ref::new("f", 1, cfg(1), 0).unwrap();
    let (status, _) = store.get_or_announce_entry(&r2).unwrap();
    assert_eq!(status, ClaimStatus::Finished { result: Value::from(1i64) });
}

#[test]
fn read_result_reflects_finished_entry() {
    let store = memory_store();
    let r = Ref::new("f", 1, cfg(1), 0).unwrap();
    let (_, entry_id) = store.get_or_announce_entry(&r).unwrap();
    assert_eq!(store.read_result(&r).unwrap(), None);
    store.finish_entry(entry_id, &Value::str("done"), &Value::map([]), &[]).unwrap();
    assert_eq!(store.read_result(&r).unwrap(), Some(Value::str("done")));
}

#[test]
fn read_refs_enumerates_entries_for_a_name() {
    let store = memory_store();
    let r1 = Ref::new("f", 1, cfg(1), 0).unwrap();
    let r2 = Ref::new("f", 1, cfg(2), 0).unwrap();
    let other = Ref::new("g", 1, cfg(1), 0).unwrap();
    store.get_or_announce_entry(&r1).unwrap();
    store.get_or_announce_entry(&r2).unwrap();
    store.get_or_announce_entry(&other).unwrap();

    let refs = store.read_refs("f").unwrap();
    assert_eq!(refs.len(), 2);
    assert!(refs.iter().all(|r| r.name() == "f"));
}

#[test]
fn remove_entry_cascades_to_consumers() {
    let store = memory_store();
    let base = Ref::new("base", 1, cfg(1), 0).unwrap();
    let derived = Ref::new("derived", 1, cfg(1), 0).unwrap();

    let (_, base_id) = store.get_or_announce_entry(&base).unwrap();
    store.finish_entry(base_id, &Value::from(1i64), &Value::map([]), &[]).unwrap();

    let (_, derived_id) = store.get_or_announce_entry(&derived).unwrap();
    store
        .finish_entry(derived_id, &Value::from(2i64), &Value::map([]), &[base_id])
        .unwrap();

    let consumers = store.recursive_consumers(&base).unwrap();
    assert_eq!(consumers.len(), 1);
    assert_eq!(consumers[0].name(), "derived");

    store.remove_entry(&base).unwrap();
    assert_eq!(store.read_result(&base).unwrap(), None);
    assert_eq!(store.read_result(&derived).unwrap(), None);
}

#[test]
fn remove_entry_cascades_transitively() {
    let store = memory_store();
    let a = Ref::new("a", 1, cfg(1), 0).unwrap();
    let b = Ref::new("b", 1, cfg(1), 0).unwrap();
    let c = Ref::new("c", 1, cfg(1), 0).unwrap();

    let (_, a_id) = store.get_or_announce_entry(&a).unwrap();
    store.finish_entry(a_id, &Value::from(1i64), &Value::map([]), &[]).unwrap();
    let (_, b_id) = store.get_or_announce_entry(&b).unwrap();
    store.finish_entry(b_id, &Value::from(1i64), &Value::map([]), &[a_id]).unwrap();
    let (_, c_id) = store.get_or_announce_entry(&c).unwrap();
    store.finish_entry(c_id, &Value::from(1i64), &Value::map([]), &[b_id]).unwrap();

    let consumers = store.recursive_consumers(&a).unwrap();
    let names: Vec<_> = consumers.iter().map(Ref::name).collect();
    assert_eq!(names.len(), 2);
    assert!(names.contains(&"b"));
    assert!(names.contains(&"c"));

    store.remove_entry(&a).unwrap();
    assert_eq!(store.read_result(&c).unwrap(), None);
}
