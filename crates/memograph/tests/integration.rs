//! End-to-end scenarios exercising the claim/memoize protocol, dependency
//! recording, and replica handling together through a real on-disk store.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;

use assert_matches::assert_matches;
use memograph::store::ClaimStatus;
use memograph::{ComputationDescriptor, Ref, Runtime, RuntimeConfig, RuntimeError, Value};

fn runtime(dir: &tempfile::TempDir) -> Runtime {
    let db_path = dir.path().join("memograph.sqlite3");
    Runtime::new(RuntimeConfig::new(db_path.to_str().unwrap())).unwrap()
}

fn int_arg(args: &Value, key: &str) -> i64 {
    match args {
        Value::Map(pairs) => pairs
            .iter()
            .find_map(|(k, v)| match (k, v) {
                (Value::String(s), Value::Int(n)) if s == key => Some(*n),
                _ => None,
            })
            .expect("argument present"),
        _ => panic!("expected a map of arguments"),
    }
}

fn cfg(pairs: Vec<(&str, i64)>) -> Value {
    Value::map(pairs.into_iter().map(|(k, v)| (Value::str(k), Value::from(v))))
}

/// Scenario 1: memoization. `f(x,y) = x*10+y`; repeated calls with the same
/// configuration do not re-invoke the function.
#[test]
fn memoization() {
    let dir = tempfile::tempdir().unwrap();
    let rt = runtime(&dir);
    let calls = Arc::new(AtomicU32::new(0));

    let calls_for_f = calls.clone();
    rt.register(ComputationDescriptor::new("f", 1, move |args| {
        calls_for_f.fetch_add(1, Ordering::SeqCst);
        Ok(Value::Int(int_arg(&args, "x") * 10 + int_arg(&args, "y")))
    }));

    let call = |x: i64, y: i64| {
        let r = Ref::new("f", 1, cfg(vec![("x", x), ("y", y)]), 0).unwrap();
        rt.get_results(&Value::Ref(r)).unwrap()
    };

    assert_eq!(call(10, 1), Value::Int(101));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    assert_eq!(call(10, 1), Value::Int(101));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    assert_eq!(call(1, 10), Value::Int(20));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

/// Scenario 2: failure cleanup. A computation that raises leaves no entry
/// behind; once it succeeds, the result is memoized normally.
#[test]
fn failure_cleanup() {
    let dir = tempfile::tempdir().unwrap();
    let rt = runtime(&dir);
    let should_fail = Arc::new(AtomicBool::new(true));
    let calls = Arc::new(AtomicU32::new(0));

    let should_fail_for_g = should_fail.clone();
    let calls_for_g = calls.clone();
    rt.register(ComputationDescriptor::new("g", 1, move |args| {
        calls_for_g.fetch_add(1, Ordering::SeqCst);
        if should_fail_for_g.load(Ordering::SeqCst) {
            return Err("MyException".into());
        }
        Ok(Value::Int(int_arg(&args, "x") * 2))
    }));

    let r = || Ref::new("g", 1, cfg(vec![("x", 10)]), 0).unwrap();

    let err = rt.get_results(&Value::Ref(r())).unwrap_err();
    assert_matches!(err, RuntimeError::ComputationFailed { .. });
    assert_eq!(rt.store().read_result(&r()).unwrap(), None, "failed computation must leave no entry");

    should_fail.store(false, Ordering::SeqCst);
    assert_eq!(rt.get_results(&Value::Ref(r())).unwrap(), Value::Int(20));
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    assert_eq!(rt.get_results(&Value::Ref(r())).unwrap(), Value::Int(20));
    assert_eq!(calls.load(Ordering::SeqCst), 2, "second success must be memoized, not re-executed");
}

/// Scenario 3: dependency recording. `h1(x) = x * h0()`, `h2(x,y) = (h1(x), h1(y))`;
/// after computing `h2`, `h1`'s dependency on `h0` is visible via `read_results`
/// against bare refs, with unvisited refs substituting as `null`.
#[test]
fn dependency_recording() {
    let dir = tempfile::tempdir().unwrap();
    let rt = runtime(&dir);

    rt.register(ComputationDescriptor::new("h0", 1, |_| Ok(Value::Int(10))));
    rt.register(ComputationDescriptor::new("h1", 1, |args| {
        let x = int_arg(&args, "x");
        let h0_ref = Ref::new("h0", 1, Value::map([]), 0).unwrap();
        let h0 = memograph::get_results(&Value::Ref(h0_ref))?;
        let Value::Int(h0) = h0 else { unreachable!() };
        Ok(Value::Int(x * h0))
    }));
    rt.register(ComputationDescriptor::new("h2", 1, |args| {
        let x = int_arg(&args, "x");
        let y = int_arg(&args, "y");
        let h1x = Ref::new("h1", 1, cfg(vec![("x", x)]), 0).unwrap();
        let h1y = Ref::new("h1", 1, cfg(vec![("x", y)]), 0).unwrap();
        let resolved = memograph::get_results(&Value::seq([Value::Ref(h1x), Value::Ref(h1y)]))?;
        Ok(resolved)
    }));

    let _entered = rt.enter();
    let h2_ref = Ref::new("h2", 1, cfg(vec![("x", 1), ("y", 3)]), 0).unwrap();
    let result = memograph::get_results(&Value::Ref(h2_ref)).unwrap();
    assert_eq!(result, Value::seq([Value::Int(10), Value::Int(30)]));

    let h1_one = Ref::new("h1", 1, cfg(vec![("x", 1)]), 0).unwrap();
    let h1_two = Ref::new("h1", 1, cfg(vec![("x", 2)]), 0).unwrap();
    let h1_three = Ref::new("h1", 1, cfg(vec![("x", 3)]), 0).unwrap();
    let unvisited = memograph::read_results(&Value::seq([
        Value::Ref(h1_one),
        Value::Ref(h1_two),
        Value::Ref(h1_three),
    ]))
    .unwrap();
    assert_eq!(unvisited, Value::seq([Value::Int(10), Value::Null, Value::Int(30)]));

    let h0_ref = Ref::new("h0", 1, Value::map([]), 0).unwrap();
    assert_eq!(memograph::read_results(&Value::Ref(h0_ref)).unwrap(), Value::Int(10));
}

/// Scenario 4: a `null` result is stored and still counts as a finished entry
/// — repeated calls do not re-invoke the computation.
#[test]
fn null_result_is_stored() {
    let dir = tempfile::tempdir().unwrap();
    let rt = runtime(&dir);
    let calls = Arc::new(AtomicU32::new(0));
    let calls_for_k = calls.clone();
    rt.register(ComputationDescriptor::new("k", 1, move |_| {
        calls_for_k.fetch_add(1, Ordering::SeqCst);
        Ok(Value::Null)
    }));

    let r = || Ref::new("k", 1, Value::map([]), 0).unwrap();
    for _ in 0..3 {
        assert_eq!(rt.get_results(&Value::Ref(r())).unwrap(), Value::Null);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

/// Scenario 5: replicas disambiguate independent entries of an otherwise
/// identical configuration, letting a non-deterministic computation be
/// invoked more than once under the same name/version/config.
#[test]
fn replicas_are_independent_entries() {
    let dir = tempfile::tempdir().unwrap();
    let rt = runtime(&dir);
    let counter = Arc::new(AtomicI64::new(0));
    let counter_for_m = counter.clone();
    rt.register(ComputationDescriptor::new("m", 1, move |_| {
        Ok(Value::Int(counter_for_m.fetch_add(1, Ordering::SeqCst) + 1))
    }));

    let replica = |n: u32| Ref::new("m", 1, Value::map([]), n).unwrap();
    let call = |n: u32| rt.get_results(&Value::Ref(replica(n))).unwrap();

    assert_eq!(call(1), Value::Int(1));
    assert_eq!(call(2), Value::Int(2));
    assert_eq!(call(1), Value::Int(1), "replica 1 is memoized");
    assert_eq!(call(3), Value::Int(3));

    let all = rt
        .get_results(&Value::seq([
            Value::Ref(replica(4)),
            Value::Ref(replica(1)),
            Value::Ref(replica(2)),
            Value::Ref(replica(3)),
        ]))
        .unwrap();
    assert_eq!(
        all,
        Value::seq([Value::Int(4), Value::Int(1), Value::Int(2), Value::Int(3)])
    );
    assert_eq!(counter.load(Ordering::SeqCst), 4);
}

/// Scenario 6: the announce protocol exercised directly against the store,
/// without going through a registered computation.
#[test]
fn announce_protocol() {
    let dir = tempfile::tempdir().unwrap();
    let rt = runtime(&dir);
    let store = rt.store();

    let r = Ref::new("direct", 1, cfg(vec![("x", 1)]), 0).unwrap();
    let (status, entry_id) = store.get_or_announce_entry(&r).unwrap();
    assert_eq!(status, ClaimStatus::ComputeHere);

    let r_again = Ref::new("direct", 1, cfg(vec![("x", 1)]), 0).unwrap();
    let (status, entry_id_again) = store.get_or_announce_entry(&r_again).unwrap();
    assert_eq!(status, ClaimStatus::ComputingElsewhere);
    assert_eq!(entry_id, entry_id_again);

    store.finish_entry(entry_id, &Value::str("Hello"), &Value::map([]), &[]).unwrap();

    let r_third = Ref::new("direct", 1, cfg(vec![("x", 1)]), 0).unwrap();
    let (status, _) = store.get_or_announce_entry(&r_third).unwrap();
    assert_eq!(status, ClaimStatus::Finished { result: Value::str("Hello") });

    let foreign = Ref::new("foreign", 1, Value::map([]), 0).unwrap();
    let (status, foreign_id) = store.get_or_announce_entry(&foreign).unwrap();
    assert_eq!(status, ClaimStatus::ComputeHere);
    store.cancel_entry(foreign_id).unwrap();

    let foreign_again = Ref::new("foreign", 1, Value::map([]), 0).unwrap();
    let (status, new_id) = store.get_or_announce_entry(&foreign_again).unwrap();
    assert_eq!(status, ClaimStatus::ComputeHere);
    assert_ne!(new_id, foreign_id, "cancellation frees the slot for a fresh entry id");
}
