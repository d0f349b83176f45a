use isolate::codec;
use isolate::config::IsolateConfig;
use isolate::errors::IsolateError;
use isolate::registry::OverrideRegistry;
use isolate::replay::ReplayPolicy;
use isolate::reporter::{MemoryReporter, TestReporter};
use isolate::runtime::FakeHost;
use isolate::Isolator;
use std::sync::Arc;

fn isolator(host: &FakeHost, config: IsolateConfig) -> Isolator {
    Isolator::with_host(
        Arc::new(host.clone()),
        OverrideRegistry::with_library(),
        config,
    )
}

#[test]
fn one_byte_chunks_still_frame_the_message() {
    let host = FakeHost::new().with_chunk_size(1);
    let mut reporter = MemoryReporter::new();
    let outcome = isolator(&host, IsolateConfig::default())
        .run(&mut reporter, "chunked", |t| {
            t.cmp_ok(3, "<", 4, "three below four")?;
            t.contains(vec!["a", "b"], "b", "has b")?;
            Ok(())
        })
        .expect("session");
    assert_eq!(outcome.replay.replayed, 2);
    assert_eq!(host.spawned(), 1);
    assert!(reporter.summary().all_passed());
}

#[test]
fn replay_errors_continue_by_default() {
    let host = FakeHost::new();
    let mut reporter = MemoryReporter::new();
    let outcome = isolator(&host, IsolateConfig::default())
        .run(&mut reporter, "bad operator", |t| {
            t.cmp_ok(1, "<=>", 2, "no such operator")?;
            t.pass("still replayed")?;
            Ok(())
        })
        .expect("session");
    assert_eq!(outcome.replay.errors.len(), 1);
    assert_eq!(
        reporter.outcomes(),
        vec![
            (1, true, "still replayed".to_string()),
            (2, true, "bad operator".to_string()),
        ]
    );
}

#[test]
fn abort_policy_reports_final_status_then_errors() {
    let host = FakeHost::new();
    let mut config = IsolateConfig::default();
    config.replay.on_error = ReplayPolicy::Abort;
    let mut reporter = MemoryReporter::new();
    let err = isolator(&host, config)
        .run(&mut reporter, "strict", |t| {
            t.cmp_ok(1, "<=>", 2, "no such operator")?;
            t.pass("skipped")?;
            Ok(())
        })
        .expect_err("abort");
    assert!(matches!(err, IsolateError::ReplayAborted(_)));
    assert_eq!(reporter.outcomes(), vec![(1, true, "strict".to_string())]);
}

#[test]
fn records_of_the_wrong_shape_are_rejected() {
    let host = FakeHost::new();
    host.set_replace_output(b"[[1,2]]EODATA".to_vec());
    let mut reporter = MemoryReporter::new();
    let err = isolator(&host, IsolateConfig::default())
        .run(&mut reporter, "wrong shape", |_| Ok(()))
        .expect_err("decode");
    assert!(matches!(err, IsolateError::Decode(_)));
    assert_eq!(reporter.outcomes(), vec![(1, false, "wrong shape".to_string())]);
}

#[test]
fn bytes_after_the_sentinel_are_dropped() {
    let host = FakeHost::new();
    let mut bytes = codec::encode(&[]).expect("encode");
    bytes.extend_from_slice(b"stray");
    host.set_replace_output(bytes);
    let mut reporter = MemoryReporter::new();
    let outcome = isolator(&host, IsolateConfig::default())
        .run(&mut reporter, "stray", |_| Ok(()))
        .expect("session");
    assert!(outcome.passed);
}

#[test]
fn stalled_child_is_killed_once() {
    let host = FakeHost::new();
    host.set_stall(true);
    let mut config = IsolateConfig::default();
    config.isolation.timeout_ms = Some(25);
    let mut reporter = MemoryReporter::new();
    let err = isolator(&host, config)
        .run(&mut reporter, "stalled", |_| Ok(()))
        .expect_err("timeout");
    assert_eq!(err.to_string(), "child timed out after 25ms");
    assert_eq!(host.kills(), vec![1]);
}

#[test]
fn alias_imported_after_install_is_captured() {
    let host = FakeHost::new();
    let mut registry = OverrideRegistry::with_library();
    assert!(registry.import("assert", "is", "suite::late"));
    let isolator = Isolator::with_host(Arc::new(host), registry, IsolateConfig::default());

    let mut reporter = MemoryReporter::new();
    let outcome = isolator
        .run(&mut reporter, "late alias", |t| {
            t.set_caller("suite::late");
            t.is(2, 2, "through late import")?;
            Ok(())
        })
        .expect("session");
    assert_eq!(outcome.replay.replayed, 1);
    assert_eq!(
        reporter.outcomes(),
        vec![
            (1, true, "through late import".to_string()),
            (2, true, "late alias".to_string()),
        ]
    );
}
