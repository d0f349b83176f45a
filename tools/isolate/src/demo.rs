use crate::config::IsolateConfig;
use crate::errors::IsolateError;
use crate::registry::OverrideRegistry;
use crate::reporter::TestReporter;
use crate::session::{Isolator, SessionOutcome};
use std::sync::atomic::{AtomicU64, Ordering};

pub const ALIAS_CONTEXT: &str = "demo::aliased";

static DEMO_GLOBAL: AtomicU64 = AtomicU64::new(0);

pub fn run_scenarios(
    config: &IsolateConfig,
    reporter: &mut dyn TestReporter,
) -> Result<Vec<SessionOutcome>, IsolateError> {
    let isolator = Isolator::new(config.clone());
    let mut outcomes = Vec::new();

    outcomes.push(isolator.run(reporter, "basic", |t| {
        t.ok(1 == 1, "one equals one")?;
        Ok(())
    })?);

    outcomes.push(isolator.run(reporter, "child state stays in the child", |t| {
        DEMO_GLOBAL.store(1, Ordering::SeqCst);
        t.is(DEMO_GLOBAL.load(Ordering::SeqCst), 1, "global set inside child")?;
        Ok(())
    })?);
    reporter.diag(&format!(
        "parent global after isolation: {}",
        DEMO_GLOBAL.load(Ordering::SeqCst)
    ));

    outcomes.push(isolator.run(reporter, "child dies after one assertion", |t| {
        t.pass("ran before the crash")?;
        panic!("deliberate failure inside the isolated child");
    })?);

    let aliased = Isolator::with_host(
        std::sync::Arc::new(crate::runtime::ForkHost),
        aliased_registry(),
        config.clone(),
    );
    outcomes.push(aliased.run(reporter, "aliased import is captured", |t| {
        t.set_caller(ALIAS_CONTEXT);
        t.ok(true, "called through the alias")?;
        Ok(())
    })?);

    Ok(outcomes)
}

pub fn aliased_registry() -> OverrideRegistry {
    let mut registry = OverrideRegistry::with_library();
    registry.import(crate::assertions::LIBRARY_CONTEXT, "ok", ALIAS_CONTEXT);
    registry
}
