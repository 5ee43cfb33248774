use serde_json::Value;
use std::collections::BTreeSet;
use std::panic::{AssertUnwindSafe, catch_unwind};

use crate::migration::{Migration, TransformError};

/// Errors from sequencing or applying migrations.
#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    #[error("cannot migrate backwards from v{from} to v{to}")]
    BackwardMigration { from: u32, to: u32 },
    #[error("missing migrations for versions {}", render_versions(.missing))]
    MissingMigration { missing: Vec<u32> },
    #[error("more than one migration registered for version {0}")]
    DuplicateMigration(u32),
    #[error("migration v{version} ({description}) failed: {source}")]
    MigrationStep {
        version: u32,
        description: String,
        #[source]
        source: TransformError,
    },
}

fn render_versions(versions: &[u32]) -> String {
    versions
        .iter()
        .map(|v| format!("v{v}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// A transform panicked instead of returning an error.
#[derive(Debug, thiserror::Error)]
#[error("transform panicked: {0}")]
pub struct TransformPanic(pub String);

/// Sequences and applies forward-only migrations.
///
/// Caller order is never trusted: migrations are sorted by version, the
/// requested range is checked for gaps before anything runs, and a failing
/// step aborts the whole run without returning partial state.
pub struct MigrationEngine;

impl MigrationEngine {
    /// The ordered steps needed to go from `from` to `to`.
    ///
    /// Empty when `from == to`. Fails on a backward request, a duplicate
    /// version, or any gap in `from + 1 ..= to`.
    pub fn plan(from: u32, to: u32, migrations: &[Migration]) -> Result<Vec<&Migration>, MigrationError> {
        if from == to {
            return Ok(Vec::new());
        }
        if from > to {
            return Err(MigrationError::BackwardMigration { from, to });
        }

        let mut sorted: Vec<&Migration> = migrations.iter().collect();
        sorted.sort_by_key(|m| m.version());
        if let Some(pair) = sorted.windows(2).find(|w| w[0].version() == w[1].version()) {
            return Err(MigrationError::DuplicateMigration(pair[0].version()));
        }

        let steps: Vec<&Migration> = sorted
            .into_iter()
            .filter(|m| m.version() > from && m.version() <= to)
            .collect();

        let present: BTreeSet<u32> = steps.iter().map(|m| m.version()).collect();
        let missing: Vec<u32> = (from + 1..=to).filter(|v| !present.contains(v)).collect();
        if !missing.is_empty() {
            return Err(MigrationError::MissingMigration { missing });
        }

        Ok(steps)
    }

    /// Migrate `state` from version `from` to version `to`.
    ///
    /// The result is not validated; that is the caller's job.
    pub fn run(state: Value, from: u32, to: u32, migrations: &[Migration]) -> Result<Value, MigrationError> {
        let _span = tracing::debug_span!("migrate", from, to).entered();
        let steps = Self::plan(from, to, migrations)?;

        let mut state = state;
        for step in steps {
            tracing::debug!(version = step.version(), description = step.description(), "applying migration");
            state = apply_step(step, state)?;
        }
        Ok(state)
    }
}

fn apply_step(step: &Migration, state: Value) -> Result<Value, MigrationError> {
    let fail = |source: TransformError| MigrationError::MigrationStep {
        version: step.version(),
        description: step.description().to_owned(),
        source,
    };
    match catch_unwind(AssertUnwindSafe(|| step.apply(state))) {
        Ok(Ok(next)) => Ok(next),
        Ok(Err(source)) => Err(fail(source)),
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| (*s).to_owned())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".into());
            Err(fail(Box::new(TransformPanic(message))))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Migration that appends its version to `state.trail` and counts calls.
    fn tracing_migration(version: u32, calls: &Arc<AtomicUsize>) -> Migration {
        let calls = Arc::clone(calls);
        Migration::new(version, format!("step {version}"), move |mut state| {
            calls.fetch_add(1, Ordering::SeqCst);
            state["trail"]
                .as_array_mut()
                .ok_or("trail missing")?
                .push(json!(version));
            Ok(state)
        })
    }

    fn start() -> Value {
        json!({ "trail": [] })
    }

    #[test]
    fn same_version_is_identity_without_calls() {
        let calls = Arc::new(AtomicUsize::new(0));
        let migs = vec![tracing_migration(1, &calls), tracing_migration(2, &calls)];
        for n in [0, 1, 2, 7] {
            let out = MigrationEngine::run(json!({ "x": n }), n, n, &migs).unwrap();
            assert_eq!(out, json!({ "x": n }));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn backward_fails_without_calls() {
        let calls = Arc::new(AtomicUsize::new(0));
        let migs = vec![tracing_migration(2, &calls), tracing_migration(3, &calls)];
        let err = MigrationEngine::run(start(), 3, 1, &migs).unwrap_err();
        assert!(matches!(err, MigrationError::BackwardMigration { from: 3, to: 1 }));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn unsorted_input_matches_sorted() {
        let calls = Arc::new(AtomicUsize::new(0));
        let unsorted = vec![
            tracing_migration(2, &calls),
            tracing_migration(3, &calls),
            tracing_migration(1, &calls),
        ];
        let sorted = vec![
            tracing_migration(1, &calls),
            tracing_migration(2, &calls),
            tracing_migration(3, &calls),
        ];
        let a = MigrationEngine::run(start(), 0, 3, &unsorted).unwrap();
        let b = MigrationEngine::run(start(), 0, 3, &sorted).unwrap();
        assert_eq!(a, b);
        assert_eq!(a, json!({ "trail": [1, 2, 3] }));

        // 1 -> 3 only applies 2 and 3.
        let c = MigrationEngine::run(start(), 1, 3, &unsorted).unwrap();
        assert_eq!(c, json!({ "trail": [2, 3] }));
    }

    #[test]
    fn missing_versions_are_all_named() {
        let calls = Arc::new(AtomicUsize::new(0));
        let migs = vec![tracing_migration(3, &calls)];
        let err = MigrationEngine::run(start(), 1, 3, &migs).unwrap_err();
        match err {
            MigrationError::MissingMigration { ref missing } => assert_eq!(missing, &vec![2]),
            other => panic!("expected MissingMigration, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let err = MigrationEngine::run(start(), 0, 5, &migs).unwrap_err();
        assert_eq!(err.to_string(), "missing migrations for versions v1, v2, v4, v5");
    }

    #[test]
    fn out_of_range_migrations_are_ignored() {
        let calls = Arc::new(AtomicUsize::new(0));
        let migs = vec![
            tracing_migration(1, &calls),
            tracing_migration(2, &calls),
            tracing_migration(9, &calls),
        ];
        let out = MigrationEngine::run(start(), 1, 2, &migs).unwrap();
        assert_eq!(out, json!({ "trail": [2] }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn duplicate_versions_rejected() {
        let calls = Arc::new(AtomicUsize::new(0));
        let migs = vec![tracing_migration(2, &calls), tracing_migration(2, &calls)];
        let err = MigrationEngine::run(start(), 1, 2, &migs).unwrap_err();
        assert!(matches!(err, MigrationError::DuplicateMigration(2)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn failing_step_aborts_with_context() {
        let calls = Arc::new(AtomicUsize::new(0));
        let migs = vec![
            tracing_migration(1, &calls),
            Migration::new(2, "split name", |_| Err("name is not a string".into())),
            tracing_migration(3, &calls),
        ];
        let err = MigrationEngine::run(start(), 0, 3, &migs).unwrap_err();
        match &err {
            MigrationError::MigrationStep {
                version,
                description,
                source,
            } => {
                assert_eq!(*version, 2);
                assert_eq!(description, "split name");
                assert_eq!(source.to_string(), "name is not a string");
            }
            other => panic!("expected MigrationStep, got {other:?}"),
        }
        // Step 3 never ran.
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_step_is_reported_as_step_failure() {
        let migs = vec![Migration::new(1, "explode", |_| panic!("boom"))];
        let err = MigrationEngine::run(start(), 0, 1, &migs).unwrap_err();
        assert_eq!(
            err.to_string(),
            "migration v1 (explode) failed: transform panicked: boom"
        );
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Any permutation of a complete registry yields the same result.
            #[test]
            fn prop_order_independent(
                order in Just((1u32..=6).collect::<Vec<_>>()).prop_shuffle()
            ) {
                let calls = Arc::new(AtomicUsize::new(0));
                let shuffled: Vec<Migration> = order.iter().map(|v| tracing_migration(*v, &calls)).collect();
                let out = MigrationEngine::run(start(), 0, 6, &shuffled).unwrap();
                prop_assert_eq!(out, json!({ "trail": [1, 2, 3, 4, 5, 6] }));
            }

            /// Identity for every version, whatever the registry holds.
            #[test]
            fn prop_identity(n in 0u32..1000, len in 0usize..5) {
                let calls = Arc::new(AtomicUsize::new(0));
                let migs: Vec<Migration> = (1..=len as u32).map(|v| tracing_migration(v, &calls)).collect();
                let out = MigrationEngine::run(json!(n), n, n, &migs).unwrap();
                prop_assert_eq!(out, json!(n));
                prop_assert_eq!(calls.load(Ordering::SeqCst), 0);
            }
        }
    }
}
