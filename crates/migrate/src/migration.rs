use serde_json::Value;
use std::borrow::Cow;
use std::sync::Arc;

/// Error returned by a migration transform.
pub type TransformError = Box<dyn std::error::Error + Send + Sync + 'static>;

type TransformFn = dyn Fn(Value) -> Result<Value, TransformError> + Send + Sync;

/// A versioned transform from the previous schema version's data shape to
/// `version`'s shape.
///
/// Transforms receive the untyped state produced by the previous step and
/// should be pure. Cloning a migration shares the transform.
#[derive(Clone)]
pub struct Migration {
    version: u32,
    description: Cow<'static, str>,
    transform: Arc<TransformFn>,
}

impl Migration {
    pub fn new<F>(version: u32, description: impl Into<Cow<'static, str>>, transform: F) -> Self
    where
        F: Fn(Value) -> Result<Value, TransformError> + Send + Sync + 'static,
    {
        Self {
            version,
            description: description.into(),
            transform: Arc::new(transform),
        }
    }

    /// The schema version this migration produces.
    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Run the transform on `state`.
    pub fn apply(&self, state: Value) -> Result<Value, TransformError> {
        (self.transform)(state)
    }
}

impl std::fmt::Debug for Migration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Migration")
            .field("version", &self.version)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// Compile-time check that a registry lists each version once.
///
/// Used by [`migrations!`](crate::migrations); panics during const
/// evaluation on a duplicate.
pub const fn assert_distinct_versions(versions: &[u32]) {
    let mut i = 0;
    while i < versions.len() {
        let mut j = i + 1;
        while j < versions.len() {
            if versions[i] == versions[j] {
                panic!("migration registry lists the same version twice");
            }
            j += 1;
        }
        i += 1;
    }
}

/// Build a migration registry from literal entries.
///
/// Versions must be integer literals; a duplicate is a compile error.
///
/// ```
/// use vstate_migrate::migrations;
///
/// let registry = migrations![
///     2 => "add email", |mut state| {
///         state["email"] = "".into();
///         Ok(state)
///     };
///     3 => "drop legacy flag", |mut state| {
///         if let Some(map) = state.as_object_mut() {
///             map.remove("legacy");
///         }
///         Ok(state)
///     };
/// ];
/// assert_eq!(registry.len(), 2);
/// ```
#[macro_export]
macro_rules! migrations {
    ($($version:literal => $description:literal, $transform:expr);* $(;)?) => {{
        const _: () = $crate::assert_distinct_versions(&[$($version),*]);
        ::std::vec![$($crate::Migration::new($version, $description, $transform)),*]
    }};
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn apply_runs_transform() {
        let m = Migration::new(2, "double", |v: Value| {
            let n = v.as_i64().ok_or("not a number")?;
            Ok(json!(n * 2))
        });
        assert_eq!(m.version(), 2);
        assert_eq!(m.description(), "double");
        assert_eq!(m.apply(json!(21)).unwrap(), json!(42));
        assert_eq!(m.apply(json!("x")).unwrap_err().to_string(), "not a number");
    }

    #[test]
    fn debug_omits_transform() {
        let m = Migration::new(4, "noop", Ok);
        let text = format!("{m:?}");
        assert!(text.contains("version: 4"));
        assert!(text.contains("noop"));
    }

    #[test]
    fn macro_builds_registry_in_order() {
        let registry = crate::migrations![
            3 => "third", Ok;
            1 => "first", Ok;
        ];
        let versions: Vec<u32> = registry.iter().map(Migration::version).collect();
        assert_eq!(versions, vec![3, 1]);
    }

    #[test]
    fn distinct_versions_pass() {
        assert_distinct_versions(&[]);
        assert_distinct_versions(&[1, 2, 3]);
    }

    #[test]
    #[should_panic(expected = "same version twice")]
    fn duplicate_versions_panic_at_runtime_too() {
        let versions = vec![1, 2, 1];
        assert_distinct_versions(&versions);
    }
}
