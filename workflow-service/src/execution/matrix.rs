// Matrix Strategy Expansion
// Expands matrix axes into concrete job instances

use crate::error::ConfigurationError;
use crate::expression::Value;
use crate::workflow::models::{Job, Matrix};

use indexmap::IndexMap;
use tracing::debug;

/// Ordered mapping from axis name to its ordered values
pub type Axes = IndexMap<String, Vec<Value>>;

/// A single matrix instance (one combination of axis values)
#[derive(Debug, Clone, PartialEq)]
pub struct MatrixInstance {
    /// Position in expansion order
    pub index: usize,
    /// Display name, e.g. `(ubuntu, stable)`
    pub name: String,
    /// Value bound to each axis, in axis order
    pub bindings: IndexMap<String, Value>,
}

impl MatrixInstance {
    fn new(index: usize, bindings: IndexMap<String, Value>) -> Self {
        let name = if bindings.is_empty() {
            String::new()
        } else {
            let values: Vec<String> = bindings.values().map(Value::as_string).collect();
            format!("({})", values.join(", "))
        };

        Self {
            index,
            name,
            bindings,
        }
    }

    pub fn get(&self, axis: &str) -> Option<&Value> {
        self.bindings.get(axis)
    }
}

/// Matrix expander for job strategies
pub struct MatrixExpander;

impl MatrixExpander {
    /// Full cross product of `axes` in row-major order: the last declared
    /// axis varies fastest.
    ///
    /// No axes yields a single instance with no bindings.
    pub fn expand(axes: &Axes) -> Result<Vec<MatrixInstance>, ConfigurationError> {
        if let Some((axis, _)) = axes.iter().find(|(_, values)| values.is_empty()) {
            return Err(ConfigurationError::EmptyAxis(axis.clone()));
        }

        let total: usize = axes.values().map(Vec::len).product();
        let mut instances = Vec::with_capacity(total);

        for index in 0..total {
            let mut bindings = IndexMap::with_capacity(axes.len());
            let mut stride = total;

            for (axis, values) in axes {
                stride /= values.len();
                let position = (index / stride) % values.len();
                bindings.insert(axis.clone(), values[position].clone());
            }

            instances.push(MatrixInstance::new(index, bindings));
        }

        debug!(axes = axes.len(), jobs = instances.len(), "expanded matrix");
        Ok(instances)
    }

    /// Expand a declared matrix, applying `exclude` then `include`.
    pub fn expand_matrix(matrix: &Matrix) -> Result<Vec<MatrixInstance>, ConfigurationError> {
        let axes: Axes = matrix
            .dimensions
            .iter()
            .map(|(axis, values)| (axis.clone(), values.iter().map(Value::from).collect()))
            .collect();

        let excludes: Vec<IndexMap<String, Value>> =
            matrix.exclude.iter().map(Self::convert_entry).collect();
        let includes: Vec<IndexMap<String, Value>> =
            matrix.include.iter().map(Self::convert_entry).collect();

        // A matrix made only of `include` entries has no cross product
        let base = if axes.is_empty() && !includes.is_empty() {
            Vec::new()
        } else {
            Self::expand(&axes)?
        };

        let mut combinations: Vec<IndexMap<String, Value>> = base
            .into_iter()
            .map(|instance| instance.bindings)
            .filter(|bindings| !excludes.iter().any(|ex| Self::entry_matches(ex, bindings)))
            .collect();

        let original_count = combinations.len();

        for include in includes {
            let mut extended = false;

            for bindings in combinations.iter_mut().take(original_count) {
                let axis_keys_match = include
                    .iter()
                    .filter(|(key, _)| axes.contains_key(*key))
                    .all(|(key, value)| {
                        bindings.get(key).is_some_and(|b| b.loosely_equals(value))
                    });

                if axis_keys_match {
                    for (key, value) in &include {
                        if !axes.contains_key(key) {
                            bindings.insert(key.clone(), value.clone());
                        }
                    }
                    extended = true;
                }
            }

            if !extended {
                combinations.push(include);
            }
        }

        Ok(combinations
            .into_iter()
            .enumerate()
            .map(|(index, bindings)| MatrixInstance::new(index, bindings))
            .collect())
    }

    /// Instances for a job definition; a job without a matrix runs once.
    pub fn expand_job(job: &Job) -> Result<Vec<MatrixInstance>, ConfigurationError> {
        match job.strategy.as_ref().and_then(|s| s.matrix.as_ref()) {
            Some(matrix) => Self::expand_matrix(matrix),
            None => Self::expand(&Axes::new()),
        }
    }

    fn convert_entry(entry: &IndexMap<String, serde_json::Value>) -> IndexMap<String, Value> {
        entry
            .iter()
            .map(|(k, v)| (k.clone(), Value::from(v)))
            .collect()
    }

    fn entry_matches(entry: &IndexMap<String, Value>, bindings: &IndexMap<String, Value>) -> bool {
        entry
            .iter()
            .all(|(key, value)| bindings.get(key).is_some_and(|b| b.loosely_equals(value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    /// Axes from `(name, "space separated values")` pairs
    fn axes(pairs: &[(&str, &str)]) -> Axes {
        pairs.iter()
            .map(|(axis, values)| {
                (
                    axis.to_string(),
                    values.split_whitespace().map(Value::from).collect(),
                )
            })
            .collect()
    }

    fn names(instances: &[MatrixInstance]) -> Vec<String> {
        instances.iter().map(|i| i.name.clone()).collect()
    }

    #[test]
    fn test_expand_row_major_order() {
        let instances =
            MatrixExpander::expand(&axes(&[("os", "A B"), ("channel", "stable beta")])).unwrap();

        assert_eq!(
            names(&instances),
            vec!["(A, stable)", "(A, beta)", "(B, stable)", "(B, beta)"]
        );
        assert_eq!(instances[2].get("os"), Some(&Value::from("B")));
        assert_eq!(instances[2].get("channel"), Some(&Value::from("stable")));
        assert_eq!(
            instances.iter().map(|i| i.index).collect::<Vec<_>>(),
            vec![0, 1, 2, 3]
        );
    }

    #[test]
    fn test_expand_cardinality_and_uniqueness() {
        let cases = vec![
            vec![("a", "1")],
            vec![("a", "1 2 3"), ("b", "x y")],
            vec![("a", "1 2"), ("b", "x y z"), ("c", "p q")],
            vec![("os", "ubuntu macos windows"), ("rust", "stable beta nightly msrv")],
        ];

        for case in &cases {
            let axes = axes(case);
            let expected: usize = axes.values().map(Vec::len).product();
            let instances = MatrixExpander::expand(&axes).unwrap();

            assert_eq!(instances.len(), expected);

            let distinct: HashSet<String> = instances.iter().map(|i| i.name.clone()).collect();
            assert_eq!(distinct.len(), expected);

            for instance in &instances {
                let keys: Vec<_> = instance.bindings.keys().collect();
                let axis_names: Vec<_> = axes.keys().collect();
                assert_eq!(keys, axis_names);
            }
        }
    }

    #[test]
    fn test_expand_empty_axis_is_error() {
        let err = MatrixExpander::expand(&axes(&[("os", "A"), ("rust", "")])).unwrap_err();
        assert_eq!(err, ConfigurationError::EmptyAxis("rust".to_string()));
    }

    #[test]
    fn test_expand_no_axes_yields_single_job() {
        let instances = MatrixExpander::expand(&Axes::new()).unwrap();
        assert_eq!(instances.len(), 1);
        assert!(instances[0].bindings.is_empty());
        assert_eq!(instances[0].name, "");
    }

    #[test]
    fn test_expand_matrix_exclude_and_include() {
        let yaml = r#"
os: [ubuntu, windows]
rust: [stable, beta]
exclude:
  - os: windows
    rust: beta
include:
  - os: ubuntu
    experimental: true
  - os: macos
    rust: nightly
"#;
        let matrix: Matrix = serde_yaml::from_str(yaml).unwrap();
        let instances = MatrixExpander::expand_matrix(&matrix).unwrap();

        assert_eq!(
            names(&instances),
            vec![
                "(ubuntu, stable, true)",
                "(ubuntu, beta, true)",
                "(windows, stable)",
                "(macos, nightly)",
            ]
        );
        assert_eq!(instances[3].index, 3);
    }

    #[test]
    fn test_expand_matrix_numeric_values() {
        let matrix: Matrix = serde_yaml::from_str("node: [18, 20]").unwrap();
        let instances = MatrixExpander::expand_matrix(&matrix).unwrap();
        assert_eq!(names(&instances), vec!["(18)", "(20)"]);
        assert_eq!(instances[0].get("node"), Some(&Value::Number(18.0)));
    }

    #[test]
    fn test_expand_job_without_matrix() {
        let job = Job::default();
        let instances = MatrixExpander::expand_job(&job).unwrap();
        assert_eq!(instances.len(), 1);
    }
}
