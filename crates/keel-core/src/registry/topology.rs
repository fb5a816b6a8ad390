//! Dependency ordering for extensions.

use std::collections::HashMap;

use keel_protocols::error::ExtensionError;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

/// Order `roots` so that every extension follows its dependencies.
///
/// Roots are visited in the given (registration) order and dependencies in
/// declaration order, which makes the result deterministic. `dependencies`
/// returns `None` for names that are not registered.
pub(crate) fn dependency_order<'a, F>(
    roots: &'a [String],
    dependencies: F,
) -> Result<Vec<String>, ExtensionError>
where
    F: Fn(&str) -> Option<&'a [String]>,
{
    let mut sorter = Sorter {
        dependencies,
        marks: HashMap::new(),
        path: Vec::new(),
        order: Vec::with_capacity(roots.len()),
    };
    for root in roots {
        sorter.visit(root)?;
    }
    Ok(sorter.order)
}

struct Sorter<'a, F> {
    dependencies: F,
    marks: HashMap<&'a str, Mark>,
    path: Vec<&'a str>,
    order: Vec<String>,
}

impl<'a, F> Sorter<'a, F>
where
    F: Fn(&str) -> Option<&'a [String]>,
{
    fn visit(&mut self, name: &'a str) -> Result<(), ExtensionError> {
        match self.marks.get(name) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => {
                let start = self.path.iter().position(|n| *n == name).unwrap_or(0);
                let mut cycle: Vec<String> =
                    self.path[start..].iter().map(|n| n.to_string()).collect();
                cycle.push(name.to_string());
                return Err(ExtensionError::CircularDependency { cycle });
            }
            None => {}
        }

        let Some(dependencies) = (self.dependencies)(name) else {
            return Err(ExtensionError::NotFound(name.to_string()));
        };

        self.marks.insert(name, Mark::Visiting);
        self.path.push(name);
        for dependency in dependencies {
            if (self.dependencies)(dependency).is_none() {
                return Err(ExtensionError::MissingDependency {
                    extension: name.to_string(),
                    dependency: dependency.clone(),
                });
            }
            self.visit(dependency)?;
        }
        self.path.pop();
        self.marks.insert(name, Mark::Done);
        self.order.push(name.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(edges: &[(&str, &[&str])]) -> (Vec<String>, HashMap<String, Vec<String>>) {
        let roots = edges.iter().map(|(n, _)| n.to_string()).collect();
        let deps = edges
            .iter()
            .map(|(n, d)| (n.to_string(), d.iter().map(|s| s.to_string()).collect()))
            .collect();
        (roots, deps)
    }

    fn order(edges: &[(&str, &[&str])]) -> Result<Vec<String>, ExtensionError> {
        let (roots, deps) = graph(edges);
        dependency_order(&roots, |name| deps.get(name).map(Vec::as_slice))
    }

    #[test]
    fn test_dependencies_come_first() {
        let result = order(&[("api", &["cache"]), ("cache", &["db"]), ("db", &[])]).unwrap();
        assert_eq!(result, vec!["db", "cache", "api"]);
    }

    #[test]
    fn test_registration_order_breaks_ties() {
        let result = order(&[("b", &[]), ("a", &[]), ("c", &["a", "b"])]).unwrap();
        assert_eq!(result, vec!["b", "a", "c"]);

        let result = order(&[("c", &["a", "b"]), ("b", &[]), ("a", &[])]).unwrap();
        assert_eq!(result, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_diamond() {
        let result = order(&[
            ("top", &["left", "right"]),
            ("left", &["base"]),
            ("right", &["base"]),
            ("base", &[]),
        ])
        .unwrap();
        assert_eq!(result, vec!["base", "left", "right", "top"]);
    }

    #[test]
    fn test_cycle_detected() {
        let err = order(&[("a", &["b"]), ("b", &["a"])]).unwrap_err();
        match err {
            ExtensionError::CircularDependency { cycle } => {
                assert_eq!(cycle, vec!["a", "b", "a"]);
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_cycle_path_excludes_prefix() {
        let err = order(&[("entry", &["x"]), ("x", &["y"]), ("y", &["x"])]).unwrap_err();
        assert_eq!(err.to_string(), "Circular extension dependency: x -> y -> x");
    }

    #[test]
    fn test_self_dependency() {
        let err = order(&[("loop", &["loop"])]).unwrap_err();
        assert!(matches!(err, ExtensionError::CircularDependency { cycle } if cycle == vec!["loop", "loop"]));
    }

    #[test]
    fn test_missing_dependency() {
        let err = order(&[("cache", &["db"])]).unwrap_err();
        assert!(matches!(
            err,
            ExtensionError::MissingDependency { ref extension, ref dependency }
                if extension == "cache" && dependency == "db"
        ));
    }
}
