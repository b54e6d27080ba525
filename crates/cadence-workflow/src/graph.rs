use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::error::ConfigError;

/// Dependency graph over job identifiers.
///
/// Edges point from a dependency to the job that requires it, so
/// `downstream` yields dependents and `upstream` yields requirements.
#[derive(Debug, Clone)]
pub struct Graph {
  /// Adjacency list: job_id -> jobs that require it.
  adjacency: BTreeMap<String, Vec<String>>,
  /// Reverse adjacency: job_id -> jobs it requires.
  reverse_adjacency: BTreeMap<String, Vec<String>>,
  /// Jobs with no requirements.
  entry_points: Vec<String>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
  Visiting,
  Done,
}

impl Graph {
  /// Build and validate a graph from job ids and their `requires` lists.
  ///
  /// Rejects self-references, references to unknown jobs and cycles.
  pub fn build(requirements: &BTreeMap<String, Vec<String>>) -> Result<Self, ConfigError> {
    for (job, requires) in requirements {
      for dep in requires {
        if dep == job {
          return Err(ConfigError::SelfDependency { job: job.clone() });
        }
        if !requirements.contains_key(dep) {
          return Err(ConfigError::UnknownDependency {
            job: job.clone(),
            requires: dep.clone(),
          });
        }
      }
    }

    let mut adjacency: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut reverse_adjacency: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for job in requirements.keys() {
      adjacency.entry(job.clone()).or_default();
      reverse_adjacency.entry(job.clone()).or_default();
    }

    for (job, requires) in requirements {
      for dep in requires {
        let dependents = adjacency.entry(dep.clone()).or_default();
        if !dependents.contains(job) {
          dependents.push(job.clone());
        }
        let upstream = reverse_adjacency.entry(job.clone()).or_default();
        if !upstream.contains(dep) {
          upstream.push(dep.clone());
        }
      }
    }

    let entry_points: Vec<String> = reverse_adjacency
      .iter()
      .filter(|(_, upstream)| upstream.is_empty())
      .map(|(id, _)| id.clone())
      .collect();

    let graph = Self {
      adjacency,
      reverse_adjacency,
      entry_points,
    };
    graph.check_acyclic()?;
    Ok(graph)
  }

  /// Depth-first search over `requires` edges, failing on the first back edge.
  fn check_acyclic(&self) -> Result<(), ConfigError> {
    let mut marks: BTreeMap<&str, Mark> = BTreeMap::new();
    let mut stack: Vec<&str> = Vec::new();

    for job in self.reverse_adjacency.keys() {
      if !marks.contains_key(job.as_str()) {
        self.visit(job, &mut marks, &mut stack)?;
      }
    }
    Ok(())
  }

  fn visit<'a>(
    &'a self,
    job: &'a str,
    marks: &mut BTreeMap<&'a str, Mark>,
    stack: &mut Vec<&'a str>,
  ) -> Result<(), ConfigError> {
    marks.insert(job, Mark::Visiting);
    stack.push(job);

    for dep in self.upstream(job) {
      match marks.get(dep.as_str()) {
        Some(Mark::Done) => {}
        Some(Mark::Visiting) => {
          let start = stack.iter().position(|j| *j == dep.as_str()).unwrap_or(0);
          let mut path: Vec<String> = stack[start..].iter().map(|j| j.to_string()).collect();
          path.push(dep.clone());
          return Err(ConfigError::Cycle {
            job: job.to_string(),
            requires: dep.clone(),
            path,
          });
        }
        None => self.visit(dep, marks, stack)?,
      }
    }

    stack.pop();
    marks.insert(job, Mark::Done);
    Ok(())
  }

  /// Get entry points (jobs with no requirements).
  pub fn entry_points(&self) -> &[String] {
    &self.entry_points
  }

  /// Get the jobs that directly require the given job.
  pub fn downstream(&self, job_id: &str) -> &[String] {
    self
      .adjacency
      .get(job_id)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  /// Get the jobs the given job directly requires.
  pub fn upstream(&self, job_id: &str) -> &[String] {
    self
      .reverse_adjacency
      .get(job_id)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  pub fn len(&self) -> usize {
    self.reverse_adjacency.len()
  }

  pub fn is_empty(&self) -> bool {
    self.reverse_adjacency.is_empty()
  }

  /// All jobs in dependency order. Ties are broken by job id.
  pub fn topological_order(&self) -> Vec<String> {
    let mut remaining: BTreeMap<&str, usize> = self
      .reverse_adjacency
      .iter()
      .map(|(id, upstream)| (id.as_str(), upstream.len()))
      .collect();
    let mut ready: BTreeSet<&str> = remaining
      .iter()
      .filter(|(_, count)| **count == 0)
      .map(|(id, _)| *id)
      .collect();
    let mut order = Vec::with_capacity(remaining.len());

    while let Some(job) = ready.pop_first() {
      order.push(job.to_string());
      for dependent in self.downstream(job) {
        if let Some(count) = remaining.get_mut(dependent.as_str()) {
          *count -= 1;
          if *count == 0 {
            ready.insert(dependent.as_str());
          }
        }
      }
    }

    order
  }

  /// Every job that directly or indirectly requires the given job.
  pub fn transitive_dependents(&self, job_id: &str) -> BTreeSet<String> {
    let mut seen = BTreeSet::new();
    let mut queue: VecDeque<&str> = VecDeque::from([job_id]);

    while let Some(current) = queue.pop_front() {
      for dependent in self.downstream(current) {
        if seen.insert(dependent.clone()) {
          queue.push_back(dependent);
        }
      }
    }

    seen
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn requirements(edges: &[(&str, &[&str])]) -> BTreeMap<String, Vec<String>> {
    edges
      .iter()
      .map(|(job, requires)| {
        (
          job.to_string(),
          requires.iter().map(|r| r.to_string()).collect(),
        )
      })
      .collect()
  }

  #[test]
  fn builds_chain() {
    let graph = Graph::build(&requirements(&[("a", &[]), ("b", &["a"]), ("c", &["b"])])).unwrap();

    assert_eq!(graph.entry_points(), ["a"]);
    assert_eq!(graph.downstream("a"), ["b"]);
    assert_eq!(graph.upstream("c"), ["b"]);
    assert_eq!(graph.topological_order(), vec!["a", "b", "c"]);
    assert_eq!(graph.len(), 3);
  }

  #[test]
  fn rejects_self_dependency() {
    let err = Graph::build(&requirements(&[("a", &["a"])])).unwrap_err();
    assert!(matches!(err, ConfigError::SelfDependency { job } if job == "a"));
  }

  #[test]
  fn rejects_unknown_dependency() {
    let err = Graph::build(&requirements(&[("a", &["ghost"])])).unwrap_err();
    assert!(
      matches!(err, ConfigError::UnknownDependency { job, requires } if job == "a" && requires == "ghost")
    );
  }

  #[test]
  fn rejects_two_node_cycle() {
    let err = Graph::build(&requirements(&[("a", &["b"]), ("b", &["a"])])).unwrap_err();
    match err {
      ConfigError::Cycle { job, requires, path } => {
        assert_eq!(job, "b");
        assert_eq!(requires, "a");
        assert_eq!(path, vec!["a", "b", "a"]);
      }
      other => panic!("expected cycle, got {other:?}"),
    }
  }

  #[test]
  fn rejects_long_cycle_behind_valid_prefix() {
    let err = Graph::build(&requirements(&[
      ("root", &[]),
      ("x", &["root", "z"]),
      ("y", &["x"]),
      ("z", &["y"]),
    ]))
    .unwrap_err();
    let message = err.to_string();
    assert!(message.starts_with("dependency cycle"), "{message}");
    assert!(message.contains("x -> z -> y -> x"), "{message}");
  }

  #[test]
  fn topological_order_respects_diamond() {
    let graph = Graph::build(&requirements(&[
      ("fetch", &[]),
      ("test", &["fetch"]),
      ("lint", &["fetch"]),
      ("publish", &["test", "lint"]),
    ]))
    .unwrap();

    assert_eq!(
      graph.topological_order(),
      vec!["fetch", "lint", "test", "publish"]
    );
  }

  #[test]
  fn transitive_dependents_follow_all_paths() {
    let graph = Graph::build(&requirements(&[
      ("a", &[]),
      ("b", &["a"]),
      ("c", &["b"]),
      ("d", &["a", "c"]),
      ("e", &[]),
    ]))
    .unwrap();

    let dependents: Vec<_> = graph.transitive_dependents("a").into_iter().collect();
    assert_eq!(dependents, vec!["b", "c", "d"]);
    assert!(graph.transitive_dependents("e").is_empty());
    assert!(graph.transitive_dependents("d").is_empty());
  }

  #[test]
  fn duplicate_requirements_collapse() {
    let graph = Graph::build(&requirements(&[("a", &[]), ("b", &["a", "a"])])).unwrap();
    assert_eq!(graph.upstream("b"), ["a"]);
    assert_eq!(graph.downstream("a"), ["b"]);
  }
}
