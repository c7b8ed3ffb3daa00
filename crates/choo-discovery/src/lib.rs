//! Discovery: reads a tasks directory into a slice of [`choo_types::Unit`].
//!
//! Layout expected under `tasks_dir`: one sub-directory per unit. Each unit
//! directory holds exactly one `plan.md` (YAML front matter declaring the
//! unit id and its `depends_on` list) and one or more `task-*.md` documents
//! (YAML front matter declaring the task index, title, backpressure
//! command, and per-task dependencies within the unit; the document body
//! after the front matter is the task's full text).

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use choo_types::{Task, Unit};
use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}: missing YAML front matter (expected a leading `---` block)")]
    MissingFrontMatter { path: PathBuf },

    #[error("{path}: malformed front matter: {source}")]
    MalformedFrontMatter {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("{dir}: no plan document found (expected plan.md)")]
    MissingPlan { dir: PathBuf },

    #[error("{dir}: unit directory has no task documents")]
    NoTasks { dir: PathBuf },

    #[error("unit {unit}: duplicate task index {index}")]
    DuplicateTaskIndex { unit: String, index: u32 },

    #[error("unit {unit}, task {index}: depends_on references unknown task index {missing}")]
    DanglingTaskDependency {
        unit: String,
        index: u32,
        missing: u32,
    },

    #[error("tasks_dir does not exist or is not a directory: {0}")]
    InvalidTasksDir(PathBuf),
}

#[derive(Debug, Deserialize)]
struct PlanFrontMatter {
    id: String,
    #[serde(default)]
    depends_on: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct TaskFrontMatter {
    index: u32,
    title: String,
    backpressure: String,
    #[serde(default)]
    depends_on: Vec<u32>,
    /// Accepted but unused by Discovery itself; the scheduler/worker own
    /// live status. Present so hand-authored task documents that record a
    /// status don't fail to parse.
    #[serde(default)]
    #[allow(dead_code)]
    status: Option<String>,
}

/// Split a document into its YAML front matter and body.
///
/// Front matter is delimited by a `---` line at the start of the file and a
/// closing `---` line.
fn split_front_matter<'a>(path: &Path, contents: &'a str) -> Result<(&'a str, &'a str), DiscoveryError> {
    let rest = contents
        .strip_prefix("---\n")
        .or_else(|| contents.strip_prefix("---\r\n"))
        .ok_or_else(|| DiscoveryError::MissingFrontMatter {
            path: path.to_path_buf(),
        })?;

    let end = rest
        .find("\n---")
        .ok_or_else(|| DiscoveryError::MissingFrontMatter {
            path: path.to_path_buf(),
        })?;

    let front_matter = &rest[..end];
    let after = &rest[end + 4..];
    let body = after.trim_start_matches(['\r', '\n']);

    Ok((front_matter, body))
}

fn read_to_string(path: &Path) -> Result<String, DiscoveryError> {
    fs::read_to_string(path).map_err(|source| DiscoveryError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn parse_plan(path: &Path) -> Result<PlanFrontMatter, DiscoveryError> {
    let contents = read_to_string(path)?;
    let (front_matter, _body) = split_front_matter(path, &contents)?;
    serde_yaml::from_str(front_matter).map_err(|source| DiscoveryError::MalformedFrontMatter {
        path: path.to_path_buf(),
        source,
    })
}

fn parse_task(path: &Path) -> Result<Task, DiscoveryError> {
    let contents = read_to_string(path)?;
    let (front_matter, body) = split_front_matter(path, &contents)?;
    let parsed: TaskFrontMatter =
        serde_yaml::from_str(front_matter).map_err(|source| DiscoveryError::MalformedFrontMatter {
            path: path.to_path_buf(),
            source,
        })?;

    Ok(Task::new(
        parsed.index,
        parsed.title,
        body.to_string(),
        parsed.backpressure,
        parsed.depends_on,
    ))
}

fn read_unit_dir(dir: &Path) -> Result<Unit, DiscoveryError> {
    let plan_path = dir.join("plan.md");
    if !plan_path.is_file() {
        return Err(DiscoveryError::MissingPlan {
            dir: dir.to_path_buf(),
        });
    }
    let plan = parse_plan(&plan_path)?;

    let mut task_paths: Vec<PathBuf> = fs::read_dir(dir)
        .map_err(|source| DiscoveryError::Io {
            path: dir.to_path_buf(),
            source,
        })?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with("task-") && n.ends_with(".md"))
                .unwrap_or(false)
        })
        .collect();
    task_paths.sort();

    if task_paths.is_empty() {
        return Err(DiscoveryError::NoTasks {
            dir: dir.to_path_buf(),
        });
    }

    let mut tasks = Vec::with_capacity(task_paths.len());
    let mut seen_indexes = HashSet::new();
    for path in &task_paths {
        let task = parse_task(path)?;
        if !seen_indexes.insert(task.index) {
            return Err(DiscoveryError::DuplicateTaskIndex {
                unit: plan.id.clone(),
                index: task.index,
            });
        }
        tasks.push(task);
    }

    let known_indexes: HashSet<u32> = tasks.iter().map(|t| t.index).collect();
    for task in &tasks {
        for dep in &task.depends_on {
            if !known_indexes.contains(dep) {
                return Err(DiscoveryError::DanglingTaskDependency {
                    unit: plan.id.clone(),
                    index: task.index,
                    missing: *dep,
                });
            }
        }
    }

    Ok(Unit::new(plan.id, tasks, plan.depends_on))
}

/// Parse `tasks_dir` into a slice of [`Unit`]s, tasks sorted by index,
/// dependency IDs normalized (de-duplicated, order preserved from the
/// document).
pub fn discover(tasks_dir: &Path) -> Result<Vec<Unit>, DiscoveryError> {
    if !tasks_dir.is_dir() {
        return Err(DiscoveryError::InvalidTasksDir(tasks_dir.to_path_buf()));
    }

    let mut unit_dirs: Vec<PathBuf> = fs::read_dir(tasks_dir)
        .map_err(|source| DiscoveryError::Io {
            path: tasks_dir.to_path_buf(),
            source,
        })?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|p| p.is_dir())
        .collect();
    unit_dirs.sort();

    let mut units = Vec::with_capacity(unit_dirs.len());
    for dir in unit_dirs {
        let mut unit = read_unit_dir(&dir)?;
        unit.depends_on.sort();
        unit.depends_on.dedup();
        units.push(unit);
    }

    tracing::info!(tasks_dir = %tasks_dir.display(), units = units.len(), "discovery complete");
    Ok(units)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn write(path: &Path, contents: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn discovers_linear_units_with_tasks_sorted() {
        let dir = tempdir().unwrap();
        let root = dir.path();

        write(
            &root.join("a/plan.md"),
            "---\nid: a\ndepends_on: []\n---\nplan for a\n",
        );
        write(
            &root.join("a/task-01.md"),
            "---\nindex: 1\ntitle: second\nbackpressure: exit 0\ndepends_on: [0]\n---\nbody\n",
        );
        write(
            &root.join("a/task-00.md"),
            "---\nindex: 0\ntitle: first\nbackpressure: exit 0\n---\nbody\n",
        );
        write(
            &root.join("b/plan.md"),
            "---\nid: b\ndepends_on: [a]\n---\nplan for b\n",
        );
        write(
            &root.join("b/task-00.md"),
            "---\nindex: 0\ntitle: only\nbackpressure: exit 0\n---\nbody\n",
        );

        let units = discover(root).unwrap();
        assert_eq!(units.len(), 2);

        let a = units.iter().find(|u| u.id == "a").unwrap();
        assert_eq!(a.tasks.len(), 2);
        assert_eq!(a.tasks[0].index, 0);
        assert_eq!(a.tasks[1].index, 1);

        let b = units.iter().find(|u| u.id == "b").unwrap();
        assert_eq!(b.depends_on, vec!["a".to_string()]);
    }

    #[test]
    fn duplicate_task_index_fails() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        write(&root.join("a/plan.md"), "---\nid: a\n---\nplan\n");
        write(
            &root.join("a/task-00.md"),
            "---\nindex: 0\ntitle: one\nbackpressure: exit 0\n---\n",
        );
        write(
            &root.join("a/task-00b.md"),
            "---\nindex: 0\ntitle: dup\nbackpressure: exit 0\n---\n",
        );

        let err = discover(root).unwrap_err();
        assert!(matches!(err, DiscoveryError::DuplicateTaskIndex { .. }));
    }

    #[test]
    fn missing_front_matter_fails() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        write(&root.join("a/plan.md"), "id: a\n");
        write(&root.join("a/task-00.md"), "---\nindex: 0\ntitle: one\nbackpressure: exit 0\n---\n");

        let err = discover(root).unwrap_err();
        assert!(matches!(err, DiscoveryError::MalformedFrontMatter { .. } | DiscoveryError::MissingFrontMatter { .. }));
    }

    #[test]
    fn unit_with_no_tasks_fails() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        write(&root.join("a/plan.md"), "---\nid: a\n---\nplan\n");

        let err = discover(root).unwrap_err();
        assert!(matches!(err, DiscoveryError::NoTasks { .. }));
    }

    #[test]
    fn dangling_task_dependency_fails() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        write(&root.join("a/plan.md"), "---\nid: a\n---\nplan\n");
        write(
            &root.join("a/task-00.md"),
            "---\nindex: 0\ntitle: one\nbackpressure: exit 0\ndepends_on: [5]\n---\n",
        );

        let err = discover(root).unwrap_err();
        assert!(matches!(err, DiscoveryError::DanglingTaskDependency { .. }));
    }
}
