//! Structural validation and dependency ordering of backlog tasks.
//!
//! Checks not expressible in the backlog JSON Schema:
//! - at least one task
//! - unique ids
//! - every dependency names a task in the backlog
//! - the dependency relation is acyclic

use std::collections::{BTreeSet, HashMap};

use thiserror::Error;

use crate::backlog::Task;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BacklogError {
    #[error("backlog must contain at least one task")]
    Empty,
    #[error("duplicate task id '{id}'")]
    DuplicateId { id: String },
    #[error("task '{task}' depends on unknown task '{dependency}'")]
    UnknownDependency { task: String, dependency: String },
    #[error("cyclic dependency: {}", cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },
}

/// Return `tasks` in a topological order of their dependencies.
///
/// Among tasks whose dependencies are all placed, the one earliest in the
/// input goes next, so a valid input order is preserved as-is.
pub fn order_tasks(tasks: Vec<Task>) -> Result<Vec<Task>, BacklogError> {
    if tasks.is_empty() {
        return Err(BacklogError::Empty);
    }
    let order = topological_order(&tasks)?;

    let mut rank = vec![0usize; tasks.len()];
    for (position, &index) in order.iter().enumerate() {
        rank[index] = position;
    }
    let mut ranked: Vec<(usize, Task)> = tasks
        .into_iter()
        .enumerate()
        .map(|(index, task)| (rank[index], task))
        .collect();
    ranked.sort_by_key(|(position, _)| *position);
    Ok(ranked.into_iter().map(|(_, task)| task).collect())
}

fn topological_order(tasks: &[Task]) -> Result<Vec<usize>, BacklogError> {
    let mut index: HashMap<&str, usize> = HashMap::with_capacity(tasks.len());
    for (i, task) in tasks.iter().enumerate() {
        if index.insert(task.id.as_str(), i).is_some() {
            return Err(BacklogError::DuplicateId {
                id: task.id.clone(),
            });
        }
    }

    // deps[i]: distinct indices task i waits on; dependents[j]: tasks waiting on j.
    let mut deps: Vec<BTreeSet<usize>> = Vec::with_capacity(tasks.len());
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); tasks.len()];
    for (i, task) in tasks.iter().enumerate() {
        let mut set = BTreeSet::new();
        for dependency in &task.dependencies {
            let Some(&j) = index.get(dependency.as_str()) else {
                return Err(BacklogError::UnknownDependency {
                    task: task.id.clone(),
                    dependency: dependency.clone(),
                });
            };
            if set.insert(j) {
                dependents[j].push(i);
            }
        }
        deps.push(set);
    }

    let mut remaining: Vec<usize> = deps.iter().map(BTreeSet::len).collect();
    let mut ready: BTreeSet<usize> = (0..tasks.len()).filter(|&i| remaining[i] == 0).collect();
    let mut order = Vec::with_capacity(tasks.len());
    while let Some(i) = ready.pop_first() {
        order.push(i);
        for &dependent in &dependents[i] {
            remaining[dependent] -= 1;
            if remaining[dependent] == 0 {
                ready.insert(dependent);
            }
        }
    }

    if order.len() < tasks.len() {
        let cycle = find_cycle(tasks, &deps, &remaining);
        return Err(BacklogError::CyclicDependency { cycle });
    }
    Ok(order)
}

/// Walk unplaced dependencies from the first unplaced task until a task repeats.
///
/// Every unplaced task still waits on at least one unplaced task, so the walk
/// always closes a cycle.
fn find_cycle(tasks: &[Task], deps: &[BTreeSet<usize>], remaining: &[usize]) -> Vec<String> {
    let unplaced = |i: usize| remaining[i] > 0;
    let Some(start) = (0..tasks.len()).find(|&i| unplaced(i)) else {
        return Vec::new();
    };

    let mut path: Vec<usize> = vec![start];
    let mut current = start;
    loop {
        let Some(&next) = deps[current].iter().find(|&&j| unplaced(j)) else {
            break;
        };
        if let Some(pos) = path.iter().position(|&i| i == next) {
            let mut cycle: Vec<String> = path[pos..].iter().map(|&i| tasks[i].id.clone()).collect();
            cycle.push(tasks[next].id.clone());
            return cycle;
        }
        path.push(next);
        current = next;
    }
    path.into_iter().map(|i| tasks[i].id.clone()).collect()
}
