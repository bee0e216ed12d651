//! The transformation planner.
//!
//! For one class name the planner selects every matching definition and
//! orders them into a [`TransformationPlan`]. Bands run in order. Inside a
//! band, explicit `before`/`after` hints form a partial order and ties are
//! broken by priority (higher first), then declaration order, so the same
//! definitions always give the same plan.
//!
//! Plans are memoised per class. Concurrent requests for one class compute
//! the plan exactly once and all observe the same result, cycle errors
//! included.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::OnceCell;
use tracing::{debug, error};

use crate::definition::{DefinitionId, TransformDefinition};
use crate::error::OrderingCycleError;
use crate::registry::DefinitionSet;

/// The ordered steps to apply to one class.
#[derive(Debug, Clone)]
pub struct TransformationPlan {
    pub class: String,
    pub steps: Vec<Arc<TransformDefinition>>,
}

impl TransformationPlan {
    pub fn empty(class: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            steps: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Step ids in execution order.
    pub fn ids(&self) -> Vec<&DefinitionId> {
        self.steps.iter().map(|step| &step.id).collect()
    }
}

impl fmt::Display for TransformationPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} step(s))", self.class, self.steps.len())?;
        for (index, step) in self.steps.iter().enumerate() {
            write!(
                f,
                "\n  {}. {} [{}, priority {}]",
                index + 1,
                step.id,
                step.band,
                step.priority
            )?;
        }
        Ok(())
    }
}

type PlanSlot = Arc<OnceCell<Result<Arc<TransformationPlan>, OrderingCycleError>>>;

/// Computes and caches plans over an immutable definition set.
pub struct Planner {
    definitions: Arc<DefinitionSet>,
    plans: DashMap<String, PlanSlot>,
    computations: AtomicUsize,
}

impl Planner {
    pub fn new(definitions: Arc<DefinitionSet>) -> Self {
        Self {
            definitions,
            plans: DashMap::new(),
            computations: AtomicUsize::new(0),
        }
    }

    pub fn definitions(&self) -> &Arc<DefinitionSet> {
        &self.definitions
    }

    /// Returns the plan for `class_name`, computing it on first use.
    ///
    /// # Errors
    ///
    /// [`OrderingCycleError`] if the hints among the selected definitions
    /// form a cycle. The error is cached like a plan.
    pub fn plan_for(&self, class_name: &str) -> Result<Arc<TransformationPlan>, OrderingCycleError> {
        // Clone the slot out so the shard lock is not held while computing.
        let slot = self
            .plans
            .entry(class_name.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        slot.get_or_init(|| {
            self.computations.fetch_add(1, Ordering::Relaxed);
            let selected = self.definitions.matching(class_name);
            let result = order(class_name, selected).map(Arc::new);
            match &result {
                Ok(plan) if !plan.is_empty() => debug!("🔧 Planned {}", plan),
                Ok(_) => {}
                Err(e) => error!("❌ {}", e),
            }
            result
        })
        .clone()
    }

    /// How many plans were actually computed, as opposed to served from cache.
    pub fn computations(&self) -> usize {
        self.computations.load(Ordering::Relaxed)
    }

    /// Number of classes with a cached plan.
    pub fn cached(&self) -> usize {
        self.plans.len()
    }
}

/// Orders the definitions selected for one class.
fn order(class_name: &str, selected: Vec<Arc<TransformDefinition>>) -> Result<TransformationPlan, OrderingCycleError> {
    let index: HashMap<&DefinitionId, usize> = selected
        .iter()
        .enumerate()
        .map(|(i, definition)| (&definition.id, i))
        .collect();

    // successors[a] holds every b that must run after a. Hints only order
    // definitions of one band; bands always run in band order.
    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); selected.len()];
    let same_band = |i: usize, j: usize| selected[i].band == selected[j].band;
    for (i, definition) in selected.iter().enumerate() {
        for before in &definition.before {
            if let Some(&j) = index.get(before) {
                if same_band(i, j) {
                    successors[i].push(j);
                }
            }
        }
        for after in &definition.after {
            if let Some(&j) = index.get(after) {
                if same_band(i, j) {
                    successors[j].push(i);
                }
            }
        }
    }
    for edges in &mut successors {
        edges.sort_unstable_by_key(|&j| selected[j].sort_key());
        edges.dedup();
    }

    if let Some(cycle) = find_cycle(&selected, &successors) {
        return Err(OrderingCycleError {
            class: class_name.to_string(),
            cycle,
        });
    }

    let mut in_degree = vec![0usize; selected.len()];
    for edges in &successors {
        for &j in edges {
            in_degree[j] += 1;
        }
    }

    let mut ready: BTreeSet<_> = (0..selected.len())
        .filter(|&i| in_degree[i] == 0)
        .map(|i| (selected[i].sort_key(), i))
        .collect();
    let mut steps = Vec::with_capacity(selected.len());
    while let Some((_, i)) = ready.pop_first() {
        steps.push(Arc::clone(&selected[i]));
        for &j in &successors[i] {
            in_degree[j] -= 1;
            if in_degree[j] == 0 {
                ready.insert((selected[j].sort_key(), j));
            }
        }
    }

    Ok(TransformationPlan {
        class: class_name.to_string(),
        steps,
    })
}

/// Depth-first search for a cycle, visiting nodes in tie-break order so the
/// reported cycle is stable. Returns the cycle with its first id repeated.
fn find_cycle(selected: &[Arc<TransformDefinition>], successors: &[Vec<usize>]) -> Option<Vec<DefinitionId>> {
    let mut starts: Vec<usize> = (0..selected.len()).collect();
    starts.sort_unstable_by_key(|&i| selected[i].sort_key());

    let mut visited = HashSet::new();
    let mut rec_stack = HashSet::new();
    let mut path = Vec::new();
    for start in starts {
        if !visited.contains(&start) {
            if let Some(cycle) = dfs(start, successors, &mut visited, &mut rec_stack, &mut path) {
                return Some(cycle.into_iter().map(|i| selected[i].id.clone()).collect());
            }
        }
    }
    None
}

fn dfs(
    node: usize,
    successors: &[Vec<usize>],
    visited: &mut HashSet<usize>,
    rec_stack: &mut HashSet<usize>,
    path: &mut Vec<usize>,
) -> Option<Vec<usize>> {
    visited.insert(node);
    rec_stack.insert(node);
    path.push(node);

    for &next in &successors[node] {
        if !visited.contains(&next) {
            if let Some(cycle) = dfs(next, successors, visited, rec_stack, path) {
                return Some(cycle);
            }
        } else if rec_stack.contains(&next) {
            let start = path.iter().position(|&p| p == next).unwrap_or(0);
            let mut cycle = path[start..].to_vec();
            cycle.push(next);
            return Some(cycle);
        }
    }

    path.pop();
    rec_stack.remove(&node);
    None
}
