// Phase-aware dependency graph resolution with cycle breaking
use crate::metadata::{ExecutionPhase, HookMetadata};
use crate::priority::{PlanningContext, PriorityCalculator, PriorityScore};
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::Direction;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;

/// Non-fatal problems found while building a plan
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DependencyIssue {
    /// A dependency cycle; `broken_edge` is the `(dependency, dependent)`
    /// edge dropped to break it, if any
    Cycle {
        members: Vec<String>,
        broken_edge: Option<(String, String)>,
    },
    /// A dependency that names neither a hook nor a provided capability
    Unresolved { hook: String, dependency: String },
    /// Hook left out of the plan
    Excluded { hook: String, reason: String },
    /// Hook scheduled in a later phase stratum than declared because one of
    /// its dependencies lives in that phase
    PhaseDeferred {
        hook: String,
        declared: ExecutionPhase,
        scheduled: ExecutionPhase,
    },
}

impl DependencyIssue {
    pub fn is_cycle(&self) -> bool {
        matches!(self, DependencyIssue::Cycle { .. })
    }
}

/// Hooks whose dependencies are all satisfied by earlier layers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DependencyLayer {
    pub phase: ExecutionPhase,
    pub hooks: Vec<String>,
}

/// Output of a graph pass. A value object; building one never touches the
/// registry.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DependencyPlan {
    pub layers: Vec<DependencyLayer>,
    pub issues: Vec<DependencyIssue>,
    pub hooks: BTreeMap<String, HookMetadata>,
    pub scores: HashMap<String, PriorityScore>,
    pub depths: HashMap<String, usize>,
    /// Direct predecessors of each planned hook after cycle breaking
    pub dependencies: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyPlan {
    /// Layers as plain name lists
    pub fn batches(&self) -> Vec<Vec<String>> {
        self.layers.iter().map(|layer| layer.hooks.clone()).collect()
    }

    pub fn contains(&self, hook: &str) -> bool {
        self.hooks.contains_key(hook)
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    pub fn excluded(&self) -> Vec<&str> {
        self.issues
            .iter()
            .filter_map(|issue| match issue {
                DependencyIssue::Excluded { hook, .. } => Some(hook.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Every planned hook that depends on `hook`, directly or transitively
    pub fn transitive_dependents(&self, hook: &str) -> BTreeSet<String> {
        transitive_dependents(&self.dependencies, hook)
    }

    /// Every planned hook `hook` depends on, directly or transitively
    pub fn transitive_dependencies(&self, hook: &str) -> BTreeSet<String> {
        transitive_dependencies(&self.dependencies, hook)
    }
}

/// Walk a `hook -> direct dependencies` map downstream from `hook`
pub fn transitive_dependents(
    dependencies: &BTreeMap<String, BTreeSet<String>>,
    hook: &str,
) -> BTreeSet<String> {
    let mut dependents = BTreeSet::new();
    let mut queue = VecDeque::from([hook.to_string()]);
    while let Some(current) = queue.pop_front() {
        for (name, deps) in dependencies {
            if deps.contains(&current) && dependents.insert(name.clone()) {
                queue.push_back(name.clone());
            }
        }
    }
    dependents
}

/// Walk a `hook -> direct dependencies` map upstream from `hook`
pub fn transitive_dependencies(
    dependencies: &BTreeMap<String, BTreeSet<String>>,
    hook: &str,
) -> BTreeSet<String> {
    let mut found = BTreeSet::new();
    let mut queue = VecDeque::from([hook.to_string()]);
    while let Some(current) = queue.pop_front() {
        if let Some(deps) = dependencies.get(&current) {
            for dep in deps {
                if found.insert(dep.clone()) {
                    queue.push_back(dep.clone());
                }
            }
        }
    }
    found
}

pub const DEFAULT_MAX_CYCLE_BREAKS: usize = 16;

/// Builds the dependency DAG for one planning pass and layers it phase by
/// phase. Edge `A -> B` means B depends on A.
#[derive(Debug, Clone)]
pub struct DependencyGraphResolver {
    calculator: Arc<PriorityCalculator>,
    max_cycle_breaks: usize,
}

impl DependencyGraphResolver {
    pub fn new(calculator: Arc<PriorityCalculator>) -> Self {
        Self {
            calculator,
            max_cycle_breaks: DEFAULT_MAX_CYCLE_BREAKS,
        }
    }

    pub fn with_max_cycle_breaks(mut self, max_cycle_breaks: usize) -> Self {
        self.max_cycle_breaks = max_cycle_breaks;
        self
    }

    pub fn build_plan(&self, hooks: &[HookMetadata], context: &PlanningContext) -> DependencyPlan {
        let mut issues = Vec::new();

        let mut catalog: BTreeMap<String, HookMetadata> = BTreeMap::new();
        for hook in hooks {
            if catalog.contains_key(&hook.name) {
                tracing::warn!(hook = %hook.name, "Duplicate hook metadata ignored");
                continue;
            }
            catalog.insert(hook.name.clone(), hook.clone());
        }

        let mut graph: StableDiGraph<String, ()> = StableDiGraph::new();
        let mut nodes: BTreeMap<String, NodeIndex> = BTreeMap::new();
        for name in catalog.keys() {
            nodes.insert(name.clone(), graph.add_node(name.clone()));
        }

        // Resolve declared dependencies into edges
        let mut unresolved_roots = Vec::new();
        for (name, hook) in &catalog {
            for dependency in &hook.dependencies {
                let providers: Vec<&String> = if catalog.contains_key(dependency) {
                    vec![dependency]
                } else {
                    catalog
                        .iter()
                        .filter(|(other, meta)| *other != name && meta.provides.contains(dependency))
                        .map(|(other, _)| other)
                        .collect()
                };

                if providers.is_empty() {
                    tracing::warn!(hook = %name, dependency = %dependency, "Unresolved dependency");
                    issues.push(DependencyIssue::Unresolved {
                        hook: name.clone(),
                        dependency: dependency.clone(),
                    });
                    unresolved_roots.push((name.clone(), dependency.clone()));
                    continue;
                }

                for provider in providers {
                    let (from, to) = (nodes[provider], nodes[name]);
                    if graph.find_edge(from, to).is_none() {
                        graph.add_edge(from, to, ());
                    }
                }
            }
        }

        let mut excluded: HashSet<String> = HashSet::new();
        for (root, dependency) in unresolved_roots {
            let reason = format!("unresolved dependency '{dependency}' of '{root}'");
            self.exclude_with_dependents(
                &mut graph,
                &mut nodes,
                &root,
                &reason,
                &mut excluded,
                &mut issues,
            );
        }

        self.break_cycles(&mut graph, &mut nodes, &catalog, context, &mut excluded, &mut issues);

        let depths = Self::dependency_depths(&graph);
        let mut scores = HashMap::new();
        for (name, &idx) in &nodes {
            let depth = depths.get(&idx).copied().unwrap_or(0);
            let hook_context = context.priority_context(name, depth);
            scores.insert(name.clone(), self.calculator.score(&catalog[name], &hook_context));
        }

        let layers = Self::layer_by_phase(&graph, &nodes, &catalog, &scores, &mut issues);

        let mut dependencies = BTreeMap::new();
        for (name, &idx) in &nodes {
            let deps: BTreeSet<String> = graph
                .neighbors_directed(idx, Direction::Incoming)
                .map(|pred| graph[pred].clone())
                .collect();
            dependencies.insert(name.clone(), deps);
        }

        let planned: BTreeMap<String, HookMetadata> = catalog
            .into_iter()
            .filter(|(name, _)| nodes.contains_key(name))
            .collect();

        tracing::debug!(
            planned = planned.len(),
            layers = layers.len(),
            issues = issues.len(),
            "Dependency plan built"
        );

        DependencyPlan {
            layers,
            issues,
            depths: nodes
                .iter()
                .map(|(name, idx)| (name.clone(), depths.get(idx).copied().unwrap_or(0)))
                .collect(),
            hooks: planned,
            scores,
            dependencies,
        }
    }

    fn exclude_with_dependents(
        &self,
        graph: &mut StableDiGraph<String, ()>,
        nodes: &mut BTreeMap<String, NodeIndex>,
        root: &str,
        reason: &str,
        excluded: &mut HashSet<String>,
        issues: &mut Vec<DependencyIssue>,
    ) {
        let Some(&start) = nodes.get(root) else {
            return;
        };

        let mut doomed = vec![start];
        let mut seen = HashSet::from([start]);
        let mut queue = VecDeque::from([start]);
        while let Some(current) = queue.pop_front() {
            for next in graph.neighbors_directed(current, Direction::Outgoing) {
                if seen.insert(next) {
                    doomed.push(next);
                    queue.push_back(next);
                }
            }
        }

        let mut names: Vec<String> = doomed.iter().map(|&idx| graph[idx].clone()).collect();
        names.sort();
        for idx in doomed {
            graph.remove_node(idx);
        }
        for name in names {
            nodes.remove(&name);
            if excluded.insert(name.clone()) {
                tracing::warn!(hook = %name, reason = %reason, "Hook excluded from plan");
                issues.push(DependencyIssue::Excluded {
                    hook: name,
                    reason: reason.to_string(),
                });
            }
        }
    }

    fn break_cycles(
        &self,
        graph: &mut StableDiGraph<String, ()>,
        nodes: &mut BTreeMap<String, NodeIndex>,
        catalog: &BTreeMap<String, HookMetadata>,
        context: &PlanningContext,
        excluded: &mut HashSet<String>,
        issues: &mut Vec<DependencyIssue>,
    ) {
        let mut breaks = 0;
        loop {
            let order: Vec<NodeIndex> = nodes.values().copied().collect();
            let Some(cycle) = find_cycle(graph, &order) else {
                return;
            };

            if breaks >= self.max_cycle_breaks {
                self.exclude_cyclic(graph, nodes, excluded, issues);
                return;
            }

            // Depth is undefined until the graph is acyclic
            let victim = cycle
                .iter()
                .enumerate()
                .map(|(pos, &idx)| {
                    let name = &graph[idx];
                    let score = self
                        .calculator
                        .score(&catalog[name], &context.priority_context(name, 0));
                    (pos, name.clone(), score)
                })
                .reduce(|worst, candidate| {
                    match candidate.2.rank(&worst.2) {
                        Ordering::Greater => candidate,
                        Ordering::Equal if candidate.1 < worst.1 => candidate,
                        _ => worst,
                    }
                });
            let Some((pos, victim_name, _)) = victim else {
                return;
            };

            let predecessor = cycle[(pos + cycle.len() - 1) % cycle.len()];
            let victim_idx = cycle[pos];
            let mut members: Vec<String> = cycle.iter().map(|&idx| graph[idx].clone()).collect();
            members.sort();
            let dependency = graph[predecessor].clone();

            if let Some(edge) = graph.find_edge(predecessor, victim_idx) {
                graph.remove_edge(edge);
            }
            tracing::warn!(
                members = ?members,
                dependency = %dependency,
                dependent = %victim_name,
                "Dependency cycle broken"
            );
            issues.push(DependencyIssue::Cycle {
                members,
                broken_edge: Some((dependency, victim_name)),
            });
            breaks += 1;
        }
    }

    /// Give up on the remaining cycles: drop every hook in a strongly
    /// connected component along with its dependents
    fn exclude_cyclic(
        &self,
        graph: &mut StableDiGraph<String, ()>,
        nodes: &mut BTreeMap<String, NodeIndex>,
        excluded: &mut HashSet<String>,
        issues: &mut Vec<DependencyIssue>,
    ) {
        let components = petgraph::algo::tarjan_scc(&*graph);
        let mut cyclic = Vec::new();
        for component in components {
            let self_loop = component.len() == 1
                && graph.find_edge(component[0], component[0]).is_some();
            if component.len() > 1 || self_loop {
                let mut members: Vec<String> =
                    component.iter().map(|&idx| graph[idx].clone()).collect();
                members.sort();
                issues.push(DependencyIssue::Cycle {
                    members: members.clone(),
                    broken_edge: None,
                });
                cyclic.extend(members);
            }
        }

        tracing::warn!(hooks = ?cyclic, "Cycle break limit reached, excluding cyclic hooks");
        for name in cyclic {
            self.exclude_with_dependents(
                graph,
                nodes,
                &name,
                "unbroken dependency cycle",
                excluded,
                issues,
            );
        }
    }

    /// Longest chain of transitive dependents below each hook
    fn dependency_depths(graph: &StableDiGraph<String, ()>) -> HashMap<NodeIndex, usize> {
        let mut depths = HashMap::new();
        let Ok(order) = petgraph::algo::toposort(graph, None) else {
            return depths;
        };
        for &idx in order.iter().rev() {
            let depth = graph
                .neighbors_directed(idx, Direction::Outgoing)
                .map(|next| depths.get(&next).copied().unwrap_or(0) + 1)
                .max()
                .unwrap_or(0);
            depths.insert(idx, depth);
        }
        depths
    }

    /// Kahn-style layering, one phase stratum at a time. A hook whose
    /// dependency lives in a later phase joins the first stratum in which
    /// that dependency is satisfied.
    fn layer_by_phase(
        graph: &StableDiGraph<String, ()>,
        nodes: &BTreeMap<String, NodeIndex>,
        catalog: &BTreeMap<String, HookMetadata>,
        scores: &HashMap<String, PriorityScore>,
        issues: &mut Vec<DependencyIssue>,
    ) -> Vec<DependencyLayer> {
        let mut layers = Vec::new();
        let mut satisfied: HashSet<NodeIndex> = HashSet::new();
        let mut remaining: BTreeSet<&String> = nodes.keys().collect();

        for phase in ExecutionPhase::ALL {
            loop {
                let mut ready: Vec<String> = remaining
                    .iter()
                    .filter(|name| catalog[name.as_str()].phase <= phase)
                    .filter(|name| {
                        graph
                            .neighbors_directed(nodes[name.as_str()], Direction::Incoming)
                            .all(|pred| satisfied.contains(&pred))
                    })
                    .map(|name| name.to_string())
                    .collect();
                if ready.is_empty() {
                    break;
                }

                ready.sort_by(|a, b| {
                    scores[a]
                        .rank(&scores[b])
                        .then_with(|| a.cmp(b))
                });

                for name in &ready {
                    let declared = catalog[name].phase;
                    if declared != phase {
                        tracing::debug!(hook = %name, declared = %declared, scheduled = %phase, "Hook deferred to later phase");
                        issues.push(DependencyIssue::PhaseDeferred {
                            hook: name.clone(),
                            declared,
                            scheduled: phase,
                        });
                    }
                    remaining.remove(name);
                }
                satisfied.extend(ready.iter().map(|name| nodes[name]));
                layers.push(DependencyLayer {
                    phase,
                    hooks: ready,
                });
            }
        }

        layers
    }
}

/// DFS with white/gray/black coloring; returns the first cycle found as a
/// path `v0 -> v1 -> .. -> vk -> v0`. Nodes and successors are visited by
/// name so the result is deterministic.
fn find_cycle(graph: &StableDiGraph<String, ()>, order: &[NodeIndex]) -> Option<Vec<NodeIndex>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Color {
        White,
        Gray,
        Black,
    }

    let successors = |node: NodeIndex| -> Vec<NodeIndex> {
        let mut next: Vec<NodeIndex> = graph.neighbors_directed(node, Direction::Outgoing).collect();
        // Reverse so popping yields ascending names
        next.sort_by(|a, b| graph[*b].cmp(&graph[*a]));
        next.dedup();
        next
    };

    let mut color: HashMap<NodeIndex, Color> = order.iter().map(|&n| (n, Color::White)).collect();
    let mut parent: HashMap<NodeIndex, NodeIndex> = HashMap::new();

    for &start in order {
        if color.get(&start) != Some(&Color::White) {
            continue;
        }
        color.insert(start, Color::Gray);
        let mut stack: Vec<(NodeIndex, Vec<NodeIndex>)> = vec![(start, successors(start))];

        while let Some((node, next)) = stack.last_mut().map(|(node, pending)| (*node, pending.pop())) {
            match next {
                Some(next) => match color.get(&next).copied().unwrap_or(Color::Black) {
                    Color::White => {
                        parent.insert(next, node);
                        color.insert(next, Color::Gray);
                        stack.push((next, successors(next)));
                    }
                    Color::Gray => {
                        let mut cycle = vec![node];
                        let mut current = node;
                        while current != next {
                            match parent.get(&current) {
                                Some(&up) => {
                                    current = up;
                                    cycle.push(current);
                                }
                                None => break,
                            }
                        }
                        cycle.reverse();
                        return Some(cycle);
                    }
                    Color::Black => {}
                },
                None => {
                    color.insert(node, Color::Black);
                    stack.pop();
                }
            }
        }
    }
    None
}
