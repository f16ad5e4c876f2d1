//! Dependency resolution
//!
//! Turns a set of constraints into an install/update/remove plan against the
//! installed and available package sets. Installed packages are preferred so
//! a plan changes as little as possible. Cycles and unsatisfiable mandatory
//! constraints fail the resolution with the conflicts listed; they are never
//! silently skipped.

use crate::deps::graph::DependencyGraph;
use sdk::manifest::{compare_versions, current_architecture, current_platform};
use sdk::{DependencyConstraint, PluginPackage};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// How a version is picked among the compatible candidates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionStrategy {
    /// Highest compatible version
    #[default]
    Latest,
    /// Highest compatible version without a prerelease tag
    Stable,
    /// Only the literal version named by the constraint
    Exact,
    /// Highest version inside the constraint's range
    Range,
    /// Lowest compatible version
    Conservative,
}

impl std::str::FromStr for ResolutionStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "latest" => Ok(Self::Latest),
            "stable" => Ok(Self::Stable),
            "exact" => Ok(Self::Exact),
            "range" => Ok(Self::Range),
            "conservative" => Ok(Self::Conservative),
            other => Err(format!("unknown resolution strategy '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ConflictKind {
    /// No package with that id exists
    Missing,
    /// Packages exist but none satisfies the constraint
    VersionMismatch,
    /// Every candidate targets another platform or architecture
    Platform,
    Circular,
    /// Removal would break an installed dependent
    InUse,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyConflict {
    pub package: String,
    /// `None` for top-level constraints
    pub required_by: Option<String>,
    pub requirement: String,
    /// Versions that were considered
    pub candidates: Vec<String>,
    pub kind: ConflictKind,
    pub description: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionResult {
    pub success: bool,
    pub error_message: Option<String>,
    /// Dependencies before dependents
    pub to_install: Vec<PluginPackage>,
    /// New versions replacing installed ones
    pub to_update: Vec<PluginPackage>,
    pub to_remove: Vec<PluginPackage>,
    pub conflicts: Vec<DependencyConflict>,
    pub resolution_log: Vec<String>,
}

impl ResolutionResult {
    /// Ids of `to_install` in installation order
    pub fn installation_order(&self) -> Vec<String> {
        self.to_install.iter().map(|p| p.id.clone()).collect()
    }

    fn log(&mut self, line: String) {
        tracing::debug!("{}", line);
        self.resolution_log.push(line);
    }

    fn fail(&mut self, message: String) {
        tracing::warn!("Resolution failed: {}", message);
        self.success = false;
        self.error_message = Some(message);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Installed,
    Available,
    /// Available version replacing an installed one
    Update,
}

#[derive(Debug, Clone)]
struct Selection {
    package: PluginPackage,
    origin: Origin,
}

#[derive(Debug, Clone)]
pub struct DependencyResolver {
    strategy: ResolutionStrategy,
    include_dev_dependencies: bool,
    platform: String,
    architecture: String,
}

impl Default for DependencyResolver {
    fn default() -> Self {
        Self::new(ResolutionStrategy::default())
    }
}

impl DependencyResolver {
    pub fn new(strategy: ResolutionStrategy) -> Self {
        Self {
            strategy,
            include_dev_dependencies: false,
            platform: current_platform().to_string(),
            architecture: current_architecture().to_string(),
        }
    }

    pub fn with_dev_dependencies(mut self, include: bool) -> Self {
        self.include_dev_dependencies = include;
        self
    }

    /// Resolve for another platform than the running one
    pub fn with_target(mut self, platform: &str, architecture: &str) -> Self {
        self.platform = platform.to_string();
        self.architecture = architecture.to_string();
        self
    }

    pub fn strategy(&self) -> ResolutionStrategy {
        self.strategy
    }

    /// Plan the installation of `constraints` and everything they pull in
    ///
    /// Selection is greedy per pass. When a later constraint rejects a
    /// version picked earlier and some version satisfies both, the constraint
    /// is remembered and the pass starts over, so the outcome does not depend
    /// on the order in which dependencies are declared.
    pub fn resolve(
        &self,
        constraints: &[DependencyConstraint],
        available: &[PluginPackage],
        installed: &[PluginPackage],
    ) -> ResolutionResult {
        let mut result = ResolutionResult {
            success: true,
            ..Default::default()
        };
        result.log(format!(
            "Resolving {} constraint(s) with strategy {:?}",
            constraints.len(),
            self.strategy
        ));

        let mut learned: BTreeMap<String, Vec<Learned>> = BTreeMap::new();
        let (mut selected, graph) = loop {
            if let Some(pass) = self.resolve_pass(constraints, available, installed, &mut learned, &mut result) {
                break pass;
            }
        };

        if let Some(cycle) = graph.find_cycle() {
            let description = format!("circular dependency: {}", cycle.join(" -> "));
            result.conflicts.push(DependencyConflict {
                package: cycle.first().cloned().unwrap_or_default(),
                required_by: None,
                requirement: String::new(),
                candidates: cycle.clone(),
                kind: ConflictKind::Circular,
                description: description.clone(),
            });
            result.fail(description);
            return result;
        }

        if !result.success {
            return result;
        }

        let order = match graph.installation_order() {
            Ok(order) => order,
            Err(e) => {
                result.fail(e.to_string());
                return result;
            }
        };

        for id in order {
            let Some(selection) = selected.remove(&id) else {
                continue;
            };
            match selection.origin {
                Origin::Installed => {}
                Origin::Available => result.to_install.push(selection.package),
                Origin::Update => {
                    if let Some(old) = installed.iter().find(|p| p.id == id) {
                        result.to_remove.push(old.clone());
                    }
                    result.to_update.push(selection.package);
                }
            }
        }

        result.log(format!(
            "Plan: {} to install, {} to update, {} to remove",
            result.to_install.len(),
            result.to_update.len(),
            result.to_remove.len()
        ));
        result
    }

    /// One greedy walk over the constraints
    ///
    /// Returns `None` when a constraint was learned and the walk has to be
    /// repeated. Otherwise returns the selections and a graph holding only
    /// the edges that were actually followed.
    fn resolve_pass(
        &self,
        constraints: &[DependencyConstraint],
        available: &[PluginPackage],
        installed: &[PluginPackage],
        learned: &mut BTreeMap<String, Vec<Learned>>,
        result: &mut ResolutionResult,
    ) -> Option<(BTreeMap<String, Selection>, DependencyGraph)> {
        result.success = true;
        result.error_message = None;
        result.conflicts.clear();

        let mut selected: BTreeMap<String, Selection> = BTreeMap::new();
        let mut seen: BTreeMap<String, Vec<DependencyConstraint>> = BTreeMap::new();
        let mut edges: Vec<(String, String)> = Vec::new();
        let mut queue: VecDeque<(DependencyConstraint, Option<String>)> =
            constraints.iter().cloned().map(|c| (c, None)).collect();

        while let Some((constraint, required_by)) = queue.pop_front() {
            if !self.applies(&constraint, result) {
                continue;
            }
            if let Some(parent) = &required_by {
                edges.push((parent.clone(), constraint.name.clone()));
            }

            let known = learned.get(&constraint.name).map(Vec::as_slice).unwrap_or_default();
            let mut combined: Vec<&DependencyConstraint> = applicable(known, &selected).collect();

            if let Some(existing) = selected.get(&constraint.name) {
                if self.accepts(&constraint, &existing.package) {
                    seen.entry(constraint.name.clone()).or_default().push(constraint);
                    continue;
                }
                let version = existing.package.version.clone();
                let entry = Learned {
                    requirer: required_by
                        .as_ref()
                        .and_then(|id| selected.get(id))
                        .map(|s| (s.package.id.clone(), s.package.version.clone())),
                    constraint: constraint.clone(),
                };
                let already_learned = known.contains(&entry);
                combined.extend(seen.get(&constraint.name).into_iter().flatten());
                combined.push(&constraint);

                if !already_learned && self.select(&combined, available, installed).is_ok() {
                    result.log(format!(
                        "{} {} rejects {} {}; retrying with the constraint applied",
                        required_by.as_deref().unwrap_or("request"),
                        constraint.requirement(),
                        constraint.name,
                        version
                    ));
                    learned.entry(constraint.name.clone()).or_default().push(entry);
                    return None;
                }
                self.record_miss(
                    result,
                    &constraint,
                    required_by,
                    ConflictKind::VersionMismatch,
                    vec![version.clone()],
                    format!(
                        "{} {} conflicts with already selected {}",
                        constraint.name,
                        constraint.requirement(),
                        version
                    ),
                );
                continue;
            }

            combined.push(&constraint);
            match self.select(&combined, available, installed) {
                Ok(selection) => {
                    result.log(format!(
                        "{} {} → {} ({:?})",
                        constraint.name,
                        requirements(&combined),
                        selection.package.version,
                        selection.origin
                    ));
                    for dependency in &selection.package.dependencies {
                        queue.push_back((dependency.clone(), Some(selection.package.id.clone())));
                    }
                    selected.insert(constraint.name.clone(), selection);
                    seen.entry(constraint.name.clone()).or_default().push(constraint);
                }
                Err((kind, candidates, description)) => {
                    self.record_miss(result, &constraint, required_by, kind, candidates, description);
                }
            }
        }

        let mut graph = DependencyGraph::new();
        for selection in selected.values() {
            graph.add_package(selection.package.clone());
        }
        for (dependent, dependency) in &edges {
            if selected.contains_key(dependent) && selected.contains_key(dependency) {
                graph.add_edge(dependent, dependency);
            }
        }
        Some((selected, graph))
    }

    /// Plan the removal of `ids` from `installed`
    ///
    /// Installed packages that depend on a removed one make the plan fail,
    /// unless `force` is set, in which case they are removed as well. The
    /// plan lists dependents before their dependencies.
    pub fn resolve_removal(
        &self,
        ids: &[String],
        installed: &[PluginPackage],
        force: bool,
    ) -> ResolutionResult {
        let mut result = ResolutionResult {
            success: true,
            ..Default::default()
        };
        let graph = DependencyGraph::from_packages(installed);
        let mut removal: BTreeSet<String> = BTreeSet::new();

        for id in ids {
            if !graph.contains(id) {
                result.conflicts.push(DependencyConflict {
                    package: id.clone(),
                    required_by: None,
                    requirement: String::new(),
                    candidates: Vec::new(),
                    kind: ConflictKind::Missing,
                    description: format!("{} is not installed", id),
                });
                continue;
            }
            removal.insert(id.clone());
        }

        let requested = removal.clone();
        for id in &requested {
            let blockers: Vec<String> = graph
                .transitive_dependents(id)
                .into_iter()
                .filter(|d| !requested.contains(d))
                .collect();
            if blockers.is_empty() {
                continue;
            }
            if force {
                result.log(format!("Also removing dependents of {}: {}", id, blockers.join(", ")));
                removal.extend(blockers);
            } else {
                result.conflicts.push(DependencyConflict {
                    package: id.clone(),
                    required_by: blockers.first().cloned(),
                    requirement: String::new(),
                    candidates: blockers.clone(),
                    kind: ConflictKind::InUse,
                    description: format!("{} is required by {}", id, blockers.join(", ")),
                });
            }
        }

        if !result.conflicts.is_empty() {
            let message = result
                .conflicts
                .iter()
                .map(|c| c.description.clone())
                .collect::<Vec<_>>()
                .join("; ");
            result.fail(message);
            return result;
        }

        let order = match graph.topological_sort() {
            Ok(order) => order,
            Err(e) => {
                result.fail(e.to_string());
                return result;
            }
        };
        result.to_remove = order
            .into_iter()
            .filter(|id| removal.contains(id))
            .filter_map(|id| installed.iter().find(|p| p.id == id).cloned())
            .collect();
        result.log(format!("Plan: {} to remove", result.to_remove.len()));
        result
    }

    /// Whether the constraint matters for this resolution at all
    fn applies(&self, constraint: &DependencyConstraint, result: &mut ResolutionResult) -> bool {
        if constraint.dep_type.is_build_time() && !self.include_dev_dependencies {
            result.log(format!("Skipping {:?} dependency {}", constraint.dep_type, constraint.name));
            return false;
        }
        if !constraint.is_platform_compatible_with(&self.platform)
            || !constraint.is_architecture_compatible_with(&self.architecture)
        {
            result.log(format!(
                "Skipping {}: not needed on {}/{}",
                constraint.name, self.platform, self.architecture
            ));
            return false;
        }
        true
    }

    fn runs_here(&self, package: &PluginPackage) -> bool {
        package.supports_platform(&self.platform) && package.supports_architecture(&self.architecture)
    }

    /// Version check under the active strategy
    fn accepts(&self, constraint: &DependencyConstraint, package: &PluginPackage) -> bool {
        match self.strategy {
            ResolutionStrategy::Exact => match constraint.version.as_deref() {
                Some(version) if !version.trim().is_empty() => package.version == version.trim(),
                _ => constraint.is_compatible(&package.version),
            },
            ResolutionStrategy::Stable => {
                constraint.is_compatible(&package.version) && !package.is_prerelease()
            }
            _ => constraint.is_compatible(&package.version),
        }
    }

    /// Pick a version of the package every constraint in `constraints` names
    fn select(
        &self,
        constraints: &[&DependencyConstraint],
        available: &[PluginPackage],
        installed: &[PluginPackage],
    ) -> Result<Selection, (ConflictKind, Vec<String>, String)> {
        let name = constraints.first().map(|c| c.name.as_str()).unwrap_or_default();
        let accepted = |package: &PluginPackage| constraints.iter().all(|c| self.accepts(c, package));

        let installed_match = installed.iter().find(|p| p.id == name);
        if let Some(package) = installed_match {
            if self.runs_here(package) && accepted(package) {
                return Ok(Selection {
                    package: package.clone(),
                    origin: Origin::Installed,
                });
            }
        }

        let named: Vec<&PluginPackage> = available.iter().filter(|p| p.id == name).collect();
        let candidates: Vec<String> = installed_match
            .into_iter()
            .chain(named.iter().copied())
            .map(|p| p.version.clone())
            .collect();

        if named.is_empty() && installed_match.is_none() {
            return Err((
                ConflictKind::Missing,
                candidates,
                format!("no package named {}", name),
            ));
        }

        let runnable: Vec<&PluginPackage> =
            named.into_iter().filter(|p| self.runs_here(p)).collect();
        if runnable.is_empty() && installed_match.map(|p| !self.runs_here(p)).unwrap_or(true) {
            return Err((
                ConflictKind::Platform,
                candidates,
                format!(
                    "no version of {} supports {}/{}",
                    name, self.platform, self.architecture
                ),
            ));
        }

        let best = runnable
            .into_iter()
            .filter(|p| accepted(*p))
            .max_by(|a, b| self.preference(a, b));

        match best {
            Some(package) => Ok(Selection {
                package: package.clone(),
                origin: if installed_match.is_some() {
                    Origin::Update
                } else {
                    Origin::Available
                },
            }),
            None => Err((
                ConflictKind::VersionMismatch,
                candidates,
                format!(
                    "no version of {} satisfies {}",
                    name,
                    requirements(constraints)
                ),
            )),
        }
    }

    /// Ordering where the preferred candidate is the greatest
    fn preference(&self, a: &PluginPackage, b: &PluginPackage) -> Ordering {
        let by_version = compare_versions(&a.version, &b.version);
        let by_date = a.publish_date.cmp(&b.publish_date);
        match self.strategy {
            ResolutionStrategy::Conservative => by_version.reverse().then(by_date.reverse()),
            _ => by_version.then(by_date),
        }
    }

    fn record_miss(
        &self,
        result: &mut ResolutionResult,
        constraint: &DependencyConstraint,
        required_by: Option<String>,
        kind: ConflictKind,
        candidates: Vec<String>,
        description: String,
    ) {
        if !constraint.dep_type.is_mandatory() {
            result.log(format!("Optional dependency unresolved: {}", description));
            return;
        }
        let message = match &required_by {
            Some(parent) => format!("{} (required by {})", description, parent),
            None => description.clone(),
        };
        result.conflicts.push(DependencyConflict {
            package: constraint.name.clone(),
            required_by,
            requirement: constraint.requirement(),
            candidates,
            kind,
            description,
        });
        result.fail(message);
    }
}

/// A constraint that rejected an earlier pick, kept for later passes
#[derive(Debug, Clone, PartialEq)]
struct Learned {
    /// Declaring package as `(id, version)`; `None` for top-level constraints
    requirer: Option<(String, String)>,
    constraint: DependencyConstraint,
}

/// Learned constraints still in force: their declaring package is either
/// unselected so far or selected at the version that declared them
fn applicable<'a>(
    learned: &'a [Learned],
    selected: &'a BTreeMap<String, Selection>,
) -> impl Iterator<Item = &'a DependencyConstraint> + 'a {
    learned
        .iter()
        .filter(move |entry| match &entry.requirer {
            None => true,
            Some((id, version)) => selected
                .get(id)
                .map(|s| &s.package.version == version)
                .unwrap_or(true),
        })
        .map(|entry| &entry.constraint)
}

fn requirements(constraints: &[&DependencyConstraint]) -> String {
    constraints
        .iter()
        .map(|c| c.requirement())
        .collect::<Vec<_>>()
        .join(" and ")
}
