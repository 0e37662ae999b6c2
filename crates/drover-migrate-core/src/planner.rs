// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Dependency-aware wave planning.
//!
//! Local dependency edges form a directed graph from dependent to dependency.
//! Strongly connected components are collapsed first, so a dependency cycle
//! becomes one node whose members share a wave. Each component lands one wave
//! after the latest wave of anything it depends on; components with no
//! in-plan dependencies land in wave 1.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::dependency::RepositoryDependency;
use crate::repository::{Repository, RepositoryId};

/// What the planner needs to know about one repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanItem {
	pub id: RepositoryId,
	pub full_name: String,
	pub size_bytes: i64,
	pub complexity_score: i32,
}

impl From<&Repository> for PlanItem {
	fn from(repo: &Repository) -> Self {
		Self {
			id: repo.id,
			full_name: repo.full_name.clone(),
			size_bytes: repo.git.total_size_bytes,
			complexity_score: repo.validation.complexity_score.unwrap_or(0),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wave {
	/// 1-based.
	pub number: u32,
	pub repositories: Vec<RepositoryId>,
	pub total_size_bytes: i64,
	pub total_complexity: i64,
	/// Some members form a dependency cycle and need operator review.
	pub has_cycle: bool,
}

impl Wave {
	pub fn len(&self) -> usize {
		self.repositories.len()
	}

	pub fn is_empty(&self) -> bool {
		self.repositories.is_empty()
	}
}

/// A local dependency on a repository outside the planned set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnplannedDependency {
	pub repository_id: RepositoryId,
	pub dependency_full_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WavePlan {
	pub waves: Vec<Wave>,
	/// Each entry is one cycle, members sorted by id.
	pub cycles: Vec<Vec<RepositoryId>>,
	pub unplanned_dependencies: Vec<UnplannedDependency>,
	pub external_dependency_count: usize,
}

impl WavePlan {
	pub fn wave_of(&self, id: RepositoryId) -> Option<u32> {
		self.waves
			.iter()
			.find(|w| w.repositories.contains(&id))
			.map(|w| w.number)
	}

	pub fn repository_count(&self) -> usize {
		self.waves.iter().map(Wave::len).sum()
	}
}

/// Order `items` into waves. Every distinct input id appears in exactly one wave.
pub fn plan_waves(items: &[PlanItem], dependencies: &[RepositoryDependency]) -> WavePlan {
	let mut nodes: Vec<&PlanItem> = Vec::with_capacity(items.len());
	let mut index_of: HashMap<RepositoryId, usize> = HashMap::new();
	for item in items {
		if !index_of.contains_key(&item.id) {
			index_of.insert(item.id, nodes.len());
			nodes.push(item);
		}
	}
	let by_name: HashMap<String, usize> = nodes
		.iter()
		.enumerate()
		.map(|(i, item)| (item.full_name.to_ascii_lowercase(), i))
		.collect();

	let mut plan = WavePlan::default();
	let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];

	for dep in dependencies {
		let Some(&from) = index_of.get(&dep.repository_id) else {
			continue;
		};
		if !dep.is_local {
			plan.external_dependency_count += 1;
			continue;
		}
		match by_name.get(&dep.dependency_full_name.to_ascii_lowercase()) {
			Some(&to) if to != from => {
				if !adjacency[from].contains(&to) {
					adjacency[from].push(to);
				}
			}
			Some(_) => {}
			None => plan.unplanned_dependencies.push(UnplannedDependency {
				repository_id: dep.repository_id,
				dependency_full_name: dep.dependency_full_name.clone(),
			}),
		}
	}

	let components = strongly_connected(&adjacency);
	let mut component_of = vec![0usize; nodes.len()];
	for (c, members) in components.iter().enumerate() {
		for &m in members {
			component_of[m] = c;
		}
	}

	// Components arrive dependencies-first, so every dependency's wave is known.
	let mut component_wave = vec![0u32; components.len()];
	for (c, members) in components.iter().enumerate() {
		let wave = members
			.iter()
			.flat_map(|&m| adjacency[m].iter())
			.filter(|&&d| component_of[d] != c)
			.map(|&d| component_wave[component_of[d]])
			.max()
			.map_or(1, |w| w + 1);
		component_wave[c] = wave;
	}

	let wave_count = component_wave.iter().copied().max().unwrap_or(0);
	let mut waves: Vec<Wave> = (1..=wave_count)
		.map(|number| Wave {
			number,
			repositories: Vec::new(),
			total_size_bytes: 0,
			total_complexity: 0,
			has_cycle: false,
		})
		.collect();

	for (c, members) in components.iter().enumerate() {
		let wave = &mut waves[(component_wave[c] - 1) as usize];
		for &m in members {
			wave.repositories.push(nodes[m].id);
			wave.total_size_bytes += nodes[m].size_bytes;
			wave.total_complexity += i64::from(nodes[m].complexity_score);
		}
		if members.len() > 1 {
			wave.has_cycle = true;
			let mut cycle: Vec<RepositoryId> = members.iter().map(|&m| nodes[m].id).collect();
			cycle.sort();
			plan.cycles.push(cycle);
		}
	}

	for wave in &mut waves {
		wave.repositories.sort();
	}
	plan.cycles.sort();
	plan.waves = waves;
	plan
}

/// Tarjan's algorithm without recursion. Components are returned in reverse
/// topological order of the edge direction, i.e. dependencies first.
fn strongly_connected(adjacency: &[Vec<usize>]) -> Vec<Vec<usize>> {
	const UNVISITED: usize = usize::MAX;

	let n = adjacency.len();
	let mut index = vec![UNVISITED; n];
	let mut low = vec![0usize; n];
	let mut on_stack = vec![false; n];
	let mut stack: Vec<usize> = Vec::new();
	let mut components: Vec<Vec<usize>> = Vec::new();
	let mut next_index = 0usize;

	for root in 0..n {
		if index[root] != UNVISITED {
			continue;
		}

		let mut frames: Vec<(usize, usize)> = vec![(root, 0)];
		index[root] = next_index;
		low[root] = next_index;
		next_index += 1;
		stack.push(root);
		on_stack[root] = true;

		while let Some(frame) = frames.last_mut() {
			let v = frame.0;
			if frame.1 < adjacency[v].len() {
				let w = adjacency[v][frame.1];
				frame.1 += 1;
				if index[w] == UNVISITED {
					index[w] = next_index;
					low[w] = next_index;
					next_index += 1;
					stack.push(w);
					on_stack[w] = true;
					frames.push((w, 0));
				} else if on_stack[w] {
					low[v] = low[v].min(index[w]);
				}
				continue;
			}

			frames.pop();
			if let Some(&(parent, _)) = frames.last() {
				low[parent] = low[parent].min(low[v]);
			}
			if low[v] == index[v] {
				let mut component = Vec::new();
				while let Some(w) = stack.pop() {
					on_stack[w] = false;
					component.push(w);
					if w == v {
						break;
					}
				}
				components.push(component);
			}
		}
	}

	components
}
