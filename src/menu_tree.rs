use std::collections::HashMap;

use crate::models::{MenuNode, MenuRecord};

/// assemble
///
/// Builds the menu forest with the default (non-strict) assembler.
pub fn assemble(records: &[MenuRecord]) -> Vec<MenuNode> {
    MenuTreeAssembler::default().assemble(records)
}

/// MenuTreeAssembler
///
/// Turns a flat, unordered list of parent-referencing menu records into a forest.
///
/// * Records whose parent is `None`, unknown, or themselves become roots. Upstream
///   filtering (hidden menus, disabled branches) legitimately orphans children, so they
///   are kept rather than dropped.
/// * Siblings are ordered by `sequence` ascending; equal keys keep input order.
/// * Every input record appears exactly once in the output.
///
/// In strict mode a single warning reports how many records were promoted to roots.
#[derive(Debug, Clone, Copy, Default)]
pub struct MenuTreeAssembler {
    strict: bool,
}

impl MenuTreeAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn assemble(&self, records: &[MenuRecord]) -> Vec<MenuNode> {
        let count = records.len();

        // Pass 1: id -> position. The first record wins on duplicate ids.
        let mut index: HashMap<&str, usize> = HashMap::with_capacity(count);
        for (pos, record) in records.iter().enumerate() {
            index.entry(record.record_id.as_str()).or_insert(pos);
        }

        let mut orphans = 0usize;
        let mut parent_of: Vec<Option<usize>> = Vec::with_capacity(count);
        for (pos, record) in records.iter().enumerate() {
            let parent = record
                .parent_id
                .as_deref()
                .and_then(|id| index.get(id).copied())
                .filter(|parent| *parent != pos);
            if record.parent_id.is_some() && parent.is_none() {
                orphans += 1;
            }
            parent_of.push(parent);
        }

        // Pass 2: link in sequence order so every child list comes out sorted.
        let mut order: Vec<usize> = (0..count).collect();
        order.sort_by_key(|&pos| records[pos].sequence);

        let mut children: Vec<Vec<usize>> = vec![Vec::new(); count];
        let mut roots: Vec<usize> = Vec::new();
        for &pos in &order {
            match parent_of[pos] {
                Some(parent) => children[parent].push(pos),
                None => roots.push(pos),
            }
        }

        let cycles = self.break_cycles(&order, &mut parent_of, &mut children, &mut roots);
        if cycles > 0 {
            roots.sort_by_key(|&pos| (records[pos].sequence, pos));
        }

        if orphans > 0 {
            if self.strict {
                tracing::warn!(orphans, "menu records with unresolved parents were promoted to roots");
            } else {
                tracing::debug!(orphans, "menu records promoted to roots");
            }
        }

        build_forest(&roots, records, &children)
    }

    /// Records on a parent cycle are unreachable from any root. Each cycle is cut at the
    /// record where the upward climb closes the loop; that record becomes a root.
    fn break_cycles(
        &self,
        order: &[usize],
        parent_of: &mut [Option<usize>],
        children: &mut [Vec<usize>],
        roots: &mut Vec<usize>,
    ) -> usize {
        let mut reached = vec![false; parent_of.len()];
        for &root in roots.iter() {
            mark_reached(root, children, &mut reached);
        }

        let mut cycles = 0;
        for &start in order {
            if reached[start] {
                continue;
            }

            // Climb until a record repeats: that record sits on the cycle.
            let mut seen = vec![false; parent_of.len()];
            let mut cut = start;
            while let Some(parent) = parent_of[cut] {
                if seen[cut] {
                    break;
                }
                seen[cut] = true;
                cut = parent;
            }

            if let Some(parent) = parent_of[cut].take() {
                children[parent].retain(|&child| child != cut);
            }
            roots.push(cut);
            mark_reached(cut, children, &mut reached);
            cycles += 1;
        }

        if cycles > 0 {
            tracing::warn!(cycles, "menu parent cycles detected and cut");
        }
        cycles
    }
}

fn mark_reached(root: usize, children: &[Vec<usize>], reached: &mut [bool]) {
    let mut stack = vec![root];
    while let Some(pos) = stack.pop() {
        if reached[pos] {
            continue;
        }
        reached[pos] = true;
        stack.extend(children[pos].iter().copied());
    }
}

/// Materialises the linked forest bottom-up with an explicit stack, so arbitrarily deep
/// parent chains cannot exhaust the call stack.
fn build_forest(roots: &[usize], records: &[MenuRecord], children: &[Vec<usize>]) -> Vec<MenuNode> {
    let mut built: Vec<Option<MenuNode>> = (0..records.len()).map(|_| None).collect();
    let mut stack: Vec<(usize, bool)> = roots.iter().rev().map(|&pos| (pos, false)).collect();

    while let Some((pos, expanded)) = stack.pop() {
        if expanded {
            let kids = children[pos]
                .iter()
                .filter_map(|&child| built[child].take())
                .collect();
            built[pos] = Some(MenuNode {
                record: records[pos].clone(),
                children: kids,
            });
        } else {
            stack.push((pos, true));
            stack.extend(children[pos].iter().map(|&child| (child, false)));
        }
    }

    roots.iter().filter_map(|&pos| built[pos].take()).collect()
}
