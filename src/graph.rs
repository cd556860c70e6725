use crate::error::ModelError;
use crate::types::PrecedenceEdge;
use std::collections::{BTreeMap, BTreeSet};

/// Precedence structure over parts, reduced to what constraint construction
/// needs: a layer number per part and layer-ordered iteration.
///
/// Sinks (no outgoing edge) sit at layer 1; walking predecessor edges
/// backward assigns increasing layers, and sources (no incoming edge) end up
/// on the highest layer. Iterating [`PrecedenceGraph::groups`] from the
/// maximum layer down to 1 yields parts in a valid processing order.
#[derive(Debug)]
pub struct PrecedenceGraph {
    layers: BTreeMap<u32, Vec<String>>,
    layer_of: BTreeMap<String, u32>,
}

impl PrecedenceGraph {
    pub fn build<'a>(
        parts: impl Iterator<Item = &'a String>,
        edges: &[PrecedenceEdge],
    ) -> Result<Self, ModelError> {
        let vertices: BTreeSet<String> = parts.cloned().collect();
        let mut preds: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        let mut out_degree: BTreeMap<&str, usize> = BTreeMap::new();
        let mut in_degree: BTreeMap<&str, usize> = BTreeMap::new();

        for edge in edges {
            for endpoint in [&edge.from, &edge.to] {
                if !vertices.contains(endpoint) {
                    return Err(ModelError::UnknownPart {
                        part: endpoint.clone(),
                    });
                }
            }
            preds
                .entry(edge.to.as_str())
                .or_default()
                .insert(edge.from.as_str());
            *out_degree.entry(edge.from.as_str()).or_default() += 1;
            *in_degree.entry(edge.to.as_str()).or_default() += 1;
        }

        let sinks: Vec<&str> = vertices
            .iter()
            .map(String::as_str)
            .filter(|v| out_degree.get(v).copied().unwrap_or(0) == 0)
            .collect();
        if sinks.is_empty() && !vertices.is_empty() {
            return Err(ModelError::CyclicPrecedence);
        }
        let is_source =
            |v: &str| in_degree.get(v).copied().unwrap_or(0) == 0;

        let mut layer_of: BTreeMap<String, u32> = BTreeMap::new();
        for sink in &sinks {
            layer_of.insert((*sink).to_string(), 1);
        }

        let mut frontier: BTreeSet<&str> = sinks.iter().copied().collect();
        let mut next_layer = 2u32;
        loop {
            let wave: BTreeSet<&str> = frontier
                .iter()
                .flat_map(|v| preds.get(v).into_iter().flatten().copied())
                .filter(|p| !is_source(p) && !layer_of.contains_key(*p))
                .collect();
            if wave.is_empty() {
                break;
            }
            for p in &wave {
                layer_of.insert((*p).to_string(), next_layer);
            }
            frontier = wave;
            next_layer += 1;
        }

        // Sources, and anything backward-unreachable from the sinks, land on
        // the final layer.
        for v in &vertices {
            layer_of.entry(v.clone()).or_insert(next_layer);
        }

        let mut layers: BTreeMap<u32, Vec<String>> = BTreeMap::new();
        for (part, &layer) in &layer_of {
            layers.entry(layer).or_default().push(part.clone());
        }

        Ok(Self { layers, layer_of })
    }

    /// Layer assigned to the given part, if it exists in the graph.
    pub fn layer(&self, part: &str) -> Option<u32> {
        self.layer_of.get(part).copied()
    }

    pub fn max_layer(&self) -> u32 {
        self.layers.keys().next_back().copied().unwrap_or(0)
    }

    /// Layer groups from the maximum layer down to 1. Restartable; each call
    /// returns a fresh iterator over the precomputed layers.
    pub fn groups(&self) -> impl Iterator<Item = (u32, &[String])> {
        self.layers
            .iter()
            .rev()
            .map(|(&layer, parts)| (layer, parts.as_slice()))
    }

    /// All parts flattened in layer order (dependencies of a part never
    /// precede it).
    pub fn parts_in_order(&self) -> impl Iterator<Item = &str> {
        self.groups()
            .flat_map(|(_, parts)| parts.iter().map(String::as_str))
    }
}
