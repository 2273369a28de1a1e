//! Routing of token transfers between processing elements over the communication units.

use std::collections::HashMap;

use petgraph::{algo::all_simple_paths, graph::NodeIndex, Graph};
use sdfsyde_common::models::SDFToMultiCoreCharacterized;
use sdfsyde_core::SynthesisError;

use crate::mapping::CumulativeTimeline;

/// One communication unit crossed by a transfer, store-and-forward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hop {
    pub unit: usize,
    pub start: u64,
    pub duration: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutedTransfer {
    pub edge: usize,
    pub volume: u64,
    pub hops: Vec<Hop>,
    pub arrival: u64,
}

impl RoutedTransfer {
    /// Tokens staying on the processing element that produced them.
    pub fn local(edge: usize, ready: u64) -> RoutedTransfer {
        RoutedTransfer {
            edge,
            volume: 0,
            hops: Vec::new(),
            arrival: ready,
        }
    }
}

/// Candidate routes between every ordered pair of processing elements and the
/// per-token cost of every channel on every unit.
#[derive(Debug, Clone)]
pub struct RoutingTable {
    routes: HashMap<(usize, usize), Vec<Vec<usize>>>,
    costs: HashMap<String, Vec<u64>>,
    pe_names: Vec<String>,
}

impl RoutingTable {
    /// Enumerates the simple paths through usable communication units, shortest first and
    /// by unit identifiers on ties, keeping at most `max_routes_per_pair` of them.
    pub fn new(
        model: &SDFToMultiCoreCharacterized,
        max_routes_per_pair: usize,
    ) -> Result<RoutingTable, SynthesisError> {
        let platform = &model.platform;
        let usable: Vec<usize> = platform
            .communication_units
            .iter()
            .enumerate()
            .filter(|(_, cu)| platform.max_transfers_of(cu).map(|m| m > 0).unwrap_or(false))
            .map(|(i, _)| i)
            .collect();
        let cu_index: HashMap<&str, usize> = platform
            .communication_units
            .iter()
            .enumerate()
            .map(|(i, cu)| (cu.as_str(), i))
            .collect();
        let mut routes = HashMap::new();
        for (s, src) in platform.processing_elements.iter().enumerate() {
            for (d, dst) in platform.processing_elements.iter().enumerate() {
                if s == d {
                    continue;
                }
                let mut graph: Graph<Option<usize>, ()> = Graph::new();
                let src_node = graph.add_node(None);
                let dst_node = graph.add_node(None);
                let mut nodes: HashMap<&str, NodeIndex> =
                    HashMap::from([(src.as_str(), src_node), (dst.as_str(), dst_node)]);
                for cu in &usable {
                    nodes.insert(
                        platform.communication_units[*cu].as_str(),
                        graph.add_node(Some(*cu)),
                    );
                }
                for (a, b) in platform.topology_srcs.iter().zip(platform.topology_dsts.iter()) {
                    if let (Some(na), Some(nb)) = (nodes.get(a.as_str()), nodes.get(b.as_str())) {
                        graph.update_edge(*na, *nb, ());
                        graph.update_edge(*nb, *na, ());
                    }
                }
                let mut found: Vec<Vec<usize>> = Vec::new();
                for hops in 1..=usable.len() {
                    if found.len() >= max_routes_per_pair {
                        break;
                    }
                    let paths = all_simple_paths::<Vec<NodeIndex>, _>(
                        &graph,
                        src_node,
                        dst_node,
                        hops,
                        Some(hops),
                    );
                    let mut same_length: Vec<Vec<usize>> = paths
                        .map(|path| path.iter().filter_map(|n| graph[*n]).collect())
                        .collect();
                    same_length.sort_by(|x: &Vec<usize>, y: &Vec<usize>| {
                        let xs: Vec<&String> =
                            x.iter().map(|u| &platform.communication_units[*u]).collect();
                        let ys: Vec<&String> =
                            y.iter().map(|u| &platform.communication_units[*u]).collect();
                        xs.cmp(&ys)
                    });
                    found.extend(same_length);
                }
                found.truncate(max_routes_per_pair);
                routes.insert((s, d), found);
            }
        }
        let mut costs = HashMap::new();
        for c in &model.sdf_application.channels_identifiers {
            let mut row = vec![0; platform.communication_units.len()];
            for cu in &platform.communication_units {
                row[cu_index[cu.as_str()]] = model.transfer_cost_of(c, cu)?;
            }
            costs.insert(c.to_owned(), row);
        }
        Ok(RoutingTable {
            routes,
            costs,
            pe_names: platform.processing_elements.to_owned(),
        })
    }

    pub fn routes(&self, src: usize, dst: usize) -> &[Vec<usize>] {
        self.routes
            .get(&(src, dst))
            .map(|r| r.as_slice())
            .unwrap_or(&[])
    }

    /// The longest `volume` tokens of `channel` can spend in the network: every hop of
    /// the longest candidate route at the channel's slowest unit. `None` on overflow.
    pub fn longest_transfer(&self, channel: &str, volume: u64) -> Option<u64> {
        let slowest = self
            .costs
            .get(channel)
            .and_then(|c| c.iter().copied().max())
            .unwrap_or(0);
        let hops = self.routes.values().flatten().map(|r| r.len()).max().unwrap_or(0);
        volume.checked_mul(slowest)?.checked_mul(hops as u64)
    }

    /// Schedules a transfer of `volume` tokens of `channel` ready at `ready` along
    /// `route`, each hop as early as its unit allows. `None` when a unit of the route
    /// cannot take it. Nothing is reserved; see [`RoutingTable::commit`].
    pub fn route_via(
        &self,
        units: &[CumulativeTimeline],
        channel: &str,
        edge: usize,
        volume: u64,
        route: &[usize],
        ready: u64,
    ) -> Result<Option<RoutedTransfer>, SynthesisError> {
        let costs = self.costs.get(channel).ok_or_else(|| {
            SynthesisError::MalformedModel(format!("no transfer costs for channel '{}'", channel))
        })?;
        let overflow = || {
            SynthesisError::MalformedModel(format!(
                "transfer of {} tokens of channel '{}' overflows the time range",
                volume, channel
            ))
        };
        let mut t = ready;
        let mut hops = Vec::with_capacity(route.len());
        for cu in route {
            let duration = volume.checked_mul(costs[*cu]).ok_or_else(overflow)?;
            let Some(start) = units[*cu].earliest_fit(t, duration) else {
                return Ok(None);
            };
            hops.push(Hop {
                unit: *cu,
                start,
                duration,
            });
            t = start.checked_add(duration).ok_or_else(overflow)?;
        }
        Ok(Some(RoutedTransfer {
            edge,
            volume,
            hops,
            arrival: t,
        }))
    }

    pub fn unroutable(&self, channel: &str, src: usize, dst: usize) -> SynthesisError {
        SynthesisError::UnroutableTransfer {
            channel: channel.to_owned(),
            src: self.pe_names[src].to_owned(),
            dst: self.pe_names[dst].to_owned(),
        }
    }

    pub fn commit(units: &mut [CumulativeTimeline], transfer: &RoutedTransfer) -> bool {
        for (i, hop) in transfer.hops.iter().enumerate() {
            if !units[hop.unit].reserve(hop.start, hop.duration) {
                for undo in &transfer.hops[..i] {
                    units[undo.unit].release(undo.start, undo.duration);
                }
                return false;
            }
        }
        true
    }

    pub fn release(units: &mut [CumulativeTimeline], transfer: &RoutedTransfer) {
        for hop in &transfer.hops {
            units[hop.unit].release(hop.start, hop.duration);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_models::{characterized_with_rates, mesh_platform};

    fn units(model: &SDFToMultiCoreCharacterized) -> Vec<CumulativeTimeline> {
        model
            .platform
            .communication_units
            .iter()
            .map(|cu| CumulativeTimeline::new(model.platform.max_transfers_of(cu).unwrap()))
            .collect()
    }

    #[test]
    fn shortest_routes_come_first() {
        let model = characterized_with_rates(1, 1, 1, 0, mesh_platform());
        let table = RoutingTable::new(&model, 8).unwrap();
        let names = |r: &Vec<usize>| -> Vec<String> {
            r.iter()
                .map(|u| model.platform.communication_units[*u].to_owned())
                .collect()
        };
        let routes: Vec<Vec<String>> = table.routes(0, 1).iter().map(names).collect();
        assert_eq!(
            routes,
            vec![
                vec!["direct".to_string()],
                vec!["r0".to_string(), "r1".to_string()]
            ]
        );
        assert_eq!(table.routes(1, 0).len(), 2);
        assert_eq!(RoutingTable::new(&model, 1).unwrap().routes(0, 1).len(), 1);
    }

    #[test]
    fn hops_are_chained_and_busy_units_avoided() {
        let model = characterized_with_rates(1, 1, 1, 0, mesh_platform());
        let table = RoutingTable::new(&model, 8).unwrap();
        let direct = table.routes(0, 1)[0].to_owned();
        let detour = table.routes(0, 1)[1].to_owned();
        let mut units = units(&model);
        let first = table.route_via(&units, "c", 0, 2, &direct, 3).unwrap().unwrap();
        assert_eq!(first.hops.len(), 1);
        assert_eq!(first.hops[0].start, 3);
        assert_eq!(first.arrival, 5);
        assert!(RoutingTable::commit(&mut units, &first));
        // the direct link is taken until 5
        let waiting = table.route_via(&units, "c", 1, 2, &direct, 3).unwrap().unwrap();
        assert_eq!(waiting.hops[0].start, 5);
        assert_eq!(waiting.arrival, 7);
        let around = table.route_via(&units, "c", 1, 2, &detour, 3).unwrap().unwrap();
        assert_eq!(around.hops[1].start, 5);
        assert_eq!(around.arrival, 7);
        RoutingTable::release(&mut units, &first);
        let again = table.route_via(&units, "c", 1, 2, &direct, 3).unwrap().unwrap();
        assert_eq!(again.arrival, 5);
        assert_eq!(table.longest_transfer("c", 2), Some(4));
    }

    #[test]
    fn full_units_refuse_transfers() {
        let mut model = characterized_with_rates(1, 1, 1, 0, mesh_platform());
        model
            .platform
            .communication_units_max_transfers
            .insert("direct".to_string(), 0);
        let table = RoutingTable::new(&model, 8).unwrap();
        // unusable units are left out of the routes
        assert_eq!(table.routes(0, 1).len(), 1);
        let direct = vec![0];
        assert_eq!(
            table.route_via(&units(&model), "c", 0, 1, &direct, 0).unwrap(),
            None
        );
    }

    #[test]
    fn local_transfers_need_no_network() {
        let t = RoutedTransfer::local(3, 4);
        assert_eq!(t.volume, 0);
        assert!(t.hops.is_empty());
        assert_eq!(t.arrival, 4);
    }

    #[test]
    fn disconnected_elements_are_unroutable() {
        let mut platform = mesh_platform();
        platform.topology_srcs.clear();
        platform.topology_dsts.clear();
        let model = characterized_with_rates(1, 1, 1, 0, platform);
        let table = RoutingTable::new(&model, 8).unwrap();
        assert!(table.routes(0, 1).is_empty());
        assert_eq!(
            table.unroutable("c", 0, 1).to_string(),
            "no route for channel c from p0 to p1"
        );
    }

    #[test]
    fn oversized_transfers_are_malformed_instead_of_overflowing() {
        let mut model = characterized_with_rates(1, 1, 1, 0, mesh_platform());
        for cost in model.transfer_costs.get_mut("c").unwrap().values_mut() {
            *cost = u64::MAX / 2 + 1;
        }
        let table = RoutingTable::new(&model, 8).unwrap();
        let direct = table.routes(0, 1)[0].to_owned();
        assert!(matches!(
            table.route_via(&units(&model), "c", 0, 2, &direct, 0),
            Err(SynthesisError::MalformedModel(_))
        ));
        assert_eq!(table.longest_transfer("c", 2), None);
    }
}
