//! Priority depth assignment.
//!
//! Simultaneous events are ordered by the topological depth of their
//! destination: a port whose value can influence another port within the same
//! firing round must be served first. Depths are derived from a directed
//! graph over all component ports, with an edge from an input port to each
//! output port of the same component unless the component declared that pair
//! delayed, and an edge from an output port to every input port it is
//! connected to. A cycle in this graph admits no valid priority order and is
//! rejected, naming the components involved.

use std::collections::{HashMap, VecDeque};

use tracing::debug;

use crate::component::{ComponentId, PortDirection, PortId, Token};

use super::{Network, SchedulerError};

/// Priority depths of every port and component of a network.
///
/// Smaller ranks fire earlier within a round.
#[derive(Debug)]
pub(crate) struct DepthTable {
    ports: HashMap<PortId, u64>,
    components: HashMap<ComponentId, u64>,
}

impl DepthTable {
    /// Returns the rank of a port.
    pub(crate) fn port_rank(&self, port: PortId) -> Option<u64> {
        self.ports.get(&port).copied()
    }

    /// Returns the rank of a component, i.e. the minimum rank among its
    /// ports.
    ///
    /// Components without any port rank 0.
    pub(crate) fn component_rank(&self, component: ComponentId) -> Option<u64> {
        self.components.get(&component).copied()
    }
}

/// Computes the depth table of a network.
///
/// Fails with [`SchedulerError::DependencyCycle`] if the port dependency
/// graph contains a cycle.
pub(crate) fn compute<T: Token>(network: &Network<T>) -> Result<DepthTable, SchedulerError> {
    // Nodes are enumerated in a deterministic order (components by insertion,
    // inputs before outputs) so that the sort, and therefore the schedule, is
    // reproducible.
    let mut nodes: Vec<PortId> = Vec::new();
    for (key, entry) in network.entries.iter() {
        let component = ComponentId(key);
        for index in 0..entry.interface.inputs.len() {
            nodes.push(PortId {
                component,
                direction: PortDirection::Input,
                index,
            });
        }
        for index in 0..entry.interface.outputs.len() {
            nodes.push(PortId {
                component,
                direction: PortDirection::Output,
                index,
            });
        }
    }
    let node_index: HashMap<PortId, usize> =
        nodes.iter().enumerate().map(|(i, &p)| (p, i)).collect();

    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
    let mut in_degree: Vec<usize> = vec![0; nodes.len()];
    let mut add_edge = |from: usize, to: usize| {
        successors[from].push(to);
        in_degree[to] += 1;
    };

    // Zero-delay paths through a component.
    for (key, entry) in network.entries.iter() {
        let component = ComponentId(key);
        for input in 0..entry.interface.inputs.len() {
            for output in 0..entry.interface.outputs.len() {
                if entry.interface.delayed.contains(&(input, output)) {
                    continue;
                }
                add_edge(
                    node_index[&PortId {
                        component,
                        direction: PortDirection::Input,
                        index: input,
                    }],
                    node_index[&PortId {
                        component,
                        direction: PortDirection::Output,
                        index: output,
                    }],
                );
            }
        }
    }

    // Connections between components. The connection map has no stable
    // iteration order, so the edges are sorted to keep the ranks
    // reproducible from one run to the next.
    let mut connection_edges: Vec<(usize, usize)> = Vec::new();
    for (&(output, _), destinations) in &network.connections {
        for &(input, _) in destinations {
            connection_edges.push((node_index[&output], node_index[&input]));
        }
    }
    connection_edges.sort_unstable();
    for (from, to) in connection_edges {
        add_edge(from, to);
    }

    // Topological sort; the sort position becomes the rank.
    let mut ready: VecDeque<usize> = (0..nodes.len()).filter(|&n| in_degree[n] == 0).collect();
    let mut ranks: Vec<Option<u64>> = vec![None; nodes.len()];
    let mut next_rank: u64 = 0;
    while let Some(node) = ready.pop_front() {
        ranks[node] = Some(next_rank);
        next_rank += 1;
        for &succ in &successors[node] {
            in_degree[succ] -= 1;
            if in_degree[succ] == 0 {
                ready.push_back(succ);
            }
        }
    }

    if (next_rank as usize) < nodes.len() {
        // The unranked remainder is on or downstream of a cycle; name its
        // components.
        let mut components: Vec<String> = nodes
            .iter()
            .enumerate()
            .filter(|&(n, _)| ranks[n].is_none())
            .map(|(_, port)| network.entries[port.component.0].name.clone())
            .collect();
        components.sort();
        components.dedup();

        return Err(SchedulerError::DependencyCycle { components });
    }

    let mut ports: HashMap<PortId, u64> = nodes
        .iter()
        .enumerate()
        .map(|(n, &port)| (port, ranks[n].unwrap()))
        .collect();

    // A component able to react to a partial set of inputs, or one that
    // cannot influence anything downstream, gains nothing from being fired
    // once per arriving token: aligning its input ports on a common rank
    // makes simultaneous tokens arrive in a single firing.
    for (key, entry) in network.entries.iter() {
        if !entry.interface.non_strict && !entry.interface.outputs.is_empty() {
            continue;
        }
        let component = ComponentId(key);
        let inputs: Vec<PortId> = (0..entry.interface.inputs.len())
            .map(|index| PortId {
                component,
                direction: PortDirection::Input,
                index,
            })
            .collect();
        if let Some(max) = inputs.iter().filter_map(|p| ports.get(p)).max().copied() {
            for port in inputs {
                ports.insert(port, max);
            }
        }
    }

    let mut components: HashMap<ComponentId, u64> = HashMap::new();
    for (key, _) in network.entries.iter() {
        let component = ComponentId(key);
        let rank = ports
            .iter()
            .filter(|(port, _)| port.component == component)
            .map(|(_, &rank)| rank)
            .min()
            .unwrap_or(0);
        components.insert(component, rank);
    }

    debug!(ports = nodes.len(), "recomputed the depth table");

    Ok(DepthTable { ports, components })
}

#[cfg(test)]
mod tests {
    use crate::component::{Component, Context, Interface};
    use crate::scheduler::Network;

    use super::*;

    // Port declaration without behavior, for exercising the sort alone.
    struct Shape(usize, usize);

    impl Component<i32> for Shape {
        fn interface(&self) -> Interface {
            let mut interface = Interface::new();
            for i in 0..self.0 {
                interface = interface.input(format!("in{}", i), 1);
            }
            for o in 0..self.1 {
                interface = interface.output(format!("out{}", o), 1);
            }
            interface
        }
        fn fire(&mut self, _: &mut Context<i32>) {}
    }

    #[test]
    fn chain_ranks_are_monotonic() {
        let mut network = Network::new();
        let a = network.add(Shape(0, 1), "a");
        let b = network.add(Shape(1, 1), "b");
        let c = network.add(Shape(1, 0), "c");
        network.connect(network.output(a, 0), network.input(b, 0)).unwrap();
        network.connect(network.output(b, 0), network.input(c, 0)).unwrap();

        let table = compute(&network).unwrap();
        let a_out = table.port_rank(network.output(a, 0)).unwrap();
        let b_in = table.port_rank(network.input(b, 0)).unwrap();
        let b_out = table.port_rank(network.output(b, 0)).unwrap();
        let c_in = table.port_rank(network.input(c, 0)).unwrap();

        assert!(a_out < b_in);
        assert!(b_in < b_out);
        assert!(b_out < c_in);
    }

    #[test]
    fn component_rank_is_min_port_rank() {
        let mut network = Network::new();
        let a = network.add(Shape(0, 1), "a");
        let b = network.add(Shape(1, 1), "b");
        network.connect(network.output(a, 0), network.input(b, 0)).unwrap();

        let table = compute(&network).unwrap();
        assert_eq!(
            table.component_rank(a),
            table.port_rank(network.output(a, 0))
        );
        assert_eq!(table.component_rank(b), table.port_rank(network.input(b, 0)));
    }

    #[test]
    fn zero_delay_cycle_is_rejected() {
        let mut network = Network::new();
        let a = network.add(Shape(1, 1), "alpha");
        let b = network.add(Shape(1, 1), "beta");
        network.connect(network.output(a, 0), network.input(b, 0)).unwrap();
        network.connect(network.output(b, 0), network.input(a, 0)).unwrap();

        match compute(&network) {
            Err(SchedulerError::DependencyCycle { components }) => {
                assert_eq!(components, vec!["alpha".to_string(), "beta".to_string()]);
            }
            other => panic!("expected a dependency cycle error, got {:?}", other),
        }
    }

    #[test]
    fn declared_delay_breaks_cycle() {
        struct DelayLoop;
        impl Component<i32> for DelayLoop {
            fn interface(&self) -> Interface {
                Interface::new().input("in", 1).output("out", 1).delayed(0, 0)
            }
            fn fire(&mut self, _: &mut Context<i32>) {}
        }

        let mut network = Network::new();
        let a = network.add(DelayLoop, "loopback");
        let b = network.add(Shape(1, 1), "b");
        network.connect(network.output(a, 0), network.input(b, 0)).unwrap();
        network.connect(network.output(b, 0), network.input(a, 0)).unwrap();

        assert!(compute(&network).is_ok());
    }

    #[test]
    fn non_strict_inputs_share_the_deepest_rank() {
        struct Merge;
        impl Component<i32> for Merge {
            fn interface(&self) -> Interface {
                Interface::new()
                    .input("a", 1)
                    .input("b", 1)
                    .output("out", 1)
                    .non_strict()
            }
            fn fire(&mut self, _: &mut Context<i32>) {}
        }

        let mut network = Network::new();
        let s1 = network.add(Shape(0, 1), "s1");
        let s2 = network.add(Shape(0, 1), "s2");
        let relay = network.add(Shape(1, 1), "relay");
        let merge = network.add(Merge, "merge");
        network.connect(network.output(s1, 0), network.input(merge, 0)).unwrap();
        network.connect(network.output(s2, 0), network.input(relay, 0)).unwrap();
        network.connect(network.output(relay, 0), network.input(merge, 1)).unwrap();

        let table = compute(&network).unwrap();
        let in_a = table.port_rank(network.input(merge, 0)).unwrap();
        let in_b = table.port_rank(network.input(merge, 1)).unwrap();
        assert_eq!(in_a, in_b);
        // The shared rank still honors every upstream dependency.
        assert!(table.port_rank(network.output(relay, 0)).unwrap() < in_b);
    }

    #[test]
    fn sink_inputs_share_the_deepest_rank() {
        let mut network = Network::new();
        let s1 = network.add(Shape(0, 1), "s1");
        let relay = network.add(Shape(1, 1), "relay");
        let sink = network.add(Shape(2, 0), "sink");
        network.connect(network.output(s1, 0), network.input(sink, 0)).unwrap();
        network.connect(network.output(s1, 0), network.input(relay, 0)).unwrap();
        network.connect(network.output(relay, 0), network.input(sink, 1)).unwrap();

        let table = compute(&network).unwrap();
        assert_eq!(
            table.port_rank(network.input(sink, 0)),
            table.port_rank(network.input(sink, 1)),
        );
    }
}
