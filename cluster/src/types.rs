use redis_k8s_common::{ClusterState, NodeConfig, RetryPolicy};
use std::collections::BTreeMap;
use std::net::SocketAddr;

/// What the last poll round learned about one cluster node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeProbe {
    /// Reachable, knows only itself, serves no slots
    Unassigned,
    /// Reachable and already linked to other nodes
    Clustered(ClusterState),
    Unreachable(String),
}

/// Controller-side view of the nodes to be assembled
#[derive(Debug, Clone)]
pub struct ClusterPlan {
    /// `host:port` targets resolved on every round (static nodes and/or a headless service)
    pub targets: Vec<String>,
    pub replica_factor: usize,
    pub masters_wanted: usize,
    pub poll: RetryPolicy,
    nodes: BTreeMap<SocketAddr, NodeProbe>,
}

impl ClusterPlan {
    pub fn new(targets: Vec<String>, replica_factor: usize, masters_wanted: usize, poll: RetryPolicy) -> Self {
        Self {
            targets,
            replica_factor,
            masters_wanted,
            poll,
            nodes: BTreeMap::new(),
        }
    }

    pub fn from_config(config: &NodeConfig) -> Self {
        let mut targets = config.cluster.nodes.clone();
        targets.extend(config.cluster.service.iter().cloned());

        Self::new(
            targets,
            config.cluster.replicas_per_master,
            config.cluster.masters_wanted,
            config.cluster.poll,
        )
    }

    /// `replica_factor * masters_wanted + masters_wanted`
    pub fn min_nodes(&self) -> usize {
        self.replica_factor * self.masters_wanted + self.masters_wanted
    }

    pub fn record(&mut self, addr: SocketAddr, probe: NodeProbe) {
        self.nodes.insert(addr, probe);
    }

    /// Forget nodes that no longer resolve.
    pub fn retain_only(&mut self, current: &[SocketAddr]) {
        self.nodes.retain(|addr, _| current.contains(addr));
    }

    pub fn probe(&self, addr: &SocketAddr) -> Option<&NodeProbe> {
        self.nodes.get(addr)
    }

    pub fn nodes(&self) -> impl Iterator<Item = (&SocketAddr, &NodeProbe)> {
        self.nodes.iter()
    }

    /// Reachable unassigned nodes in address order.
    pub fn unassigned(&self) -> Vec<SocketAddr> {
        self.nodes
            .iter()
            .filter(|(_, probe)| matches!(probe, NodeProbe::Unassigned))
            .map(|(addr, _)| *addr)
            .collect()
    }

    pub fn reachable(&self) -> usize {
        self.nodes
            .values()
            .filter(|probe| !matches!(probe, NodeProbe::Unreachable(_)))
            .count()
    }

    /// A node that already belongs to a formed cluster, if any.
    pub fn formed_node(&self) -> Option<SocketAddr> {
        self.nodes.iter().find_map(|(addr, probe)| match probe {
            NodeProbe::Clustered(state) if state.is_formed() => Some(*addr),
            _ => None,
        })
    }

    /// Layout over the first `min_nodes` unassigned nodes, once there are enough.
    pub fn layout(&self) -> Option<ClusterLayout> {
        let unassigned = self.unassigned();
        let required = self.min_nodes();
        if unassigned.len() < required {
            return None;
        }
        Some(ClusterLayout::from_nodes(&unassigned[..required], self.masters_wanted))
    }
}

/// Role assignment handed to cluster creation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterLayout {
    pub masters: Vec<SocketAddr>,
    /// `(replica, master)` pairs
    pub replicas: Vec<(SocketAddr, SocketAddr)>,
}

impl ClusterLayout {
    /// First `masters` nodes are masters; node `masters + j*masters + i` replicates master `i`.
    pub fn from_nodes(nodes: &[SocketAddr], masters: usize) -> Self {
        let (head, tail) = nodes.split_at(masters.min(nodes.len()));
        let replicas = if head.is_empty() {
            Vec::new()
        } else {
            tail.iter()
                .enumerate()
                .map(|(k, replica)| (*replica, head[k % head.len()]))
                .collect()
        };

        Self {
            masters: head.to_vec(),
            replicas,
        }
    }

    /// Node order for the create call: masters first, then replicas.
    pub fn node_list(&self) -> Vec<SocketAddr> {
        self.masters
            .iter()
            .copied()
            .chain(self.replicas.iter().map(|(replica, _)| *replica))
            .collect()
    }
}

/// Successful end of cluster assembly
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterFormed {
    /// The cluster existed before this run; no create call was issued
    pub already_formed: bool,
    pub layout: Option<ClusterLayout>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn addr(last: u8) -> SocketAddr {
        SocketAddr::from(([10, 0, 0, last], 6379))
    }

    fn plan(replicas: usize, masters: usize) -> ClusterPlan {
        let poll = RetryPolicy::new(u32::MAX, Duration::from_millis(1), u32::MAX, Duration::from_secs(1));
        ClusterPlan::new(Vec::new(), replicas, masters, poll)
    }

    #[test]
    fn test_min_nodes() {
        assert_eq!(plan(1, 3).min_nodes(), 6);
        assert_eq!(plan(2, 3).min_nodes(), 9);
        assert_eq!(plan(0, 3).min_nodes(), 3);
        assert_eq!(plan(1, 5).min_nodes(), 10);
    }

    #[test]
    fn test_layout_assigns_by_address_order() {
        let mut plan = plan(1, 3);
        for last in [6, 2, 4, 1, 5, 3, 7] {
            plan.record(addr(last), NodeProbe::Unassigned);
        }

        let layout = plan.layout().unwrap();
        assert_eq!(layout.masters, vec![addr(1), addr(2), addr(3)]);
        assert_eq!(
            layout.replicas,
            vec![(addr(4), addr(1)), (addr(5), addr(2)), (addr(6), addr(3))]
        );
        assert_eq!(layout.node_list(), (1..=6).map(addr).collect::<Vec<_>>());
    }

    #[test]
    fn test_layout_needs_enough_unassigned_nodes() {
        let mut plan = plan(1, 3);
        for last in 1..=5 {
            plan.record(addr(last), NodeProbe::Unassigned);
        }
        plan.record(addr(6), NodeProbe::Unreachable("refused".to_string()));

        assert!(plan.layout().is_none());
        assert_eq!(plan.reachable(), 5);
    }

    #[test]
    fn test_two_replicas_per_master() {
        let nodes: Vec<SocketAddr> = (1..=9).map(addr).collect();
        let layout = ClusterLayout::from_nodes(&nodes, 3);

        assert_eq!(layout.replicas.len(), 6);
        assert_eq!(layout.replicas[3], (addr(7), addr(1)));
        assert_eq!(layout.replicas[5], (addr(9), addr(3)));
    }

    #[test]
    fn test_formed_node_and_retain() {
        let mut plan = plan(1, 3);
        let formed = ClusterState {
            state_ok: true,
            slots_assigned: redis_k8s_common::CLUSTER_SLOTS,
            known_nodes: 6,
            size: 3,
        };
        plan.record(addr(1), NodeProbe::Unassigned);
        plan.record(addr(2), NodeProbe::Clustered(formed));
        assert_eq!(plan.formed_node(), Some(addr(2)));

        plan.retain_only(&[addr(1)]);
        assert_eq!(plan.formed_node(), None);
        assert_eq!(plan.probe(&addr(1)), Some(&NodeProbe::Unassigned));
    }
}
