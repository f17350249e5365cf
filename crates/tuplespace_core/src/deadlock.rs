//! Wait-for graph over transactions.
//!
//! A vertex exists for every transaction that waits or is waited on. An
//! edge `waiter -> holder` counts the blocked tasks of `waiter` that wait
//! for a lock of `holder`. Every `add_task` reruns a strongly connected
//! component search and reports the cycles it finds. Cycles are only
//! logged; the request timeouts of the involved tasks resolve them.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{trace, warn};

use crate::stats::SpaceStats;
use crate::types::{TaskId, TransactionId};

/// Transactions forming one wait-for cycle, in id order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadlockCycle {
    /// Members of the cycle.
    pub transactions: Vec<TransactionId>,
}

impl fmt::Display for DeadlockCycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, tx) in self.transactions.iter().enumerate() {
            if i > 0 {
                f.write_str(" -> ")?;
            }
            write!(f, "{tx}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Edge {
    tasks: Vec<TaskId>,
}

#[derive(Debug, Default)]
struct Graph {
    edges: BTreeMap<TransactionId, BTreeMap<TransactionId, Edge>>,
    degree: BTreeMap<TransactionId, usize>,
    tasks: HashMap<TaskId, (TransactionId, TransactionId)>,
}

impl Graph {
    fn add(&mut self, task: TaskId, waiter: TransactionId, holder: TransactionId) {
        let edge = self.edges.entry(waiter).or_default().entry(holder).or_default();
        if edge.tasks.is_empty() {
            *self.degree.entry(waiter).or_default() += 1;
            *self.degree.entry(holder).or_default() += 1;
        }
        edge.tasks.push(task);
        self.tasks.insert(task, (waiter, holder));
    }

    fn remove(&mut self, task: TaskId) -> bool {
        let Some((waiter, holder)) = self.tasks.remove(&task) else {
            return false;
        };
        let Some(out) = self.edges.get_mut(&waiter) else {
            return false;
        };
        let emptied = out.get_mut(&holder).is_some_and(|edge| {
            edge.tasks.retain(|t| *t != task);
            edge.tasks.is_empty()
        });
        if emptied {
            out.remove(&holder);
            if out.is_empty() {
                self.edges.remove(&waiter);
            }
            self.release_vertex(waiter);
            self.release_vertex(holder);
        }
        true
    }

    fn release_vertex(&mut self, tx: TransactionId) {
        if let Some(d) = self.degree.get_mut(&tx) {
            *d -= 1;
            if *d == 0 {
                self.degree.remove(&tx);
            }
        }
    }

    fn cycles(&self) -> Vec<DeadlockCycle> {
        let mut search = Tarjan {
            graph: self,
            next_index: 0,
            index: HashMap::new(),
            lowlink: HashMap::new(),
            stack: Vec::new(),
            on_stack: BTreeSet::new(),
            found: Vec::new(),
        };
        for v in self.degree.keys() {
            if !search.index.contains_key(v) {
                search.visit(*v);
            }
        }
        search.found
    }
}

struct Tarjan<'a> {
    graph: &'a Graph,
    next_index: usize,
    index: HashMap<TransactionId, usize>,
    lowlink: HashMap<TransactionId, usize>,
    stack: Vec<TransactionId>,
    on_stack: BTreeSet<TransactionId>,
    found: Vec<DeadlockCycle>,
}

impl Tarjan<'_> {
    fn visit(&mut self, v: TransactionId) {
        self.index.insert(v, self.next_index);
        self.lowlink.insert(v, self.next_index);
        self.next_index += 1;
        self.stack.push(v);
        self.on_stack.insert(v);

        let successors: Vec<TransactionId> = self
            .graph
            .edges
            .get(&v)
            .map(|out| out.keys().copied().collect())
            .unwrap_or_default();
        for w in successors {
            if !self.index.contains_key(&w) {
                self.visit(w);
                let low = self.lowlink[&v].min(self.lowlink[&w]);
                self.lowlink.insert(v, low);
            } else if self.on_stack.contains(&w) {
                let low = self.lowlink[&v].min(self.index[&w]);
                self.lowlink.insert(v, low);
            }
        }

        if self.lowlink[&v] == self.index[&v] {
            let mut component = Vec::new();
            while let Some(w) = self.stack.pop() {
                self.on_stack.remove(&w);
                component.push(w);
                if w == v {
                    break;
                }
            }
            if component.len() > 1 {
                component.sort();
                self.found.push(DeadlockCycle {
                    transactions: component,
                });
            }
        }
    }
}

/// Maintains the wait-for graph and reports cycles.
pub struct DeadlockDetector {
    enabled: bool,
    graph: Mutex<Graph>,
    stats: Arc<SpaceStats>,
}

impl DeadlockDetector {
    /// Creates a detector. A disabled detector records nothing.
    pub fn new(enabled: bool, stats: Arc<SpaceStats>) -> Self {
        Self {
            enabled,
            graph: Mutex::new(Graph::default()),
            stats,
        }
    }

    /// Returns true if the detector maintains a graph.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Records that `task` of `waiter` waits for `holder` and returns the
    /// cycles now present.
    ///
    /// A task already in the graph is moved to the new edge. A task
    /// waiting for its own transaction adds nothing.
    pub fn add_task(
        &self,
        task: TaskId,
        waiter: TransactionId,
        holder: TransactionId,
    ) -> Vec<DeadlockCycle> {
        if !self.enabled {
            return Vec::new();
        }
        let cycles = {
            let mut graph = self.graph.lock();
            graph.remove(task);
            if waiter == holder {
                return Vec::new();
            }
            graph.add(task, waiter, holder);
            trace!(%task, %waiter, %holder, "wait-for edge added");
            graph.cycles()
        };
        if !cycles.is_empty() {
            for cycle in &cycles {
                warn!(%cycle, "deadlock detected");
            }
            self.stats.record_deadlocks(cycles.len());
        }
        cycles
    }

    /// Removes the edge recorded for `task`.
    ///
    /// Returns false if the task was not in the graph.
    pub fn remove_task(&self, task: TaskId) -> bool {
        if !self.enabled {
            return false;
        }
        self.graph.lock().remove(task)
    }

    /// Cycles currently present.
    #[must_use]
    pub fn cycles(&self) -> Vec<DeadlockCycle> {
        self.graph.lock().cycles()
    }

    /// Number of transactions in the graph.
    #[must_use]
    pub fn vertex_count(&self) -> usize {
        self.graph.lock().degree.len()
    }

    /// Number of distinct waiter/holder pairs.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.graph.lock().edges.values().map(BTreeMap::len).sum()
    }

    /// Tasks of `waiter` blocked on `holder`.
    #[must_use]
    pub fn multiplicity(&self, waiter: TransactionId, holder: TransactionId) -> usize {
        self.graph
            .lock()
            .edges
            .get(&waiter)
            .and_then(|out| out.get(&holder))
            .map_or(0, |edge| edge.tasks.len())
    }
}

impl fmt::Debug for DeadlockDetector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeadlockDetector")
            .field("enabled", &self.enabled)
            .field("vertices", &self.vertex_count())
            .field("edges", &self.edge_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn tx(id: u64) -> TransactionId {
        TransactionId::new(id)
    }

    fn task(id: u64) -> TaskId {
        TaskId::new(id)
    }

    fn detector() -> DeadlockDetector {
        DeadlockDetector::new(true, Arc::new(SpaceStats::new()))
    }

    #[test]
    fn two_party_cycle_is_found_when_it_closes() {
        let stats = Arc::new(SpaceStats::new());
        let d = DeadlockDetector::new(true, Arc::clone(&stats));
        assert!(d.add_task(task(1), tx(1), tx(2)).is_empty());

        let cycles = d.add_task(task(2), tx(2), tx(1));
        assert_eq!(
            cycles,
            [DeadlockCycle {
                transactions: vec![tx(1), tx(2)]
            }]
        );
        assert_eq!(stats.snapshot().deadlocks_detected, 1);

        assert!(d.remove_task(task(1)));
        assert!(d.cycles().is_empty());
    }

    #[test]
    fn edges_count_multiplicity() {
        let d = detector();
        d.add_task(task(1), tx(1), tx(2));
        d.add_task(task(2), tx(1), tx(2));
        assert_eq!(d.multiplicity(tx(1), tx(2)), 2);
        assert_eq!(d.edge_count(), 1);
        assert_eq!(d.vertex_count(), 2);

        d.remove_task(task(1));
        assert_eq!(d.multiplicity(tx(1), tx(2)), 1);
        d.remove_task(task(2));
        assert_eq!(d.edge_count(), 0);
        assert_eq!(d.vertex_count(), 0);
        assert!(!d.remove_task(task(2)));
    }

    #[test]
    fn three_party_cycle_and_bystander() {
        let d = detector();
        d.add_task(task(1), tx(1), tx(2));
        d.add_task(task(2), tx(2), tx(3));
        d.add_task(task(3), tx(4), tx(1));
        let cycles = d.add_task(task(4), tx(3), tx(1));
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].transactions, [tx(1), tx(2), tx(3)]);
        assert_eq!(cycles[0].to_string(), "txn:1 -> txn:2 -> txn:3");
    }

    #[test]
    fn readding_a_task_moves_its_edge() {
        let d = detector();
        d.add_task(task(1), tx(1), tx(2));
        d.add_task(task(1), tx(1), tx(3));
        assert_eq!(d.multiplicity(tx(1), tx(2)), 0);
        assert_eq!(d.multiplicity(tx(1), tx(3)), 1);
        assert_eq!(d.vertex_count(), 2);
    }

    #[test]
    fn self_wait_and_disabled_detector_record_nothing() {
        let d = detector();
        assert!(d.add_task(task(1), tx(1), tx(1)).is_empty());
        assert_eq!(d.vertex_count(), 0);

        let off = DeadlockDetector::new(false, Arc::new(SpaceStats::new()));
        off.add_task(task(1), tx(1), tx(2));
        off.add_task(task(2), tx(2), tx(1));
        assert!(off.cycles().is_empty());
    }

    proptest! {
        #[test]
        fn removing_every_task_empties_the_graph(
            edges in prop::collection::vec((1u64..6, 1u64..6), 1..30)
        ) {
            let d = detector();
            for (i, (w, h)) in edges.iter().enumerate() {
                d.add_task(task(i as u64), tx(*w), tx(*h));
            }
            for i in 0..edges.len() {
                d.remove_task(task(i as u64));
            }
            prop_assert_eq!(d.vertex_count(), 0);
            prop_assert_eq!(d.edge_count(), 0);
            prop_assert!(d.cycles().is_empty());
        }
    }
}
