//! Graph pipelines
//!
//! A graph is a set of named nodes plus a designated output node. Every node
//! is either *active* (it produced Data for this request) or *inactive*
//! (a switch upstream routed the request elsewhere). Inactive nodes never
//! run their step, so only the selected branch of a switch does any work.
//!
//! ```text
//!            ┌─> detect ──┐
//! in ─> route┤            ├─> any ─> out
//!            └─> classify ┘
//! ```

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{Context, PipelineStep, PipelineStepRunner, SwitchFn};
use crate::data::Data;
use crate::{Error, Result};

/// How a merge node combines its inputs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    /// Active only when every input is active
    #[default]
    RequireAll,
    /// Merge whichever inputs are active; inactive when none are
    Available,
}

/// One node of a graph pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GraphNode {
    /// Entry point; receives the request Data
    Input,
    /// Runs a step on its input
    Step { input: String, step: PipelineStep },
    /// Passes its input to exactly one of its branches
    Switch { input: String, switch_fn: SwitchFn },
    /// The `index`-th output of a switch node
    Branch { switch: String, index: usize },
    /// Merges the keys of several inputs, in listed order
    Merge {
        inputs: Vec<String>,
        #[serde(default)]
        policy: MergePolicy,
        #[serde(default)]
        overwrite: bool,
    },
    /// First active input, in listed order
    Any { inputs: Vec<String> },
}

impl GraphNode {
    /// Names of the nodes this node reads from
    pub fn inputs(&self) -> Vec<&str> {
        match self {
            GraphNode::Input => Vec::new(),
            GraphNode::Step { input, .. } | GraphNode::Switch { input, .. } => vec![input.as_str()],
            GraphNode::Branch { switch, .. } => vec![switch.as_str()],
            GraphNode::Merge { inputs, .. } | GraphNode::Any { inputs } => {
                inputs.iter().map(String::as_str).collect()
            }
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            GraphNode::Input => "Input",
            GraphNode::Step { .. } => "Step",
            GraphNode::Switch { .. } => "Switch",
            GraphNode::Branch { .. } => "Branch",
            GraphNode::Merge { .. } => "Merge",
            GraphNode::Any { .. } => "Any",
        }
    }
}

/// Directed acyclic pipeline with switch/merge nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphPipeline {
    nodes: BTreeMap<String, GraphNode>,
    output: String,
}

/// Validated execution plan for a graph
#[derive(Debug, Clone)]
pub(crate) struct GraphPlan {
    /// Topological order
    order: Vec<String>,
    /// Step node name -> position in the runner list
    runner_index: HashMap<String, usize>,
    /// How many times each node's output is read
    readers: HashMap<String, usize>,
}

impl GraphPipeline {
    /// Create and validate a graph
    pub fn new(nodes: BTreeMap<String, GraphNode>, output: impl Into<String>) -> Result<Self> {
        let graph = Self {
            nodes,
            output: output.into(),
        };
        graph.validate()?;
        Ok(graph)
    }

    pub fn nodes(&self) -> &BTreeMap<String, GraphNode> {
        &self.nodes
    }

    pub fn output(&self) -> &str {
        &self.output
    }

    /// Check references, switch ranges and acyclicity
    pub fn validate(&self) -> Result<()> {
        self.plan().map(|_| ())
    }

    /// Step nodes in execution order
    pub fn steps(&self) -> Result<Vec<(&str, &PipelineStep)>> {
        let plan = self.plan()?;
        Ok(self.steps_in(&plan))
    }

    pub(crate) fn steps_in<'a>(&'a self, plan: &GraphPlan) -> Vec<(&'a str, &'a PipelineStep)> {
        plan.order
            .iter()
            .filter_map(|name| match self.nodes.get_key_value(name) {
                Some((name, GraphNode::Step { step, .. })) => Some((name.as_str(), step)),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn plan(&self) -> Result<GraphPlan> {
        let invalid = |msg: String| Error::InvalidPipeline(msg);

        let inputs: Vec<&String> = self
            .nodes
            .iter()
            .filter(|(_, n)| matches!(n, GraphNode::Input))
            .map(|(name, _)| name)
            .collect();
        if inputs.len() != 1 {
            return Err(invalid(format!(
                "graph needs exactly one input node, found {}",
                inputs.len()
            )));
        }
        if !self.nodes.contains_key(&self.output) {
            return Err(invalid(format!("output node '{}' does not exist", self.output)));
        }

        for (name, node) in &self.nodes {
            for src in node.inputs() {
                if !self.nodes.contains_key(src) {
                    return Err(invalid(format!(
                        "node '{}' references unknown node '{}'",
                        name, src
                    )));
                }
            }
            match node {
                GraphNode::Switch { switch_fn, .. } => switch_fn
                    .validate()
                    .map_err(|e| invalid(format!("switch '{}': {}", name, e)))?,
                GraphNode::Branch { switch, index } => match self.nodes.get(switch) {
                    Some(GraphNode::Switch { switch_fn, .. }) => {
                        if *index >= switch_fn.num_outputs() {
                            return Err(invalid(format!(
                                "branch '{}' selects output {} of switch '{}' which has {} outputs",
                                name,
                                index,
                                switch,
                                switch_fn.num_outputs()
                            )));
                        }
                    }
                    _ => {
                        return Err(invalid(format!(
                            "branch '{}' must follow a switch node, '{}' is not one",
                            name, switch
                        )))
                    }
                },
                GraphNode::Merge { inputs, .. } | GraphNode::Any { inputs } if inputs.is_empty() => {
                    return Err(invalid(format!("{} node '{}' has no inputs", node.kind(), name)))
                }
                _ => {}
            }
        }

        let order = self.topological_sort()?;

        let mut readers: HashMap<String, usize> = HashMap::new();
        for node in self.nodes.values() {
            for src in node.inputs() {
                *readers.entry(src.to_string()).or_default() += 1;
            }
        }
        *readers.entry(self.output.clone()).or_default() += 1;

        let runner_index = order
            .iter()
            .filter(|name| matches!(self.nodes.get(*name), Some(GraphNode::Step { .. })))
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();

        Ok(GraphPlan {
            order,
            runner_index,
            readers,
        })
    }

    /// Kahn's algorithm; ties resolved by node name for a stable order
    fn topological_sort(&self) -> Result<Vec<String>> {
        let mut in_degree: HashMap<&str, usize> = HashMap::new();
        let mut consumers: HashMap<&str, Vec<&str>> = HashMap::new();
        for (name, node) in &self.nodes {
            in_degree.entry(name).or_insert(0);
            for src in node.inputs() {
                *in_degree.entry(name).or_insert(0) += 1;
                consumers.entry(src).or_default().push(name);
            }
        }

        let mut queue: VecDeque<&str> = self
            .nodes
            .keys()
            .map(String::as_str)
            .filter(|name| in_degree.get(name) == Some(&0))
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(name) = queue.pop_front() {
            order.push(name.to_string());
            for consumer in consumers.get(name).into_iter().flatten() {
                if let Some(degree) = in_degree.get_mut(consumer) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(*consumer);
                    }
                }
            }
        }

        if order.len() != self.nodes.len() {
            return Err(Error::InvalidPipeline(
                "graph contains a cycle".to_string(),
            ));
        }
        Ok(order)
    }

    pub(crate) fn run(
        &self,
        plan: &GraphPlan,
        runners: &[Arc<dyn PipelineStepRunner>],
        ctx: &Context,
        input: Data,
    ) -> Result<Data> {
        let mut slots = Slots::new(&plan.readers);
        let mut selected: HashMap<&str, usize> = HashMap::new();
        let mut input = Some(input);

        for name in &plan.order {
            let node = self
                .nodes
                .get(name)
                .ok_or_else(|| Error::Execution(format!("graph node '{}' vanished", name)))?;

            let out = match node {
                GraphNode::Input => input.take(),
                GraphNode::Step { input: src, step } => match slots.read(src) {
                    Some(data) => {
                        let runner = plan
                            .runner_index
                            .get(name)
                            .and_then(|&i| runners.get(i))
                            .ok_or_else(|| {
                                Error::Execution(format!("no runner for graph node '{}'", name))
                            })?;
                        tracing::trace!(
                            request_id = %ctx.request_id(),
                            node = %name,
                            "Executing graph step"
                        );
                        Some(
                            runner
                                .exec(ctx, data)
                                .map_err(|e| e.in_step(name.as_str(), step.step_type()))?,
                        )
                    }
                    None => None,
                },
                GraphNode::Switch { input: src, switch_fn } => match slots.read(src) {
                    Some(data) => {
                        let index = switch_fn
                            .select_output(&data)
                            .map_err(|e| e.in_step(name.as_str(), "Switch"))?;
                        tracing::debug!(
                            request_id = %ctx.request_id(),
                            node = %name,
                            branch = index,
                            "Switch selected branch"
                        );
                        selected.insert(name.as_str(), index);
                        Some(data)
                    }
                    None => None,
                },
                GraphNode::Branch { switch, index } => {
                    let data = slots.read(switch);
                    if selected.get(switch.as_str()) == Some(index) {
                        data
                    } else {
                        None
                    }
                }
                GraphNode::Merge {
                    inputs,
                    policy,
                    overwrite,
                } => {
                    let parts: Vec<Option<Data>> = inputs.iter().map(|i| slots.read(i)).collect();
                    let active = parts.iter().filter(|p| p.is_some()).count();
                    let complete = active == parts.len();
                    if active == 0 || (*policy == MergePolicy::RequireAll && !complete) {
                        None
                    } else {
                        let mut merged = Data::new();
                        for part in parts.into_iter().flatten() {
                            merged
                                .merge(part, *overwrite)
                                .map_err(|e| e.in_step(name.as_str(), "Merge"))?;
                        }
                        Some(merged)
                    }
                }
                GraphNode::Any { inputs } => {
                    let mut first = None;
                    for src in inputs {
                        let data = slots.read(src);
                        if first.is_none() {
                            first = data;
                        }
                    }
                    first
                }
            };
            slots.store(name, out);
        }

        slots.read(&self.output).ok_or_else(|| {
            Error::Execution(format!(
                "output node '{}' is inactive for this request",
                self.output
            ))
        })
    }
}

/// Node outputs for one request
///
/// An output read by several nodes is cloned for all but its last reader,
/// which takes it.
struct Slots {
    values: HashMap<String, Option<Data>>,
    remaining: HashMap<String, usize>,
}

impl Slots {
    fn new(readers: &HashMap<String, usize>) -> Self {
        Self {
            values: HashMap::with_capacity(readers.len()),
            remaining: readers.clone(),
        }
    }

    fn store(&mut self, name: &str, value: Option<Data>) {
        if self.remaining.get(name).copied().unwrap_or(0) > 0 {
            self.values.insert(name.to_string(), value);
        }
    }

    fn read(&mut self, name: &str) -> Option<Data> {
        let remaining = self.remaining.get_mut(name)?;
        *remaining = remaining.saturating_sub(1);
        if *remaining == 0 {
            self.values.remove(name).flatten()
        } else {
            self.values.get(name).cloned().flatten()
        }
    }
}

/// Handle to a node added through [`GraphBuilder`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRef(String);

impl NodeRef {
    pub fn name(&self) -> &str {
        &self.0
    }
}

/// Incremental graph construction
///
/// ```
/// use pipeserve_core::pipeline::{GraphBuilder, PipelineStep, SwitchFn};
///
/// let mut g = GraphBuilder::new();
/// let input = g.input("in");
/// let branches = g.switch("route", &input, SwitchFn::data_int(2, "kind"));
/// let a = g.then("a", &branches[0], PipelineStep::new("StepA"));
/// let b = g.then("b", &branches[1], PipelineStep::new("StepB"));
/// let out = g.any("out", &[a, b]);
/// let graph = g.build(&out).unwrap();
/// assert_eq!(graph.output(), "out");
/// ```
#[derive(Debug, Default)]
pub struct GraphBuilder {
    nodes: BTreeMap<String, GraphNode>,
    duplicates: Vec<String>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn add(&mut self, name: impl Into<String>, node: GraphNode) -> NodeRef {
        let name = name.into();
        if self.nodes.insert(name.clone(), node).is_some() {
            self.duplicates.push(name.clone());
        }
        NodeRef(name)
    }

    /// The entry node
    pub fn input(&mut self, name: impl Into<String>) -> NodeRef {
        self.add(name, GraphNode::Input)
    }

    /// A step reading from `from`
    pub fn then(&mut self, name: impl Into<String>, from: &NodeRef, step: PipelineStep) -> NodeRef {
        self.add(
            name,
            GraphNode::Step {
                input: from.0.clone(),
                step,
            },
        )
    }

    /// A switch plus one branch node per output, named `<name>[i]`
    pub fn switch(&mut self, name: impl Into<String>, from: &NodeRef, switch_fn: SwitchFn) -> Vec<NodeRef> {
        let name = name.into();
        let outputs = switch_fn.num_outputs();
        let switch = self.add(
            name.clone(),
            GraphNode::Switch {
                input: from.0.clone(),
                switch_fn,
            },
        );
        (0..outputs)
            .map(|index| {
                self.add(
                    format!("{}[{}]", name, index),
                    GraphNode::Branch {
                        switch: switch.0.clone(),
                        index,
                    },
                )
            })
            .collect()
    }

    /// A merge node
    pub fn merge(
        &mut self,
        name: impl Into<String>,
        inputs: &[NodeRef],
        policy: MergePolicy,
        overwrite: bool,
    ) -> NodeRef {
        self.add(
            name,
            GraphNode::Merge {
                inputs: inputs.iter().map(|r| r.0.clone()).collect(),
                policy,
                overwrite,
            },
        )
    }

    /// A first-active-input node
    pub fn any(&mut self, name: impl Into<String>, inputs: &[NodeRef]) -> NodeRef {
        self.add(
            name,
            GraphNode::Any {
                inputs: inputs.iter().map(|r| r.0.clone()).collect(),
            },
        )
    }

    /// Validate and finish with `output` as the result node
    pub fn build(self, output: &NodeRef) -> Result<GraphPipeline> {
        if let Some(dup) = self.duplicates.first() {
            return Err(Error::InvalidPipeline(format!(
                "node name '{}' used more than once",
                dup
            )));
        }
        GraphPipeline::new(self.nodes, output.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(t: &str) -> PipelineStep {
        PipelineStep::new(t)
    }

    #[test]
    fn test_order_is_topological() {
        let mut g = GraphBuilder::new();
        let input = g.input("in");
        let a = g.then("z_first", &input, step("A"));
        let b = g.then("a_second", &a, step("B"));
        let graph = g.build(&b).unwrap();
        let names: Vec<&str> = graph.steps().unwrap().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["z_first", "a_second"]);
    }

    #[test]
    fn test_cycle_rejected() {
        let mut nodes = BTreeMap::new();
        nodes.insert("in".to_string(), GraphNode::Input);
        nodes.insert(
            "a".to_string(),
            GraphNode::Merge {
                inputs: vec!["in".into(), "b".into()],
                policy: MergePolicy::Available,
                overwrite: false,
            },
        );
        nodes.insert(
            "b".to_string(),
            GraphNode::Step {
                input: "a".into(),
                step: step("B"),
            },
        );
        let err = GraphPipeline::new(nodes, "b").unwrap_err();
        assert!(matches!(err, Error::InvalidPipeline(m) if m.contains("cycle")));
    }

    #[test]
    fn test_structural_errors() {
        let mut g = GraphBuilder::new();
        let input = g.input("in");
        let ghost = NodeRef("ghost".into());
        let a = g.then("a", &ghost, step("A"));
        assert!(g.build(&a).is_err());

        let mut g = GraphBuilder::new();
        let input2 = g.input("in");
        g.input("in2");
        assert!(g.build(&input2).is_err());

        let mut g = GraphBuilder::new();
        g.input("in");
        g.then("a", &input, step("A"));
        let dup = g.then("a", &input, step("A"));
        assert!(g.build(&dup).is_err());

        let mut nodes = BTreeMap::new();
        nodes.insert("in".to_string(), GraphNode::Input);
        nodes.insert(
            "s".to_string(),
            GraphNode::Switch {
                input: "in".into(),
                switch_fn: SwitchFn::data_int(2, "k"),
            },
        );
        nodes.insert(
            "b".to_string(),
            GraphNode::Branch {
                switch: "s".into(),
                index: 2,
            },
        );
        assert!(GraphPipeline::new(nodes, "b").is_err());
    }

    #[test]
    fn test_serde_roundtrip() {
        let mut g = GraphBuilder::new();
        let input = g.input("in");
        let branches = g.switch("s", &input, SwitchFn::data_int(2, "k"));
        let out = g.merge("m", &branches, MergePolicy::Available, false);
        let graph = g.build(&out).unwrap();
        let json = serde_json::to_string(&graph).unwrap();
        assert!(json.contains(r#""s[0]":{"kind":"branch","switch":"s","index":0}"#));
        let back: GraphPipeline = serde_json::from_str(&json).unwrap();
        assert_eq!(back, graph);
    }
}
