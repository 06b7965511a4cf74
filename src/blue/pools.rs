use crate::blue::healer::VariantNode;
use crate::blue::sequence::Sequence;

/// Worker-owned free lists for the repair search.
///
/// The search allocates one node per candidate variant and one scratch
/// sequence per node; both churn heavily, so they are recycled instead of
/// reallocated. Pools never cross threads — each worker owns one.
#[derive(Debug, Default)]
pub struct WorkerPools {
    nodes: Vec<Box<VariantNode>>,
    sequences: Vec<Sequence>,
    pub nodes_allocated: u64,
    pub nodes_reused: u64,
}

impl WorkerPools {
    pub fn new() -> Self {
        WorkerPools::default()
    }

    pub fn take_node(&mut self) -> Box<VariantNode> {
        match self.nodes.pop() {
            Some(mut node) => {
                self.nodes_reused += 1;
                node.reset();
                node
            }
            None => {
                self.nodes_allocated += 1;
                Box::new(VariantNode::default())
            }
        }
    }

    pub fn return_node(&mut self, mut node: Box<VariantNode>) {
        if let Some(seq) = node.fix_context.take() {
            self.return_sequence(seq);
        }
        self.nodes.push(node);
    }

    pub fn take_sequence(&mut self) -> Sequence {
        self.sequences.pop().unwrap_or_default()
    }

    pub fn return_sequence(&mut self, seq: Sequence) {
        self.sequences.push(seq);
    }
}
