//! Property tests for graph compilation and execution order.

use agentloom::graph::{GraphBuilder, GraphState, Node, NodeContext, NodeError, NodeKind};
use async_trait::async_trait;
use proptest::prelude::*;

#[derive(Clone, Default, Debug)]
struct ChainState {
    steps_completed: Vec<String>,
    warnings: Vec<String>,
}

impl GraphState for ChainState {
    fn steps_completed(&self) -> &[String] {
        &self.steps_completed
    }
    fn record_step(&mut self, name: &str) {
        self.steps_completed.push(name.to_string());
    }
    fn warnings(&self) -> &[String] {
        &self.warnings
    }
    fn add_warning(&mut self, warning: String) {
        self.warnings.push(warning);
    }
}

struct Noop;

#[async_trait]
impl Node<ChainState> for Noop {
    async fn run(&self, state: ChainState, _: NodeContext) -> Result<ChainState, NodeError> {
        Ok(state)
    }
}

fn chain_names() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec("[a-z]{1,8}", 1..8).prop_map(|names| {
        // Deduplicate while keeping order; node names must be unique.
        let mut seen = std::collections::HashSet::new();
        names
            .into_iter()
            .enumerate()
            .map(|(i, n)| format!("{n}_{i}"))
            .filter(|n| seen.insert(n.clone()))
            .collect()
    })
}

proptest! {
    #[test]
    fn linear_chains_execute_in_declaration_order(names in chain_names()) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            let mut builder = GraphBuilder::new();
            for name in &names {
                builder = builder.add_node(name, Noop);
            }
            builder = builder.add_edge(NodeKind::Start, names[0].as_str().into());
            for pair in names.windows(2) {
                builder = builder.add_edge(pair[0].as_str().into(), pair[1].as_str().into());
            }
            builder = builder.add_edge(names[names.len() - 1].as_str().into(), NodeKind::End);

            let graph = builder.compile().unwrap();
            let (tx, _rx) = flume::unbounded();
            let out = graph.run(ChainState::default(), tx).await.unwrap();
            prop_assert_eq!(out.steps_completed, names);
            Ok(())
        })?;
    }

    #[test]
    fn chains_with_unreachable_node_fail_compilation(names in chain_names()) {
        let mut builder = GraphBuilder::<ChainState>::new();
        for name in &names {
            builder = builder.add_node(name, Noop);
        }
        // Stranded node never wired into the chain.
        builder = builder.add_node("stranded", Noop);
        builder = builder.add_edge(NodeKind::Start, names[0].as_str().into());
        for pair in names.windows(2) {
            builder = builder.add_edge(pair[0].as_str().into(), pair[1].as_str().into());
        }
        builder = builder.add_edge(names[names.len() - 1].as_str().into(), NodeKind::End);
        builder = builder.add_edge("stranded".into(), NodeKind::End);

        prop_assert!(builder.compile().is_err());
    }
}
