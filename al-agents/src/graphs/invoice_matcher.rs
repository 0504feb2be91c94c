//! Invoice matcher graph: memory-aware matching of bank transactions to
//! open invoices.
//!
//! ```text
//! build_query → search_memory → compare_invoices ─┬─► save_context → End
//!                                                 └─► End (no match)
//! ```

use std::sync::Arc;

use agentloom::graph::{
    Graph, GraphBuilder, GraphState, Node, NodeContext, NodeError, NodeKind, RouterFn,
};
use al_memory::{CollectionName, Filter, Scalar, SemanticMemory};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Serialize;

use crate::scoring;
use crate::state::{DecisionType, InvoiceMatchState, InvoiceRecord};

/// Build the search query string from the transaction fields.
struct BuildQueryNode;

#[async_trait]
impl Node<InvoiceMatchState> for BuildQueryNode {
    async fn run(
        &self,
        mut state: InvoiceMatchState,
        ctx: NodeContext,
    ) -> Result<InvoiceMatchState, NodeError> {
        let transaction = &state.transaction;
        let mut parts = vec![
            transaction.vendor_name.clone(),
            format!("€{:.2}", transaction.amount),
        ];
        if let Some(communication) = &transaction.communication {
            parts.push(communication.clone());
        }
        parts.push(format!("date:{}", transaction.date));
        state.memory_query = parts.join(" ");

        ctx.emit("query", format!("built query for {}", transaction.id))?;
        Ok(state)
    }
}

/// Search the `invoices` collection for similar unmatched invoices.
struct SearchMemoryNode {
    memory: Arc<SemanticMemory>,
}

#[async_trait]
impl Node<InvoiceMatchState> for SearchMemoryNode {
    async fn run(
        &self,
        mut state: InvoiceMatchState,
        ctx: NodeContext,
    ) -> Result<InvoiceMatchState, NodeError> {
        let filter = Filter::new().eq("matched", false);
        let results = self
            .memory
            .search(CollectionName::Invoices, &state.memory_query, 10, Some(&filter))
            .await
            .map_err(|e| NodeError::Provider {
                provider: "memory",
                message: e.to_string(),
            })?;

        let top_score = results.first().map(|hit| hit.score).unwrap_or(0.0);
        ctx.emit(
            "memory",
            format!("{} similar invoices (top {top_score:.2})", results.len()),
        )?;
        if results.is_empty() {
            state.add_warning("No memory results".to_string());
        } else if top_score < 0.5 {
            state.add_warning(format!("Low memory similarity (best: {top_score:.2})"));
        }
        state.memory_results = results;
        Ok(state)
    }
}

/// One match candidate, from the input list or reconstructed from a memory
/// hit's payload.
struct Candidate {
    invoice: InvoiceRecord,
    from_memory: bool,
}

fn candidates_from_state(state: &InvoiceMatchState) -> Vec<Candidate> {
    let mut out: Vec<Candidate> = state
        .invoices
        .iter()
        .cloned()
        .map(|invoice| Candidate {
            invoice,
            from_memory: false,
        })
        .collect();

    for hit in &state.memory_results {
        let Some(Scalar::Integer(id)) = hit.payload.get("invoice_id") else {
            continue;
        };
        if out.iter().any(|c| c.invoice.id == *id) {
            continue;
        }
        let (Some(Scalar::String(vendor)), Some(amount), Some(Scalar::String(date))) = (
            hit.payload.get("vendor_name"),
            hit.payload.get("amount").and_then(Scalar::as_f64),
            hit.payload.get("date"),
        ) else {
            continue;
        };
        let Ok(date) = NaiveDate::parse_from_str(date, "%Y-%m-%d") else {
            continue;
        };
        out.push(Candidate {
            invoice: InvoiceRecord {
                id: *id,
                vendor_name: vendor.clone(),
                amount,
                date,
            },
            from_memory: true,
        });
    }
    out
}

/// Score every candidate and take the best; band the confidence into a
/// decision.
struct CompareInvoicesNode;

#[async_trait]
impl Node<InvoiceMatchState> for CompareInvoicesNode {
    async fn run(
        &self,
        mut state: InvoiceMatchState,
        ctx: NodeContext,
    ) -> Result<InvoiceMatchState, NodeError> {
        let transaction = state.transaction.clone();
        let candidates = candidates_from_state(&state);
        let mut best: Option<(f64, String, &Candidate)> = None;

        for candidate in &candidates {
            let vendor =
                scoring::vendor_similarity(&transaction.vendor_name, &candidate.invoice.vendor_name);
            let amount = scoring::amount_similarity(transaction.amount, candidate.invoice.amount);
            let date = scoring::date_similarity(transaction.date, candidate.invoice.date);
            let confidence = scoring::match_confidence(vendor, amount, date);
            if best.as_ref().map_or(true, |(b, _, _)| confidence > *b) {
                let reasoning = format!(
                    "invoice {}: vendor {vendor:.2}, amount {amount:.2}, date {date:.2}{}",
                    candidate.invoice.id,
                    if candidate.from_memory {
                        " (from memory)"
                    } else {
                        ""
                    }
                );
                best = Some((confidence, reasoning, candidate));
            }
        }

        match best {
            Some((confidence, reasoning, candidate)) => {
                state.confidence = confidence;
                state.decision_type = scoring::decide(confidence);
                state.matched_invoice_id = if state.decision_type == DecisionType::NoMatch {
                    None
                } else {
                    Some(candidate.invoice.id)
                };
                state.reasoning = reasoning;
            }
            None => {
                state.confidence = 0.0;
                state.decision_type = DecisionType::NoMatch;
                state.matched_invoice_id = None;
                state.reasoning = "no candidates available".to_string();
            }
        }

        ctx.emit(
            "decision",
            format!(
                "{} (confidence {:.2})",
                state.decision_type.as_str(),
                state.confidence
            ),
        )?;
        Ok(state)
    }
}

/// Persist the decision to `agent_context` so later runs can learn from it.
struct SaveContextNode {
    memory: Arc<SemanticMemory>,
}

#[async_trait]
impl Node<InvoiceMatchState> for SaveContextNode {
    async fn run(
        &self,
        state: InvoiceMatchState,
        ctx: NodeContext,
    ) -> Result<InvoiceMatchState, NodeError> {
        let transaction = &state.transaction;
        let content = format!(
            "Invoice matching decision:\nTransaction: {} €{:.2}\nDecision: {}\nConfidence: {:.2}\nMatched invoice: {:?}\nReasoning: {}",
            transaction.vendor_name,
            transaction.amount,
            state.decision_type.as_str(),
            state.confidence,
            state.matched_invoice_id,
            state.reasoning,
        );

        let mut metadata = std::collections::BTreeMap::new();
        metadata.insert(
            "agent_name".to_string(),
            Scalar::from("invoice_matcher"),
        );
        metadata.insert(
            "context_type".to_string(),
            Scalar::from(state.decision_type.as_str()),
        );
        metadata.insert("confidence".to_string(), Scalar::Float(state.confidence));
        metadata.insert(
            "transaction_id".to_string(),
            Scalar::from(transaction.id.clone()),
        );
        if let Some(invoice_id) = state.matched_invoice_id {
            metadata.insert("invoice_id".to_string(), Scalar::Integer(invoice_id));
        }

        self.memory
            .save(CollectionName::AgentContext, &content, metadata)
            .await
            .map_err(|e| NodeError::Provider {
                provider: "memory",
                message: e.to_string(),
            })?;

        ctx.emit("context", "decision saved for learning")?;
        Ok(state)
    }
}

/// Compile the invoice matcher graph against a memory handle.
pub fn build_invoice_matcher_graph(
    memory: Arc<SemanticMemory>,
) -> Graph<InvoiceMatchState> {
    let route_on_decision: RouterFn<InvoiceMatchState> = Arc::new(|state| {
        if state.decision_type == DecisionType::NoMatch {
            "end".to_string()
        } else {
            "save_context".to_string()
        }
    });

    GraphBuilder::new()
        .add_node("build_query", BuildQueryNode)
        .add_node(
            "search_memory",
            SearchMemoryNode {
                memory: memory.clone(),
            },
        )
        .add_node("compare_invoices", CompareInvoicesNode)
        .add_node("save_context", SaveContextNode { memory })
        .add_edge(NodeKind::Start, "build_query".into())
        .add_edge("build_query".into(), "search_memory".into())
        .add_edge("search_memory".into(), "compare_invoices".into())
        .add_conditional_edge(
            "compare_invoices".into(),
            route_on_decision,
            &[
                ("save_context", "save_context".into()),
                ("end", NodeKind::End),
            ],
        )
        .add_edge("save_context".into(), NodeKind::End)
        .compile()
        .expect("invoice matcher graph is statically valid")
}

/// Flattened outcome of one matcher run, as workflows and evaluators
/// consume it.
#[derive(Clone, Debug, Serialize)]
pub struct MatchReport {
    pub matched: bool,
    pub invoice_id: Option<i64>,
    pub confidence: f64,
    pub decision_type: DecisionType,
    pub reasoning: String,
    pub warnings: Vec<String>,
    pub steps_completed: Vec<String>,
}

impl From<&InvoiceMatchState> for MatchReport {
    fn from(state: &InvoiceMatchState) -> Self {
        Self {
            matched: state.matched(),
            invoice_id: state.matched_invoice_id,
            confidence: state.confidence,
            decision_type: state.decision_type,
            reasoning: state.reasoning.clone(),
            warnings: state.warnings.clone(),
            steps_completed: state.steps_completed.clone(),
        }
    }
}
