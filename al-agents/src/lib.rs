//! Domain layer of the agent platform: the invoice-matcher and
//! feed-publisher reasoning graphs, the activity library that exposes
//! memory and external I/O to workflows, the workflow definitions
//! themselves, and the HTTP status/trigger facade.

pub mod activities;
pub mod env;
pub mod external;
pub mod graphs;
pub mod llm;
pub mod scoring;
pub mod server;
pub mod state;
pub mod workflows;
