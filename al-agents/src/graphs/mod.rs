//! The platform's reasoning graphs.

pub mod feed_publisher;
pub mod invoice_matcher;

pub use feed_publisher::{build_feed_publisher_graph, PublishReport};
pub use invoice_matcher::{build_invoice_matcher_graph, MatchReport};
