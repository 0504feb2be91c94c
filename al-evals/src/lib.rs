//! Evaluation harness: drive graphs against golden datasets and compute
//! aggregate metrics.
//!
//! A [`Dataset`] is an ordered list of `{id, difficulty, input, expected}`
//! cases; a [`Subject`] runs one case; a [`Grader`] decides correctness and
//! emits per-case metrics. [`evaluate`] wires the three together and
//! [`aggregate`] reduces case results to overall accuracy, per-difficulty
//! accuracy, latency percentiles and error rates. Token usage recorded by
//! an [`ExecutionTracker`] turns into cost against a [`PriceTable`].

pub mod caption;
pub mod cost;
pub mod dataset;
pub mod harness;
pub mod invoice;

pub use caption::{CaptionGrader, CaptionQualitySubject};
pub use cost::{CostReport, ExecutionTracker, PriceTable, TrackingLlm};
pub use dataset::{Dataset, Difficulty, TestCase};
pub use harness::{aggregate, evaluate, CaseResult, Grade, Grader, Subject};
pub use invoice::{InvoiceGrader, InvoiceMatcherSubject};
