//! Worker output parsing and enrichment propagation.

pub mod parser;
pub mod propagate;

pub use parser::{parse, ParsedOutput};
pub use propagate::{enrichment, merge_enrichment, render_inputs};
