//! Textual graph dumps and their parser.
//!
//! The dump is the debugging surface of the analysis: deterministic,
//! line-oriented, and complete enough that the parser in this module can
//! recover the full topology (instructions, operand text, and every edge)
//! from the text alone.

mod dump;
mod parse;

pub use dump::{dump_forest, dump_graph, graph_topology};
pub use parse::{parse_forest_dump, parse_graph_dump, DumpError, GraphTopology, NodeRef, TopologyNode};
