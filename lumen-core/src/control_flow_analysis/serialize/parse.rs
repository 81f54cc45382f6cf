//! Parser for the textual dump format.
//!
//! Operand text stays opaque: the parser recovers the instruction list and
//! the complete edge set, which is all the round-trip guarantee covers.
//! Implicit successors (a body line with no `NEXT`) are resolved to the
//! textually following body node; `PREV` lists are redundant and ignored.

use thiserror::Error;

use crate::control_flow_analysis::flow_graph::FlowGraphEdge;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DumpError {
    #[error("dump line {line}: {message}")]
    Malformed { line: usize, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeRef {
    Body(usize),
    Start,
    End,
    Error,
    Sink,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyNode {
    pub op: String,
    pub operands: String,
    pub value: Option<String>,
    pub label: Option<u32>,
}

/// Everything the dump format pins down about one graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphTopology {
    pub name: String,
    pub id: u32,
    pub nodes: Vec<TopologyNode>,
    pub edges: Vec<(NodeRef, NodeRef, FlowGraphEdge)>,
}

pub fn parse_graph_dump(text: &str) -> Result<GraphTopology, DumpError> {
    let mut graphs = parse_forest_dump(text)?;
    match graphs.len() {
        1 => Ok(graphs.remove(0)),
        n => Err(DumpError::Malformed {
            line: 1,
            message: format!("expected exactly one graph, found {n}"),
        }),
    }
}

pub fn parse_forest_dump(text: &str) -> Result<Vec<GraphTopology>, DumpError> {
    let mut sections: Vec<(usize, Vec<(usize, &str)>)> = vec![];
    for (i, raw) in text.lines().enumerate() {
        let line_no = i + 1;
        if raw.starts_with("== ") {
            sections.push((line_no, vec![]));
        } else if let Some((_, lines)) = sections.last_mut() {
            lines.push((line_no, raw));
        } else if !raw.trim().is_empty() {
            return Err(DumpError::Malformed {
                line: line_no,
                message: "content before the first graph header".to_string(),
            });
        }
    }
    let headers: Vec<&str> = text.lines().filter(|l| l.starts_with("== ")).collect();
    sections
        .into_iter()
        .zip(headers)
        .map(|((header_line, lines), header)| parse_section(header_line, header, &lines))
        .collect()
}

struct RawBodyNode {
    node: TopologyNode,
    next: Option<Vec<(NodeRef, FlowGraphEdge)>>,
}

fn parse_section(
    header_line: usize,
    header: &str,
    lines: &[(usize, &str)],
) -> Result<GraphTopology, DumpError> {
    let (name, id) = parse_header(header_line, header)?;

    let mut body: Vec<RawBodyNode> = vec![];
    let mut canonical_next: [Option<Vec<(NodeRef, FlowGraphEdge)>>; 4] = Default::default();
    let mut canonical_seen = [false; 4];

    for &(line_no, raw) in lines {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with("-- line") {
            continue;
        }
        if trimmed.starts_with('<') {
            let (slot, next) = parse_canonical_line(line_no, trimmed)?;
            canonical_seen[slot] = true;
            canonical_next[slot] = next;
            continue;
        }
        if !canonical_seen.iter().any(|s| *s) {
            body.push(parse_body_line(line_no, trimmed, body.len())?);
        } else {
            return Err(DumpError::Malformed {
                line: line_no,
                message: "body node after the canonical section".to_string(),
            });
        }
    }

    for (slot, name) in ["<START>", "<END>", "<ERROR>", "<SINK>"].iter().enumerate() {
        if !canonical_seen[slot] {
            return Err(DumpError::Malformed {
                line: header_line,
                message: format!("missing canonical node {name}"),
            });
        }
    }

    let mut edges = vec![];
    let body_len = body.len();
    let mut nodes = vec![];
    for (i, raw) in body.into_iter().enumerate() {
        match raw.next {
            Some(list) => {
                for (target, edge) in list {
                    edges.push((NodeRef::Body(i), target, edge));
                }
            }
            None => {
                if i + 1 >= body_len {
                    return Err(DumpError::Malformed {
                        line: header_line,
                        message: format!("node {i} has an implicit successor but no next node"),
                    });
                }
                edges.push((NodeRef::Body(i), NodeRef::Body(i + 1), FlowGraphEdge::Normal));
            }
        }
        nodes.push(raw.node);
    }
    let canonical_refs = [NodeRef::Start, NodeRef::End, NodeRef::Error, NodeRef::Sink];
    for (slot, source) in canonical_refs.into_iter().enumerate() {
        if let Some(list) = canonical_next[slot].take() {
            for (target, edge) in list {
                edges.push((source, target, edge));
            }
        }
    }

    Ok(GraphTopology {
        name,
        id,
        nodes,
        edges,
    })
}

fn parse_header(line_no: usize, header: &str) -> Result<(String, u32), DumpError> {
    let malformed = |message: &str| DumpError::Malformed {
        line: line_no,
        message: message.to_string(),
    };
    let inner = header
        .strip_prefix("== ")
        .and_then(|h| h.strip_suffix(" =="))
        .ok_or_else(|| malformed("malformed graph header"))?;
    let open = inner
        .rfind(" (g")
        .ok_or_else(|| malformed("graph header is missing its id"))?;
    let id = inner[open + 3..]
        .strip_suffix(')')
        .and_then(|digits| digits.parse().ok())
        .ok_or_else(|| malformed("unparseable graph id"))?;
    Ok((inner[..open].to_string(), id))
}

/// Splits off a `  NEXT:[...]` or `  PREV:[...]` suffix, returning the
/// bracketed contents.
fn split_suffix<'a>(line: &'a str, marker: &str) -> (&'a str, Option<&'a str>) {
    match line.rfind(marker) {
        Some(pos) => {
            let inner = line[pos + marker.len()..].strip_suffix(']');
            match inner {
                Some(inner) => (&line[..pos], Some(inner)),
                None => (line, None),
            }
        }
        None => (line, None),
    }
}

fn parse_node_ref(line_no: usize, text: &str) -> Result<NodeRef, DumpError> {
    match text {
        "START" => Ok(NodeRef::Start),
        "END" => Ok(NodeRef::End),
        "ERROR" => Ok(NodeRef::Error),
        "SINK" => Ok(NodeRef::Sink),
        other => other
            .parse::<usize>()
            .map(NodeRef::Body)
            .map_err(|_| DumpError::Malformed {
                line: line_no,
                message: format!("unparseable node reference {other:?}"),
            }),
    }
}

fn parse_edge_list(
    line_no: usize,
    text: &str,
) -> Result<Vec<(NodeRef, FlowGraphEdge)>, DumpError> {
    if text.trim().is_empty() {
        return Ok(vec![]);
    }
    text.split(", ")
        .map(|entry| {
            let (edge, rest) = if let Some(rest) = entry.strip_prefix("T:") {
                (FlowGraphEdge::TrueBranch, rest)
            } else if let Some(rest) = entry.strip_prefix("F:") {
                (FlowGraphEdge::FalseBranch, rest)
            } else if let Some(rest) = entry.strip_prefix("D:") {
                (FlowGraphEdge::Dead, rest)
            } else {
                (FlowGraphEdge::Normal, entry)
            };
            Ok((parse_node_ref(line_no, rest)?, edge))
        })
        .collect()
}

fn parse_canonical_line(
    line_no: usize,
    trimmed: &str,
) -> Result<(usize, Option<Vec<(NodeRef, FlowGraphEdge)>>), DumpError> {
    let (rest, _prev) = split_suffix(trimmed, "  PREV:[");
    let (rest, next) = split_suffix(rest, "  NEXT:[");
    let slot = match rest.trim_end() {
        "<START>" => 0,
        "<END>" => 1,
        "<ERROR>" => 2,
        "<SINK>" => 3,
        other => {
            return Err(DumpError::Malformed {
                line: line_no,
                message: format!("unknown canonical node {other:?}"),
            })
        }
    };
    let next = match next {
        Some(list) => Some(parse_edge_list(line_no, list)?),
        None => None,
    };
    if slot == 3 && next.is_some() {
        return Err(DumpError::Malformed {
            line: line_no,
            message: "the sink cannot have successors".to_string(),
        });
    }
    if slot != 3 && next.is_none() {
        return Err(DumpError::Malformed {
            line: line_no,
            message: "canonical node is missing its NEXT list".to_string(),
        });
    }
    Ok((slot, next))
}

fn parse_body_line(
    line_no: usize,
    trimmed: &str,
    expected_position: usize,
) -> Result<RawBodyNode, DumpError> {
    let malformed = |message: String| DumpError::Malformed {
        line: line_no,
        message,
    };

    let mut rest = trimmed;
    let mut label = None;
    if let Some(after) = rest.strip_prefix('L') {
        if let Some(colon) = after.find(": ") {
            let digits = &after[..colon];
            if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
                label = digits.parse().ok();
                rest = &after[colon + 2..];
            }
        }
    }

    let colon = rest
        .find(": ")
        .ok_or_else(|| malformed("body line is missing its position".to_string()))?;
    let position: usize = rest[..colon]
        .parse()
        .map_err(|_| malformed(format!("unparseable node position {:?}", &rest[..colon])))?;
    if position != expected_position {
        return Err(malformed(format!(
            "node {position} out of order, expected {expected_position}"
        )));
    }
    let rest = &rest[colon + 2..];

    let (rest, _prev) = split_suffix(rest, "  PREV:[");
    let (rest, next) = split_suffix(rest, "  NEXT:[");
    let rest = rest.trim_end();

    let (rest, value) = match rest.rfind(" -> ") {
        Some(pos) => (&rest[..pos], Some(rest[pos + 4..].to_string())),
        None => (rest, None),
    };

    let open = rest
        .find('(')
        .ok_or_else(|| malformed("instruction is missing its operand list".to_string()))?;
    let operands = rest[open + 1..]
        .strip_suffix(')')
        .ok_or_else(|| malformed("unterminated operand list".to_string()))?;

    let next = match next {
        Some(list) => Some(parse_edge_list(line_no, list)?),
        None => None,
    };

    Ok(RawBodyNode {
        node: TopologyNode {
            op: rest[..open].to_string(),
            operands: operands.to_string(),
            value,
            label,
        },
        next,
    })
}
