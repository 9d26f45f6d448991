//! Parsers for the two whitespace-separated input formats: topology files
//! (`src_board src_port dst_board dst_port` per row) and communication files
//! (`src_vnode dst_vnode flow_label` per row).

use std::path::Path;

/// One topology row, still in file labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TopoRow {
    pub a: u64,
    pub a_port: u16,
    pub b: u64,
    pub b_port: u16,
}

/// One communication row, still in file labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommRow {
    pub src: u64,
    pub dst: u64,
    pub flow: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("failed to read {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}:{line}: expected {expected} fields, got {got}")]
    FieldCount {
        path: String,
        line: usize,
        expected: usize,
        got: usize,
    },

    #[error("{path}:{line}: invalid integer {token:?}")]
    BadInteger {
        path: String,
        line: usize,
        token: String,
    },

    #[error("{path}:{line}: board linked to itself")]
    SelfLink { path: String, line: usize },
}

fn read_rows(path: &Path, nr_fields: usize) -> Result<Vec<(usize, Vec<u64>)>, ParseError> {
    let name = path.display().to_string();
    let text = std::fs::read_to_string(path).map_err(|source| ParseError::Io {
        path: name.clone(),
        source,
    })?;
    let mut rows = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let line_no = idx + 1;
        let tokens = line.split_whitespace().collect::<Vec<_>>();
        if tokens.is_empty() || tokens[0].starts_with('#') {
            continue;
        }
        if tokens.len() != nr_fields {
            return Err(ParseError::FieldCount {
                path: name,
                line: line_no,
                expected: nr_fields,
                got: tokens.len(),
            });
        }
        let mut fields = Vec::with_capacity(nr_fields);
        for token in tokens {
            let value = token.parse::<u64>().map_err(|_| ParseError::BadInteger {
                path: name.clone(),
                line: line_no,
                token: token.to_string(),
            })?;
            fields.push(value);
        }
        rows.push((line_no, fields));
    }
    Ok(rows)
}

/// Parses a topology file. Labels stay as written; densification happens in
/// the allocator facade.
pub fn parse_topology_file(path: &Path) -> Result<Vec<TopoRow>, ParseError> {
    let name = path.display().to_string();
    read_rows(path, 4)?
        .into_iter()
        .map(|(line, f)| {
            if f[0] == f[2] {
                return Err(ParseError::SelfLink {
                    path: name.clone(),
                    line,
                });
            }
            Ok(TopoRow {
                a: f[0],
                a_port: f[1] as u16,
                b: f[2],
                b_port: f[3] as u16,
            })
        })
        .collect()
}

/// Parses a communication file.
pub fn parse_comm_file(path: &Path) -> Result<Vec<CommRow>, ParseError> {
    Ok(read_rows(path, 3)?
        .into_iter()
        .map(|(_, f)| CommRow {
            src: f[0],
            dst: f[1],
            flow: f[2],
        })
        .collect())
}
