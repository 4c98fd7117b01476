//! Parsers for the two input files consumed by the engine.
//!
//! Graph file: a header line `V E` followed by E lines `u v p pBoost`.
//! Seed file: a count line `Na`, a line of Na node ids, a count line `Nr`
//! and a line of Nr node ids. Blank lines are skipped in both formats.

use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::Path,
    str::FromStr,
};

use crate::{
    errors::InputError,
    graph::{Edge, Graph, SeedSet},
};

pub fn load_graph(path: &Path) -> Result<Graph, InputError> {
    read_graph(BufReader::new(File::open(path)?))
}

pub fn load_seed_set(path: &Path, n: usize) -> Result<SeedSet, InputError> {
    read_seed_set(BufReader::new(File::open(path)?), n)
}

pub fn read_graph<R: BufRead>(input: R) -> Result<Graph, InputError> {
    let mut lines = NumberedLines::new(input);

    let (line, header) = lines.next_content()?;
    let mut it = header.split_whitespace();
    let n: usize = parse_field(&mut it, line, "node count")?;
    let m: usize = parse_field(&mut it, line, "edge count")?;
    reject_trailing(it, line)?;

    let mut edges = Vec::with_capacity(m);
    for _ in 0..m {
        let (line, text) = lines.next_content()?;
        let mut it = text.split_whitespace();
        let u: usize = parse_field(&mut it, line, "source node")?;
        let v: usize = parse_field(&mut it, line, "target node")?;
        let p: f64 = parse_field(&mut it, line, "probability p")?;
        let p_boost: f64 = parse_field(&mut it, line, "probability pBoost")?;
        reject_trailing(it, line)?;

        if u >= n {
            return Err(InputError::NodeOutOfRange { line, node: u, n });
        }
        if v >= n {
            return Err(InputError::NodeOutOfRange { line, node: v, n });
        }
        if !(0.0 <= p && p <= p_boost && p_boost <= 1.0) {
            return Err(InputError::BadProbability { line, p, p_boost });
        }
        edges.push(Edge { u: u as u32, v: v as u32, p, p_boost });
    }

    Ok(Graph::new(n, edges))
}

pub fn read_seed_set<R: BufRead>(input: R, n: usize) -> Result<SeedSet, InputError> {
    let mut lines = NumberedLines::new(input);
    let sa = read_index_block(&mut lines)?;
    let sr = read_index_block(&mut lines)?;
    SeedSet::new(n, sa, sr)
}

fn read_index_block<R: BufRead>(lines: &mut NumberedLines<R>) -> Result<Vec<u32>, InputError> {
    let (line, text) = lines.next_content()?;
    let mut it = text.split_whitespace();
    let count: usize = parse_field(&mut it, line, "seed count")?;
    reject_trailing(it, line)?;

    if count == 0 {
        return Ok(vec![]);
    }
    let (line, text) = lines.next_content()?;
    let mut out = Vec::with_capacity(count);
    let mut it = text.split_whitespace();
    for _ in 0..count {
        let v: u32 = parse_field(&mut it, line, "seed node")?;
        out.push(v);
    }
    reject_trailing(it, line)?;
    Ok(out)
}

/// A line reader that skips blanks and keeps track of 1-based line numbers
/// for error reporting.
struct NumberedLines<R> {
    input: R,
    line: usize,
    buf: String,
}

impl<R: BufRead> NumberedLines<R> {
    fn new(input: R) -> Self {
        NumberedLines { input, line: 0, buf: String::new() }
    }

    fn next_content(&mut self) -> Result<(usize, &str), InputError> {
        loop {
            self.buf.clear();
            self.line += 1;
            if self.input.read_line(&mut self.buf)? == 0 {
                return Err(InputError::Truncated(self.line));
            }
            if !self.buf.trim().is_empty() {
                return Ok((self.line, self.buf.trim()));
            }
        }
    }
}

fn parse_field<'a, T>(
    it: &mut impl Iterator<Item = &'a str>,
    line: usize,
    what: &str,
) -> Result<T, InputError>
where
    T: FromStr,
{
    let tok = it
        .next()
        .ok_or_else(|| InputError::malformed(line, format!("missing {}", what)))?;
    tok.parse()
        .map_err(|_| InputError::malformed(line, format!("invalid {}: '{}'", what, tok)))
}

fn reject_trailing<'a>(
    mut it: impl Iterator<Item = &'a str>,
    line: usize,
) -> Result<(), InputError> {
    match it.next() {
        Some(tok) => Err(InputError::malformed(line, format!("unexpected token '{}'", tok))),
        None => Ok(()),
    }
}
