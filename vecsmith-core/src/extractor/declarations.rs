//! Declarations for variables the computational core uses but does not declare.
//!
//! The core is cut out of its function, so scalars initialised before the
//! loop (`k = 0`, `max = ABS(a[0])`) would be undefined in isolation. Their
//! initializers are recovered from the rest of the body and ordered so that
//! every declaration follows the ones it reads.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::LazyLock;

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Initializer used when none can be recovered.
pub const PLACEHOLDER_INIT: &str = "1";

static IDENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[A-Za-z_]\w*\b").expect("valid identifier regex"));

static STRING_LITERAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""(?:[^"\\\n]|\\.)*"|'(?:[^'\\\n]|\\.)*'"#).expect("valid literal regex")
});

static DECL_TYPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(int|long|short|unsigned|signed|size_t|real_t|float|double|char)\b")
        .expect("valid declaration regex")
});

const KEYWORDS: &[&str] = &[
    "for", "if", "else", "while", "do", "return", "break", "continue", "goto", "switch", "case",
    "default", "sizeof", "int", "long", "short", "unsigned", "signed", "float", "double", "char",
    "void", "real_t", "size_t", "const", "static", "struct", "register", "volatile", "restrict",
    "__restrict__", "typedef", "inline", "extern",
];

/// Arrays and scalars defined at file scope by the benchmark suite.
pub const GLOBAL_NAMES: &[&str] = &[
    "a", "b", "c", "d", "e", "x", "aa", "bb", "cc", "tt", "indx", "xx", "yy", "flat_2d_array",
    "iterations",
];

/// Timing, checksum and sink calls that surround every benchmark loop.
pub const INSTRUMENTATION_NAMES: &[&str] = &[
    "dummy",
    "gettimeofday",
    "printf",
    "initialise_arrays",
    "calc_checksum",
];

const IMPLICIT_NAMES: &[&str] = &["func_args", "__func__", "NULL"];

/// A synthesized declaration placed ahead of the core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Declaration {
    pub name: String,
    pub ty: String,
    pub init: String,
}

impl Declaration {
    pub fn is_placeholder(&self) -> bool {
        self.init == PLACEHOLDER_INIT
    }

    pub fn render(&self) -> String {
        format!("    {} {} = {};", self.ty, self.name, self.init)
    }
}

pub(crate) fn is_keyword(name: &str) -> bool {
    KEYWORDS.contains(&name)
}

pub(crate) fn is_instrumentation(name: &str) -> bool {
    INSTRUMENTATION_NAMES.contains(&name)
}

fn is_macro_name(name: &str) -> bool {
    name.chars().any(|c| c.is_ascii_uppercase())
        && name
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

fn is_ignorable(name: &str) -> bool {
    is_keyword(name)
        || is_instrumentation(name)
        || is_macro_name(name)
        || GLOBAL_NAMES.contains(&name)
        || IMPLICIT_NAMES.contains(&name)
}

/// Identifiers read as plain variables in `text`, in first-use order.
///
/// Member names, called functions, labels and `goto` targets are excluded.
pub(crate) fn variable_references(text: &str) -> Vec<String> {
    let text = STRING_LITERAL.replace_all(text, "\"\"");
    let bytes = text.as_bytes();
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();

    for m in IDENT.find_iter(&text) {
        let name = m.as_str();
        if name.as_bytes()[0].is_ascii_digit() || is_ignorable(name) {
            continue;
        }
        let before = text[..m.start()].trim_end();
        if before.ends_with('.') || before.ends_with("->") || before.ends_with("goto") {
            continue;
        }
        let mut after = m.end();
        while after < bytes.len() && (bytes[after] == b' ' || bytes[after] == b'\t') {
            after += 1;
        }
        if bytes.get(after) == Some(&b'(') {
            continue;
        }
        let at_line_start = before.is_empty() || before.ends_with('\n') || before.ends_with(';')
            || before.ends_with('{') || before.ends_with('}');
        if at_line_start && bytes.get(after) == Some(&b':') && bytes.get(after + 1) != Some(&b':') {
            continue;
        }
        if seen.insert(name.to_string()) {
            out.push(name.to_string());
        }
    }
    out
}

/// Names declared in `text`, with the declared base type.
///
/// Types other than `int`, `real_t`, `float` and `double` are reported as `int`.
pub(crate) fn declared_names(text: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for m in DECL_TYPE.find_iter(text) {
        let ty = match m.as_str() {
            t @ ("real_t" | "float" | "double") => t,
            _ => "int",
        };
        for piece in declarator_list(&text[m.end()..]) {
            let piece = piece.trim_start_matches(|c: char| c == '*' || c.is_whitespace());
            let ident: String = piece
                .chars()
                .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
                .collect();
            if ident.is_empty() || ident.as_bytes()[0].is_ascii_digit() || is_keyword(&ident) {
                continue;
            }
            out.push((ident, ty.to_string()));
        }
    }
    out
}

/// Split the declarator list following a type keyword at top-level commas.
fn declarator_list(rest: &str) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut depth = 0i32;
    let mut piece_start = 0;
    for (i, ch) in rest.char_indices() {
        match ch {
            '(' | '[' => depth += 1,
            ']' => depth -= 1,
            ')' if depth == 0 => {
                pieces.push(&rest[piece_start..i]);
                return pieces;
            }
            ')' => depth -= 1,
            ';' | '{' if depth == 0 => {
                pieces.push(&rest[piece_start..i]);
                return pieces;
            }
            ',' if depth == 0 => {
                pieces.push(&rest[piece_start..i]);
                piece_start = i + 1;
            }
            _ => {}
        }
    }
    pieces.push(&rest[piece_start..]);
    pieces
}

fn usable_initializer(name: &str, context: &str) -> Option<String> {
    let pattern = format!(r"\b{}\s*=([^=;][^;]*);", regex::escape(name));
    let re = Regex::new(&pattern).ok()?;
    re.captures_iter(context)
        .filter_map(|c| c.get(1).map(|m| m.as_str().trim().to_string()))
        .find(|init| {
            !init.is_empty()
                && !init.contains("++")
                && !init.contains("--")
                && !init.contains("->")
                && !init.contains("func_args")
        })
}

/// Build declarations for every variable `core` reads but does not declare.
///
/// `context` is the function body with the core removed; initializers are
/// only searched there. `function_text` supplies declared types.
pub fn synthesize_declarations(core: &str, context: &str, function_text: &str) -> Vec<Declaration> {
    let declared_in_core: BTreeSet<String> =
        declared_names(core).into_iter().map(|(n, _)| n).collect();
    let types: HashMap<String, String> = declared_names(function_text)
        .into_iter()
        .rev()
        .collect();

    let mut pending: Vec<String> = variable_references(core)
        .into_iter()
        .filter(|n| !declared_in_core.contains(n))
        .collect();

    // name -> (initializer, dependencies)
    let mut resolved: BTreeMap<String, (Option<String>, Vec<String>)> = BTreeMap::new();
    while let Some(name) = pending.pop() {
        if resolved.contains_key(&name) {
            continue;
        }
        let init = usable_initializer(&name, context);
        let deps: Vec<String> = init
            .as_deref()
            .map(variable_references)
            .unwrap_or_default()
            .into_iter()
            .filter(|d| !declared_in_core.contains(d))
            .collect();
        for dep in &deps {
            if !resolved.contains_key(dep) {
                pending.push(dep.clone());
            }
        }
        resolved.insert(name, (init, deps));
    }

    if resolved.is_empty() {
        return Vec::new();
    }

    let mut graph: DiGraph<String, ()> = DiGraph::new();
    let mut nodes: BTreeMap<&str, NodeIndex> = BTreeMap::new();
    for name in resolved.keys() {
        nodes.insert(name.as_str(), graph.add_node(name.clone()));
    }
    for (name, (_, deps)) in &resolved {
        for dep in deps {
            if let (Some(&from), Some(&to)) = (nodes.get(dep.as_str()), nodes.get(name.as_str())) {
                graph.add_edge(from, to, ());
            }
        }
    }

    let mut components = tarjan_scc(&graph);
    components.reverse();

    let mut declarations = Vec::with_capacity(resolved.len());
    for component in components {
        let cyclic = component.len() > 1
            || component
                .first()
                .is_some_and(|&n| graph.contains_edge(n, n));
        for node in component {
            let name = graph[node].clone();
            let init = match resolved.get(&name) {
                Some((Some(init), _)) if !cyclic => init.clone(),
                _ => PLACEHOLDER_INIT.to_string(),
            };
            if cyclic {
                debug!(variable = name.as_str(), "Initializer cycle, using placeholder");
            }
            let ty = types.get(&name).cloned().unwrap_or_else(|| "int".to_string());
            declarations.push(Declaration { name, ty, init });
        }
    }
    declarations
}
