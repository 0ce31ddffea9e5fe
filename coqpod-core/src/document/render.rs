//! ASCII rendering of the live document tree.

use super::DocumentTree;
use crate::protocol::StateId;

const TIP: char = '●';
const LIVE: char = '○';

/// Longest sentence excerpt shown per line.
const EXCERPT: usize = 40;

/// Render the live states as ASCII art, marking the tip.
///
/// Example output:
/// ```text
/// 1
/// ├── ○ 2 Lemma foo : True.
/// │   └── ● 4 Proof.
/// └── ○ 3 Definition x := 1.
/// ```
pub fn render_tree(doc: &DocumentTree) -> String {
    let mut output = String::new();
    if let Some(root) = doc.root() {
        render_node(&mut output, doc, root, "", true, true);
    }
    output
}

fn excerpt(text: &str) -> String {
    let line = text.lines().next().unwrap_or("").trim();
    if line.chars().count() > EXCERPT {
        let cut: String = line.chars().take(EXCERPT).collect();
        format!("{cut}…")
    } else {
        line.to_string()
    }
}

fn render_node(
    output: &mut String,
    doc: &DocumentTree,
    id: StateId,
    prefix: &str,
    is_last: bool,
    is_root: bool,
) {
    if is_root {
        output.push_str(&id.to_string());
        output.push('\n');
    } else {
        let branch = if is_last { "└── " } else { "├── " };
        let symbol = if doc.tip() == Some(id) { TIP } else { LIVE };
        output.push_str(prefix);
        output.push_str(branch);
        output.push(symbol);
        output.push(' ');
        output.push_str(&id.to_string());
        output.push(' ');
        output.push_str(&excerpt(doc.text_of(id).unwrap_or("")));
        output.push('\n');
    }

    let child_prefix = if is_root {
        String::new()
    } else {
        let continuation = if is_last { "    " } else { "│   " };
        format!("{}{}", prefix, continuation)
    };

    let children = doc.children(id);
    for (i, child) in children.iter().enumerate() {
        let child_is_last = i == children.len() - 1;
        render_node(output, doc, *child, &child_prefix, child_is_last, false);
    }
}
