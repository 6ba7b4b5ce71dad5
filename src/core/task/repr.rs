//! Text tree of a task's collectors.

const BRANCH: &str = "├── ";
const LAST_BRANCH: &str = "└── ";
const PIPE: &str = "│   ";
const SPACE: &str = "    ";

#[derive(Debug, Default)]
struct Node {
    label: String,
    children: Vec<Node>,
}

/// Rebuild the nesting from a preorder `(label, depth)` walk
fn nest(walk: &[(String, usize)]) -> Vec<Node> {
    let mut root = Node::default();
    for (label, depth) in walk {
        let mut parent = &mut root;
        for _ in 0..*depth {
            if parent.children.is_empty() {
                break;
            }
            let last = parent.children.len() - 1;
            parent = &mut parent.children[last];
        }
        parent.children.push(Node {
            label: label.clone(),
            children: Vec::new(),
        });
    }
    root.children
}

fn render(nodes: &[Node], prefix: &str, out: &mut String) {
    for (i, node) in nodes.iter().enumerate() {
        let last = i + 1 == nodes.len();
        out.push_str(prefix);
        out.push_str(if last { LAST_BRANCH } else { BRANCH });
        out.push_str(&node.label);
        out.push('\n');
        let child_prefix = format!("{}{}", prefix, if last { SPACE } else { PIPE });
        render(&node.children, &child_prefix, out);
    }
}

/// Header line followed by one branch per collector
pub fn render_tree(header: &str, walk: &[(String, usize)]) -> String {
    let mut out = format!("{}\n", header);
    render(&nest(walk), "", &mut out);
    out
}
