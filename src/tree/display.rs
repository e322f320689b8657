use super::FileTree;

const INDENT: &str = "  ";

/// Render a tree as indented lines: directories first, then files, each
/// group sorted by name.
pub fn render_tree(tree: &FileTree) -> Vec<String> {
    let mut lines = Vec::new();
    render_level(tree, 0, &mut lines);
    lines
}

fn render_level(tree: &FileTree, depth: usize, lines: &mut Vec<String>) {
    let indent = INDENT.repeat(depth);

    for (name, child) in &tree.children {
        lines.push(format!("{indent}{name}/"));
        render_level(child, depth + 1, lines);
    }

    let mut files: Vec<_> = tree.files.iter().collect();
    files.sort_by(|a, b| a.name.cmp(&b.name));
    for file in files {
        lines.push(format!("{indent}{} {}", file.kind.as_char(), file.name));
    }
}
