//! Unified diff reading

use indexmap::IndexMap;

/// One `diff --git` section of a patch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSection {
    /// Target path without the `a/` / `b/` prefix
    pub path: String,
    /// Raw section text, including its header lines
    pub text: String,
}

impl FileSection {
    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

fn strip_prefix(path: &str) -> &str {
    path.strip_prefix("a/")
        .or_else(|| path.strip_prefix("b/"))
        .unwrap_or(path)
}

/// Path named by a `---`/`+++` header line, ignoring trailing timestamps
fn header_path(rest: &str) -> Option<&str> {
    let path = rest.split('\t').next().unwrap_or(rest).trim();
    if path.is_empty() || path == "/dev/null" {
        None
    } else {
        Some(strip_prefix(path))
    }
}

/// Path from `diff --git a/x b/x`
fn git_header_path(rest: &str) -> Option<&str> {
    let target = rest.rsplit_once(" b/").map(|(_, t)| t)?;
    Some(target.trim())
}

/// Split a patch into per-file sections, in patch order.
pub fn split_file_sections(patch: &str) -> Vec<FileSection> {
    let mut sections: Vec<FileSection> = Vec::new();
    let mut current: Option<FileSection> = None;
    let mut in_hunk = false;

    for line in patch.split_inclusive('\n') {
        let bare = line.trim_end_matches(['\n', '\r']);
        let starts_file = bare.starts_with("diff --git ")
            || (bare.starts_with("--- ") && !in_hunk && current.as_ref().is_none_or(|c| c.text.contains("@@")));

        if starts_file {
            if let Some(done) = current.take() {
                sections.push(done);
            }
            let path = bare
                .strip_prefix("diff --git ")
                .and_then(git_header_path)
                .unwrap_or_default();
            current = Some(FileSection {
                path: path.to_string(),
                text: String::new(),
            });
            in_hunk = false;
        }

        let Some(section) = current.as_mut() else {
            continue;
        };
        section.text.push_str(line);

        if let Some(rest) = bare.strip_prefix("+++ ") {
            if !in_hunk {
                if let Some(path) = header_path(rest) {
                    section.path = path.to_string();
                }
            }
        } else if let Some(rest) = bare.strip_prefix("--- ") {
            if !in_hunk && section.path.is_empty() {
                if let Some(path) = header_path(rest) {
                    section.path = path.to_string();
                }
            }
        } else if bare.starts_with("@@") {
            in_hunk = true;
        } else if !(bare.starts_with(' ')
            || bare.starts_with('+')
            || bare.starts_with('-')
            || bare.starts_with('\\')
            || bare.is_empty())
        {
            in_hunk = false;
        }
    }
    if let Some(done) = current {
        sections.push(done);
    }
    sections.retain(|s| !s.path.is_empty());
    sections
}

/// `@@ -a,b +c,d @@` -> (b, c, d)
fn parse_hunk_header(line: &str) -> Option<(u32, u32, u32)> {
    let re = regex!(r"^@@ -\d+(?:,(\d+))? \+(\d+)(?:,(\d+))? @@");
    let caps = re.captures(line)?;
    let count = |i: usize| -> Option<u32> {
        match caps.get(i) {
            Some(m) => m.as_str().parse().ok(),
            None => Some(1),
        }
    };
    Some((count(1)?, caps[2].parse().ok()?, count(3)?))
}

/// Target line numbers of added and context lines, per file.
///
/// Hunk bodies are read by their declared line counts, so content lines that
/// themselves start with `+++` or `---` are handled.
pub fn patch_lines(patch: &str) -> IndexMap<String, Vec<u32>> {
    let mut result: IndexMap<String, Vec<u32>> = IndexMap::new();

    for section in split_file_sections(patch) {
        let mut lines = section.text.lines();
        let mut touched: Vec<u32> = Vec::new();

        while let Some(line) = lines.next() {
            let Some((mut old_left, mut target, mut new_left)) = parse_hunk_header(line) else {
                continue;
            };
            while old_left > 0 || new_left > 0 {
                let Some(body) = lines.next() else {
                    break;
                };
                match body.chars().next() {
                    Some('+') => {
                        touched.push(target);
                        target += 1;
                        new_left = new_left.saturating_sub(1);
                    }
                    Some('-') => {
                        old_left = old_left.saturating_sub(1);
                    }
                    Some('\\') => {}
                    _ => {
                        // context; an empty line is a context line with its space stripped
                        touched.push(target);
                        target += 1;
                        old_left = old_left.saturating_sub(1);
                        new_left = new_left.saturating_sub(1);
                    }
                }
            }
        }

        if !touched.is_empty() {
            result.entry(section.path).or_default().extend(touched);
        }
    }
    result
}
