//! Folder path rewriting for subtree moves.

/// Rewrites paths under one root to sit under another.
///
/// The first `old_root.len()` segments of a path are replaced by `new_root`;
/// the rest are kept in order.
#[derive(Debug, Clone)]
pub struct PathAdjuster {
    old_root_len: usize,
    new_root: Vec<String>,
}

impl PathAdjuster {
    pub fn new<A: AsRef<str>, B: AsRef<str>>(old_root: &[A], new_root: &[B]) -> Self {
        Self {
            old_root_len: old_root.len(),
            new_root: new_root.iter().map(|s| s.as_ref().to_string()).collect(),
        }
    }

    pub fn adjust<S: AsRef<str>>(&self, path: &[S]) -> Vec<String> {
        self.new_root
            .iter()
            .cloned()
            .chain(
                path.iter()
                    .skip(self.old_root_len)
                    .map(|s| s.as_ref().to_string()),
            )
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMPTY: [&str; 0] = [];

    #[test]
    fn test_root_is_prepended_to_empty_path() {
        let adjuster = PathAdjuster::new(&EMPTY, &["root"]);
        assert_eq!(adjuster.adjust(&EMPTY), vec!["root"]);
    }

    #[test]
    fn test_moving_root_changes_only_root() {
        let adjuster = PathAdjuster::new(&["root"], &["alternate"]);
        assert_eq!(
            adjuster.adjust(&["root", "child", "grandchild"]),
            vec!["alternate", "child", "grandchild"]
        );
    }

    #[test]
    fn test_moving_child_keeps_descendants() {
        let adjuster = PathAdjuster::new(&["root", "child"], &["root", "otherchild"]);
        assert_eq!(
            adjuster.adjust(&["root", "child", "grandchild"]),
            vec!["root", "otherchild", "grandchild"]
        );
    }

    #[test]
    fn test_path_shorter_than_old_root_becomes_new_root() {
        let adjuster = PathAdjuster::new(&["a", "b", "c"], &["x"]);
        assert_eq!(adjuster.adjust(&["a"]), vec!["x"]);
    }
}
