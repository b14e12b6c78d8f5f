//! Locating the runtime executable

use std::path::{Path, PathBuf};

/// Fixed system locations, checked before the home directory ones
const SYSTEM_CANDIDATES: [&str; 3] = [
    "/usr/local/bin/container",
    "/opt/homebrew/bin/container",
    "/usr/bin/container",
];

/// Locations relative to the current user's home directory
const HOME_CANDIDATES: [&str; 2] = ["bin/container", ".local/bin/container"];

/// Ordered list of candidate executable paths; the first one that exists wins
#[derive(Debug, Clone)]
pub struct PathResolver {
    candidates: Vec<PathBuf>,
}

impl PathResolver {
    pub fn with_home(home: Option<&Path>) -> Self {
        let mut candidates: Vec<PathBuf> = SYSTEM_CANDIDATES.iter().map(PathBuf::from).collect();
        if let Some(home) = home {
            candidates.extend(HOME_CANDIDATES.iter().map(|rel| home.join(rel)));
        }
        Self { candidates }
    }

    /// Check an explicitly configured path before the fixed list
    pub fn with_override(mut self, path: Option<PathBuf>) -> Self {
        if let Some(path) = path {
            self.candidates.insert(0, path);
        }
        self
    }

    pub fn resolve(&self) -> Option<PathBuf> {
        let found = self.candidates.iter().find(|path| path.exists()).cloned();
        match &found {
            Some(path) => tracing::info!(path = %path.display(), "runtime executable found"),
            None => tracing::info!(
                checked = self.candidates.len(),
                "runtime executable not found"
            ),
        }
        found
    }
}

impl Default for PathResolver {
    fn default() -> Self {
        Self::with_home(dirs::home_dir().as_deref())
    }
}

#[cfg(test)]
impl PathResolver {
    pub fn from_candidates(candidates: Vec<PathBuf>) -> Self {
        Self { candidates }
    }

    pub fn candidates(&self) -> &[PathBuf] {
        &self.candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn candidate_order_is_system_then_home() {
        let resolver = PathResolver::with_home(Some(Path::new("/home/dev")));
        let candidates: Vec<_> = resolver
            .candidates()
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect();

        assert_eq!(
            candidates,
            vec![
                "/usr/local/bin/container",
                "/opt/homebrew/bin/container",
                "/usr/bin/container",
                "/home/dev/bin/container",
                "/home/dev/.local/bin/container",
            ]
        );
    }

    #[test]
    fn no_home_means_only_system_candidates() {
        let resolver = PathResolver::with_home(None);
        assert_eq!(resolver.candidates().len(), 3);
    }

    #[test]
    fn first_existing_candidate_wins() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("missing/container");
        let first = dir.path().join("first");
        let second = dir.path().join("second");
        std::fs::write(&first, "").unwrap();
        std::fs::write(&second, "").unwrap();

        let resolver =
            PathResolver::from_candidates(vec![missing, second.clone(), first.clone()]);

        assert_eq!(resolver.resolve(), Some(second));
    }

    #[test]
    fn nothing_found_is_none() {
        let dir = tempdir().unwrap();
        let resolver = PathResolver::from_candidates(vec![
            dir.path().join("a"),
            dir.path().join("b"),
        ]);

        assert_eq!(resolver.resolve(), None);
    }

    #[test]
    fn override_is_checked_first() {
        let dir = tempdir().unwrap();
        let tool = dir.path().join("container");
        std::fs::write(&tool, "").unwrap();

        let resolver = PathResolver::from_candidates(vec![dir.path().join("later")])
            .with_override(Some(tool.clone()));

        assert_eq!(resolver.candidates()[0], tool);
        assert_eq!(resolver.resolve(), Some(tool));
    }

    #[test]
    fn home_candidates_resolve_from_home_dir() {
        let home = tempdir().unwrap();
        let local_bin = home.path().join(".local/bin");
        std::fs::create_dir_all(&local_bin).unwrap();
        std::fs::write(local_bin.join("container"), "").unwrap();

        let resolver = PathResolver::from_candidates(
            PathResolver::with_home(Some(home.path())).candidates()[3..].to_vec(),
        );

        assert_eq!(resolver.resolve(), Some(local_bin.join("container")));
    }
}
