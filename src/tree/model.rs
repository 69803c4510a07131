use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::MirrorError;

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Folder {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub folders: Vec<Folder>,
    #[serde(default)]
    pub files: Vec<FileEntry>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct FileEntry {
    pub name: String,
    pub url: String,
    /// Type as announced by the listing, e.g. "pdf" or "Microsoft Word Document".
    #[serde(default)]
    pub kind: String,
}

impl Folder {
    pub fn new(name: &str, url: &str) -> Self {
        Self {
            name: name.to_owned(),
            url: url.to_owned(),
            folders: Vec::new(),
            files: Vec::new(),
        }
    }

    pub fn file_count(&self) -> usize {
        self.files.len() + self.folders.iter().map(|x| x.file_count()).sum::<usize>()
    }

    /// Follows child indexes from this folder down.
    pub fn at(&self, path: &[usize]) -> Option<&Folder> {
        let mut folder = self;
        for index in path {
            folder = folder.folders.get(*index)?;
        }
        Some(folder)
    }

    pub fn at_mut(&mut self, path: &[usize]) -> Option<&mut Folder> {
        let mut folder = self;
        for index in path {
            folder = folder.folders.get_mut(*index)?;
        }
        Some(folder)
    }

    pub async fn save(&self, path: &Path) -> Result<(), MirrorError> {
        let tree_file = |detail: String| MirrorError::TreeFile {
            path: path.to_owned(),
            detail,
        };
        let text = serde_json::to_string_pretty(self).map_err(|e| tree_file(e.to_string()))?;
        if let Some(parent) = path.parent().filter(|x| !x.as_os_str().is_empty()) {
            async_std::fs::create_dir_all(parent)
                .await
                .map_err(|e| MirrorError::target(parent, e))?;
        }
        async_std::fs::write(path, text)
            .await
            .map_err(|e| tree_file(e.to_string()))
    }

    pub async fn load(path: &Path) -> Result<Self, MirrorError> {
        let tree_file = |detail: String| MirrorError::TreeFile {
            path: path.to_owned(),
            detail,
        };
        let text = async_std::fs::read_to_string(path)
            .await
            .map_err(|e| tree_file(e.to_string()))?;
        serde_json::from_str(&text).map_err(|e| tree_file(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Folder {
        let mut root = Folder::new("Documents", "https://sp.test.com/Documents");
        let mut reports = Folder::new("Reports", "https://sp.test.com/Documents/Reports");
        reports.files.push(FileEntry {
            name: "q1".to_owned(),
            url: "https://sp.test.com/Documents/Reports/q1.pdf".to_owned(),
            kind: "pdf".to_owned(),
        });
        root.folders.push(reports);
        root.files.push(FileEntry {
            name: "readme".to_owned(),
            url: "https://sp.test.com/Documents/readme.txt".to_owned(),
            kind: "txt".to_owned(),
        });
        root
    }

    #[test]
    fn test_folder_counts_and_paths() {
        let mut root = sample();
        assert_eq!(root.file_count(), 2);
        assert_eq!(root.at(&[0]).unwrap().name, "Reports");
        assert!(root.at(&[1]).is_none());

        root.at_mut(&[0]).unwrap().folders.push(Folder::new("2017", "x"));
        assert_eq!(root.at(&[0, 0]).unwrap().name, "2017");
    }

    #[test]
    fn test_folder_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state/tree.json");
        let root = sample();

        let loaded = async_std::task::block_on(async {
            root.save(&path).await.unwrap();
            Folder::load(&path).await.unwrap()
        });
        assert_eq!(loaded, root);
    }

    #[test]
    fn test_folder_load_missing() {
        let dir = tempfile::tempdir().unwrap();
        let result = async_std::task::block_on(Folder::load(&dir.path().join("nope.json")));
        assert!(matches!(result, Err(MirrorError::TreeFile { .. })));
    }
}
