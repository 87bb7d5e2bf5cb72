use anyhow::{anyhow, Context};
use formatx::formatx;
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::fmt::Debug;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

/// Persistence for stage artifacts. Every write replaces whatever was stored under the key before,
/// so a stage either leaves its complete artifact behind or the previous one.
pub trait ArtifactStore: Debug + Send + Sync {
    fn replace(&self, location_key: &str, file_extension: &str, contents: &[u8])
        -> anyhow::Result<()>;

    /// Reads back an artifact, or `None` if nothing was stored under the key.
    fn read(&self, location_key: &str, file_extension: &str) -> anyhow::Result<Option<Vec<u8>>>;

    /// Whether this store can be considered a no-op and therefore that any code that only writes to the store can be skipped.
    fn is_noop(&self) -> bool {
        false
    }
}

#[derive(Debug)]
pub struct FileStore {
    directory_path: PathBuf,
    file_template: String,
}

impl FileStore {
    /// `file_template` is formatted with the location key and the file extension, e.g.
    /// `"{}.{}"`.
    pub fn new(directory_path: PathBuf, file_template: String) -> Self {
        Self {
            directory_path,
            file_template,
        }
    }

    fn path_for(&self, location_key: &str, file_extension: &str) -> anyhow::Result<PathBuf> {
        let file_name = formatx!(&self.file_template, location_key, file_extension)
            .map_err(|e| anyhow!("Could not apply file template '{}': {e:?}", self.file_template))?;
        Ok(self.directory_path.join(file_name))
    }
}

impl ArtifactStore for FileStore {
    fn replace(
        &self,
        location_key: &str,
        file_extension: &str,
        contents: &[u8],
    ) -> anyhow::Result<()> {
        let path = self.path_for(location_key, file_extension)?;
        // written next to the target and renamed over it, so readers never see a partial file
        let partial_path = path.with_extension(format!("{file_extension}.partial"));
        fs::write(&partial_path, contents)
            .with_context(|| format!("Could not write {}", partial_path.display()))?;
        fs::rename(&partial_path, &path)
            .with_context(|| format!("Could not replace {}", path.display()))?;
        Ok(())
    }

    fn read(&self, location_key: &str, file_extension: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let path = self.path_for(location_key, file_extension)?;
        match fs::read(&path) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Could not read {}", path.display())),
        }
    }
}

impl<T: ArtifactStore + ?Sized> ArtifactStore for &T {
    fn replace(
        &self,
        location_key: &str,
        file_extension: &str,
        contents: &[u8],
    ) -> anyhow::Result<()> {
        <T as ArtifactStore>::replace(self, location_key, file_extension, contents)
    }

    fn read(&self, location_key: &str, file_extension: &str) -> anyhow::Result<Option<Vec<u8>>> {
        <T as ArtifactStore>::read(self, location_key, file_extension)
    }

    fn is_noop(&self) -> bool {
        <T as ArtifactStore>::is_noop(self)
    }
}

/// Keeps artifacts in memory, for tests and for callers embedding the pipeline.
#[derive(Debug, Default)]
pub struct MemoryStore(Mutex<IndexMap<String, Vec<u8>>>);

impl MemoryStore {
    pub fn new() -> Self {
        Default::default()
    }

    fn key(location_key: &str, file_extension: &str) -> String {
        format!("{location_key}.{file_extension}")
    }

    /// Keys of all stored artifacts, in the order they were first written.
    pub fn keys(&self) -> Vec<String> {
        self.0.lock().keys().cloned().collect()
    }
}

impl ArtifactStore for MemoryStore {
    fn replace(
        &self,
        location_key: &str,
        file_extension: &str,
        contents: &[u8],
    ) -> anyhow::Result<()> {
        self.0
            .lock()
            .insert(Self::key(location_key, file_extension), contents.to_vec());
        Ok(())
    }

    fn read(&self, location_key: &str, file_extension: &str) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self
            .0
            .lock()
            .get(&Self::key(location_key, file_extension))
            .cloned())
    }
}

/// A store that goes to nowhere/ a "sink"/ /dev/null.
#[derive(Debug, Default)]
pub struct SinkStore;

impl ArtifactStore for SinkStore {
    fn replace(&self, _location_key: &str, _file_extension: &str, _contents: &[u8]) -> anyhow::Result<()> {
        Ok(())
    }

    fn read(&self, _location_key: &str, _file_extension: &str) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(None)
    }

    fn is_noop(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::*;

    #[rstest]
    fn test_memory_store_replaces() {
        let store = MemoryStore::new();
        assert_eq!(store.read("cells", "csv").unwrap(), None);

        store.replace("cells", "csv", b"first").unwrap();
        store.replace("cells", "csv", b"second").unwrap();
        store.replace("cells", "json", b"other").unwrap();

        assert_eq!(store.read("cells", "csv").unwrap(), Some(b"second".to_vec()));
        assert_eq!(store.keys(), vec!["cells.csv", "cells.json"]);
    }

    #[rstest]
    fn test_file_store_replaces() {
        let directory = std::env::temp_dir().join(format!("hh-demand-store-{}", std::process::id()));
        fs::create_dir_all(&directory).unwrap();
        let store = FileStore::new(directory.clone(), "{}__test.{}".to_string());

        assert_eq!((&store).read("substation", "csv").unwrap(), None);
        (&store).replace("substation", "csv", b"a,b\n1,2\n").unwrap();
        store.replace("substation", "csv", b"a,b\n3,4\n").unwrap();

        assert_eq!(
            store.read("substation", "csv").unwrap(),
            Some(b"a,b\n3,4\n".to_vec())
        );
        assert!(directory.join("substation__test.csv").exists());
        assert!(!directory.join("substation__test.csv.partial").exists());

        fs::remove_dir_all(&directory).unwrap();
    }

    #[rstest]
    fn test_sink_store() {
        let store = SinkStore;
        store.replace("cells", "csv", b"ignored").unwrap();
        assert_eq!(store.read("cells", "csv").unwrap(), None);
        assert!(store.is_noop());
    }
}
