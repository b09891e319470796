//! Content-addressed storage for a skill's auxiliary files and the directory
//! tree shown for them.

use std::{collections::BTreeMap, sync::Arc};

use tracing::debug;

#[cfg(feature = "metrics")]
use crate::metrics::{counter, names};
use crate::{
    blob::{BlobLocation, BlobStore, GlobalBlob, sha256_hex},
    error::{Error, Result},
    types::{ResourceBytes, ResourceMap, ResourceMeta, ResourceNodeKind, ResourceTreeNode},
};

/// Storage key prefix for extracted skill files.
pub const SOURCE_FILES_PREFIX: &str = "skills/source_files";

/// Storage key for `path` within the namespace of an archive hash.
pub fn source_file_key(namespace: &str, path: &str) -> String {
    match path.rsplit_once('/') {
        Some((dir, file)) => format!("{SOURCE_FILES_PREFIX}/{namespace}/{dir}/{file}"),
        None => format!("{SOURCE_FILES_PREFIX}/{namespace}/{path}"),
    }
}

/// Best-effort MIME type from the file extension.
pub fn mime_for_path(path: &str) -> &'static str {
    let ext = path
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "md" | "markdown" => "text/markdown",
        "txt" | "text" => "text/plain",
        "json" => "application/json",
        "yaml" | "yml" => "application/yaml",
        "toml" => "application/toml",
        "xml" => "application/xml",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "csv" => "text/csv",
        "js" | "mjs" | "cjs" => "text/javascript",
        "ts" | "tsx" => "text/typescript",
        "py" => "text/x-python",
        "rs" => "text/x-rust",
        "sh" | "bash" => "application/x-sh",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        _ => "application/octet-stream",
    }
}

/// Check that `path` is a relative, `/`-delimited virtual path without empty,
/// `.` or `..` segments.
pub fn validate_virtual_path(path: &str) -> Result<()> {
    let valid = !path.is_empty()
        && !path.starts_with('/')
        && !path.contains('\\')
        && path
            .split('/')
            .all(|seg| !seg.is_empty() && seg != "." && seg != "..");
    if valid {
        Ok(())
    } else {
        Err(Error::invalid_input(format!(
            "invalid resource path: {path:?}"
        )))
    }
}

/// Build the display tree for a resource mapping. Only the keys are used.
///
/// A segment is a directory when another path continues below it; siblings
/// are sorted by name at every level.
pub fn build_tree(resources: &ResourceMap) -> Vec<ResourceTreeNode> {
    #[derive(Default)]
    struct Trie {
        children: BTreeMap<String, Trie>,
    }

    fn into_nodes(trie: Trie, prefix: &str) -> Vec<ResourceTreeNode> {
        trie.children
            .into_iter()
            .map(|(name, child)| {
                let path = if prefix.is_empty() {
                    name.clone()
                } else {
                    format!("{prefix}/{name}")
                };
                if child.children.is_empty() {
                    ResourceTreeNode {
                        name,
                        path,
                        kind: ResourceNodeKind::File,
                        children: None,
                    }
                } else {
                    let children = into_nodes(child, &path);
                    ResourceTreeNode {
                        name,
                        path,
                        kind: ResourceNodeKind::Directory,
                        children: Some(children),
                    }
                }
            })
            .collect()
    }

    let mut root = Trie::default();
    for path in resources.keys() {
        let mut node = &mut root;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            node = node.children.entry(segment.to_string()).or_default();
        }
    }
    into_nodes(root, "")
}

/// Persists resource files into the blob store and reads them back.
#[derive(Clone)]
pub struct SkillResourceService {
    blobs: Arc<dyn BlobStore>,
}

impl SkillResourceService {
    pub fn new(blobs: Arc<dyn BlobStore>) -> Self {
        Self { blobs }
    }

    /// Directory tree for a skill's resources.
    pub fn list_resources(&self, resources: &ResourceMap) -> Vec<ResourceTreeNode> {
        build_tree(resources)
    }

    /// Upload every file under `namespace` (the archive content hash) and
    /// register it as a global blob. Returns one entry per input path.
    pub async fn store_resources(
        &self,
        namespace: &str,
        resources: &ResourceBytes,
    ) -> Result<ResourceMap> {
        let mut stored = ResourceMap::new();
        for (path, bytes) in resources {
            validate_virtual_path(path)?;

            let file_hash = sha256_hex(bytes);
            let key = source_file_key(namespace, path);
            let mime_type = mime_for_path(path);

            self.blobs.upload(&key, bytes, mime_type).await?;
            self.blobs
                .register_global_blob(GlobalBlob {
                    file_hash: file_hash.clone(),
                    file_type: mime_type.to_string(),
                    url: key.clone(),
                    size: bytes.len() as u64,
                    metadata: BlobLocation::from_key(&key),
                })
                .await?;
            debug!(%path, %key, %file_hash, "stored skill resource");

            stored.insert(path.clone(), ResourceMeta { file_hash });
        }

        #[cfg(feature = "metrics")]
        counter!(names::RESOURCES_STORED_TOTAL).increment(stored.len() as u64);

        Ok(stored)
    }

    /// Text content of the resource at `path`.
    pub async fn read_resource(&self, resources: &ResourceMap, path: &str) -> Result<String> {
        let meta = resources
            .get(path)
            .ok_or_else(|| Error::resource_not_found(path))?;
        self.blobs.read_by_hash(&meta.file_hash).await
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::blob::{LocalFile, UploadedBlob},
        async_trait::async_trait,
        std::sync::Mutex,
    };

    #[derive(Default)]
    struct RecordingBlobs {
        uploads: Mutex<Vec<(String, Vec<u8>, String)>>,
        registered: Mutex<Vec<GlobalBlob>>,
        reads: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl BlobStore for RecordingBlobs {
        async fn upload(&self, key: &str, bytes: &[u8], mime: &str) -> Result<UploadedBlob> {
            self.uploads
                .lock()
                .unwrap()
                .push((key.into(), bytes.to_vec(), mime.into()));
            Ok(UploadedBlob { key: key.into() })
        }

        async fn download_to_local(&self, _user_id: &str, _file_id: &str) -> Result<LocalFile> {
            unreachable!("resource store never downloads")
        }

        async fn read_by_hash(&self, hash: &str) -> Result<String> {
            self.reads.lock().unwrap().push(hash.into());
            Ok("file content".into())
        }

        async fn register_global_blob(&self, blob: GlobalBlob) -> Result<()> {
            self.registered.lock().unwrap().push(blob);
            Ok(())
        }
    }

    fn map(paths: &[&str]) -> ResourceMap {
        paths
            .iter()
            .enumerate()
            .map(|(i, p)| {
                (p.to_string(), ResourceMeta {
                    file_hash: format!("hash{i}"),
                })
            })
            .collect()
    }

    fn names(nodes: &[ResourceTreeNode]) -> Vec<&str> {
        nodes.iter().map(|n| n.name.as_str()).collect()
    }

    // ── build_tree ──────────────────────────────────────────────────────

    #[test]
    fn flat_files_are_sorted_leaves() {
        let tree = build_tree(&map(&["z.txt", "README.md", "a.txt", "config.json"]));
        assert_eq!(names(&tree), ["README.md", "a.txt", "config.json", "z.txt"]);
        assert!(tree.iter().all(|n| n.kind == ResourceNodeKind::File));
        assert!(tree.iter().all(|n| n.children.is_none()));
        assert_eq!(tree[0].path, "README.md");
    }

    #[test]
    fn nested_directories_group_shared_prefixes() {
        let tree = build_tree(&map(&["lib/utils.ts", "lib/helpers.ts", "src/index.ts"]));
        assert_eq!(names(&tree), ["lib", "src"]);

        let lib = &tree[0];
        assert_eq!(lib.kind, ResourceNodeKind::Directory);
        assert_eq!(lib.path, "lib");
        let children = lib.children.as_ref().unwrap();
        assert_eq!(names(children), ["helpers.ts", "utils.ts"]);
        assert_eq!(children[1].path, "lib/utils.ts");
    }

    #[test]
    fn deep_nesting_builds_full_chain() {
        let tree = build_tree(&map(&["a/b/c/d.txt"]));
        let a = &tree[0];
        let b = &a.children.as_ref().unwrap()[0];
        let c = &b.children.as_ref().unwrap()[0];
        let d = &c.children.as_ref().unwrap()[0];
        assert_eq!((a.name.as_str(), a.kind), ("a", ResourceNodeKind::Directory));
        assert_eq!(c.path, "a/b/c");
        assert_eq!((d.path.as_str(), d.kind), ("a/b/c/d.txt", ResourceNodeKind::File));
    }

    #[test]
    fn mixed_files_and_directories() {
        let tree = build_tree(&map(&["README.md", "lib/index.ts", "lib/utils/helper.ts"]));
        assert_eq!(names(&tree), ["README.md", "lib"]);
        let lib = tree[1].children.as_ref().unwrap();
        assert_eq!(names(lib), ["index.ts", "utils"]);
        assert_eq!(lib[1].kind, ResourceNodeKind::Directory);
        assert_eq!(names(lib[1].children.as_ref().unwrap()), ["helper.ts"]);
    }

    #[test]
    fn empty_input_gives_empty_forest() {
        assert!(build_tree(&ResourceMap::new()).is_empty());
    }

    #[test]
    fn tree_is_deterministic() {
        let input = map(&["b/x.md", "a.md", "b/a/y.md", "c"]);
        assert_eq!(build_tree(&input), build_tree(&input));
    }

    // ── helpers ─────────────────────────────────────────────────────────

    #[test]
    fn source_file_key_layout() {
        assert_eq!(
            source_file_key("z1", "docs/guide.md"),
            "skills/source_files/z1/docs/guide.md"
        );
        assert_eq!(
            source_file_key("z1", "README.md"),
            "skills/source_files/z1/README.md"
        );
    }

    #[test]
    fn mime_guess_by_extension() {
        assert_eq!(mime_for_path("docs/guide.MD"), "text/markdown");
        assert_eq!(mime_for_path("scripts/run.py"), "text/x-python");
        assert_eq!(mime_for_path("LICENSE"), "application/octet-stream");
    }

    #[test]
    fn virtual_path_validation() {
        assert!(validate_virtual_path("docs/guide.md").is_ok());
        for bad in ["", "/abs.md", "a/../b", "./a", "a//b", "a\\b", "a/"] {
            assert!(validate_virtual_path(bad).is_err(), "{bad} should be rejected");
        }
    }

    // ── store / read ────────────────────────────────────────────────────

    #[tokio::test]
    async fn store_resources_uploads_and_registers_each_file() {
        let blobs = Arc::new(RecordingBlobs::default());
        let service = SkillResourceService::new(blobs.clone());

        let mut input = ResourceBytes::new();
        input.insert("README.md".into(), b"# README".to_vec());
        input.insert("docs/guide.md".into(), b"# Guide".to_vec());

        let stored = service.store_resources("zip123", &input).await.unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored["docs/guide.md"].file_hash, sha256_hex(b"# Guide"));
        assert_eq!(stored["README.md"].file_hash.len(), 64);

        let registered = blobs.registered.lock().unwrap();
        let guide = registered
            .iter()
            .find(|b| b.url.ends_with("guide.md"))
            .unwrap();
        assert_eq!(guide.file_type, "text/markdown");
        assert_eq!(guide.url, "skills/source_files/zip123/docs/guide.md");
        assert_eq!(guide.metadata, BlobLocation {
            dirname: "skills/source_files/zip123/docs".into(),
            filename: "guide.md".into(),
            path: "skills/source_files/zip123/docs/guide.md".into(),
        });
        let readme = registered
            .iter()
            .find(|b| b.url.ends_with("README.md"))
            .unwrap();
        assert_eq!(readme.metadata.dirname, "skills/source_files/zip123");
        assert_eq!(blobs.uploads.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn store_empty_resources_makes_no_calls() {
        let blobs = Arc::new(RecordingBlobs::default());
        let service = SkillResourceService::new(blobs.clone());

        let stored = service
            .store_resources("abc", &ResourceBytes::new())
            .await
            .unwrap();
        assert!(stored.is_empty());
        assert!(blobs.uploads.lock().unwrap().is_empty());
        assert!(blobs.registered.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn store_rejects_traversal_paths() {
        let service = SkillResourceService::new(Arc::new(RecordingBlobs::default()));
        let mut input = ResourceBytes::new();
        input.insert("../escape.md".into(), b"x".to_vec());
        assert!(matches!(
            service.store_resources("abc", &input).await,
            Err(Error::InvalidInput { .. })
        ));
    }

    #[tokio::test]
    async fn read_resource_resolves_hash() {
        let blobs = Arc::new(RecordingBlobs::default());
        let service = SkillResourceService::new(blobs.clone());
        let resources = map(&["test.txt"]);

        let content = service.read_resource(&resources, "test.txt").await.unwrap();
        assert_eq!(content, "file content");
        assert_eq!(*blobs.reads.lock().unwrap(), vec!["hash0".to_string()]);
    }

    #[tokio::test]
    async fn read_missing_resource_fails_before_store_lookup() {
        let blobs = Arc::new(RecordingBlobs::default());
        let service = SkillResourceService::new(blobs.clone());

        for resources in [ResourceMap::new(), map(&["test.txt"])] {
            let err = service
                .read_resource(&resources, "non-existent.txt")
                .await
                .unwrap_err();
            assert_eq!(err.to_string(), "Resource not found: non-existent.txt");
        }
        assert!(blobs.reads.lock().unwrap().is_empty());
    }
}
