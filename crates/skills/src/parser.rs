//! Skill archive parsing: a ZIP containing `SKILL.md` (YAML frontmatter plus
//! markdown body) and any number of auxiliary files.

use std::io::{Cursor, Read, Write};

use {
    async_trait::async_trait,
    sha2::{Digest, Sha256},
    tracing::debug,
    zip::{CompressionMethod, DateTime, ZipArchive, ZipWriter, write::SimpleFileOptions},
};

use crate::{
    error::{Error, Result},
    types::{ResourceBytes, SkillManifest},
};

pub const SKILL_FILE: &str = "SKILL.md";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParseOptions {
    /// Subdirectory holding the skill, relative to the archive root.
    pub base_path: Option<String>,
    /// Also produce a ZIP holding only the skill's files.
    pub repack: bool,
}

#[derive(Debug, Clone)]
pub struct ParsedArchive {
    pub manifest: SkillManifest,
    /// Markdown body of `SKILL.md`.
    pub content: String,
    /// Every file besides `SKILL.md`, keyed by path relative to the skill root.
    pub resources: ResourceBytes,
    pub content_hash: Option<String>,
    pub repacked: Option<Vec<u8>>,
}

#[async_trait]
pub trait SkillArchiveParser: Send + Sync {
    async fn parse(&self, bytes: &[u8], options: ParseOptions) -> Result<ParsedArchive>;
}

pub struct ZipSkillParser {
    max_bytes: u64,
}

impl ZipSkillParser {
    /// `max_bytes` bounds the total uncompressed size read from an archive.
    pub fn new(max_bytes: u64) -> Self {
        Self { max_bytes }
    }
}

#[async_trait]
impl SkillArchiveParser for ZipSkillParser {
    async fn parse(&self, bytes: &[u8], options: ParseOptions) -> Result<ParsedArchive> {
        let bytes = bytes.to_vec();
        let max_bytes = self.max_bytes;
        tokio::task::spawn_blocking(move || parse_zip(&bytes, &options, max_bytes)).await?
    }
}

fn parse_zip(bytes: &[u8], options: &ParseOptions, max_bytes: u64) -> Result<ParsedArchive> {
    let files = read_entries(bytes, max_bytes)?;
    let files = strip_wrapper_dir(files);
    let mut files = scope_to(files, options.base_path.as_deref())?;

    let skill_md = files
        .remove(SKILL_FILE)
        .ok_or_else(|| Error::invalid_input(format!("{SKILL_FILE} not found in archive")))?;
    let text = String::from_utf8(skill_md.clone())
        .map_err(|_| Error::invalid_input(format!("{SKILL_FILE} is not valid UTF-8")))?;
    let (manifest, content) = parse_skill_md(&text)?;

    let mut all = files.clone();
    all.insert(SKILL_FILE.to_string(), skill_md);
    let content_hash = hash_files(&all);
    let repacked = options.repack.then(|| repack(&all)).transpose()?;

    debug!(
        name = %manifest.name,
        resources = files.len(),
        %content_hash,
        "parsed skill archive"
    );
    Ok(ParsedArchive {
        manifest,
        content,
        resources: files,
        content_hash: Some(content_hash),
        repacked,
    })
}

/// Split `SKILL.md` into its manifest and body.
pub fn parse_skill_md(text: &str) -> Result<(SkillManifest, String)> {
    let (frontmatter, body) = split_frontmatter(text)?;
    let manifest: SkillManifest = serde_yaml::from_str(frontmatter)
        .map_err(|e| Error::invalid_input(format!("invalid {SKILL_FILE} frontmatter: {e}")))?;
    if manifest.name.trim().is_empty() {
        return Err(Error::invalid_input(format!(
            "{SKILL_FILE} frontmatter is missing 'name'"
        )));
    }
    if manifest.description.trim().is_empty() {
        return Err(Error::invalid_input(format!(
            "{SKILL_FILE} frontmatter is missing 'description'"
        )));
    }
    Ok((manifest, body.to_string()))
}

fn split_frontmatter(text: &str) -> Result<(&str, &str)> {
    let trimmed = text.trim_start_matches('\u{feff}').trim_start();
    let after_open = trimmed.strip_prefix("---").ok_or_else(|| {
        Error::invalid_input(format!("{SKILL_FILE} must start with --- frontmatter"))
    })?;
    let close = after_open.find("\n---").ok_or_else(|| {
        Error::invalid_input(format!("{SKILL_FILE} is missing the closing ---"))
    })?;
    let frontmatter = after_open[..close].trim();
    let body = after_open[close + 4..]
        .trim_start_matches('-')
        .trim();
    Ok((frontmatter, body))
}

fn read_entries(bytes: &[u8], max_bytes: u64) -> Result<ResourceBytes> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;
    let mut files = ResourceBytes::new();
    let mut total = 0u64;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        if entry.is_dir() {
            continue;
        }
        let Some(path) = entry.enclosed_name().and_then(|p| normalize(&p)) else {
            debug!(name = entry.name(), "skipping unsafe archive entry");
            continue;
        };
        if is_noise(&path) {
            continue;
        }

        total = total.saturating_add(entry.size());
        if total > max_bytes {
            return Err(Error::invalid_input(format!(
                "archive expands beyond {max_bytes} bytes"
            )));
        }
        let mut buf = Vec::with_capacity(entry.size() as usize);
        (&mut entry).take(max_bytes + 1).read_to_end(&mut buf)?;
        files.insert(path, buf);
    }
    Ok(files)
}

/// `/`-joined path built from normal components only.
fn normalize(path: &std::path::Path) -> Option<String> {
    let mut parts = Vec::new();
    for component in path.components() {
        match component {
            std::path::Component::Normal(s) => parts.push(s.to_str()?.to_string()),
            std::path::Component::CurDir => {},
            _ => return None,
        }
    }
    (!parts.is_empty()).then(|| parts.join("/"))
}

fn is_noise(path: &str) -> bool {
    path.split('/')
        .any(|seg| seg == "__MACOSX" || seg == ".DS_Store")
}

/// Drop a single directory that wraps everything, as in GitHub zipballs
/// (`owner-repo-sha/...`).
fn strip_wrapper_dir(files: ResourceBytes) -> ResourceBytes {
    if files.contains_key(SKILL_FILE) {
        return files;
    }
    let mut roots = files.keys().map(|k| k.split_once('/').map(|(root, _)| root));
    let Some(Some(first)) = roots.next() else {
        return files;
    };
    let first = first.to_string();
    if !roots.all(|r| r == Some(first.as_str())) {
        return files;
    }
    let prefix = format!("{first}/");
    files
        .into_iter()
        .filter_map(|(k, v)| k.strip_prefix(&prefix).map(|rest| (rest.to_string(), v)))
        .collect()
}

fn scope_to(files: ResourceBytes, base_path: Option<&str>) -> Result<ResourceBytes> {
    let Some(base) = base_path.map(|b| b.trim_matches('/')).filter(|b| !b.is_empty()) else {
        return Ok(files);
    };
    let prefix = format!("{base}/");
    let scoped: ResourceBytes = files
        .into_iter()
        .filter_map(|(k, v)| k.strip_prefix(&prefix).map(|rest| (rest.to_string(), v)))
        .collect();
    if scoped.is_empty() {
        return Err(Error::invalid_input(format!(
            "path '{base}' not found in archive"
        )));
    }
    Ok(scoped)
}

/// SHA-256 over every (path, bytes) pair in path order.
fn hash_files(files: &ResourceBytes) -> String {
    let mut hasher = Sha256::new();
    for (path, bytes) in files {
        hasher.update(path.as_bytes());
        hasher.update([0u8]);
        hasher.update((bytes.len() as u64).to_le_bytes());
        hasher.update(bytes);
    }
    format!("{:x}", hasher.finalize())
}

/// Deterministic ZIP of `files`: sorted entries, fixed timestamps.
fn repack(files: &ResourceBytes) -> Result<Vec<u8>> {
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(DateTime::default());
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for (path, bytes) in files {
        writer.start_file(path.as_str(), options)?;
        writer.write_all(bytes)?;
    }
    Ok(writer.finish()?.into_inner())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    const SKILL: &str = "---\nname: pdf-tools\ndescription: Work with PDFs\nlicense: MIT\nx-tier: 2\n---\n# PDF tools\n\nUse carefully.\n";

    fn zip_of(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, bytes) in entries {
            if name.ends_with('/') {
                writer
                    .add_directory(*name, SimpleFileOptions::default())
                    .unwrap();
            } else {
                writer.start_file(*name, SimpleFileOptions::default()).unwrap();
                writer.write_all(bytes).unwrap();
            }
        }
        writer.finish().unwrap().into_inner()
    }

    async fn parse(bytes: &[u8], options: ParseOptions) -> Result<ParsedArchive> {
        ZipSkillParser::new(1024 * 1024).parse(bytes, options).await
    }

    #[tokio::test]
    async fn parses_flat_archive() {
        let bytes = zip_of(&[
            ("SKILL.md", SKILL.as_bytes()),
            ("docs/guide.md", b"# Guide"),
            ("__MACOSX/._SKILL.md", b"junk"),
            ("docs/.DS_Store", b"junk"),
        ]);
        let parsed = parse(&bytes, ParseOptions::default()).await.unwrap();

        assert_eq!(parsed.manifest.name, "pdf-tools");
        assert_eq!(parsed.manifest.license.as_deref(), Some("MIT"));
        assert_eq!(parsed.manifest.extra["x-tier"], serde_json::json!(2));
        assert_eq!(parsed.content, "# PDF tools\n\nUse carefully.");
        assert_eq!(parsed.resources.keys().collect::<Vec<_>>(), ["docs/guide.md"]);
        assert_eq!(parsed.content_hash.as_ref().unwrap().len(), 64);
        assert!(parsed.repacked.is_none());
    }

    #[tokio::test]
    async fn strips_wrapper_and_scopes_to_base_path() {
        let bytes = zip_of(&[
            ("o-r-abc123/", b""),
            ("o-r-abc123/README.md", b"repo readme"),
            ("o-r-abc123/a/b/SKILL.md", SKILL.as_bytes()),
            ("o-r-abc123/a/b/scripts/run.py", b"print(1)"),
            ("o-r-abc123/a/other.md", b"outside"),
        ]);
        let parsed = parse(&bytes, ParseOptions {
            base_path: Some("a/b".into()),
            repack: true,
        })
        .await
        .unwrap();

        assert_eq!(parsed.resources.keys().collect::<Vec<_>>(), ["scripts/run.py"]);

        let repacked = parsed.repacked.unwrap();
        let archive = ZipArchive::new(Cursor::new(repacked.as_slice())).unwrap();
        let mut names: Vec<_> = archive.file_names().collect();
        names.sort_unstable();
        assert_eq!(names, ["SKILL.md", "scripts/run.py"]);
    }

    #[tokio::test]
    async fn content_hash_ignores_wrapper_and_entry_order() {
        let a = zip_of(&[("SKILL.md", SKILL.as_bytes()), ("x.txt", b"x")]);
        let b = zip_of(&[("repo-sha/x.txt", b"x"), ("repo-sha/SKILL.md", SKILL.as_bytes())]);
        let c = zip_of(&[("SKILL.md", SKILL.as_bytes()), ("x.txt", b"changed")]);

        let ha = parse(&a, ParseOptions::default()).await.unwrap().content_hash;
        let hb = parse(&b, ParseOptions::default()).await.unwrap().content_hash;
        let hc = parse(&c, ParseOptions::default()).await.unwrap().content_hash;
        assert_eq!(ha, hb);
        assert_ne!(ha, hc);
    }

    #[tokio::test]
    async fn repack_is_deterministic() {
        let bytes = zip_of(&[("SKILL.md", SKILL.as_bytes()), ("a.txt", b"a")]);
        let opts = ParseOptions {
            base_path: None,
            repack: true,
        };
        let first = parse(&bytes, opts.clone()).await.unwrap().repacked;
        let second = parse(&bytes, opts).await.unwrap().repacked;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn missing_skill_md_is_rejected() {
        let bytes = zip_of(&[("README.md", b"hi")]);
        let err = parse(&bytes, ParseOptions::default()).await.unwrap_err();
        assert!(err.to_string().contains("SKILL.md not found"));
    }

    #[tokio::test]
    async fn unknown_base_path_is_rejected() {
        let bytes = zip_of(&[("SKILL.md", SKILL.as_bytes())]);
        let err = parse(&bytes, ParseOptions {
            base_path: Some("nope".into()),
            repack: false,
        })
        .await
        .unwrap_err();
        assert!(matches!(err, Error::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn garbage_bytes_fail_as_zip_error() {
        let err = parse(b"not a zip", ParseOptions::default()).await.unwrap_err();
        assert!(matches!(err, Error::Zip(_)));
    }

    #[tokio::test]
    async fn oversized_archive_is_rejected() {
        let big = vec![b'a'; 4096];
        let bytes = zip_of(&[("SKILL.md", SKILL.as_bytes()), ("big.bin", &big)]);
        let err = ZipSkillParser::new(1024)
            .parse(&bytes, ParseOptions::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("expands beyond"));
    }

    #[test]
    fn frontmatter_requires_name_and_description() {
        assert!(parse_skill_md("---\nname: a\n---\nbody").is_err());
        assert!(parse_skill_md("---\ndescription: d\n---\nbody").is_err());
        assert!(parse_skill_md("no frontmatter").is_err());
        let (manifest, body) = parse_skill_md("---\nname: a\ndescription: d\n---\nbody").unwrap();
        assert_eq!(manifest, SkillManifest::new("a", "d"));
        assert_eq!(body, "body");
    }

    #[test]
    fn normalize_rejects_escaping_paths() {
        use std::path::Path;
        assert_eq!(normalize(Path::new("a/./b.md")).as_deref(), Some("a/b.md"));
        assert_eq!(normalize(Path::new("../b.md")), None);
        assert_eq!(normalize(Path::new("/b.md")), None);
    }
}
