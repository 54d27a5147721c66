//! Rewrites an absolute path prefix inside dataset descriptor files, e.g. to
//! move a dataset generated on a workstation into a container.

use std::fs;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::dataset::atomic::write_atomic;
use crate::dataset::manifest::CLASSES_FILE;
use crate::error::{DatasetError, DatasetResult};

pub const DEFAULT_SKIP_DIRS: [&str; 4] = ["rico", "test", "train", "val"];
pub const DEFAULT_EXTENSIONS: [&str; 1] = ["data"];

/// An old prefix and its replacement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefixPair {
    old: String,
    new: String,
}

impl PrefixPair {
    pub fn new<O: Into<String>, N: Into<String>>(old: O, new: N) -> DatasetResult<PrefixPair> {
        let old = old.into();
        if old.trim().is_empty() {
            return Err(DatasetError::InvalidConfig(
                "the prefix to replace can not be empty".to_string(),
            ));
        }
        Ok(PrefixPair {
            old,
            new: new.into(),
        })
    }

    /// Component-wise: `/data/out` rewrites `/data/out/a.jpg` but not
    /// `/data/output/a.jpg`. Paths outside the old prefix come back unchanged.
    pub fn apply_to_path(&self, path: &Path) -> PathBuf {
        match path.strip_prefix(&self.old) {
            Ok(rest) if rest.as_os_str().is_empty() => PathBuf::from(&self.new),
            Ok(rest) => Path::new(&self.new).join(rest),
            Err(_) => path.to_path_buf(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubstitutionMode {
    /// Only where the prefix starts a token and ends at a token or path
    /// boundary.
    Token,
    /// Every substring occurrence.
    Literal,
}

impl Default for SubstitutionMode {
    fn default() -> Self {
        SubstitutionMode::Token
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewrittenFile {
    pub path: PathBuf,
    pub replacements: usize,
}

#[derive(Debug, Clone)]
pub struct PathRewriter {
    pair: PrefixPair,
    mode: SubstitutionMode,
    skip_dirs: Vec<String>,
    skip_files: Vec<String>,
    extensions: Vec<String>,
}

impl PathRewriter {
    pub fn new(pair: PrefixPair) -> PathRewriter {
        PathRewriter {
            pair,
            mode: SubstitutionMode::default(),
            skip_dirs: DEFAULT_SKIP_DIRS.iter().map(|s| s.to_string()).collect(),
            skip_files: vec![CLASSES_FILE.to_string()],
            extensions: DEFAULT_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn mode(mut self, mode: SubstitutionMode) -> PathRewriter {
        self.mode = mode;
        self
    }

    pub fn skip_dirs(mut self, dirs: Vec<String>) -> PathRewriter {
        self.skip_dirs = dirs;
        self
    }

    pub fn skip_files(mut self, files: Vec<String>) -> PathRewriter {
        self.skip_files = files;
        self
    }

    /// Extensions without the dot.
    pub fn extensions(mut self, extensions: Vec<String>) -> PathRewriter {
        self.extensions = extensions
            .into_iter()
            .map(|e| e.trim_start_matches('.').to_string())
            .collect();
        self
    }

    /// Candidate files under `root`, sorted. `root` itself is never skipped.
    pub fn find_files(&self, root: &Path) -> DatasetResult<Vec<PathBuf>> {
        if !root.is_dir() {
            return Err(DatasetError::InvalidConfig(format!(
                "{} is not a directory",
                root.display()
            )));
        }
        let walker = WalkDir::new(root).into_iter().filter_entry(|entry| {
            entry.depth() == 0
                || !entry.file_type().is_dir()
                || !self.is_listed(&self.skip_dirs, entry.file_name())
        });
        let mut files = vec![];
        for entry in walker {
            let entry = entry.map_err(|source| DatasetError::Walk {
                path: root.to_path_buf(),
                source,
            })?;
            if !entry.file_type().is_file() || self.is_listed(&self.skip_files, entry.file_name()) {
                continue;
            }
            let wanted = entry
                .path()
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| self.extensions.iter().any(|e| e == ext))
                .unwrap_or(false);
            if wanted {
                debug!("found {}", entry.path().display());
                files.push(entry.into_path());
            }
        }
        files.sort();
        Ok(files)
    }

    /// Rewrite every candidate file under `root` in place. Only files that
    /// changed are written and returned.
    pub fn rewrite_tree(&self, root: &Path) -> DatasetResult<Vec<RewrittenFile>> {
        let files = self.find_files(root)?;
        let rewritten = files
            .par_iter()
            .map(|path| self.rewrite_file(path))
            .collect::<DatasetResult<Vec<Option<RewrittenFile>>>>()?;
        let rewritten: Vec<RewrittenFile> = rewritten.into_iter().flatten().collect();
        info!(
            "replaced {:?} with {:?} in {} of {} files under {}",
            self.pair.old,
            self.pair.new,
            rewritten.len(),
            files.len(),
            root.display()
        );
        Ok(rewritten)
    }

    pub fn rewrite_file(&self, path: &Path) -> DatasetResult<Option<RewrittenFile>> {
        let text = fs::read_to_string(path).map_err(DatasetError::io_at(path))?;
        let (rewritten, replacements) = self.substitute(&text);
        if replacements == 0 {
            return Ok(None);
        }
        write_atomic(path, rewritten.as_bytes())?;
        debug!("{} replacements in {}", replacements, path.display());
        Ok(Some(RewrittenFile {
            path: path.to_path_buf(),
            replacements,
        }))
    }

    /// Line by line substitution, returns the new text and the number of
    /// replacements. Line endings are kept as they are.
    pub fn substitute(&self, text: &str) -> (String, usize) {
        let mut out = String::with_capacity(text.len());
        let mut count = 0;
        for line in text.split_inclusive('\n') {
            let (line, n) = match self.mode {
                SubstitutionMode::Literal => literal_replace(line, &self.pair),
                SubstitutionMode::Token => token_replace(line, &self.pair),
            };
            out.push_str(&line);
            count += n;
        }
        (out, count)
    }

    fn is_listed(&self, list: &[String], name: &std::ffi::OsStr) -> bool {
        name.to_str()
            .map(|name| list.iter().any(|l| l == name))
            .unwrap_or(false)
    }
}

fn literal_replace(line: &str, pair: &PrefixPair) -> (String, usize) {
    let n = line.matches(pair.old.as_str()).count();
    if n == 0 {
        (line.to_string(), 0)
    } else {
        (line.replace(pair.old.as_str(), &pair.new), n)
    }
}

fn starts_token(c: char) -> bool {
    c.is_whitespace() || matches!(c, '=' | ':' | ',' | '"' | '\'' | '[' | '(' | '{')
}

fn ends_token(c: char) -> bool {
    c.is_whitespace() || matches!(c, '/' | ',' | '"' | '\'' | ']' | ')' | '}')
}

fn token_replace(line: &str, pair: &PrefixPair) -> (String, usize) {
    let old = pair.old.as_str();
    let mut out = String::with_capacity(line.len());
    let mut copied = 0;
    let mut n = 0;
    for (start, _) in line.match_indices(old) {
        let end = start + old.len();
        let before_ok = line[..start].chars().next_back().map_or(true, starts_token);
        let after_ok =
            old.ends_with('/') || line[end..].chars().next().map_or(true, ends_token);
        if before_ok && after_ok {
            out.push_str(&line[copied..start]);
            out.push_str(&pair.new);
            copied = end;
            n += 1;
        }
    }
    out.push_str(&line[copied..]);
    (out, n)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rewriter(old: &str, new: &str) -> PathRewriter {
        PathRewriter::new(PrefixPair::new(old, new).unwrap())
    }

    #[test]
    fn token_mode_respects_path_boundaries() {
        let text = "train=/data/out/train.txt\nnames=/data/output/classes.names\npath: /data/out\n";
        let (token, n) = rewriter("/data/out", "/container/data").substitute(text);
        assert_eq!(n, 2);
        assert_eq!(
            token,
            "train=/container/data/train.txt\nnames=/data/output/classes.names\npath: /container/data\n"
        );

        let (literal, n) = rewriter("/data/out", "/container/data")
            .mode(SubstitutionMode::Literal)
            .substitute(text);
        assert_eq!(n, 3);
        assert!(literal.contains("names=/container/dataput/classes.names"));
    }

    #[test]
    fn token_mode_needs_a_token_start() {
        let (text, n) = rewriter("/data", "/x").substitute("a/data/b \"/data/c\" '/data'\n");
        assert_eq!(n, 2);
        assert_eq!(text, "a/data/b \"/x/c\" '/x'\n");
    }

    #[test]
    fn token_mode_inside_flow_lists() {
        let (text, n) = rewriter("/data/out", "/x")
            .substitute("train: [/data/out/a, /data/out]
val: (/data/out)
keep: [/data/output]
");
        assert_eq!(n, 3);
        assert_eq!(text, "train: [/x/a, /x]
val: (/x)
keep: [/data/output]
");
    }

    #[test]
    fn empty_prefix_is_rejected() {
        assert!(matches!(
            PrefixPair::new("", "/x"),
            Err(DatasetError::InvalidConfig(_))
        ));
    }

    #[test]
    fn path_aware_prefix() {
        let pair = PrefixPair::new("/data/out", "/container/data").unwrap();
        assert_eq!(
            pair.apply_to_path(Path::new("/data/out/custom/train/images/a.jpg")),
            PathBuf::from("/container/data/custom/train/images/a.jpg")
        );
        assert_eq!(
            pair.apply_to_path(Path::new("/data/output/a.jpg")),
            PathBuf::from("/data/output/a.jpg")
        );
        assert_eq!(
            pair.apply_to_path(Path::new("/data/out")),
            PathBuf::from("/container/data")
        );
    }

    #[test]
    fn rewrites_tree_and_leaves_skipped_dirs_alone() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let old = root.to_string_lossy().into_owned();
        let contents = format!("train={0}/custom/train.txt\nvalid={0}/custom/val.txt\n", old);

        fs::create_dir_all(root.join("custom")).unwrap();
        fs::write(root.join("custom/custom.data"), &contents).unwrap();
        fs::write(root.join("top.data"), &contents).unwrap();
        for skipped in DEFAULT_SKIP_DIRS.iter() {
            fs::create_dir_all(root.join("custom").join(skipped)).unwrap();
            fs::write(root.join("custom").join(skipped).join("x.data"), &contents).unwrap();
        }
        fs::write(root.join("custom").join(CLASSES_FILE), &contents).unwrap();
        fs::write(root.join("custom/custom.yaml"), &contents).unwrap();

        let rewritten = rewriter(&old, "/container/data").rewrite_tree(root).unwrap();
        let mut paths: Vec<PathBuf> = rewritten.iter().map(|r| r.path.clone()).collect();
        paths.sort();
        assert_eq!(
            paths,
            vec![root.join("custom/custom.data"), root.join("top.data")]
        );
        assert!(rewritten.iter().all(|r| r.replacements == 2));

        let expected = "train=/container/data/custom/train.txt\nvalid=/container/data/custom/val.txt\n";
        assert_eq!(
            fs::read_to_string(root.join("custom/custom.data")).unwrap(),
            expected
        );
        for skipped in DEFAULT_SKIP_DIRS.iter() {
            let untouched = root.join("custom").join(skipped).join("x.data");
            assert_eq!(fs::read_to_string(untouched).unwrap(), contents);
        }
        assert_eq!(
            fs::read_to_string(root.join("custom").join(CLASSES_FILE)).unwrap(),
            contents
        );
        assert_eq!(
            fs::read_to_string(root.join("custom/custom.yaml")).unwrap(),
            contents
        );
    }

    #[test]
    fn extra_extensions_are_picked_up() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.yaml"), "path: /data/out\n").unwrap();
        let files = rewriter("/data/out", "/x")
            .extensions(vec![".yaml".to_string()])
            .find_files(dir.path())
            .unwrap();
        assert_eq!(files, vec![dir.path().join("a.yaml")]);
    }

    #[test]
    fn root_must_be_a_directory() {
        assert!(rewriter("/a", "/b")
            .find_files(Path::new("/definitely/not/here"))
            .is_err());
    }
}
