// Recursive remote enumeration with cycle guard, depth cap, symlink policy
// and per-segment path sanitization. Per-directory failures never abort the
// walk; they are tallied and the walk continues with siblings.
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::client::SharedClient;
use crate::remote::normalize_remote_path;
use crate::types::EnumeratedFile;
use crate::util::lock_unpoisoned;

#[derive(Clone)]
pub struct EnumOptions {
    /// Never descend into or emit symlinks. Default true.
    pub skip_symlinks: bool,
    /// Depth cap override; `None` resolves `Advanced/maxFolderDepth` from
    /// the settings provider (default 32).
    pub max_depth: Option<usize>,
    /// Cooperative cancel flag, checked before every child and descent.
    pub cancel: Option<Arc<AtomicBool>>,
}

impl Default for EnumOptions {
    fn default() -> Self {
        Self { skip_symlinks: true, max_depth: None, cancel: None }
    }
}

/// Walk outcome counters. `partial_error` flags that some subtrees were
/// unreadable while the rest of the walk completed.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EnumStats {
    pub dirs_visited: u64,
    pub symlinks_skipped: u64,
    pub denied_dirs: u64,
    pub unknown_size_files: u64,
    pub partial_error: bool,
}

/// Sanitize one relative path: drop control characters, fold `\` to `/`,
/// drop `:` on Windows, skip `.` segments. Returns `None` for `..`
/// segments or when nothing survives.
pub(crate) fn sanitize_relative(rel: &str) -> Option<String> {
    let mut cleaned = String::with_capacity(rel.len());
    for ch in rel.chars() {
        if (ch as u32) < 0x20 {
            continue;
        }
        #[cfg(windows)]
        if ch == ':' {
            continue;
        }
        cleaned.push(if ch == '\\' { '/' } else { ch });
    }
    let mut safe: Vec<&str> = Vec::new();
    for part in cleaned.split('/').filter(|s| !s.is_empty()) {
        if part == "." {
            continue;
        }
        if part == ".." {
            return None;
        }
        safe.push(part);
    }
    if safe.is_empty() { None } else { Some(safe.join("/")) }
}

fn join_remote(base: &str, name: &str) -> String {
    if base == "/" {
        format!("/{}", name)
    } else {
        format!("{}/{}", base.trim_end_matches('/'), name)
    }
}

struct WalkCtx<'a> {
    client: &'a SharedClient,
    show_hidden: bool,
    skip_symlinks: bool,
    max_depth: usize,
    cancel: Option<&'a AtomicBool>,
    visited: HashSet<String>,
    out: Vec<EnumeratedFile>,
    stats: EnumStats,
}

impl WalkCtx<'_> {
    fn canceled(&self) -> bool {
        self.cancel.map(|c| c.load(Ordering::Relaxed)).unwrap_or(false)
    }
}

pub(crate) fn walk_remote_tree(
    client: &SharedClient,
    base_remote: &str,
    show_hidden: bool,
    max_depth: usize,
    opts: &EnumOptions,
) -> (Vec<EnumeratedFile>, EnumStats) {
    let mut ctx = WalkCtx {
        client,
        show_hidden,
        skip_symlinks: opts.skip_symlinks,
        max_depth,
        cancel: opts.cancel.as_deref(),
        visited: HashSet::new(),
        out: Vec::new(),
        stats: EnumStats::default(),
    };
    let base = normalize_remote_path(base_remote);
    walk(&mut ctx, &base, "", 0);
    (ctx.out, ctx.stats)
}

fn walk(ctx: &mut WalkCtx<'_>, cur: &str, rel: &str, depth: usize) {
    if ctx.canceled() {
        return;
    }
    if depth > ctx.max_depth {
        tracing::warn!("max folder depth reached at {}", cur);
        return;
    }
    let norm_cur = normalize_remote_path(cur);
    // Cycle guard keyed on the normalized absolute path; remote inode
    // identity is not available.
    if !ctx.visited.insert(norm_cur.clone()) {
        return;
    }
    ctx.stats.dirs_visited += 1;

    let children = {
        let mut guard = lock_unpoisoned(ctx.client);
        guard.list(&norm_cur)
    };
    let children = match children {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!("enumeration error at {}: {}", norm_cur, e);
            ctx.stats.partial_error = true;
            ctx.stats.denied_dirs += 1;
            return;
        }
    };

    for entry in children {
        if ctx.canceled() {
            return;
        }
        if !ctx.show_hidden && entry.name.starts_with('.') {
            continue;
        }
        if entry.is_symlink() && ctx.skip_symlinks {
            ctx.stats.symlinks_skipped += 1;
            continue;
        }
        let child_remote = join_remote(&norm_cur, &entry.name);
        let raw_rel =
            if rel.is_empty() { entry.name.clone() } else { format!("{}/{}", rel, entry.name) };
        let Some(child_rel) = sanitize_relative(&raw_rel) else {
            continue;
        };
        if entry.is_dir {
            walk(ctx, &child_remote, &child_rel, depth + 1);
            if ctx.canceled() {
                return;
            }
        } else {
            if !entry.has_size {
                ctx.stats.unknown_size_files += 1;
            }
            ctx.out.push(EnumeratedFile {
                remote_path: child_remote,
                rel_path: child_rel,
                size: entry.size,
                has_size: entry.has_size,
            });
        }
    }
}

/// One local file selected for upload expansion.
#[derive(Debug, Clone)]
pub struct LocalFile {
    pub abs_path: std::path::PathBuf,
    pub rel_path: String,
    pub size: u64,
}

/// Expand a local directory into files for bulk upload. Relative paths use
/// forward slashes so they can be appended to a remote base directly.
pub fn enumerate_local_files(base: &Path) -> Result<Vec<LocalFile>> {
    let mut out = Vec::new();
    for entry in walkdir::WalkDir::new(base).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let md = std::fs::metadata(path)
            .with_context(|| format!("local stat failed: {}", path.display()))?;
        let rel = path
            .strip_prefix(base)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/");
        if rel.is_empty() {
            continue;
        }
        out.push(LocalFile { abs_path: path.to_path_buf(), rel_path: rel, size: md.len() });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{CancelFn, ProgressFn, SftpClient};
    use crate::error::ClientError;
    use crate::types::{FileInfo, S_IFLNK, SessionOptions};
    use std::collections::HashMap;
    use std::sync::Mutex;

    // Scripted listing client: path -> entries, with optional per-path
    // failures, enough to drive the walk without a server.
    struct ScriptedClient {
        fs: HashMap<String, Vec<FileInfo>>,
        deny: HashSet<String>,
        list_calls: Arc<Mutex<Vec<String>>>,
    }

    impl ScriptedClient {
        fn new() -> Self {
            Self {
                fs: HashMap::new(),
                deny: HashSet::new(),
                list_calls: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn dir(mut self, path: &str, entries: Vec<FileInfo>) -> Self {
            self.fs.insert(path.to_string(), entries);
            self
        }

        fn deny_path(mut self, path: &str) -> Self {
            self.deny.insert(path.to_string());
            self
        }

        fn shared(self) -> SharedClient {
            Arc::new(Mutex::new(self))
        }
    }

    fn d(name: &str) -> FileInfo {
        FileInfo { name: name.into(), is_dir: true, mode: 0o040755, ..FileInfo::default() }
    }

    fn f(name: &str, size: u64) -> FileInfo {
        FileInfo {
            name: name.into(),
            size,
            has_size: true,
            mode: 0o100644,
            ..FileInfo::default()
        }
    }

    fn link(name: &str) -> FileInfo {
        FileInfo { name: name.into(), is_dir: true, mode: S_IFLNK | 0o777, ..FileInfo::default() }
    }

    impl SftpClient for ScriptedClient {
        fn connect(&mut self, opts: &SessionOptions) -> Result<(), ClientError> {
            opts.validate()
        }
        fn disconnect(&mut self) {}
        fn is_connected(&self) -> bool {
            true
        }
        fn list(&mut self, remote_path: &str) -> Result<Vec<FileInfo>, ClientError> {
            self.list_calls.lock().unwrap().push(remote_path.to_string());
            if self.deny.contains(remote_path) {
                return Err(ClientError::PermissionDenied(remote_path.to_string()));
            }
            self.fs
                .get(remote_path)
                .cloned()
                .ok_or_else(|| ClientError::NotFound(remote_path.to_string()))
        }
        fn get(
            &mut self,
            _r: &str,
            _l: &Path,
            _p: Option<&mut ProgressFn>,
            _c: Option<&CancelFn>,
            _resume: bool,
        ) -> Result<(), ClientError> {
            Err(ClientError::Unsupported("get"))
        }
        fn put(
            &mut self,
            _l: &Path,
            _r: &str,
            _p: Option<&mut ProgressFn>,
            _c: Option<&CancelFn>,
            _resume: bool,
        ) -> Result<(), ClientError> {
            Err(ClientError::Unsupported("put"))
        }
        fn exists(&mut self, _p: &str) -> Result<(bool, bool), ClientError> {
            Err(ClientError::Unsupported("exists"))
        }
        fn stat(&mut self, _p: &str) -> Result<FileInfo, ClientError> {
            Err(ClientError::Unsupported("stat"))
        }
        fn chmod(&mut self, _p: &str, _m: u32) -> Result<(), ClientError> {
            Err(ClientError::Unsupported("chmod"))
        }
        fn chown(&mut self, _p: &str, _u: u32, _g: u32) -> Result<(), ClientError> {
            Err(ClientError::Unsupported("chown"))
        }
        fn set_times(&mut self, _p: &str, _a: u64, _m: u64) -> Result<(), ClientError> {
            Ok(())
        }
        fn mkdir(&mut self, _p: &str, _m: u32) -> Result<(), ClientError> {
            Err(ClientError::Unsupported("mkdir"))
        }
        fn remove_file(&mut self, _p: &str) -> Result<(), ClientError> {
            Err(ClientError::Unsupported("remove_file"))
        }
        fn remove_dir(&mut self, _p: &str) -> Result<(), ClientError> {
            Err(ClientError::Unsupported("remove_dir"))
        }
        fn rename(&mut self, _f: &str, _t: &str, _o: bool) -> Result<(), ClientError> {
            Err(ClientError::Unsupported("rename"))
        }
        fn new_connection_like(
            &self,
            _opts: &SessionOptions,
        ) -> Result<Box<dyn SftpClient + Send>, ClientError> {
            Err(ClientError::Unsupported("new_connection_like"))
        }
    }

    fn walk_all(client: &SharedClient, base: &str) -> (Vec<EnumeratedFile>, EnumStats) {
        walk_remote_tree(client, base, false, 32, &EnumOptions::default())
    }

    #[test]
    fn flat_tree_collects_files_with_rel_paths() {
        let client = ScriptedClient::new()
            .dir("/a", vec![d("sub"), f("top.txt", 10)])
            .dir("/a/sub", vec![f("inner.txt", 20)])
            .shared();
        let (files, stats) = walk_all(&client, "/a");
        let rels: Vec<&str> = files.iter().map(|e| e.rel_path.as_str()).collect();
        assert!(rels.contains(&"top.txt"));
        assert!(rels.contains(&"sub/inner.txt"));
        assert_eq!(stats.dirs_visited, 2);
        assert!(!stats.partial_error);
    }

    #[test]
    fn visited_set_skips_repeated_paths() {
        // A listing naming the same child twice must descend only once.
        let calls;
        let client = {
            let c = ScriptedClient::new()
                .dir("/a", vec![d("b"), d("b"), f("one.txt", 1)])
                .dir("/a/b", vec![f("two.txt", 2)]);
            calls = Arc::clone(&c.list_calls);
            c.shared()
        };
        let (files, stats) = walk_all(&client, "/a");
        assert_eq!(files.iter().filter(|e| e.rel_path == "b/two.txt").count(), 1);
        assert_eq!(stats.dirs_visited, 2);
        assert_eq!(calls.lock().unwrap().iter().filter(|p| *p == "/a/b").count(), 1);
        assert!(!stats.partial_error);
    }

    #[test]
    fn self_listing_dir_terminates_without_error() {
        // /a/b keeps listing a child named "b": a symlink cycle as seen
        // over SFTP. The walk must terminate and report no partial error.
        let mut client = ScriptedClient::new().dir("/a", vec![d("b")]);
        let mut cur = "/a/b".to_string();
        for _ in 0..12 {
            client = client.dir(&cur, vec![d("b"), f("leaf.txt", 5)]);
            cur.push_str("/b");
        }
        let shared = client.shared();
        let (files, stats) = walk_remote_tree(&shared, "/a", false, 6, &EnumOptions::default());
        assert!(!stats.partial_error);
        // bounded by the cap: /a plus at most max_depth nested "b" levels
        assert!(stats.dirs_visited >= 2 && stats.dirs_visited <= 7);
        assert!(files.iter().any(|e| e.rel_path == "b/leaf.txt"));
    }

    #[test]
    fn depth_cap_stops_descent() {
        let client = ScriptedClient::new()
            .dir("/r", vec![d("l1")])
            .dir("/r/l1", vec![d("l2")])
            .dir("/r/l1/l2", vec![f("deep.txt", 1)])
            .shared();
        let (files, stats) = walk_remote_tree(&client, "/r", false, 1, &EnumOptions::default());
        assert!(files.is_empty());
        assert_eq!(stats.dirs_visited, 2);
    }

    #[test]
    fn denied_subtree_sets_partial_error_and_continues() {
        let client = ScriptedClient::new()
            .dir("/a", vec![d("secret"), d("open")])
            .deny_path("/a/secret")
            .dir("/a/open", vec![f("ok.txt", 7)])
            .shared();
        let (files, stats) = walk_all(&client, "/a");
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].rel_path, "open/ok.txt");
        assert!(stats.partial_error);
        assert_eq!(stats.denied_dirs, 1);
    }

    #[test]
    fn symlinks_skipped_by_default_but_walkable_on_request() {
        let client = ScriptedClient::new()
            .dir("/a", vec![link("loop"), f("plain.txt", 3)])
            .dir("/a/loop", vec![f("inside.txt", 4)])
            .shared();
        let (files, stats) = walk_all(&client, "/a");
        assert_eq!(files.len(), 1);
        assert_eq!(stats.symlinks_skipped, 1);

        let opts = EnumOptions { skip_symlinks: false, ..EnumOptions::default() };
        let (files, stats) = walk_remote_tree(&client, "/a", false, 32, &opts);
        assert_eq!(stats.symlinks_skipped, 0);
        // the symlinked dir is_dir so it is descended into
        assert!(files.iter().any(|e| e.rel_path == "loop/inside.txt"));
        assert!(files.iter().any(|e| e.rel_path == "plain.txt"));
    }

    #[test]
    fn hidden_entries_follow_listing_filter() {
        let client = ScriptedClient::new()
            .dir("/a", vec![d(".git"), f(".hidden", 1), f("shown.txt", 2)])
            .dir("/a/.git", vec![f("config", 3)])
            .shared();
        let (files, _) = walk_all(&client, "/a");
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].rel_path, "shown.txt");

        let (files, _) = walk_remote_tree(&client, "/a", true, 32, &EnumOptions::default());
        assert_eq!(files.len(), 3);
    }

    #[test]
    fn unknown_sizes_are_counted() {
        let mut unknown = f("blob", 0);
        unknown.has_size = false;
        let client = ScriptedClient::new().dir("/a", vec![unknown, f("known", 9)]).shared();
        let (files, stats) = walk_all(&client, "/a");
        assert_eq!(files.len(), 2);
        assert_eq!(stats.unknown_size_files, 1);
    }

    #[test]
    fn cancel_stops_promptly_without_error() {
        let flag = Arc::new(AtomicBool::new(true));
        let client = ScriptedClient::new()
            .dir("/a", vec![d("x"), f("y.txt", 1)])
            .dir("/a/x", vec![f("z.txt", 1)])
            .shared();
        let opts = EnumOptions { cancel: Some(flag), ..EnumOptions::default() };
        let (files, stats) = walk_remote_tree(&client, "/a", false, 32, &opts);
        assert!(files.is_empty());
        assert!(!stats.partial_error);
    }

    #[test]
    fn sanitize_rejects_dotdot_and_strips_noise() {
        assert_eq!(sanitize_relative("a/b.txt"), Some("a/b.txt".to_string()));
        assert_eq!(sanitize_relative("a\\b\\c.txt"), Some("a/b/c.txt".to_string()));
        assert_eq!(sanitize_relative("./a/./b"), Some("a/b".to_string()));
        assert_eq!(sanitize_relative("a/../b"), None);
        assert_eq!(sanitize_relative(".."), None);
        assert_eq!(sanitize_relative("a/\u{0007}bell.txt"), Some("a/bell.txt".to_string()));
        assert_eq!(sanitize_relative("\u{0001}\u{0002}"), None);
        assert_eq!(sanitize_relative(""), None);
        assert_eq!(sanitize_relative("///"), None);
    }

    #[test]
    fn malicious_names_never_leak_into_rel_paths() {
        let client = ScriptedClient::new()
            .dir("/a", vec![f("..", 1), f("ok\\sub.txt", 2), f("ctl\u{0003}.txt", 3)])
            .shared();
        let (files, _) = walk_all(&client, "/a");
        for e in &files {
            assert!(!e.rel_path.contains(".."));
            assert!(!e.rel_path.contains('\\'));
            assert!(e.rel_path.chars().all(|c| (c as u32) >= 0x20));
            assert!(!e.rel_path.starts_with('/'));
        }
    }

    #[test]
    fn local_enumeration_collects_files_recursively() {
        let mut base = std::env::temp_dir();
        base.push(format!(
            "portside_enum_test_{}_{}",
            std::process::id(),
            chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0)
        ));
        std::fs::create_dir_all(base.join("nested")).expect("create tmp tree");
        std::fs::write(base.join("top.txt"), b"top").unwrap();
        std::fs::write(base.join("nested/deep.txt"), b"deep").unwrap();

        let files = enumerate_local_files(&base).expect("enumerate");
        let mut rels: Vec<String> = files.iter().map(|l| l.rel_path.clone()).collect();
        rels.sort();
        assert_eq!(rels, vec!["nested/deep.txt".to_string(), "top.txt".to_string()]);
        assert!(files.iter().all(|l| l.size > 0));

        let _ = std::fs::remove_dir_all(&base);
    }
}
