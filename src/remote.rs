// Remote directory model: owns the current listing, runs foreground or
// isolated-session background listings, and exposes the recursive
// enumeration used for drag-out operations.
pub mod enumeration;

use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, unbounded};
use serde::Serialize;

use crate::client::SharedClient;
use crate::error::{ClientError, EngineError};
use crate::settings::{SettingsProvider, resolve_max_folder_depth};
use crate::types::{EnumeratedFile, FileInfo, SessionOptions};
use crate::util::lock_unpoisoned;

use self::enumeration::{EnumOptions, EnumStats, walk_remote_tree};

/// Secondary sort key; directories always precede files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum SortKey {
    #[default]
    Name,
    Size,
    Mtime,
    Mode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

/// One visible row: a [`FileInfo`] that survived the hidden filter.
#[derive(Debug, Clone, Serialize)]
pub struct RemoteItem {
    pub info: FileInfo,
}

/// Completion event for asynchronous listings, delivered by [`RemoteModel::pump`].
#[derive(Debug, Clone)]
pub struct RootPathLoaded {
    pub path: String,
    pub ok: bool,
    pub error: String,
}

struct ListingOutcome {
    req_id: u64,
    path: String,
    show_hidden: bool,
    sort_key: SortKey,
    sort_order: SortOrder,
    result: Result<Vec<FileInfo>, ClientError>,
}

/// Normalize a remote path: trim whitespace, empty becomes `/`, ensure a
/// leading `/`, strip the trailing `/` except for the root itself.
/// Idempotent.
pub fn normalize_remote_path(path: &str) -> String {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return "/".to_string();
    }
    let mut out = String::with_capacity(trimmed.len() + 1);
    if !trimmed.starts_with('/') {
        out.push('/');
    }
    out.push_str(trimmed);
    while out.len() > 1 && out.ends_with('/') {
        out.pop();
    }
    out
}

pub struct RemoteModel {
    client: Option<SharedClient>,
    session_opts: Option<SessionOptions>,
    settings: Option<Arc<dyn SettingsProvider>>,
    items: Vec<RemoteItem>,
    current_path: String,
    show_hidden: bool,
    sort_key: SortKey,
    sort_order: SortOrder,
    // Monotonic listing generation; async results from an older generation
    // are discarded on arrival.
    list_seq: u64,
    listings_tx: Sender<ListingOutcome>,
    listings_rx: Receiver<ListingOutcome>,
}

impl Default for RemoteModel {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteModel {
    pub fn new() -> Self {
        let (listings_tx, listings_rx) = unbounded();
        Self {
            client: None,
            session_opts: None,
            settings: None,
            items: Vec::new(),
            current_path: "/".to_string(),
            show_hidden: false,
            sort_key: SortKey::Name,
            sort_order: SortOrder::Ascending,
            list_seq: 0,
            listings_tx,
            listings_rx,
        }
    }

    pub fn set_client(&mut self, client: Option<SharedClient>) {
        self.client = client;
    }

    /// Session options used to open isolated background-listing sessions.
    pub fn set_session_options(&mut self, opts: Option<SessionOptions>) {
        self.session_opts = opts;
    }

    pub fn set_settings(&mut self, settings: Option<Arc<dyn SettingsProvider>>) {
        self.settings = settings;
    }

    pub fn items(&self) -> &[RemoteItem] {
        &self.items
    }

    pub fn current_path(&self) -> &str {
        &self.current_path
    }

    pub fn show_hidden(&self) -> bool {
        self.show_hidden
    }

    /// Takes effect on the next load; the current listing is untouched.
    pub fn set_show_hidden(&mut self, show: bool) {
        self.show_hidden = show;
    }

    pub fn sort(&self) -> (SortKey, SortOrder) {
        (self.sort_key, self.sort_order)
    }

    /// Re-sorts the current listing in place.
    pub fn set_sort(&mut self, key: SortKey, order: SortOrder) {
        self.sort_key = key;
        self.sort_order = order;
        sort_items(&mut self.items, key, order);
    }

    /// Foreground listing: blocks on the shared client, then replaces the
    /// current items and path. Failures propagate verbatim.
    pub fn load(&mut self, path: &str) -> anyhow::Result<()> {
        let client = self.client.clone().ok_or(EngineError::NoClient)?;
        let normalized = normalize_remote_path(path);
        self.list_seq = self.list_seq.wrapping_add(1);
        let (show_hidden, key, order) = (self.show_hidden, self.sort_key, self.sort_order);

        let out = {
            let mut guard = lock_unpoisoned(&client);
            guard.list(&normalized)?
        };
        self.items = build_items(out, show_hidden, key, order);
        self.current_path = normalized;
        Ok(())
    }

    /// Background listing over an isolated session derived from the stored
    /// session options. The result lands in an internal channel; call
    /// [`Self::pump`] from the owning (UI) context to apply it. Stale
    /// results, superseded by a newer load, are discarded silently.
    pub fn load_async(&mut self, path: &str) -> anyhow::Result<()> {
        let client = self.client.clone().ok_or(EngineError::NoClient)?;
        let opts = self.session_opts.clone().ok_or(EngineError::NoSessionOptions)?;
        let normalized = normalize_remote_path(path);
        self.list_seq = self.list_seq.wrapping_add(1);
        let req_id = self.list_seq;
        let (show_hidden, sort_key, sort_order) =
            (self.show_hidden, self.sort_key, self.sort_order);
        let tx = self.listings_tx.clone();

        std::thread::spawn(move || {
            let result = (|| {
                // The shared client's own mutex serializes factory calls
                // with the transfer manager's workers.
                let mut conn = {
                    let guard = lock_unpoisoned(&client);
                    guard.new_connection_like(&opts)?
                };
                let out = conn.list(&normalized);
                conn.disconnect();
                out
            })();
            if let Err(ref e) = result {
                tracing::debug!("background listing of {} failed: {}", normalized, e);
            }
            let _ = tx.send(ListingOutcome {
                req_id,
                path: normalized,
                show_hidden,
                sort_key,
                sort_order,
                result,
            });
        });
        Ok(())
    }

    /// Drain finished background listings. Fresh results replace the
    /// current items; each produces one [`RootPathLoaded`] event. Stale
    /// results produce nothing.
    pub fn pump(&mut self) -> Vec<RootPathLoaded> {
        let mut events = Vec::new();
        while let Ok(msg) = self.listings_rx.try_recv() {
            if msg.req_id != self.list_seq {
                continue;
            }
            match msg.result {
                Ok(out) => {
                    self.items = build_items(out, msg.show_hidden, msg.sort_key, msg.sort_order);
                    self.current_path = msg.path.clone();
                    events.push(RootPathLoaded { path: msg.path, ok: true, error: String::new() });
                }
                Err(e) => {
                    events.push(RootPathLoaded { path: msg.path, ok: false, error: e.to_string() });
                }
            }
        }
        events
    }

    /// Recursive walk below `base_remote` collecting downloadable files.
    /// Per-directory failures never abort the walk; they are recorded in
    /// the returned [`EnumStats`].
    pub fn enumerate_files_under(
        &self,
        base_remote: &str,
        opts: &EnumOptions,
    ) -> Result<(Vec<EnumeratedFile>, EnumStats), EngineError> {
        let client = self.client.clone().ok_or(EngineError::NoClient)?;
        let max_depth = match opts.max_depth {
            Some(d) if d >= 1 => d,
            _ => resolve_max_folder_depth(self.settings.as_deref()),
        };
        Ok(walk_remote_tree(&client, base_remote, self.show_hidden, max_depth, opts))
    }
}

fn build_items(
    out: Vec<FileInfo>,
    show_hidden: bool,
    key: SortKey,
    order: SortOrder,
) -> Vec<RemoteItem> {
    let mut items: Vec<RemoteItem> = out
        .into_iter()
        .filter(|f| show_hidden || !f.name.starts_with('.'))
        .map(|info| RemoteItem { info })
        .collect();
    sort_items(&mut items, key, order);
    items
}

/// Directories strictly precede files; the order flag inverts only the
/// secondary key comparison, never the partition.
pub fn sort_items(items: &mut [RemoteItem], key: SortKey, order: SortOrder) {
    use std::cmp::Ordering;
    let asc = order == SortOrder::Ascending;
    items.sort_by(|a, b| {
        let (a, b) = (&a.info, &b.info);
        match (a.is_dir, b.is_dir) {
            (true, false) => return Ordering::Less,
            (false, true) => return Ordering::Greater,
            _ => {}
        }
        let ord = match key {
            SortKey::Name => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
            SortKey::Size => a.size.cmp(&b.size),
            SortKey::Mtime => a.mtime.cmp(&b.mtime),
            SortKey::Mode => a.mode.cmp(&b.mode),
        };
        if asc { ord } else { ord.reverse() }
    });
}
