use std::collections::HashSet;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, bail};
use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::runtime::ResolvedPaths;

/// Width of one materialized-path step; supports 9999 siblings per node.
const TREE_STEP_WIDTH: usize = 4;

/// A hierarchical page row. Pages form a tree via `parent_id` plus a
/// zero-padded materialized `tree_path` that makes sibling ordering and
/// subtree queries plain string operations.
#[derive(Debug, Clone)]
pub struct Page {
    pub id: i64,
    pub legacy_id: Option<String>,
    pub content_type: String,
    pub title: String,
    pub slug: String,
    pub parent_id: Option<i64>,
    pub tree_path: String,
    pub depth: i64,
    pub site: String,
    pub legacy_url: Option<String>,
    pub first_published_at: Option<String>,
    pub publication_date: Option<String>,
    pub body: Option<String>,
    pub image_id: Option<i64>,
    pub live: bool,
}

/// Field values for a page about to be created under some parent.
#[derive(Debug, Clone, Default)]
pub struct NewPage {
    pub legacy_id: Option<String>,
    pub content_type: String,
    pub title: String,
    pub slug: String,
    pub legacy_url: Option<String>,
    pub first_published_at: Option<String>,
    pub publication_date: Option<String>,
    pub body: Option<String>,
    pub image_id: Option<i64>,
}

/// A flat, non-hierarchical content row.
#[derive(Debug, Clone)]
pub struct ContentItem {
    pub id: i64,
    pub legacy_id: Option<String>,
    pub content_type: String,
    pub title: String,
    pub slug: String,
}

#[derive(Debug, Clone, Default)]
pub struct NewContentItem {
    pub legacy_id: Option<String>,
    pub content_type: String,
    pub title: String,
    pub slug: String,
}

/// A stored binary image asset. The payload lives on disk at `file_path`;
/// the row carries the identity (`title`) used for deduplication.
#[derive(Debug, Clone)]
pub struct ImageAsset {
    pub id: i64,
    pub title: String,
    pub file_path: String,
    pub byte_len: i64,
    pub format: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Redirect {
    pub id: i64,
    pub old_path: String,
    pub site: String,
    pub page_id: i64,
}

#[derive(Debug, Clone, Default)]
pub struct StoreStats {
    pub pages: usize,
    pub content_items: usize,
    pub images: usize,
    pub revisions: usize,
    pub redirects: usize,
}

pub fn open_connection(db_path: &Path) -> Result<Connection> {
    let connection = Connection::open(db_path)
        .with_context(|| format!("failed to open {}", db_path.display()))?;
    connection
        .pragma_update(None, "foreign_keys", "ON")
        .context("failed to enable foreign_keys pragma")?;
    connection
        .pragma_update(None, "journal_mode", "WAL")
        .context("failed to enable WAL journal mode")?;
    Ok(connection)
}

/// The destination content store. Single-writer, single-process: lookups and
/// inserts are plain check-then-create with no locking discipline.
pub struct Store {
    connection: Connection,
}

impl Store {
    pub fn open(paths: &ResolvedPaths) -> Result<Self> {
        Ok(Self {
            connection: open_connection(&paths.db_path)?,
        })
    }

    pub fn page_by_id(&self, id: i64) -> Result<Option<Page>> {
        self.connection
            .query_row(
                &format!("{PAGE_SELECT} WHERE id = ?1"),
                params![id],
                page_from_row,
            )
            .optional()
            .with_context(|| format!("failed to load page {id}"))
    }

    pub fn page_by_legacy_id(&self, legacy_id: &str) -> Result<Option<Page>> {
        self.connection
            .query_row(
                &format!("{PAGE_SELECT} WHERE legacy_id = ?1"),
                params![legacy_id],
                page_from_row,
            )
            .optional()
            .context("failed to query page by legacy id")
    }

    pub fn content_item_by_legacy_id(&self, legacy_id: &str) -> Result<Option<ContentItem>> {
        self.connection
            .query_row(
                "SELECT id, legacy_id, content_type, title, slug
                 FROM content_items WHERE legacy_id = ?1",
                params![legacy_id],
                content_item_from_row,
            )
            .optional()
            .context("failed to query content item by legacy id")
    }

    /// True when any page or content item already carries this legacy id.
    pub fn legacy_id_exists(&self, legacy_id: &str) -> Result<bool> {
        Ok(self.page_by_legacy_id(legacy_id)?.is_some()
            || self.content_item_by_legacy_id(legacy_id)?.is_some())
    }

    /// Slugs already used by children of `parent_id` that start with `prefix`.
    pub fn child_slugs_with_prefix(&self, parent_id: i64, prefix: &str) -> Result<HashSet<String>> {
        let mut statement = self
            .connection
            .prepare("SELECT slug FROM pages WHERE parent_id = ?1 AND slug LIKE ?2 ESCAPE '\\'")
            .context("failed to prepare child slug query")?;
        let rows = statement
            .query_map(params![parent_id, like_prefix(prefix)], |row| {
                row.get::<_, String>(0)
            })
            .context("failed to query child slugs")?;
        collect_slugs(rows)
    }

    /// Slugs already used by content items of `content_type` starting with `prefix`.
    pub fn content_slugs_with_prefix(
        &self,
        content_type: &str,
        prefix: &str,
    ) -> Result<HashSet<String>> {
        let mut statement = self
            .connection
            .prepare(
                "SELECT slug FROM content_items
                 WHERE content_type = ?1 AND slug LIKE ?2 ESCAPE '\\'",
            )
            .context("failed to prepare content slug query")?;
        let rows = statement
            .query_map(params![content_type, like_prefix(prefix)], |row| {
                row.get::<_, String>(0)
            })
            .context("failed to query content slugs")?;
        collect_slugs(rows)
    }

    /// Create a tree root. Roots carry their own site key and depth 1.
    pub fn create_root_page(
        &self,
        title: &str,
        slug: &str,
        site: &str,
        content_type: &str,
    ) -> Result<Page> {
        let root_count: i64 = self
            .connection
            .query_row(
                "SELECT COUNT(*) FROM pages WHERE parent_id IS NULL",
                [],
                |row| row.get(0),
            )
            .context("failed to count root pages")?;
        let tree_path = path_step(root_count + 1);
        self.connection
            .execute(
                "INSERT INTO pages (content_type, title, slug, parent_id, tree_path, depth, site, live)
                 VALUES (?1, ?2, ?3, NULL, ?4, 1, ?5, 1)",
                params![content_type, title, slug, tree_path, site],
            )
            .context("failed to insert root page")?;
        let id = self.connection.last_insert_rowid();
        self.page_by_id(id)?
            .ok_or_else(|| anyhow::anyhow!("root page {id} vanished after insert"))
    }

    /// Attach a new page as the last child of `parent`. The child inherits
    /// the parent's site and gets the next materialized-path slot.
    pub fn add_child_page(&self, parent: &Page, new: &NewPage) -> Result<Page> {
        let child_count: i64 = self
            .connection
            .query_row(
                "SELECT COUNT(*) FROM pages WHERE parent_id = ?1",
                params![parent.id],
                |row| row.get(0),
            )
            .context("failed to count children")?;
        let tree_path = format!("{}{}", parent.tree_path, path_step(child_count + 1));

        self.connection
            .execute(
                "INSERT INTO pages (
                    legacy_id, content_type, title, slug, parent_id, tree_path, depth, site,
                    legacy_url, first_published_at, publication_date, body, image_id, live
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, 0)",
                params![
                    new.legacy_id,
                    new.content_type,
                    new.title,
                    new.slug,
                    parent.id,
                    tree_path,
                    parent.depth + 1,
                    parent.site,
                    new.legacy_url,
                    new.first_published_at,
                    new.publication_date,
                    new.body,
                    new.image_id,
                ],
            )
            .with_context(|| format!("failed to insert page `{}`", new.title))?;
        let id = self.connection.last_insert_rowid();
        self.page_by_id(id)?
            .ok_or_else(|| anyhow::anyhow!("page {id} vanished after insert"))
    }

    pub fn create_content_item(&self, new: &NewContentItem) -> Result<ContentItem> {
        self.connection
            .execute(
                "INSERT INTO content_items (legacy_id, content_type, title, slug)
                 VALUES (?1, ?2, ?3, ?4)",
                params![new.legacy_id, new.content_type, new.title, new.slug],
            )
            .with_context(|| format!("failed to insert content item `{}`", new.title))?;
        let id = self.connection.last_insert_rowid();
        self.connection
            .query_row(
                "SELECT id, legacy_id, content_type, title, slug
                 FROM content_items WHERE id = ?1",
                params![id],
                content_item_from_row,
            )
            .context("failed to reload content item")
    }

    /// Save a draft revision for a page. Returns the revision id.
    pub fn create_revision(&self, page_id: i64) -> Result<i64> {
        self.connection
            .execute(
                "INSERT INTO revisions (page_id, created_at_unix) VALUES (?1, ?2)",
                params![page_id, unix_timestamp()?],
            )
            .context("failed to insert revision")?;
        Ok(self.connection.last_insert_rowid())
    }

    /// Publish a draft revision: stamp it and flip the owning page live.
    pub fn publish_revision(&self, revision_id: i64) -> Result<()> {
        let updated = self
            .connection
            .execute(
                "UPDATE revisions SET published_at_unix = ?1
                 WHERE id = ?2 AND published_at_unix IS NULL",
                params![unix_timestamp()?, revision_id],
            )
            .context("failed to publish revision")?;
        if updated == 0 {
            bail!("revision {revision_id} does not exist or is already published");
        }
        self.connection
            .execute(
                "UPDATE pages SET live = 1
                 WHERE id = (SELECT page_id FROM revisions WHERE id = ?1)",
                params![revision_id],
            )
            .context("failed to mark page live")?;
        Ok(())
    }

    pub fn create_redirect(&self, old_path: &str, site: &str, page_id: i64) -> Result<Redirect> {
        self.connection
            .execute(
                "INSERT INTO redirects (old_path, site, page_id) VALUES (?1, ?2, ?3)",
                params![old_path, site, page_id],
            )
            .with_context(|| format!("failed to insert redirect for {old_path}"))?;
        let id = self.connection.last_insert_rowid();
        Ok(Redirect {
            id,
            old_path: old_path.to_string(),
            site: site.to_string(),
            page_id,
        })
    }

    pub fn redirects_for_page(&self, page_id: i64) -> Result<Vec<Redirect>> {
        let mut statement = self
            .connection
            .prepare("SELECT id, old_path, site, page_id FROM redirects WHERE page_id = ?1")
            .context("failed to prepare redirect query")?;
        let rows = statement
            .query_map(params![page_id], |row| {
                Ok(Redirect {
                    id: row.get(0)?,
                    old_path: row.get(1)?,
                    site: row.get(2)?,
                    page_id: row.get(3)?,
                })
            })
            .context("failed to query redirects")?;
        let mut redirects = Vec::new();
        for row in rows {
            redirects.push(row.context("failed to read redirect row")?);
        }
        Ok(redirects)
    }

    pub fn image_by_title(&self, title: &str) -> Result<Option<ImageAsset>> {
        self.connection
            .query_row(
                "SELECT id, title, file_path, byte_len, format FROM images WHERE title = ?1",
                params![title],
                image_from_row,
            )
            .optional()
            .context("failed to query image by title")
    }

    pub fn create_image(
        &self,
        title: &str,
        file_path: &str,
        byte_len: i64,
        format: Option<&str>,
    ) -> Result<ImageAsset> {
        self.connection
            .execute(
                "INSERT INTO images (title, file_path, byte_len, format) VALUES (?1, ?2, ?3, ?4)",
                params![title, file_path, byte_len, format],
            )
            .with_context(|| format!("failed to insert image `{title}`"))?;
        let id = self.connection.last_insert_rowid();
        Ok(ImageAsset {
            id,
            title: title.to_string(),
            file_path: file_path.to_string(),
            byte_len,
            format: format.map(str::to_string),
        })
    }

    /// All pages in tree order (parents before children, siblings in
    /// creation order), for display.
    pub fn list_pages(&self) -> Result<Vec<Page>> {
        let mut statement = self
            .connection
            .prepare(&format!("{PAGE_SELECT} ORDER BY tree_path"))
            .context("failed to prepare page listing")?;
        let rows = statement
            .query_map([], page_from_row)
            .context("failed to list pages")?;
        let mut pages = Vec::new();
        for row in rows {
            pages.push(row.context("failed to read page row")?);
        }
        Ok(pages)
    }

    pub fn stats(&self) -> Result<StoreStats> {
        Ok(StoreStats {
            pages: self.count_rows("pages")?,
            content_items: self.count_rows("content_items")?,
            images: self.count_rows("images")?,
            revisions: self.count_rows("revisions")?,
            redirects: self.count_rows("redirects")?,
        })
    }

    fn count_rows(&self, table: &str) -> Result<usize> {
        let count: i64 = self
            .connection
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                row.get(0)
            })
            .with_context(|| format!("failed to count {table}"))?;
        usize::try_from(count).context("row count does not fit into usize")
    }
}

const PAGE_SELECT: &str = "SELECT id, legacy_id, content_type, title, slug, parent_id, tree_path,
        depth, site, legacy_url, first_published_at, publication_date, body, image_id, live
        FROM pages";

fn page_from_row(row: &Row<'_>) -> rusqlite::Result<Page> {
    Ok(Page {
        id: row.get(0)?,
        legacy_id: row.get(1)?,
        content_type: row.get(2)?,
        title: row.get(3)?,
        slug: row.get(4)?,
        parent_id: row.get(5)?,
        tree_path: row.get(6)?,
        depth: row.get(7)?,
        site: row.get(8)?,
        legacy_url: row.get(9)?,
        first_published_at: row.get(10)?,
        publication_date: row.get(11)?,
        body: row.get(12)?,
        image_id: row.get(13)?,
        live: row.get::<_, i64>(14)? != 0,
    })
}

fn content_item_from_row(row: &Row<'_>) -> rusqlite::Result<ContentItem> {
    Ok(ContentItem {
        id: row.get(0)?,
        legacy_id: row.get(1)?,
        content_type: row.get(2)?,
        title: row.get(3)?,
        slug: row.get(4)?,
    })
}

fn image_from_row(row: &Row<'_>) -> rusqlite::Result<ImageAsset> {
    Ok(ImageAsset {
        id: row.get(0)?,
        title: row.get(1)?,
        file_path: row.get(2)?,
        byte_len: row.get(3)?,
        format: row.get(4)?,
    })
}

fn collect_slugs(
    rows: impl Iterator<Item = rusqlite::Result<String>>,
) -> Result<HashSet<String>> {
    let mut slugs = HashSet::new();
    for row in rows {
        slugs.insert(row.context("failed to read slug row")?);
    }
    Ok(slugs)
}

/// Escape LIKE metacharacters so a slug prefix matches literally.
fn like_prefix(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len() + 1);
    for ch in prefix.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped.push('%');
    escaped
}

fn path_step(position: i64) -> String {
    format!("{position:0width$}", width = TREE_STEP_WIDTH)
}

fn unix_timestamp() -> Result<i64> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system clock error")?
        .as_secs();
    i64::try_from(now).context("timestamp does not fit into i64")
}
