use anyhow::{Context, Result};
use reqwest::Url;
use serde_json::Value;

use crate::config::MigrationConfig;
use crate::error::{DataError, json_type_name};
use crate::formatter::{ContentKind, ContentTypeSpec, FormattedData, Formatter, value_as_string};
use crate::images::ImageResolver;
use crate::store::{NewContentItem, NewPage, Page, Store};

/// One failed record, by position in the source list.
#[derive(Debug, Clone)]
pub struct RecordError {
    pub index: usize,
    pub legacy_id: Option<String>,
    pub message: String,
}

/// Outcome of one import run. Per-record failures are collected here and
/// never abort the remaining records.
#[derive(Debug, Clone, Default)]
pub struct ImportReport {
    pub created: usize,
    pub skipped: usize,
    pub errors: Vec<RecordError>,
}

/// Drives one content type's import: iterates source records in order,
/// skips already-imported legacy ids, formats and persists the rest.
pub struct Importer<'a> {
    store: &'a Store,
    resolver: &'a ImageResolver,
    config: &'a MigrationConfig,
    spec: &'static ContentTypeSpec,
    parent: Option<Page>,
}

impl<'a> Importer<'a> {
    /// Page-kind imports need a parent whose content type matches the
    /// spec's declared parent type. Content-kind imports ignore the parent.
    pub fn new(
        store: &'a Store,
        resolver: &'a ImageResolver,
        config: &'a MigrationConfig,
        spec: &'static ContentTypeSpec,
        parent: Option<Page>,
    ) -> Result<Self> {
        if spec.kind == ContentKind::Page {
            let parent = parent
                .as_ref()
                .with_context(|| format!("importing `{}` requires a parent page", spec.name))?;
            if let Some(expected) = spec.parent_type
                && parent.content_type != expected
            {
                return Err(DataError::ParentType {
                    id: parent.id,
                    expected: expected.to_string(),
                    actual: parent.content_type.clone(),
                }
                .into());
            }
        }
        Ok(Self {
            store,
            resolver,
            config,
            spec,
            parent,
        })
    }

    /// Process every record in `source`, which must be a JSON array.
    /// A non-array source fails fast before any record is touched.
    pub fn process(&self, source: &Value) -> Result<ImportReport> {
        let records = source
            .as_array()
            .ok_or_else(|| DataError::SourceNotAList(json_type_name(source)))?;

        let formatter = Formatter::new(
            self.store,
            self.resolver,
            self.config,
            self.spec,
            self.parent.as_ref(),
        );

        let mut report = ImportReport::default();
        for (index, item) in records.iter().enumerate() {
            let Some(record) = item.as_object() else {
                let message = format!("record is not an object, is {}", json_type_name(item));
                println!("could not import record {index}: {message}");
                report.errors.push(RecordError {
                    index,
                    legacy_id: None,
                    message,
                });
                continue;
            };

            let Some(legacy_id) = record.get("nid").and_then(value_as_string) else {
                let message = DataError::MissingField("nid".to_string()).to_string();
                println!("could not import record {index}: {message}");
                report.errors.push(RecordError {
                    index,
                    legacy_id: None,
                    message,
                });
                continue;
            };

            if self.store.legacy_id_exists(&legacy_id)? {
                println!("{legacy_id} already exists");
                report.skipped += 1;
                continue;
            }

            let outcome = formatter
                .format_record(record)
                .and_then(|data| self.create(data));
            match outcome {
                Ok(title) => {
                    println!("Created {title}");
                    report.created += 1;
                }
                Err(err) => {
                    println!("Could not create {legacy_id}: {err:#}");
                    report.errors.push(RecordError {
                        index,
                        legacy_id: Some(legacy_id),
                        message: format!("{err:#}"),
                    });
                }
            }
        }
        Ok(report)
    }

    /// Persist one formatted record, returning its title. Pages run the
    /// full chain: attach under the parent, draft a revision, publish it,
    /// record the legacy redirect. The chain has no compensating rollback;
    /// a failure partway leaves the earlier steps in place.
    fn create(&self, data: FormattedData) -> Result<String> {
        match self.spec.kind {
            ContentKind::Page => {
                let parent = self
                    .parent
                    .as_ref()
                    .context("page import lost its parent")?;
                let page = self.store.add_child_page(
                    parent,
                    &NewPage {
                        legacy_id: Some(data.legacy_id),
                        content_type: self.spec.name.to_string(),
                        title: data.title.clone(),
                        slug: data.slug,
                        legacy_url: data.legacy_url.clone(),
                        first_published_at: data.first_published_at,
                        publication_date: data.publication_date,
                        body: data.body,
                        image_id: data.image_id,
                    },
                )?;
                let revision = self.store.create_revision(page.id)?;
                self.store.publish_revision(revision)?;
                if let Some(url) = data.legacy_url {
                    self.store
                        .create_redirect(&redirect_path(&url), &page.site, page.id)?;
                }
                Ok(data.title)
            }
            ContentKind::Content => {
                self.store.create_content_item(&NewContentItem {
                    legacy_id: Some(data.legacy_id),
                    content_type: self.spec.name.to_string(),
                    title: data.title.clone(),
                    slug: data.slug,
                })?;
                Ok(data.title)
            }
        }
    }
}

/// Path component of a legacy URL, for the redirect's old path. A value
/// that does not parse as an absolute URL is kept as-is.
pub(crate) fn redirect_path(url: &str) -> String {
    match Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{Importer, redirect_path};
    use crate::config::MigrationConfig;
    use crate::error::DataError;
    use crate::formatter::{ContentKind, ContentTypeSpec, FieldStep, content_type_by_name};
    use crate::images::ImageResolver;
    use crate::runtime::ResolvedPaths;
    use crate::store::Store;
    use crate::store::test_support::test_store;

    const TAG: ContentTypeSpec = ContentTypeSpec {
        name: "tag",
        kind: ContentKind::Content,
        parent_type: None,
        steps: &[FieldStep::Slug],
    };

    fn news_importer<'a>(
        store: &'a Store,
        resolver: &'a ImageResolver,
        config: &'a MigrationConfig,
    ) -> Importer<'a> {
        let parent = store
            .create_root_page("News", "news", "old.example", "news-index")
            .expect("parent");
        let news = content_type_by_name("news").expect("news");
        Importer::new(store, resolver, config, news, Some(parent)).expect("importer")
    }

    fn fixtures(paths: &ResolvedPaths) -> (MigrationConfig, ImageResolver) {
        let config = MigrationConfig::default();
        let resolver = ImageResolver::new(&config, paths).expect("resolver");
        (config, resolver)
    }

    #[test]
    fn non_array_source_fails_fast() {
        let (_temp, paths, store) = test_store();
        let (config, resolver) = fixtures(&paths);
        let importer = news_importer(&store, &resolver, &config);

        let error = importer
            .process(&json!({"nid": "1"}))
            .expect_err("must fail");
        assert!(matches!(
            error.downcast_ref::<DataError>(),
            Some(DataError::SourceNotAList("an object"))
        ));
        assert_eq!(store.stats().expect("stats").pages, 1);
    }

    #[test]
    fn wrong_parent_type_is_rejected_up_front() {
        let (_temp, paths, store) = test_store();
        let (config, resolver) = fixtures(&paths);
        let parent = store
            .create_root_page("Home", "home", "old.example", "homepage")
            .expect("parent");
        let news = content_type_by_name("news").expect("news");

        let error = Importer::new(&store, &resolver, &config, news, Some(parent))
            .err()
            .expect("must fail");
        assert!(matches!(
            error.downcast_ref::<DataError>(),
            Some(DataError::ParentType { expected, actual, .. })
                if expected == "news-index" && actual == "homepage"
        ));
    }

    #[test]
    fn full_scenario_creates_page_revision_and_redirect() {
        let (_temp, paths, store) = test_store();
        let (config, resolver) = fixtures(&paths);
        store
            .create_image("pic.jpg", "media/pic.jpg", 99, Some("jpeg"))
            .expect("seed image");
        let importer = news_importer(&store, &resolver, &config);

        let source = json!([{
            "nid": "1",
            "title": "<b>Hello</b> World",
            "url": "https://old.example/news/hello-world",
            "created": "2020-01-01 09:00:00",
            "body": "<p>text</p>",
            "image": "https://example.com/pic.jpg",
        }]);
        let report = importer.process(&source).expect("process");
        assert_eq!(report.created, 1);
        assert_eq!(report.skipped, 0);
        assert!(report.errors.is_empty());

        let page = store
            .page_by_legacy_id("1")
            .expect("lookup")
            .expect("page exists");
        assert_eq!(page.title, "Hello World");
        assert_eq!(page.slug, "hello-world");
        assert_eq!(
            page.first_published_at.as_deref(),
            Some("2020-01-01T09:00:00+00:00")
        );
        assert!(page.live);
        assert!(page.image_id.is_some());
        assert_eq!(page.body.as_deref(), Some("<p>text</p>"));

        let redirects = store.redirects_for_page(page.id).expect("redirects");
        assert_eq!(redirects.len(), 1);
        assert_eq!(redirects[0].old_path, "/news/hello-world");
        assert_eq!(redirects[0].site, "old.example");
        assert_eq!(store.stats().expect("stats").revisions, 1);
    }

    #[test]
    fn rerun_skips_every_imported_record() {
        let (_temp, paths, store) = test_store();
        let (config, resolver) = fixtures(&paths);
        let importer = news_importer(&store, &resolver, &config);

        let source = json!([{
            "nid": "1",
            "title": "Hello World",
            "url": "https://old.example/news/hello-world",
            "created": "2020-01-01 09:00:00",
        }]);
        let first = importer.process(&source).expect("first run");
        assert_eq!(first.created, 1);

        let second = importer.process(&source).expect("second run");
        assert_eq!(second.created, 0);
        assert_eq!(second.skipped, 1);
        assert!(second.errors.is_empty());
        assert_eq!(store.stats().expect("stats").pages, 2);
        assert_eq!(store.stats().expect("stats").revisions, 1);
    }

    #[test]
    fn bad_records_do_not_stop_the_batch() {
        let (_temp, paths, store) = test_store();
        let (config, resolver) = fixtures(&paths);
        let importer = news_importer(&store, &resolver, &config);

        let source = json!([
            {"nid": "1", "title": "Bad date", "url": "https://old.example/a",
             "created": "01/02/2020"},
            "not an object",
            {"title": "No id", "url": "https://old.example/b",
             "created": "2020-01-01 09:00:00"},
            {"nid": "2", "title": "Good", "url": "https://old.example/news/good",
             "created": "2020-01-01 09:00:00"},
        ]);
        let report = importer.process(&source).expect("process");
        assert_eq!(report.created, 1);
        assert_eq!(report.errors.len(), 3);
        assert_eq!(report.errors[0].legacy_id.as_deref(), Some("1"));
        assert!(report.errors[0].message.contains("malformed date"));
        assert!(report.errors[1].message.contains("not an object"));
        assert!(report.errors[2].message.contains("`nid`"));
        assert!(store.page_by_legacy_id("2").expect("lookup").is_some());
    }

    #[test]
    fn content_kind_imports_fill_the_flat_table() {
        let (_temp, paths, store) = test_store();
        let (config, resolver) = fixtures(&paths);
        let importer =
            Importer::new(&store, &resolver, &config, &TAG, None).expect("importer");

        let source = json!([
            {"nid": "10", "title": "Rust"},
            {"nid": "11", "title": "Rust"},
        ]);
        let report = importer.process(&source).expect("process");
        assert_eq!(report.created, 2);

        let first = store
            .content_item_by_legacy_id("10")
            .expect("lookup")
            .expect("exists");
        let second = store
            .content_item_by_legacy_id("11")
            .expect("lookup")
            .expect("exists");
        assert_eq!(first.slug, "rust");
        assert_eq!(second.slug, "rust-1");
    }

    #[test]
    fn redirect_paths_strip_scheme_and_host() {
        assert_eq!(
            redirect_path("https://old.example/news/hello-world"),
            "/news/hello-world"
        );
        assert_eq!(redirect_path("/already/a/path"), "/already/a/path");
    }
}
