use anyhow::Result;
use serde_json::{Map, Value};

use crate::config::MigrationConfig;
use crate::error::DataError;
use crate::images::ImageResolver;
use crate::richtext::{EmbedImage, rewrite_body_images};
use crate::slugs::{find_available_slug, requested_content_slug, requested_page_slug};
use crate::store::{Page, Store};
use crate::text::{clean_title, parse_source_date};

/// Whether a content type lands in the page tree or the flat content table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Page,
    Content,
}

/// One field-mapping step. A content type is described by the ordered list
/// of steps it runs after the base fields (legacy id, title) are extracted.
#[derive(Debug, Clone, Copy)]
pub enum FieldStep {
    /// Parse `created` as a source timestamp into the first-published field.
    CreatedDate,
    /// Copy the `url` key, used later for the redirect.
    LegacyUrl,
    /// Allocate a collision-free slug within the type's scope.
    Slug,
    /// Resolve the `image` key into a stored asset reference.
    LeadImage,
    /// Rewrite inline images in the named key into embed markers.
    RichTextBody { key: &'static str },
    /// Copy the first-published timestamp into the publication date.
    PublicationDate,
}

/// Declarative description of one importable content type.
#[derive(Debug)]
pub struct ContentTypeSpec {
    pub name: &'static str,
    pub kind: ContentKind,
    /// Required content type of the destination parent page, if any.
    pub parent_type: Option<&'static str>,
    pub steps: &'static [FieldStep],
}

pub const NEWS: ContentTypeSpec = ContentTypeSpec {
    name: "news",
    kind: ContentKind::Page,
    parent_type: Some("news-index"),
    steps: &[
        FieldStep::CreatedDate,
        FieldStep::LegacyUrl,
        FieldStep::Slug,
        FieldStep::LeadImage,
        FieldStep::RichTextBody { key: "body" },
        FieldStep::PublicationDate,
    ],
};

const CONTENT_TYPES: &[&ContentTypeSpec] = &[&NEWS];

pub fn content_type_by_name(name: &str) -> Option<&'static ContentTypeSpec> {
    CONTENT_TYPES.iter().copied().find(|spec| spec.name == name)
}

/// Destination field values for one record, built fresh per record and
/// consumed once at creation time.
#[derive(Debug, Clone, Default)]
pub struct FormattedData {
    pub legacy_id: String,
    pub title: String,
    pub slug: String,
    pub legacy_url: Option<String>,
    pub first_published_at: Option<String>,
    pub publication_date: Option<String>,
    pub image_id: Option<i64>,
    pub body: Option<String>,
}

/// Runs a content type's field steps over one source record. Deterministic
/// given the current state of already-allocated slugs and stored images.
pub struct Formatter<'a> {
    store: &'a Store,
    resolver: &'a ImageResolver,
    config: &'a MigrationConfig,
    spec: &'a ContentTypeSpec,
    parent: Option<&'a Page>,
}

impl<'a> Formatter<'a> {
    pub fn new(
        store: &'a Store,
        resolver: &'a ImageResolver,
        config: &'a MigrationConfig,
        spec: &'a ContentTypeSpec,
        parent: Option<&'a Page>,
    ) -> Self {
        Self {
            store,
            resolver,
            config,
            spec,
            parent,
        }
    }

    pub fn format_record(&self, record: &Map<String, Value>) -> Result<FormattedData> {
        let mut data = FormattedData {
            legacy_id: required_string(record, "nid")?,
            title: clean_title(&required_string(record, "title")?, self.config.max_title_len()),
            ..FormattedData::default()
        };

        for step in self.spec.steps {
            match step {
                FieldStep::CreatedDate => {
                    let raw = required_string(record, "created")?;
                    let parsed = parse_source_date(&raw, self.config.timezone_offset()?)?;
                    data.first_published_at = Some(parsed.to_rfc3339());
                }
                FieldStep::LegacyUrl => {
                    data.legacy_url = Some(required_string(record, "url")?);
                }
                FieldStep::Slug => {
                    data.slug = self.allocate_slug(record, &data)?;
                }
                FieldStep::LeadImage => {
                    if let Some(url) = optional_string(record, "image") {
                        data.image_id = self
                            .resolver
                            .resolve(self.store, &url)?
                            .map(|asset| asset.id);
                    }
                }
                FieldStep::RichTextBody { key } => {
                    if let Some(html) = optional_string(record, key) {
                        data.body = Some(rewrite_body_images(&html, |src| {
                            Ok(self.resolver.resolve(self.store, src)?.map(|asset| {
                                EmbedImage {
                                    id: asset.id,
                                    title: asset.title,
                                }
                            }))
                        })?);
                    }
                }
                FieldStep::PublicationDate => {
                    data.publication_date = data.first_published_at.clone();
                }
            }
        }
        Ok(data)
    }

    fn allocate_slug(&self, record: &Map<String, Value>, data: &FormattedData) -> Result<String> {
        let explicit = optional_string(record, "slug");
        match self.spec.kind {
            ContentKind::Page => {
                let parent = self
                    .parent
                    .ok_or_else(|| anyhow::anyhow!("page import requires a parent page"))?;
                let requested = requested_page_slug(
                    explicit.as_deref(),
                    data.legacy_url.as_deref(),
                    &data.title,
                );
                let taken = self.store.child_slugs_with_prefix(parent.id, &requested)?;
                Ok(find_available_slug(&requested, &taken))
            }
            ContentKind::Content => {
                let requested = requested_content_slug(explicit.as_deref(), &data.title);
                let taken = self
                    .store
                    .content_slugs_with_prefix(self.spec.name, &requested)?;
                Ok(find_available_slug(&requested, &taken))
            }
        }
    }
}

/// Read `key` as a string, accepting JSON strings and numbers. Missing or
/// unusable values are a typed lookup error.
fn required_string(record: &Map<String, Value>, key: &str) -> Result<String, DataError> {
    record
        .get(key)
        .and_then(value_as_string)
        .ok_or_else(|| DataError::MissingField(key.to_string()))
}

/// Read `key` as a non-empty string if present.
fn optional_string(record: &Map<String, Value>, key: &str) -> Option<String> {
    let value = record.get(key).and_then(value_as_string)?;
    if value.trim().is_empty() { None } else { Some(value) }
}

pub(crate) fn value_as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{Map, Value, json};

    use super::{ContentKind, ContentTypeSpec, FieldStep, Formatter, content_type_by_name};
    use crate::config::MigrationConfig;
    use crate::error::DataError;
    use crate::images::ImageResolver;
    use crate::store::test_support::test_store;

    const AUTHOR: ContentTypeSpec = ContentTypeSpec {
        name: "author",
        kind: ContentKind::Content,
        parent_type: None,
        steps: &[FieldStep::Slug],
    };

    fn record(value: Value) -> Map<String, Value> {
        value.as_object().expect("object").clone()
    }

    #[test]
    fn registry_knows_the_news_type() {
        let news = content_type_by_name("news").expect("news");
        assert_eq!(news.kind, ContentKind::Page);
        assert_eq!(news.parent_type, Some("news-index"));
        assert!(content_type_by_name("unknown").is_none());
    }

    #[test]
    fn base_fields_require_nid_and_title() {
        let (_temp, paths, store) = test_store();
        let config = MigrationConfig::default();
        let resolver = ImageResolver::new(&config, &paths).expect("resolver");
        let formatter = Formatter::new(&store, &resolver, &config, &AUTHOR, None);

        let error = formatter
            .format_record(&record(json!({"title": "No id"})))
            .expect_err("missing nid");
        assert!(matches!(
            error.downcast_ref::<DataError>(),
            Some(DataError::MissingField(key)) if key == "nid"
        ));

        let data = formatter
            .format_record(&record(json!({"nid": 7, "title": "<b>Bold</b> name"})))
            .expect("format");
        assert_eq!(data.legacy_id, "7");
        assert_eq!(data.title, "Bold name");
        assert_eq!(data.slug, "bold-name");
    }

    #[test]
    fn news_records_map_every_field() {
        let (_temp, paths, store) = test_store();
        let config = MigrationConfig::default();
        let resolver = ImageResolver::new(&config, &paths).expect("resolver");
        let parent = store
            .create_root_page("News", "news", "old.example", "news-index")
            .expect("parent");
        let news = content_type_by_name("news").expect("news");
        let formatter = Formatter::new(&store, &resolver, &config, news, Some(&parent));

        let data = formatter
            .format_record(&record(json!({
                "nid": "1",
                "title": "Hello World",
                "url": "https://old.example/news/hello-world",
                "created": "2020-01-01 09:00:00",
            })))
            .expect("format");
        assert_eq!(data.slug, "hello-world");
        assert_eq!(
            data.legacy_url.as_deref(),
            Some("https://old.example/news/hello-world")
        );
        assert_eq!(
            data.first_published_at.as_deref(),
            Some("2020-01-01T09:00:00+00:00")
        );
        assert_eq!(data.publication_date, data.first_published_at);
        assert!(data.image_id.is_none());
        assert!(data.body.is_none());
    }

    #[test]
    fn news_records_need_created_and_url() {
        let (_temp, paths, store) = test_store();
        let config = MigrationConfig::default();
        let resolver = ImageResolver::new(&config, &paths).expect("resolver");
        let parent = store
            .create_root_page("News", "news", "old.example", "news-index")
            .expect("parent");
        let news = content_type_by_name("news").expect("news");
        let formatter = Formatter::new(&store, &resolver, &config, news, Some(&parent));

        let error = formatter
            .format_record(&record(json!({"nid": "1", "title": "T"})))
            .expect_err("missing created");
        assert!(matches!(
            error.downcast_ref::<DataError>(),
            Some(DataError::MissingField(key)) if key == "created"
        ));
    }

    #[test]
    fn sibling_slug_collisions_get_suffixes() {
        let (_temp, paths, store) = test_store();
        let config = MigrationConfig::default();
        let resolver = ImageResolver::new(&config, &paths).expect("resolver");
        let parent = store
            .create_root_page("News", "news", "old.example", "news-index")
            .expect("parent");
        store
            .add_child_page(
                &parent,
                &crate::store::NewPage {
                    legacy_id: Some("9".to_string()),
                    content_type: "news".to_string(),
                    title: "Existing".to_string(),
                    slug: "hello-world".to_string(),
                    ..crate::store::NewPage::default()
                },
            )
            .expect("existing sibling");

        let news = content_type_by_name("news").expect("news");
        let formatter = Formatter::new(&store, &resolver, &config, news, Some(&parent));
        let data = formatter
            .format_record(&record(json!({
                "nid": "2",
                "title": "Hello World",
                "url": "https://old.example/news/hello-world",
                "created": "2020-01-01 09:00:00",
            })))
            .expect("format");
        assert_eq!(data.slug, "hello-world-1");
    }

    #[test]
    fn stored_images_are_embedded_without_network() {
        let (_temp, paths, store) = test_store();
        let config = MigrationConfig::default();
        let resolver = ImageResolver::new(&config, &paths).expect("resolver");
        let asset = store
            .create_image("pic.jpg", "media/pic.jpg", 120, Some("jpeg"))
            .expect("seed image");
        let parent = store
            .create_root_page("News", "news", "old.example", "news-index")
            .expect("parent");
        let news = content_type_by_name("news").expect("news");
        let formatter = Formatter::new(&store, &resolver, &config, news, Some(&parent));

        let data = formatter
            .format_record(&record(json!({
                "nid": "3",
                "title": "With media",
                "url": "https://old.example/news/with-media",
                "created": "2020-01-01 09:00:00",
                "image": "https://cdn.example/files/pic.jpg",
                "body": "<p>before</p><img src=\"https://cdn.example/files/pic.jpg\">",
            })))
            .expect("format");
        assert_eq!(data.image_id, Some(asset.id));
        let body = data.body.expect("body");
        assert!(body.starts_with("<p>before</p><embed alt=\"pic.jpg\""));
        assert!(body.contains(&format!("id=\"{}\"", asset.id)));
    }
}
