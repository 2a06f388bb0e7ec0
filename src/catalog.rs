//! Catalog collaborator.
//!
//! The voucher desk does not own book, series or tag data. It only asks the
//! catalog whether identifiers exist and how books relate to series and tags.

use crate::config::settings::CatalogSettings;
use crate::errors::Result;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};

/// Read-only view of the catalog used for scope validation and scope checks.
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn book_exists(&self, book_id: &str) -> Result<bool>;

    async fn series_exists(&self, series_id: &str) -> Result<bool>;

    async fn tag_exists(&self, tag_id: &str) -> Result<bool>;

    /// Series the book belongs to, if any.
    async fn series_of(&self, book_id: &str) -> Result<Option<String>>;

    async fn book_has_tag(&self, book_id: &str, tag_id: &str) -> Result<bool>;
}

#[derive(Debug, Clone, Default)]
struct BookEntry {
    series: Option<String>,
    tags: HashSet<String>,
}

/// Catalog held in memory, seeded from settings or built up in tests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    books: HashMap<String, BookEntry>,
    series: HashSet<String>,
    tags: HashSet<String>,
}

impl InMemoryCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a catalog from the `[catalog]` settings section.
    ///
    /// Series and tags referenced by a book are registered implicitly.
    #[must_use]
    pub fn from_settings(settings: &CatalogSettings) -> Self {
        let catalog = settings
            .series
            .iter()
            .fold(Self::new(), |catalog, series| catalog.with_series(series));
        let catalog = settings
            .tags
            .iter()
            .fold(catalog, |catalog, tag| catalog.with_tag(tag));
        settings.books.iter().fold(catalog, |catalog, book| {
            let tags: Vec<&str> = book.tags.iter().map(String::as_str).collect();
            catalog.with_book(&book.id, book.series.as_deref(), &tags)
        })
    }

    #[must_use]
    pub fn with_series(mut self, series_id: &str) -> Self {
        self.series.insert(series_id.to_string());
        self
    }

    #[must_use]
    pub fn with_tag(mut self, tag_id: &str) -> Self {
        self.tags.insert(tag_id.to_string());
        self
    }

    #[must_use]
    pub fn with_book(mut self, book_id: &str, series: Option<&str>, tags: &[&str]) -> Self {
        if let Some(series_id) = series {
            self.series.insert(series_id.to_string());
        }
        for tag in tags {
            self.tags.insert((*tag).to_string());
        }
        self.books.insert(
            book_id.to_string(),
            BookEntry {
                series: series.map(str::to_string),
                tags: tags.iter().map(|tag| (*tag).to_string()).collect(),
            },
        );
        self
    }
}

#[async_trait]
impl Catalog for InMemoryCatalog {
    async fn book_exists(&self, book_id: &str) -> Result<bool> {
        Ok(self.books.contains_key(book_id))
    }

    async fn series_exists(&self, series_id: &str) -> Result<bool> {
        Ok(self.series.contains(series_id))
    }

    async fn tag_exists(&self, tag_id: &str) -> Result<bool> {
        Ok(self.tags.contains(tag_id))
    }

    async fn series_of(&self, book_id: &str) -> Result<Option<String>> {
        Ok(self
            .books
            .get(book_id)
            .and_then(|entry| entry.series.clone()))
    }

    async fn book_has_tag(&self, book_id: &str, tag_id: &str) -> Result<bool> {
        Ok(self
            .books
            .get(book_id)
            .is_some_and(|entry| entry.tags.contains(tag_id)))
    }
}
