//! Scope binding - which part of the catalog a voucher grants access to.
//!
//! A voucher carries exactly one [`ScopeBinding`], chosen by its type:
//!
//! | type             | association rows                       |
//! |------------------|----------------------------------------|
//! | `single_book`    | one `voucher_books` row                |
//! | `multiple_books` | one `voucher_books` row per book (≥ 1) |
//! | `series`         | one `voucher_series` row               |
//! | `book_tag`       | one `voucher_tags` row                 |
//! | `all_books`      | none                                   |
//!
//! For `all_books` the absence of rows *is* the scope. Never read "no rows" as
//! "not populated yet": [`load`] decides from the voucher type, not from what
//! it happens to find.

use crate::{
    catalog::Catalog,
    entities::{
        VoucherBook, VoucherBookColumn, VoucherSeries, VoucherSeriesColumn, VoucherTag,
        VoucherTagColumn, VoucherType, voucher, voucher_book, voucher_series, voucher_tag,
    },
    errors::{Error, Result},
};
use sea_orm::{QueryOrder, Set, prelude::*};
use std::collections::HashSet;

/// Raw scope identifiers as submitted with an issuance request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopePayload {
    pub book_ids: Vec<String>,
    pub series_id: Option<String>,
    pub tag_id: Option<String>,
}

impl ScopePayload {
    /// Payload for catalog-wide vouchers.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn books<I, S>(book_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            book_ids: book_ids.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn series(series_id: impl Into<String>) -> Self {
        Self {
            series_id: Some(series_id.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn tag(tag_id: impl Into<String>) -> Self {
        Self {
            tag_id: Some(tag_id.into()),
            ..Self::default()
        }
    }

    fn is_empty(&self) -> bool {
        self.book_ids.is_empty() && self.series_id.is_none() && self.tag_id.is_none()
    }

    fn has_blank_identifier(&self) -> bool {
        self.book_ids
            .iter()
            .chain(self.series_id.iter())
            .chain(self.tag_id.iter())
            .any(|id| id.trim().is_empty())
    }

    fn describe(&self) -> String {
        if self.is_empty() {
            return "no identifiers".to_string();
        }
        let mut parts = Vec::new();
        if !self.book_ids.is_empty() {
            parts.push(format!("{} book id(s)", self.book_ids.len()));
        }
        if let Some(series_id) = &self.series_id {
            parts.push(format!("series '{series_id}'"));
        }
        if let Some(tag_id) = &self.tag_id {
            parts.push(format!("tag '{tag_id}'"));
        }
        parts.join(", ")
    }
}

/// Validated scope of a voucher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeBinding {
    SingleBook(String),
    MultipleBooks(Vec<String>),
    Series(String),
    Tag(String),
    AllBooks,
}

const fn expected_cardinality(voucher_type: VoucherType) -> &'static str {
    match voucher_type {
        VoucherType::SingleBook => "exactly one book id",
        VoucherType::MultipleBooks => "at least one distinct book id",
        VoucherType::Series => "exactly one series id",
        VoucherType::BookTag => "exactly one tag id",
        VoucherType::AllBooks => "no scope identifiers",
    }
}

impl ScopeBinding {
    /// Checks the payload against the cardinality rule of `voucher_type`.
    pub fn resolve(voucher_type: VoucherType, payload: ScopePayload) -> Result<Self> {
        let invalid = |found: String| Error::InvalidScopeBinding {
            voucher_type,
            expected: expected_cardinality(voucher_type),
            found,
        };

        if payload.has_blank_identifier() {
            return Err(invalid("a blank identifier".to_string()));
        }
        let found = payload.describe();
        let ScopePayload {
            mut book_ids,
            series_id,
            tag_id,
        } = payload;

        match voucher_type {
            VoucherType::SingleBook => match (book_ids.len(), &series_id, &tag_id) {
                (1, None, None) => book_ids.pop().map(Self::SingleBook).ok_or_else(|| invalid(found)),
                _ => Err(invalid(found)),
            },
            VoucherType::MultipleBooks => {
                if book_ids.is_empty() || series_id.is_some() || tag_id.is_some() {
                    return Err(invalid(found));
                }
                let mut seen = HashSet::new();
                if let Some(duplicate) = book_ids.iter().find(|id| !seen.insert(id.as_str())) {
                    return Err(invalid(format!("duplicate book id '{duplicate}'")));
                }
                Ok(Self::MultipleBooks(book_ids))
            }
            VoucherType::Series => match (book_ids.is_empty(), series_id, tag_id) {
                (true, Some(series_id), None) => Ok(Self::Series(series_id)),
                _ => Err(invalid(found)),
            },
            VoucherType::BookTag => match (book_ids.is_empty(), series_id, tag_id) {
                (true, None, Some(tag_id)) => Ok(Self::Tag(tag_id)),
                _ => Err(invalid(found)),
            },
            VoucherType::AllBooks => {
                if book_ids.is_empty() && series_id.is_none() && tag_id.is_none() {
                    Ok(Self::AllBooks)
                } else {
                    Err(invalid(found))
                }
            }
        }
    }

    #[must_use]
    pub const fn voucher_type(&self) -> VoucherType {
        match self {
            Self::SingleBook(_) => VoucherType::SingleBook,
            Self::MultipleBooks(_) => VoucherType::MultipleBooks,
            Self::Series(_) => VoucherType::Series,
            Self::Tag(_) => VoucherType::BookTag,
            Self::AllBooks => VoucherType::AllBooks,
        }
    }

    /// Whether `book_id` falls inside this scope.
    pub async fn covers(&self, catalog: &dyn Catalog, book_id: &str) -> Result<bool> {
        match self {
            Self::SingleBook(id) => Ok(id == book_id),
            Self::MultipleBooks(ids) => Ok(ids.iter().any(|id| id == book_id)),
            Self::Series(series_id) => Ok(catalog
                .series_of(book_id)
                .await?
                .is_some_and(|series| &series == series_id)),
            Self::Tag(tag_id) => catalog.book_has_tag(book_id, tag_id).await,
            Self::AllBooks => Ok(true),
        }
    }
}

/// Confirms every identifier in the binding exists in the catalog.
pub async fn verify_in_catalog(catalog: &dyn Catalog, binding: &ScopeBinding) -> Result<()> {
    match binding {
        ScopeBinding::SingleBook(book_id) => ensure_book(catalog, book_id).await,
        ScopeBinding::MultipleBooks(book_ids) => {
            for book_id in book_ids {
                ensure_book(catalog, book_id).await?;
            }
            Ok(())
        }
        ScopeBinding::Series(series_id) => {
            if catalog.series_exists(series_id).await? {
                Ok(())
            } else {
                Err(Error::UnknownCatalogEntry {
                    kind: "series",
                    id: series_id.clone(),
                })
            }
        }
        ScopeBinding::Tag(tag_id) => {
            if catalog.tag_exists(tag_id).await? {
                Ok(())
            } else {
                Err(Error::UnknownCatalogEntry {
                    kind: "tag",
                    id: tag_id.clone(),
                })
            }
        }
        ScopeBinding::AllBooks => Ok(()),
    }
}

async fn ensure_book(catalog: &dyn Catalog, book_id: &str) -> Result<()> {
    if catalog.book_exists(book_id).await? {
        Ok(())
    } else {
        Err(Error::UnknownCatalogEntry {
            kind: "book",
            id: book_id.to_string(),
        })
    }
}

/// Writes the association rows for `binding`, scoped to `voucher_id`.
pub async fn persist<C>(conn: &C, voucher_id: Uuid, binding: &ScopeBinding) -> Result<()>
where
    C: ConnectionTrait,
{
    match binding {
        ScopeBinding::SingleBook(book_id) => {
            insert_books(conn, voucher_id, std::slice::from_ref(book_id)).await
        }
        ScopeBinding::MultipleBooks(book_ids) => insert_books(conn, voucher_id, book_ids).await,
        ScopeBinding::Series(series_id) => {
            VoucherSeries::insert(voucher_series::ActiveModel {
                voucher_id: Set(voucher_id),
                series_id: Set(series_id.clone()),
            })
            .exec_without_returning(conn)
            .await?;
            Ok(())
        }
        ScopeBinding::Tag(tag_id) => {
            VoucherTag::insert(voucher_tag::ActiveModel {
                voucher_id: Set(voucher_id),
                tag_id: Set(tag_id.clone()),
            })
            .exec_without_returning(conn)
            .await?;
            Ok(())
        }
        ScopeBinding::AllBooks => Ok(()),
    }
}

async fn insert_books<C>(conn: &C, voucher_id: Uuid, book_ids: &[String]) -> Result<()>
where
    C: ConnectionTrait,
{
    let rows = book_ids.iter().map(|book_id| voucher_book::ActiveModel {
        voucher_id: Set(voucher_id),
        book_id: Set(book_id.clone()),
    });
    VoucherBook::insert_many(rows)
        .exec_without_returning(conn)
        .await?;
    Ok(())
}

/// Reads a voucher's scope back from its association rows.
///
/// Book ids of a `multiple_books` voucher come back sorted.
pub async fn load<C>(conn: &C, voucher: &voucher::Model) -> Result<ScopeBinding>
where
    C: ConnectionTrait,
{
    let missing = || Error::Database {
        message: format!(
            "voucher {} is missing its {} association",
            voucher.id, voucher.voucher_type
        ),
    };

    match voucher.voucher_type {
        VoucherType::SingleBook | VoucherType::MultipleBooks => {
            let mut book_ids: Vec<String> = VoucherBook::find()
                .filter(VoucherBookColumn::VoucherId.eq(voucher.id))
                .order_by_asc(VoucherBookColumn::BookId)
                .all(conn)
                .await?
                .into_iter()
                .map(|row| row.book_id)
                .collect();
            match (voucher.voucher_type, book_ids.len()) {
                (VoucherType::SingleBook, 1) => book_ids.pop().map(ScopeBinding::SingleBook).ok_or_else(missing),
                (VoucherType::MultipleBooks, n) if n > 0 => Ok(ScopeBinding::MultipleBooks(book_ids)),
                _ => Err(missing()),
            }
        }
        VoucherType::Series => VoucherSeries::find()
            .filter(VoucherSeriesColumn::VoucherId.eq(voucher.id))
            .one(conn)
            .await?
            .map(|row| ScopeBinding::Series(row.series_id))
            .ok_or_else(missing),
        VoucherType::BookTag => VoucherTag::find()
            .filter(VoucherTagColumn::VoucherId.eq(voucher.id))
            .one(conn)
            .await?
            .map(|row| ScopeBinding::Tag(row.tag_id))
            .ok_or_else(missing),
        VoucherType::AllBooks => Ok(ScopeBinding::AllBooks),
    }
}

/// Removes every association row of a voucher.
pub async fn remove<C>(conn: &C, voucher_id: Uuid) -> Result<()>
where
    C: ConnectionTrait,
{
    VoucherBook::delete_many()
        .filter(VoucherBookColumn::VoucherId.eq(voucher_id))
        .exec(conn)
        .await?;
    VoucherSeries::delete_many()
        .filter(VoucherSeriesColumn::VoucherId.eq(voucher_id))
        .exec(conn)
        .await?;
    VoucherTag::delete_many()
        .filter(VoucherTagColumn::VoucherId.eq(voucher_id))
        .exec(conn)
        .await?;
    Ok(())
}
