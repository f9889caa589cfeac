//! Logical query construction.
//!
//! A [`Query`] is an ordered list of criteria expressions over *logical*
//! field names, plus sort directives, an offset and a limit. It is rendered
//! into a logical criteria document by [`CriteriaWriter`] and then translated
//! into a native document by the [`QueryMapper`](crate::mapper::QueryMapper).
//!
//! # Query Building
//!
//! ```ignore
//! use docmapper::query::{Criteria, Query, SortDirection};
//!
//! let query = Query::builder()
//!     .filter(Criteria::eq("status", "open"))
//!     .filter(Criteria::gt("votes", 10))
//!     .sort("created_at", SortDirection::Desc)
//!     .limit(20)
//!     .build();
//! ```
//!
//! # Criteria API
//!
//! - Comparison: `eq`, `ne`, `gt`, `gte`, `lt`, `lte`
//! - Membership: `is_in`, `not_in`
//! - Pattern: `regex`, `regex_with_options`
//! - Existence: `exists`, `not_exists`
//! - Logical: `and`, `or`, `nor`
//!
//! Criteria added to the same query are conjoined in call order.

use bson::{Bson, Document, doc};

use crate::{
    error::{DataAccessError, DataAccessResult},
    page::PageRequest,
};

/// Sort direction for query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    /// Ascending order (A to Z, 0 to 9, earliest to latest).
    Asc,
    /// Descending order (Z to A, 9 to 0, latest to earliest).
    Desc,
}

impl SortDirection {
    /// The native sort value, `1` or `-1`.
    pub fn as_i32(&self) -> i32 {
        match self {
            SortDirection::Asc => 1,
            SortDirection::Desc => -1,
        }
    }
}

/// A single sort directive on a logical field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sort {
    /// The field name to sort by.
    pub field: String,
    /// The sort direction.
    pub direction: SortDirection,
}

impl Sort {
    pub fn asc(field: impl Into<String>) -> Self {
        Sort { field: field.into(), direction: SortDirection::Asc }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Sort { field: field.into(), direction: SortDirection::Desc }
    }
}

/// Field comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldOp {
    /// Equal to (rendered as a bare value).
    Eq,
    /// Not equal to (`$ne`).
    Ne,
    /// Greater than (`$gt`).
    Gt,
    /// Greater than or equal to (`$gte`).
    Gte,
    /// Less than (`$lt`).
    Lt,
    /// Less than or equal to (`$lte`).
    Lte,
    /// Member of the given array (`$in`).
    In,
    /// Not a member of the given array (`$nin`).
    Nin,
    /// Matches the given regular expression (`$regex`).
    Regex,
}

impl FieldOp {
    /// The operator keyword, or `None` for plain equality.
    pub fn keyword(&self) -> Option<&'static str> {
        match self {
            FieldOp::Eq => None,
            FieldOp::Ne => Some("$ne"),
            FieldOp::Gt => Some("$gt"),
            FieldOp::Gte => Some("$gte"),
            FieldOp::Lt => Some("$lt"),
            FieldOp::Lte => Some("$lte"),
            FieldOp::In => Some("$in"),
            FieldOp::Nin => Some("$nin"),
            FieldOp::Regex => Some("$regex"),
        }
    }
}

/// A criteria expression over logical field names.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Logical AND of multiple expressions (all must match).
    And(Vec<Expr>),
    /// Logical OR of multiple expressions (any must match).
    Or(Vec<Expr>),
    /// Logical NOR of multiple expressions (none may match).
    Nor(Vec<Expr>),
    /// Checks if a field exists or doesn't exist.
    Exists(String, bool),
    /// Field comparison expression.
    Field {
        /// The logical field path.
        field: String,
        /// The comparison operator.
        op: FieldOp,
        /// The operand.
        value: Bson,
    },
    /// A criteria document written by hand, merged as-is.
    Raw(Document),
}

impl Expr {
    /// Creates a field comparison expression.
    pub fn field(field: String, op: FieldOp, value: Bson) -> Self {
        Expr::Field { field, op, value }
    }

    /// Combines this expression with another using logical AND.
    ///
    /// If this expression is already an AND, the other expression is appended
    /// to the list. Otherwise, a new AND expression is created.
    pub fn and(self, other: Expr) -> Self {
        match self {
            Expr::And(mut list) => {
                list.push(other);
                Expr::And(list)
            }
            _ => Expr::And(vec![self, other]),
        }
    }

    /// Combines this expression with another using logical OR.
    ///
    /// If this expression is already an OR, the other expression is appended
    /// to the list. Otherwise, a new OR expression is created.
    pub fn or(self, other: Expr) -> Self {
        match self {
            Expr::Or(mut list) => {
                list.push(other);
                Expr::Or(list)
            }
            _ => Expr::Or(vec![self, other]),
        }
    }
}

/// Helper for constructing criteria expressions.
///
/// All methods accept field names as `Into<String>` and values as
/// `Into<Bson>`.
pub struct Criteria;

impl Criteria {
    /// Matches documents where the field equals the value.
    pub fn eq(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Eq, value.into())
    }

    /// Matches documents where the field does not equal the value.
    pub fn ne(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Ne, value.into())
    }

    pub fn gt(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Gt, value.into())
    }

    pub fn gte(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Gte, value.into())
    }

    pub fn lt(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Lt, value.into())
    }

    pub fn lte(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Lte, value.into())
    }

    /// Matches documents where the field equals any of the values.
    pub fn is_in<V: Into<Bson>>(field: impl Into<String>, values: impl IntoIterator<Item = V>) -> Expr {
        Expr::field(
            field.into(),
            FieldOp::In,
            Bson::Array(values.into_iter().map(Into::into).collect()),
        )
    }

    /// Matches documents where the field equals none of the values.
    pub fn not_in<V: Into<Bson>>(field: impl Into<String>, values: impl IntoIterator<Item = V>) -> Expr {
        Expr::field(
            field.into(),
            FieldOp::Nin,
            Bson::Array(values.into_iter().map(Into::into).collect()),
        )
    }

    /// Matches string fields against a regular expression.
    pub fn regex(field: impl Into<String>, pattern: impl Into<String>) -> Expr {
        Expr::field(field.into(), FieldOp::Regex, Bson::String(pattern.into()))
    }

    /// Like [`Criteria::regex`], with option flags such as `"i"`.
    pub fn regex_with_options(
        field: impl Into<String>,
        pattern: impl Into<String>,
        options: impl Into<String>,
    ) -> Expr {
        let (field, pattern, options): (String, String, String) =
            (field.into(), pattern.into(), options.into());

        Expr::Raw(doc! {
            field: { "$regex": pattern, "$options": options },
        })
    }

    pub fn exists(field: impl Into<String>) -> Expr {
        Expr::Exists(field.into(), true)
    }

    pub fn not_exists(field: impl Into<String>) -> Expr {
        Expr::Exists(field.into(), false)
    }

    pub fn and(exprs: impl IntoIterator<Item = Expr>) -> Expr {
        Expr::And(exprs.into_iter().collect())
    }

    pub fn or(exprs: impl IntoIterator<Item = Expr>) -> Expr {
        Expr::Or(exprs.into_iter().collect())
    }

    pub fn nor(exprs: impl IntoIterator<Item = Expr>) -> Expr {
        Expr::Nor(exprs.into_iter().collect())
    }
}

/// A logical query: conjoined criteria, sort directives, offset and limit.
///
/// Sort directives are additive. Sorting the same field twice records both
/// directives; in the rendered sort document the later direction wins while
/// the field keeps the position of its first directive.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    criteria: Vec<Expr>,
    sort: Vec<Sort>,
    offset: Option<usize>,
    limit: Option<usize>,
}

impl Query {
    /// Creates a new empty query matching every document.
    pub fn new() -> Self {
        Query::default()
    }

    /// Creates a query with a single criteria expression.
    pub fn matching(expr: Expr) -> Self {
        Query { criteria: vec![expr], ..Query::default() }
    }

    /// Creates a query from a hand-written criteria document.
    pub fn from_document(document: Document) -> Self {
        Query::matching(Expr::Raw(document))
    }

    /// Creates a new query builder for fluent construction.
    pub fn builder() -> QueryBuilder {
        QueryBuilder::new()
    }

    /// Appends a criteria expression, conjoined with the existing ones.
    pub fn add_criteria(&mut self, expr: Expr) -> &mut Self {
        self.criteria.push(expr);
        self
    }

    /// Appends a sort directive.
    pub fn with_sort(&mut self, sort: Sort) -> &mut Self {
        if self.sort.iter().any(|existing| existing.field == sort.field) {
            tracing::warn!(
                "Field {} is already sorted; sort directives accumulate and the last direction wins",
                sort.field
            );
        }

        self.sort.push(sort);
        self
    }

    /// Applies the request's offset, size and sorts. A page size of 0 is
    /// raised to 1, since a zero limit reads as "unlimited" to the stores.
    pub fn with_page(&mut self, page: &PageRequest) -> &mut Self {
        self.offset = Some(page.offset());
        self.limit = Some(page.per_page.max(1));

        for sort in &page.sort {
            self.with_sort(sort.clone());
        }

        self
    }

    pub fn set_limit(&mut self, limit: usize) -> &mut Self {
        self.limit = Some(limit);
        self
    }

    pub fn set_offset(&mut self, offset: usize) -> &mut Self {
        self.offset = Some(offset);
        self
    }

    pub fn criteria(&self) -> &[Expr] {
        &self.criteria
    }

    pub fn sorts(&self) -> &[Sort] {
        &self.sort
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    pub fn offset(&self) -> Option<usize> {
        self.offset
    }

    /// The same criteria without sort, offset or limit.
    pub fn unpaged(&self) -> Query {
        Query { criteria: self.criteria.clone(), ..Query::default() }
    }

    /// Renders the criteria into a single logical document.
    ///
    /// Operator documents on the same field with distinct operators are
    /// merged; any other repeated key is moved into a `$and` list.
    pub fn criteria_document(&self) -> DataAccessResult<Document> {
        let mut writer = CriteriaWriter;
        let fragments = self
            .criteria
            .iter()
            .map(|expr| writer.visit_expr(expr))
            .collect::<DataAccessResult<Vec<_>>>()?;

        Ok(conjoin(fragments))
    }

    /// Renders the sort directives, or `None` if there are none.
    pub fn sort_document(&self) -> Option<Document> {
        if self.sort.is_empty() {
            return None;
        }

        let mut document = Document::new();
        for sort in &self.sort {
            document.insert(sort.field.clone(), sort.direction.as_i32());
        }

        Some(document)
    }
}

fn is_operator_document(value: &Bson) -> bool {
    match value {
        Bson::Document(document) => {
            !document.is_empty() && document.keys().all(|key| key.starts_with('$'))
        }
        _ => false,
    }
}

fn conjoin(fragments: Vec<Document>) -> Document {
    let mut merged = Document::new();
    let mut overflow = Vec::new();

    for fragment in fragments {
        for (key, value) in fragment {
            let Some(existing) = merged.get_mut(&key) else {
                merged.insert(key, value);
                continue;
            };

            let combinable = is_operator_document(existing)
                && is_operator_document(&value)
                && !key.starts_with('$');

            match (existing, value) {
                (Bson::Document(current), Bson::Document(extra))
                    if combinable && extra.keys().all(|op| !current.contains_key(op)) =>
                {
                    for (op, operand) in extra {
                        current.insert(op, operand);
                    }
                }
                (_, value) => overflow.push(Bson::Document(doc! { key: value })),
            }
        }
    }

    if !overflow.is_empty() {
        match merged.get_mut("$and") {
            Some(Bson::Array(list)) => list.extend(overflow),
            _ => {
                merged.insert("$and", overflow);
            }
        }
    }

    merged
}

/// Fluent by-value builder for [`Query`].
#[derive(Debug, Clone, Default)]
pub struct QueryBuilder {
    query: Query,
}

impl QueryBuilder {
    /// Creates a new query builder.
    pub fn new() -> Self {
        QueryBuilder { query: Query::default() }
    }

    /// Adds a criteria expression; repeated calls accumulate.
    pub fn filter(mut self, filter: Expr) -> Self {
        self.query.add_criteria(filter);
        self
    }

    /// Sets the maximum number of documents to return.
    pub fn limit(mut self, limit: usize) -> Self {
        self.query.set_limit(limit);
        self
    }

    /// Sets the number of documents to skip.
    pub fn offset(mut self, offset: usize) -> Self {
        self.query.set_offset(offset);
        self
    }

    /// Appends a sort directive.
    pub fn sort(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.query.with_sort(Sort { field: field.into(), direction });
        self
    }

    /// Builds and returns the final query.
    pub fn build(self) -> Query {
        self.query
    }
}

/// Visitor over criteria expressions.
pub trait QueryVisitor {
    type Output;
    type Error: Into<DataAccessError>;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error>;
    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error>;
    fn visit_nor(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error>;
    fn visit_exists(
        &mut self,
        field: &str,
        should_exist: bool,
    ) -> Result<Self::Output, Self::Error>;
    fn visit_field(
        &mut self,
        field: &str,
        op: &FieldOp,
        value: &Bson,
    ) -> Result<Self::Output, Self::Error>;
    fn visit_raw(&mut self, document: &Document) -> Result<Self::Output, Self::Error>;

    fn visit_expr(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error> {
        match expr {
            Expr::And(exprs) => self.visit_and(exprs),
            Expr::Or(exprs) => self.visit_or(exprs),
            Expr::Nor(exprs) => self.visit_nor(exprs),
            Expr::Exists(field, should_exist) => self.visit_exists(field, *should_exist),
            Expr::Field { field, op, value } => self.visit_field(field, op, value),
            Expr::Raw(document) => self.visit_raw(document),
        }
    }
}

/// Renders criteria expressions into a logical criteria document.
pub struct CriteriaWriter;

impl CriteriaWriter {
    fn visit_list(&mut self, keyword: &str, exprs: &[Expr]) -> DataAccessResult<Document> {
        Ok(doc! {
            keyword: exprs
                .iter()
                .map(|expr| self.visit_expr(expr))
                .collect::<DataAccessResult<Vec<_>>>()?,
        })
    }
}

impl QueryVisitor for CriteriaWriter {
    type Output = Document;
    type Error = DataAccessError;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        self.visit_list("$and", exprs)
    }

    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        self.visit_list("$or", exprs)
    }

    fn visit_nor(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        self.visit_list("$nor", exprs)
    }

    fn visit_exists(&mut self, field: &str, should_exist: bool) -> Result<Self::Output, Self::Error> {
        Ok(doc! {
            field: { "$exists": should_exist },
        })
    }

    fn visit_field(&mut self, field: &str, op: &FieldOp, value: &Bson) -> Result<Self::Output, Self::Error> {
        match (op, value) {
            (FieldOp::In | FieldOp::Nin, Bson::Array(_)) => {}
            (FieldOp::In | FieldOp::Nin, _) => {
                return Err(DataAccessError::InvalidQuery(format!(
                    "{} on {} requires an array operand",
                    op.keyword().unwrap_or_default(),
                    field
                )));
            }
            (FieldOp::Regex, Bson::String(_)) => {}
            (FieldOp::Regex, _) => {
                return Err(DataAccessError::InvalidQuery(format!(
                    "$regex on {} requires a string pattern",
                    field
                )));
            }
            _ => {}
        }

        Ok(match op.keyword() {
            None => doc! { field: value.clone() },
            Some(keyword) => doc! { field: { keyword: value.clone() } },
        })
    }

    fn visit_raw(&mut self, document: &Document) -> Result<Self::Output, Self::Error> {
        Ok(document.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn criteria_conjoin_in_call_order() {
        let query = Query::builder()
            .filter(Criteria::eq("status", "open"))
            .filter(Criteria::regex("title", "^why"))
            .filter(Criteria::not_in("tags", ["spam", "ads"]))
            .build();

        assert_eq!(
            query.criteria_document().unwrap(),
            doc! {
                "status": "open",
                "title": { "$regex": "^why" },
                "tags": { "$nin": ["spam", "ads"] },
            }
        );
    }

    #[test]
    fn range_operators_on_one_field_merge() {
        let mut query = Query::new();
        query
            .add_criteria(Criteria::gt("votes", 1))
            .add_criteria(Criteria::lt("votes", 9));

        assert_eq!(
            query.criteria_document().unwrap(),
            doc! { "votes": { "$gt": 1, "$lt": 9 } }
        );
    }

    #[test]
    fn conflicting_criteria_move_into_and() {
        let mut query = Query::new();
        query
            .add_criteria(Criteria::eq("status", "open"))
            .add_criteria(Criteria::eq("status", "closed"))
            .add_criteria(Criteria::or([Criteria::eq("a", 1)]))
            .add_criteria(Criteria::or([Criteria::eq("b", 2)]));

        assert_eq!(
            query.criteria_document().unwrap(),
            doc! {
                "status": "open",
                "$or": [{ "a": 1 }],
                "$and": [{ "status": "closed" }, { "$or": [{ "b": 2 }] }],
            }
        );
    }

    #[test]
    fn logical_expressions_render_recursively() {
        let expr = Criteria::eq("a", 1)
            .or(Criteria::nor([Criteria::exists("b"), Criteria::lte("c", 3)]));

        assert_eq!(
            Query::matching(expr).criteria_document().unwrap(),
            doc! {
                "$or": [
                    { "a": 1 },
                    { "$nor": [{ "b": { "$exists": true } }, { "c": { "$lte": 3 } }] },
                ]
            }
        );
    }

    #[test]
    fn membership_requires_an_array() {
        let query = Query::matching(Expr::field("tags".into(), FieldOp::In, Bson::Int32(1)));

        assert!(matches!(
            query.criteria_document(),
            Err(DataAccessError::InvalidQuery(_))
        ));
    }

    #[test]
    fn repeated_sorts_accumulate() {
        let query = Query::builder()
            .sort("age", SortDirection::Asc)
            .sort("name", SortDirection::Asc)
            .sort("age", SortDirection::Desc)
            .build();

        assert_eq!(query.sorts().len(), 3);
        assert_eq!(query.sort_document(), Some(doc! { "age": -1, "name": 1 }));
    }

    #[test]
    fn zero_sized_pages_still_limit() {
        let mut query = Query::new();
        query.with_page(&PageRequest::new(2, 0));

        assert_eq!(query.limit(), Some(1));
        assert_eq!(query.offset(), Some(0));
    }

    #[test]
    fn unpaged_drops_sort_offset_and_limit() {
        let query = Query::builder()
            .filter(Criteria::eq("a", 1))
            .sort("a", SortDirection::Asc)
            .offset(10)
            .limit(5)
            .build();

        let unpaged = query.unpaged();
        assert_eq!(unpaged.criteria(), query.criteria());
        assert_eq!(unpaged.sort_document(), None);
        assert_eq!(unpaged.limit(), None);
        assert_eq!(unpaged.offset(), None);
    }
}
