//! Query language, results, and identifier-predicate expansion.

use crate::{Entity, Identifier};
use std::cmp::Ordering as CmpOrdering;
use std::collections::HashMap;

/// A literal value a [`Filter`] compares a property against.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// UTF-8 string.
    Str(String),
    /// 64-bit signed integer.
    Int(i64),
    /// 64-bit float.
    Float(f64),
    /// Boolean.
    Bool(bool),
    /// A dual identifier — compared per the identifier-expansion rule (see
    /// [`Filter::equal_to_identifier`]).
    Identifier(Identifier),
}

/// Binary comparison operator for [`Filter::Compare`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

/// A filter expression over entity properties.
///
/// Composed of property references, literal values, and the operators listed
/// supported: `and`, `or`, `negated`, `equalTo`, `containedIn`, `match`
/// (regex), and the four comparison operators.
///
/// # Invariant
///
/// `EqualTo`/`ContainedIn`/`Match`/`Compare` always have a property on one
/// side and a value (or value list) on the other — never two subexpressions.
/// This is enforced structurally: those variants don't accept a `Filter` as
/// an operand.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Conjunction of sub-filters.
    And(Vec<Filter>),
    /// Disjunction of sub-filters.
    Or(Vec<Filter>),
    /// Negation of a sub-filter.
    Not(Box<Filter>),
    /// `property == value`.
    EqualTo { property: String, value: Value },
    /// `value in property` (property holds a collection) or `property in values`.
    ContainedIn { property: String, values: Vec<Value> },
    /// Regex match against a string property.
    Match { property: String, pattern: String },
    /// Ordered comparison against a value.
    Compare {
        property: String,
        op: CompareOp,
        value: Value,
    },
}

impl Filter {
    /// Builds the identifier-predicate expansion a dual-keyed lookup requires:
    ///
    /// `identifierTypeTag AND (remote match OR local match)`
    ///
    /// because a record may be locatable by either of its two key components
    /// independently, and a disk engine must check both columns.
    pub fn equal_to_identifier(property: &str, type_tag_property: &str, id: &Identifier) -> Filter {
        let mut disjuncts = Vec::new();
        if let Some(remote) = id.remote() {
            disjuncts.push(Filter::EqualTo {
                property: format!("{property}.remote"),
                value: Value::Int(remote),
            });
        }
        if let Some(local) = id.local() {
            disjuncts.push(Filter::EqualTo {
                property: format!("{property}.local"),
                value: Value::Str(local.to_string()),
            });
        }
        Filter::And(vec![
            Filter::EqualTo {
                property: type_tag_property.to_string(),
                value: Value::Str(id.type_tag().to_string()),
            },
            Filter::Or(disjuncts),
        ])
    }

    /// Same expansion as [`Filter::equal_to_identifier`], disjoined over a
    /// set of identifiers (`containedIn` on the identifier property).
    pub fn contained_in_identifiers(property: &str, type_tag_property: &str, ids: &[Identifier]) -> Filter {
        Filter::Or(
            ids.iter()
                .map(|id| Filter::equal_to_identifier(property, type_tag_property, id))
                .collect(),
        )
    }

    /// Evaluates this filter against an in-memory entity, resolving
    /// properties through [`Entity::property`].
    ///
    /// Entities that don't override `property` for a name referenced here
    /// simply never match on it (`EqualTo`/`ContainedIn`/`Match`/`Compare`
    /// all treat a missing property as non-matching). Identifier-predicate
    /// filters built by [`Filter::equal_to_identifier`] work like any other
    /// property comparison — they only match if the entity exposes the
    /// `"<property>.remote"`/`"<property>.local"`/type-tag properties the
    /// expansion references.
    pub fn matches<E: Entity>(&self, entity: &E) -> bool {
        match self {
            Filter::And(clauses) => clauses.iter().all(|f| f.matches(entity)),
            Filter::Or(clauses) => clauses.iter().any(|f| f.matches(entity)),
            Filter::Not(inner) => !inner.matches(entity),
            Filter::EqualTo { property, value } => entity.property(property).as_ref() == Some(value),
            Filter::ContainedIn { property, values } => entity
                .property(property)
                .is_some_and(|actual| values.contains(&actual)),
            Filter::Match { property, pattern } => match entity.property(property) {
                Some(Value::Str(s)) => regex::Regex::new(pattern).is_ok_and(|re| re.is_match(&s)),
                _ => false,
            },
            Filter::Compare { property, op, value } => entity
                .property(property)
                .and_then(|actual| actual.partial_cmp(value))
                .is_some_and(|ordering| match op {
                    CompareOp::Lt => ordering == CmpOrdering::Less,
                    CompareOp::Le => ordering != CmpOrdering::Greater,
                    CompareOp::Gt => ordering == CmpOrdering::Greater,
                    CompareOp::Ge => ordering != CmpOrdering::Less,
                }),
        }
    }
}

impl PartialOrd for Value {
    /// Ordering between two values of the same variant; `None` across
    /// mismatched variants (a `Compare` filter against the wrong type never
    /// matches rather than panicking) and across `Identifier` values (they
    /// have no natural order).
    fn partial_cmp(&self, other: &Value) -> Option<CmpOrdering> {
        match (self, other) {
            (Value::Str(a), Value::Str(b)) => a.partial_cmp(b),
            (Value::Int(a), Value::Int(b)) => a.partial_cmp(b),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::Bool(a), Value::Bool(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

/// A single `{property, ascending}` sort clause.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderClause {
    /// Property to sort by.
    pub property: String,
    /// Ascending if `true`, descending otherwise.
    pub ascending: bool,
}

impl OrderClause {
    /// Ascending sort on `property`.
    pub fn asc(property: impl Into<String>) -> Self {
        Self { property: property.into(), ascending: true }
    }

    /// Descending sort on `property`.
    pub fn desc(property: impl Into<String>) -> Self {
        Self { property: property.into(), ascending: false }
    }

    /// Two descriptors for an identifier-ordered clause: remote first so an
    /// absent remote component falls through to the local value, per §4.6.
    pub fn by_identifier(property: &str, ascending: bool) -> Vec<OrderClause> {
        vec![
            OrderClause { property: format!("{property}.remote"), ascending },
            OrderClause { property: format!("{property}.local"), ascending },
        ]
    }
}

/// A filter/sort/paging request against a store.
#[derive(Debug, Clone, Default)]
pub struct Query {
    filter: Option<Filter>,
    order: Vec<OrderClause>,
    offset: Option<usize>,
    limit: Option<usize>,
    grouped_by: Option<String>,
    context: Option<String>,
}

impl Query {
    /// An unfiltered query matching every entity (`search(.all)` in spec prose).
    pub fn all() -> Self {
        Self::default()
    }

    /// A single-entity `get` query for `id`.
    pub fn by_identifier(id: &Identifier) -> Self {
        Self {
            filter: Some(Filter::equal_to_identifier("identifier", "type_uid", id)),
            ..Default::default()
        }
    }

    /// Builder: attach a filter.
    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Builder: attach sort order.
    pub fn with_order(mut self, order: Vec<OrderClause>) -> Self {
        self.order = order;
        self
    }

    /// Builder: attach offset/limit paging.
    pub fn with_page(mut self, offset: Option<usize>, limit: Option<usize>) -> Self {
        self.offset = offset;
        self.limit = limit;
        self
    }

    /// Builder: group results by a property.
    pub fn with_group(mut self, property: impl Into<String>) -> Self {
        self.grouped_by = Some(property.into());
        self
    }

    /// Builder: attach a free-form context tag (used by `RemoteStore` as part
    /// of the request-config computation).
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// The filter, if any.
    pub fn filter(&self) -> Option<&Filter> {
        self.filter.as_ref()
    }

    /// Sort clauses.
    pub fn order(&self) -> &[OrderClause] {
        &self.order
    }

    /// Paging offset.
    pub fn offset(&self) -> Option<usize> {
        self.offset
    }

    /// Paging limit.
    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    /// Group-by property.
    pub fn grouped_by(&self) -> Option<&str> {
        self.grouped_by.as_deref()
    }

    /// Free-form context tag.
    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    /// `true` when this query has a fully enumerable identifier set,
    /// deterministic order, and no paging — the condition `CacheStore::search`
    /// uses to decide whether it's worth probing the hot tier (§4.8).
    pub fn is_enumerable_identifier_lookup(&self) -> bool {
        self.offset.is_none() && self.limit.is_none() && self.extract_identifiers().is_some()
    }

    /// If this query is exactly an `equalTo`/`containedIn` predicate over the
    /// identifier property (optionally wrapped in the expansion produced by
    /// [`Filter::equal_to_identifier`]/[`Filter::contained_in_identifiers`]),
    /// returns the set of identifiers it enumerates.
    pub fn extract_identifiers(&self) -> Option<Vec<Identifier>> {
        fn from_and(and: &[Filter]) -> Option<Identifier> {
            let type_tag = and.iter().find_map(|f| match f {
                Filter::EqualTo { value: Value::Str(s), .. } => Some(s.clone()),
                _ => None,
            })?;
            let or = and.iter().find_map(|f| match f {
                Filter::Or(clauses) => Some(clauses),
                _ => None,
            })?;
            let mut remote = None;
            let mut local = None;
            for clause in or {
                match clause {
                    Filter::EqualTo { property, value: Value::Int(v) } if property.ends_with(".remote") => {
                        remote = Some(*v)
                    }
                    Filter::EqualTo { property, value: Value::Str(v) } if property.ends_with(".local") => {
                        local = Some(v.clone())
                    }
                    _ => {}
                }
            }
            Identifier::try_new(type_tag, remote, local)
        }

        match self.filter.as_ref()? {
            Filter::And(clauses) => from_and(clauses).map(|id| vec![id]),
            Filter::Or(clauses) => {
                let mut ids = Vec::with_capacity(clauses.len());
                for clause in clauses {
                    match clause {
                        Filter::And(and) => ids.push(from_and(and)?),
                        _ => return None,
                    }
                }
                Some(ids)
            }
            _ => None,
        }
    }

    /// Applies this query's order, paging, and group-by to an
    /// already-filtered candidate set.
    ///
    /// Callers are responsible for filtering first — via [`Filter::matches`]
    /// for a full scan, or an identifier-set fast path that bypasses
    /// filtering entirely (see [`Query::extract_identifiers`]). This keeps
    /// `materialize` usable by both paths: a KV-backed disk engine with no
    /// native predicate support scans + filters, then calls this for the
    /// rest.
    pub fn materialize<E: Entity>(&self, entries: Vec<E>) -> QueryResult<E> {
        let mut results = entries;

        for clause in self.order() {
            let property = clause.property.clone();
            let ascending = clause.ascending;
            results.sort_by(|a, b| {
                let ordering = match (a.property(&property), b.property(&property)) {
                    (Some(av), Some(bv)) => av.partial_cmp(&bv).unwrap_or(CmpOrdering::Equal),
                    (Some(_), None) => CmpOrdering::Less,
                    (None, Some(_)) => CmpOrdering::Greater,
                    (None, None) => CmpOrdering::Equal,
                };
                if ascending { ordering } else { ordering.reverse() }
            });
        }

        let offset = self.offset().unwrap_or(0);
        let results: Vec<E> = match self.limit() {
            Some(limit) => results.into_iter().skip(offset).take(limit).collect(),
            None => results.into_iter().skip(offset).collect(),
        };

        match self.grouped_by() {
            Some(property) => {
                let mut groups: HashMap<String, Vec<E>> = HashMap::new();
                for entity in results {
                    let key = match entity.property(property) {
                        Some(value) => format!("{value:?}"),
                        None => String::new(),
                    };
                    groups.entry(key).or_default().push(entity);
                }
                QueryResult::Grouped(groups)
            }
            None => QueryResult::Flat(results),
        }
    }
}

/// Pagination metadata a remote payload may describe.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PaginationMeta {
    /// Total number of matching records on the server, if reported.
    pub total: Option<usize>,
    /// Opaque cursor for the next page, if any.
    pub next_cursor: Option<String>,
}

/// Metadata accompanying a [`QueryResult`]: paging info plus the root
/// identifier set distinguishing top-level results from
/// entities inlined purely as relationship hydration.
#[derive(Debug, Clone, Default)]
pub struct QueryResultMeta {
    /// Pagination info, if the source reported any.
    pub pagination: Option<PaginationMeta>,
    /// The subset of identifiers the source designates as top-level results.
    /// `None` means "everything in the result is a root" (the common case for
    /// local stores).
    pub root_identifiers: Option<Vec<Identifier>>,
}

/// The result of a `search`: either a flat ordered sequence, or a mapping
/// from group key to sequence when `Query::grouped_by` was set.
#[derive(Debug, Clone)]
pub enum QueryResult<T> {
    /// Flat ordered sequence of entities.
    Flat(Vec<T>),
    /// Entities bucketed by group key, each bucket internally ordered.
    Grouped(HashMap<String, Vec<T>>),
}

impl<T> QueryResult<T> {
    /// Flattens the result into a single `Vec`, discarding group boundaries.
    pub fn into_flat(self) -> Vec<T> {
        match self {
            QueryResult::Flat(v) => v,
            QueryResult::Grouped(map) => map.into_values().flatten().collect(),
        }
    }

    /// Number of entities across all groups (or the flat sequence).
    pub fn len(&self) -> usize {
        match self {
            QueryResult::Flat(v) => v.len(),
            QueryResult::Grouped(map) => map.values().map(Vec::len).sum(),
        }
    }

    /// Whether the result contains no entities.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn by_identifier_expands_to_type_tag_and_disjunction() {
        let id = Identifier::new("widget", Some(7), Some("L1"));
        let query = Query::by_identifier(&id);
        let extracted = query.extract_identifiers().expect("identifiers");
        assert_eq!(extracted, vec![id]);
    }

    #[test]
    fn enumerable_lookup_requires_no_paging() {
        let id = Identifier::from_remote("widget", 1);
        let query = Query::by_identifier(&id);
        assert!(query.is_enumerable_identifier_lookup());

        let paged = query.with_page(Some(0), Some(10));
        assert!(!paged.is_enumerable_identifier_lookup());
    }

    #[test]
    fn contained_in_extracts_every_identifier() {
        let ids = vec![Identifier::from_remote("widget", 1), Identifier::from_local("widget", "L9")];
        let filter = Filter::contained_in_identifiers("identifier", "type_uid", &ids);
        let query = Query::all().with_filter(filter);
        let extracted = query.extract_identifiers().expect("identifiers");
        assert_eq!(extracted, ids);
    }

    #[test]
    fn query_result_len_counts_across_groups() {
        let mut grouped = HashMap::new();
        grouped.insert("a".to_string(), vec![1, 2]);
        grouped.insert("b".to_string(), vec![3]);
        let result = QueryResult::Grouped(grouped);
        assert_eq!(result.len(), 3);
    }

    #[derive(Clone)]
    struct Gadget {
        id: Identifier,
        rating: i64,
        tag: String,
    }

    impl Entity for Gadget {
        fn identifier(&self) -> &Identifier {
            &self.id
        }

        fn merging(self, other: Self) -> Self {
            other
        }

        fn property(&self, name: &str) -> Option<Value> {
            match name {
                "rating" => Some(Value::Int(self.rating)),
                "tag" => Some(Value::Str(self.tag.clone())),
                _ => None,
            }
        }
    }

    #[test]
    fn equal_to_matches_resolved_property() {
        let gadget = Gadget { id: Identifier::from_local("gadget", "L1"), rating: 4, tag: "red".into() };
        let filter = Filter::EqualTo { property: "tag".into(), value: Value::Str("red".into()) };
        assert!(filter.matches(&gadget));

        let filter = Filter::EqualTo { property: "tag".into(), value: Value::Str("blue".into()) };
        assert!(!filter.matches(&gadget));
    }

    #[test]
    fn compare_and_missing_property_never_matches() {
        let gadget = Gadget { id: Identifier::from_local("gadget", "L1"), rating: 4, tag: "red".into() };
        let filter = Filter::Compare { property: "rating".into(), op: CompareOp::Ge, value: Value::Int(3) };
        assert!(filter.matches(&gadget));

        let filter = Filter::Compare { property: "missing".into(), op: CompareOp::Ge, value: Value::Int(3) };
        assert!(!filter.matches(&gadget));
    }

    #[test]
    fn and_or_not_compose_over_resolved_properties() {
        let gadget = Gadget { id: Identifier::from_local("gadget", "L1"), rating: 4, tag: "red".into() };
        let filter = Filter::And(vec![
            Filter::EqualTo { property: "tag".into(), value: Value::Str("red".into()) },
            Filter::Not(Box::new(Filter::EqualTo { property: "rating".into(), value: Value::Int(1) })),
        ]);
        assert!(filter.matches(&gadget));
    }
}
