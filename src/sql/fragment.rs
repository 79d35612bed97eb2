//! [SQLFragment]: an immutable, staged textual query builder (spec §4.7).
//!
//! Unlike the rest of the SQL layer, a fragment never builds a typed
//! AST — it carries raw SQL text plus the one piece of state that
//! matters, `preceding`, and decides whether the next clause can be
//! appended in place or needs the fragment wrapped as a subquery.

use std::fmt;

/// The nine clause kinds a fragment can be staged at, in the order
/// they must appear in a single `SELECT`. `Union` sits after `Select`
/// since it combines two already-projected queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentKind {
    From,
    Join,
    Where,
    Group,
    Having,
    Order,
    Limit,
    Offset,
    Select,
    Union,
}

impl FragmentKind {
    /// The clause kind that must already be staged before this one can
    /// append directly. `From` has none — appending a `From` clause to
    /// anything always wraps as a subquery.
    fn preceding(self) -> Option<FragmentKind> {
        use FragmentKind::*;
        match self {
            From => None,
            Join => Some(From),
            Where => Some(Join),
            Group => Some(Where),
            Having => Some(Group),
            Order => Some(Having),
            Limit => Some(Order),
            Offset => Some(Limit),
            Select => Some(Offset),
            Union => Some(Select),
        }
    }
}

/// A staged SQL fragment: a `kind`, the SQL text built so far, and the
/// table/subquery name used when wrapping as a subquery.
#[derive(Debug, Clone)]
pub struct SQLFragment {
    kind: FragmentKind,
    sql: String,
    alias_counter: u32,
}

impl fmt::Display for SQLFragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.sql)
    }
}

impl SQLFragment {
    /// Starts a fragment at `From`, naming `table` as the source.
    pub fn from_table(table: &str) -> SQLFragment {
        SQLFragment { kind: FragmentKind::From, sql: format!("FROM {table}"), alias_counter: 0 }
    }

    /// Starts a fragment at `From`, wrapping a raw subquery string.
    pub fn from_subquery(sql: &str, alias: &str) -> SQLFragment {
        SQLFragment { kind: FragmentKind::From, sql: format!("FROM ({sql}) AS {alias}"), alias_counter: 0 }
    }

    pub fn kind(&self) -> FragmentKind {
        self.kind
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    fn next_alias(&mut self) -> String {
        self.alias_counter += 1;
        format!("subquery_{}", self.alias_counter)
    }

    /// The general advance rule (spec §4.7):
    /// 1. Same kind, no part to append -> unchanged.
    /// 2. `self`'s kind is exactly `target`'s preceding kind -> append in place.
    /// 3. `target` has no preceding kind (i.e. `target == From`) -> wrap
    ///    `self` as a `SELECT * FROM (...)` subquery and restart there.
    /// 4. Otherwise, recursively advance to `target`'s preceding kind
    ///    with no part, then append.
    pub fn advance(mut self, target: FragmentKind, part: Option<&str>) -> SQLFragment {
        if self.kind == target && part.is_none() {
            return self;
        }
        if Some(self.kind) == target.preceding() {
            return self.append(target, part);
        }
        match target.preceding() {
            None => {
                let alias = self.next_alias();
                let wrapped = SQLFragment::from_subquery(&format!("SELECT * {}", self.sql), &alias);
                wrapped.append(target, part)
            }
            Some(preceding) => {
                let advanced = self.advance(preceding, None);
                advanced.append(target, part)
            }
        }
    }

    /// Appends `part` for `target`'s clause, or — when `part` is
    /// `None` — just advances `kind` without touching the SQL text.
    /// The `None` case only happens mid-recursion in [Self::advance],
    /// stepping through clause kinds that were never actually staged.
    fn append(mut self, target: FragmentKind, part: Option<&str>) -> SQLFragment {
        if let Some(part) = part {
            self.sql = match target {
                FragmentKind::From => self.sql,
                FragmentKind::Join => format!("{} {part}", self.sql),
                FragmentKind::Where => format!("{} WHERE {part}", self.sql),
                FragmentKind::Group => format!("{} GROUP BY {part}", self.sql),
                FragmentKind::Having => format!("{} HAVING {part}", self.sql),
                FragmentKind::Order => format!("{} ORDER BY {part}", self.sql),
                FragmentKind::Limit => format!("{} LIMIT {part}", self.sql),
                FragmentKind::Offset => format!("{} OFFSET {part}", self.sql),
                FragmentKind::Select => format!("SELECT {part} {}", self.sql),
                FragmentKind::Union => format!("({}) UNION ({part})", self.sql),
            };
        }
        self.kind = target;
        self
    }

    /// `sqlWhereOrHaving`: routes to `HAVING` once a `GROUP BY` has
    /// been staged (a predicate over an aggregate can only go there),
    /// otherwise to `WHERE`. This is the one Open Question the spec
    /// names explicitly for `SQLFragment` (§4.7) — resolved here as
    /// "only `Group` routes to `Having`", not every kind downstream of
    /// it, since a predicate staged after `Having`/`Order`/etc. still
    /// filters pre-aggregation rows and belongs in a wrapped subquery's
    /// `WHERE`, reached via the normal `advance` wrapping rule.
    pub fn sql_where_or_having(self, predicate: &str) -> SQLFragment {
        if self.kind == FragmentKind::Group {
            self.advance(FragmentKind::Having, Some(predicate))
        } else {
            self.advance(FragmentKind::Where, Some(predicate))
        }
    }

    pub fn sql_join(self, part: &str) -> SQLFragment {
        self.advance(FragmentKind::Join, Some(part))
    }

    pub fn sql_group(self, part: &str) -> SQLFragment {
        self.advance(FragmentKind::Group, Some(part))
    }

    pub fn sql_order(self, part: &str) -> SQLFragment {
        self.advance(FragmentKind::Order, Some(part))
    }

    pub fn sql_limit(self, n: usize) -> SQLFragment {
        self.advance(FragmentKind::Limit, Some(&n.to_string()))
    }

    pub fn sql_offset(self, n: usize) -> SQLFragment {
        self.advance(FragmentKind::Offset, Some(&n.to_string()))
    }

    /// Finalises the fragment as a projected `SELECT`. `part` is the
    /// column list, or `None`/`"*"` for every column.
    pub fn sql_select(self, part: Option<&str>) -> SQLFragment {
        self.advance(FragmentKind::Select, Some(part.unwrap_or("*")))
    }

    pub fn sql_union(self, other: &SQLFragment) -> SQLFragment {
        self.advance(FragmentKind::Union, Some(other.sql()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn where_then_limit_then_where_nests_a_subquery() {
        // SQLFragment(table="t").sqlWhere("x=1").sqlLimit(5).sqlWhere("y=2").sqlSelect(None)
        let f = SQLFragment::from_table("t")
            .sql_where_or_having("x=1")
            .sql_limit(5)
            .sql_where_or_having("y=2")
            .sql_select(None);
        // the second WHERE can't append to a LIMIT-staged fragment, so
        // everything up to and including the first LIMIT gets wrapped.
        assert!(f.sql().contains("WHERE y=2"));
        assert!(f.sql().contains("SELECT * FROM (SELECT * FROM t WHERE x=1 LIMIT 5)"));
        assert_eq!(f.kind(), FragmentKind::Select);
    }

    #[test]
    fn where_after_group_routes_to_having() {
        let f = SQLFragment::from_table("t").sql_group("region").sql_where_or_having("sum(amount) > 10");
        assert_eq!(f.kind(), FragmentKind::Having);
        assert!(f.sql().contains("HAVING sum(amount) > 10"));
    }

    #[test]
    fn where_before_group_routes_to_where() {
        let f = SQLFragment::from_table("t").sql_where_or_having("x = 1");
        assert_eq!(f.kind(), FragmentKind::Where);
        assert!(f.sql().contains("WHERE x = 1"));
    }

    #[test]
    fn same_kind_with_no_part_is_a_no_op() {
        let f = SQLFragment::from_table("t");
        let kind = f.kind();
        let same = f.advance(kind, None);
        assert_eq!(same.sql(), "FROM t");
    }

    #[test]
    fn union_combines_two_selects() {
        let left = SQLFragment::from_table("a").sql_select(None);
        let right = SQLFragment::from_table("b").sql_select(None);
        let combined = left.sql_union(&right);
        assert_eq!(combined.sql(), "(SELECT * FROM a) UNION (SELECT * FROM b)");
    }
}
