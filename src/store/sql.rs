//! Compiles predicates, orderings and pages into Postgres statements over the
//! `id BIGSERIAL, data JSONB` table layout created by `migrations/`.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;

use crate::model::{
    Cardinality, ComparisonOp, EntityType, FilterExpr, FilterFunction, FunctionCall, Id, Literal,
    NavigationEdge, Operand, OrderBy, Page, Predicate, PropertyRef, RelatedScope, ValueKind,
};

/// Bound statement parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlArg {
    BigInt(i64),
    BigIntArray(Vec<i64>),
    /// Decimal text, cast to `numeric` in the statement
    Numeric(String),
    Text(String),
    TextArray(Vec<String>),
    Boolean(bool),
    Timestamp(DateTime<Utc>),
    Json(Value),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SqlStatement {
    pub sql: String,
    pub args: Vec<SqlArg>,
}

pub fn table(entity_type: EntityType) -> &'static str {
    match entity_type {
        EntityType::Thing => "things",
        EntityType::Location => "locations",
        EntityType::HistoricalLocation => "historical_locations",
        EntityType::Datastream => "datastreams",
        EntityType::Sensor => "sensors",
        EntityType::ObservedProperty => "observed_properties",
        EntityType::Observation => "observations",
        EntityType::FeatureOfInterest => "features_of_interest",
    }
}

/// Name of a column referencing `entity_type`.
pub fn fk_column(entity_type: EntityType) -> &'static str {
    match entity_type {
        EntityType::Thing => "thing_id",
        EntityType::Location => "location_id",
        EntityType::HistoricalLocation => "historical_location_id",
        EntityType::Datastream => "datastream_id",
        EntityType::Sensor => "sensor_id",
        EntityType::ObservedProperty => "observed_property_id",
        EntityType::Observation => "observation_id",
        EntityType::FeatureOfInterest => "feature_of_interest_id",
    }
}

fn link_table(a: EntityType, b: EntityType) -> &'static str {
    match (a.min(b), a.max(b)) {
        (EntityType::Thing, EntityType::Location) => "thing_location",
        _ => "location_historical_location",
    }
}

/// How an edge is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    /// The source table holds a column referencing the target.
    SourceColumn(&'static str),
    /// The target table holds a column referencing the source.
    TargetColumn(&'static str),
    LinkTable {
        table: &'static str,
        source_column: &'static str,
        target_column: &'static str,
    },
}

pub fn relation(edge: &NavigationEdge) -> Relation {
    match edge.cardinality {
        Cardinality::ManyToOne => Relation::SourceColumn(fk_column(edge.to)),
        Cardinality::OneToMany => Relation::TargetColumn(fk_column(edge.from)),
        Cardinality::ManyToMany => Relation::LinkTable {
            table: link_table(edge.from, edge.to),
            source_column: fk_column(edge.from),
            target_column: fk_column(edge.to),
        },
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SqlKind {
    Json,
    Number,
    Text,
    Boolean,
    Time,
    Geometry,
    Null,
}

impl From<ValueKind> for SqlKind {
    fn from(kind: ValueKind) -> Self {
        match kind {
            ValueKind::Boolean => SqlKind::Boolean,
            ValueKind::Number => SqlKind::Number,
            ValueKind::Text => SqlKind::Text,
        }
    }
}

struct SqlExpr {
    sql: String,
    kind: SqlKind,
}

fn coerce(expr: &SqlExpr, target: SqlKind) -> String {
    let x = &expr.sql;
    match (expr.kind, target) {
        (from, to) if from == to => x.clone(),
        (SqlKind::Null, _) => "NULL".to_string(),
        (SqlKind::Json, SqlKind::Number) => {
            format!("(CASE WHEN jsonb_typeof({0}) = 'number' THEN ({0})::numeric END)", x)
        }
        (SqlKind::Json, SqlKind::Boolean) => {
            format!("(CASE WHEN jsonb_typeof({0}) = 'boolean' THEN ({0})::boolean END)", x)
        }
        (SqlKind::Json, SqlKind::Text) => format!("({} #>> '{{}}')", x),
        (SqlKind::Json, SqlKind::Time) => format!("sta_instant({} #>> '{{}}')", x),
        (SqlKind::Json, SqlKind::Geometry) => format!("sta_geometry({})", x),
        (_, SqlKind::Json) => format!("to_jsonb({})", x),
        (SqlKind::Text, SqlKind::Time) => format!("sta_instant({})", x),
        (SqlKind::Text, SqlKind::Number) => format!("sta_numeric({})", x),
        (SqlKind::Text, SqlKind::Geometry) => format!("ST_GeomFromText({}, 4326)", x),
        (_, SqlKind::Text) => format!("({})::text", x),
        _ => "NULL".to_string(),
    }
}

/// Kind both sides of a comparison are brought to.
fn common_kind(left: SqlKind, right: SqlKind) -> SqlKind {
    match (left, right) {
        (a, b) if a == b => a,
        (SqlKind::Json, other) | (other, SqlKind::Json) => other,
        (SqlKind::Time, _) | (_, SqlKind::Time) => SqlKind::Time,
        (SqlKind::Geometry, _) | (_, SqlKind::Geometry) => SqlKind::Geometry,
        _ => SqlKind::Text,
    }
}

/// Statement under construction; owns the parameter list and alias counter.
#[derive(Default)]
struct Builder {
    args: Vec<SqlArg>,
    aliases: usize,
}

impl Builder {
    fn arg(&mut self, arg: SqlArg, cast: &str) -> String {
        self.args.push(arg);
        format!("${}::{}", self.args.len(), cast)
    }

    fn alias(&mut self) -> String {
        self.aliases += 1;
        format!("n{}", self.aliases)
    }

    fn finish(self, sql: String) -> SqlStatement {
        SqlStatement { sql, args: self.args }
    }

    fn property(&mut self, property: &PropertyRef, alias: &str) -> SqlExpr {
        if property.is_id() {
            return SqlExpr {
                sql: format!("{}.id", alias),
                kind: SqlKind::Number,
            };
        }
        let mut path = vec![property.name.clone()];
        path.extend(property.json_path.iter().cloned());
        let path = self.arg(SqlArg::TextArray(path), "text[]");
        SqlExpr {
            sql: format!("({}.data #> {})", alias, path),
            kind: SqlKind::Json,
        }
    }

    fn literal(&mut self, literal: &Literal) -> SqlExpr {
        let (sql, kind) = match literal {
            Literal::Null => ("NULL".to_string(), SqlKind::Null),
            Literal::Boolean(b) => (self.arg(SqlArg::Boolean(*b), "boolean"), SqlKind::Boolean),
            Literal::Number(n) => (self.arg(SqlArg::Numeric(n.to_string()), "numeric"), SqlKind::Number),
            Literal::String(s) => (self.arg(SqlArg::Text(s.clone()), "text"), SqlKind::Text),
            Literal::DateTime(t) => (self.arg(SqlArg::Timestamp(*t), "timestamptz"), SqlKind::Time),
            Literal::Geometry(wkt) => (
                format!("ST_GeomFromText({}, 4326)", self.arg(SqlArg::Text(wkt.clone()), "text")),
                SqlKind::Geometry,
            ),
        };
        SqlExpr { sql, kind }
    }

    fn operand(
        &mut self,
        operand: &Operand<PropertyRef>,
        outer: &str,
        hops: &HashMap<NavigationEdge, String>,
    ) -> SqlExpr {
        match operand {
            Operand::Property(p) => {
                let alias = p
                    .via
                    .and_then(|edge| hops.get(&edge))
                    .map(String::as_str)
                    .unwrap_or(outer);
                self.property(p, alias)
            }
            Operand::Literal(l) => self.literal(l),
            Operand::Call(call) => self.call(call, outer, hops),
        }
    }

    fn call(
        &mut self,
        call: &FunctionCall<PropertyRef>,
        outer: &str,
        hops: &HashMap<NavigationEdge, String>,
    ) -> SqlExpr {
        use FilterFunction::*;
        let args: Vec<SqlExpr> = call
            .args
            .iter()
            .map(|arg| self.operand(arg, outer, hops))
            .collect();
        let at = |i: usize, kind: SqlKind| -> String {
            args.get(i).map(|a| coerce(a, kind)).unwrap_or_else(|| "NULL".to_string())
        };
        let text = |i| at(i, SqlKind::Text);
        let number = |i| at(i, SqlKind::Number);
        let time = |i| at(i, SqlKind::Time);
        let geometry = |i| at(i, SqlKind::Geometry);
        let spatial = |name: &str| format!("{}({}, {})", name, geometry(0), geometry(1));

        let sql = match call.function {
            SubstringOf => format!("(strpos({}, {}) > 0)", text(1), text(0)),
            Contains => format!("(strpos({}, {}) > 0)", text(0), text(1)),
            StartsWith => format!("(strpos({}, {}) = 1)", text(0), text(1)),
            EndsWith => format!("(right({0}, length({1})) = {1})", text(0), text(1)),
            Length => format!("length({})", text(0)),
            IndexOf => format!("(strpos({}, {}) - 1)", text(0), text(1)),
            Substring if args.len() > 2 => format!(
                "substr({}, ({})::int + 1, ({})::int)",
                text(0),
                number(1),
                number(2)
            ),
            Substring => format!("substr({}, ({})::int + 1)", text(0), number(1)),
            ToLower => format!("lower({})", text(0)),
            ToUpper => format!("upper({})", text(0)),
            Trim => format!("btrim({})", text(0)),
            Concat => format!("({} || {})", text(0), text(1)),
            Year => format!("extract(year FROM {})", time(0)),
            Month => format!("extract(month FROM {})", time(0)),
            Day => format!("extract(day FROM {})", time(0)),
            Hour => format!("extract(hour FROM {})", time(0)),
            Minute => format!("extract(minute FROM {})", time(0)),
            Second => format!("floor(extract(second FROM {}))", time(0)),
            Round => format!("round({})", number(0)),
            Floor => format!("floor({})", number(0)),
            Ceiling => format!("ceil({})", number(0)),
            GeoDistance => spatial("ST_Distance"),
            GeoLength => format!("ST_Length({})", geometry(0)),
            GeoIntersects | StIntersects => spatial("ST_Intersects"),
            StEquals => spatial("ST_Equals"),
            StDisjoint => spatial("ST_Disjoint"),
            StTouches => spatial("ST_Touches"),
            StWithin => spatial("ST_Within"),
            StOverlaps => spatial("ST_Overlaps"),
            StCrosses => spatial("ST_Crosses"),
            StContains => spatial("ST_Contains"),
        };
        SqlExpr {
            sql,
            kind: call.function.result_kind().into(),
        }
    }

    fn comparison(
        &mut self,
        op: ComparisonOp,
        left: &Operand<PropertyRef>,
        right: &Operand<PropertyRef>,
        outer: &str,
        hops: &HashMap<NavigationEdge, String>,
    ) -> String {
        let left = self.operand(left, outer, hops);
        let right = self.operand(right, outer, hops);

        let checked = match (left.kind, right.kind) {
            (SqlKind::Null, SqlKind::Null) => None,
            (SqlKind::Null, _) => Some(&right),
            (_, SqlKind::Null) => Some(&left),
            _ => {
                let kind = common_kind(left.kind, right.kind);
                return format!("({} {} {})", coerce(&left, kind), op.sql(), coerce(&right, kind));
            }
        };
        let is_null = match checked {
            Some(e) if e.kind == SqlKind::Json => format!("({0} IS NULL OR {0} = 'null'::jsonb)", e.sql),
            Some(e) => format!("({} IS NULL)", e.sql),
            None => "TRUE".to_string(),
        };
        match op {
            ComparisonOp::Eq => is_null,
            ComparisonOp::Ne => format!("(NOT {})", is_null),
            _ => "FALSE".to_string(),
        }
    }

    /// SQL condition for `expr` over rows aliased `outer`. Leaves that read
    /// through a navigation hop become correlated `EXISTS` subqueries.
    fn condition(&mut self, expr: &FilterExpr<PropertyRef>, outer: &str) -> String {
        match expr {
            FilterExpr::And(l, r) => format!("({} AND {})", self.condition(l, outer), self.condition(r, outer)),
            FilterExpr::Or(l, r) => format!("({} OR {})", self.condition(l, outer), self.condition(r, outer)),
            FilterExpr::Not(inner) => format!("(NOT {})", self.condition(inner, outer)),
            FilterExpr::Compare { op, left, right } => {
                self.leaf(expr, outer, |b, hops| b.comparison(*op, left, right, outer, hops))
            }
            FilterExpr::Call(call) => self.leaf(expr, outer, |b, hops| {
                let value = b.call(call, outer, hops);
                coerce(&value, SqlKind::Boolean)
            }),
        }
    }

    fn leaf(
        &mut self,
        expr: &FilterExpr<PropertyRef>,
        outer: &str,
        body: impl FnOnce(&mut Self, &HashMap<NavigationEdge, String>) -> String,
    ) -> String {
        let edges = expr.leaf_hops();
        let hops: HashMap<NavigationEdge, String> =
            edges.iter().map(|edge| (*edge, self.alias())).collect();
        let mut sql = format!("COALESCE({}, FALSE)", body(self, &hops));
        for edge in edges.iter().rev() {
            let (from, join) = related_source(edge, outer, &hops[edge]);
            sql = format!("EXISTS (SELECT 1 FROM {} WHERE {} AND {})", from, join, sql);
        }
        sql
    }

    fn scope(&mut self, scope: &RelatedScope, alias: &str) -> String {
        let ids = self.arg(SqlArg::BigIntArray(scope.ids.clone()), "bigint[]");
        match relation(&scope.via) {
            Relation::SourceColumn(column) => format!("{}.{} = ANY({})", alias, column, ids),
            Relation::TargetColumn(column) => format!(
                "{}.id IN (SELECT p.{} FROM {} p WHERE p.id = ANY({}))",
                alias,
                column,
                table(scope.via.to),
                ids
            ),
            Relation::LinkTable {
                table,
                source_column,
                target_column,
            } => format!(
                "{}.id IN (SELECT l.{} FROM {} l WHERE l.{} = ANY({}))",
                alias, source_column, table, target_column, ids
            ),
        }
    }

    fn conditions(&mut self, predicate: &Predicate, alias: &str) -> Vec<String> {
        let mut conditions = Vec::new();
        if let Some(id) = predicate.id {
            let id = self.arg(SqlArg::BigInt(id), "bigint");
            conditions.push(format!("{}.id = {}", alias, id));
        }
        if let Some(scope) = &predicate.related {
            conditions.push(self.scope(scope, alias));
        }
        if let Some(filter) = &predicate.filter {
            conditions.push(self.condition(filter, alias));
        }
        conditions
    }

    fn order(&mut self, order_by: &[OrderBy<PropertyRef>], alias: &str) -> String {
        let mut keys: Vec<String> = order_by
            .iter()
            .map(|key| {
                let value = match &key.property.via {
                    None => self.property(&key.property, alias).sql,
                    Some(edge) => {
                        let inner = self.alias();
                        let value = self.property(&key.property, &inner).sql;
                        let (from, join) = related_source(edge, alias, &inner);
                        format!("(SELECT {} FROM {} WHERE {} LIMIT 1)", value, from, join)
                    }
                };
                if key.descending {
                    format!("{} DESC NULLS LAST", value)
                } else {
                    format!("{} ASC NULLS FIRST", value)
                }
            })
            .collect();
        keys.push(format!("{}.id ASC", alias));
        keys.join(", ")
    }
}

/// FROM item for rows of `edge.to` aliased `inner`, plus the condition tying
/// them to the row aliased `outer`.
fn related_source(edge: &NavigationEdge, outer: &str, inner: &str) -> (String, String) {
    let target = table(edge.to);
    match relation(edge) {
        Relation::SourceColumn(column) => (
            format!("{} {}", target, inner),
            format!("{}.id = {}.{}", inner, outer, column),
        ),
        Relation::TargetColumn(column) => (
            format!("{} {}", target, inner),
            format!("{}.{} = {}.id", inner, column, outer),
        ),
        Relation::LinkTable {
            table,
            source_column,
            target_column,
        } => (
            format!(
                "{0} {1} JOIN {2} {1}_l ON {1}_l.{3} = {1}.id",
                target, inner, table, target_column
            ),
            format!("{}_l.{} = {}.id", inner, source_column, outer),
        ),
    }
}

fn where_clause(conditions: Vec<String>) -> String {
    if conditions.is_empty() {
        "TRUE".to_string()
    } else {
        conditions.join(" AND ")
    }
}

pub fn select_by_id(entity_type: EntityType, id: Id) -> SqlStatement {
    let mut builder = Builder::default();
    let id = builder.arg(SqlArg::BigInt(id), "bigint");
    let sql = format!("SELECT e.id, e.data FROM {} e WHERE e.id = {}", table(entity_type), id);
    builder.finish(sql)
}

/// `n` as a bigint bound, saturating at `i64::MAX`.
pub fn sql_bound(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

/// One page plus one extra row, so the caller can tell whether more exist.
pub fn select_collection(
    entity_type: EntityType,
    predicate: &Predicate,
    order_by: &[OrderBy<PropertyRef>],
    page: Page,
) -> SqlStatement {
    let mut builder = Builder::default();
    let conditions = builder.conditions(predicate, "e");
    let order = builder.order(order_by, "e");
    let limit = builder.arg(SqlArg::BigInt(sql_bound(page.top).saturating_add(1)), "bigint");
    let offset = builder.arg(SqlArg::BigInt(sql_bound(page.skip)), "bigint");
    let sql = format!(
        "SELECT e.id, e.data FROM {} e WHERE {} ORDER BY {} LIMIT {} OFFSET {}",
        table(entity_type),
        where_clause(conditions),
        order,
        limit,
        offset
    );
    builder.finish(sql)
}

/// Rows related through `edge` to each parent, numbered per parent. Rows
/// `skip+1 ..= skip+top+1` are returned with their `parent_id` and `rn`.
pub fn select_related(
    edge: &NavigationEdge,
    parent_ids: &[Id],
    predicate: &Predicate,
    order_by: &[OrderBy<PropertyRef>],
    page: Page,
) -> SqlStatement {
    let mut builder = Builder::default();
    let (from, parent) = related_rows(edge);

    let parents = builder.arg(SqlArg::BigIntArray(parent_ids.to_vec()), "bigint[]");
    let mut conditions = vec![format!("{} = ANY({})", parent, parents)];
    conditions.extend(builder.conditions(predicate, "e"));
    let order = builder.order(order_by, "e");
    let skip = builder.arg(SqlArg::BigInt(sql_bound(page.skip)), "bigint");
    let last = builder.arg(
        SqlArg::BigInt(sql_bound(page.skip.saturating_add(page.top)).saturating_add(1)),
        "bigint",
    );

    let sql = format!(
        "SELECT id, data, parent_id, rn FROM (\
         SELECT e.id, e.data, {parent} AS parent_id, \
         ROW_NUMBER() OVER (PARTITION BY {parent} ORDER BY {order}) AS rn \
         FROM {from} WHERE {conditions}\
         ) ranked WHERE rn > {skip} AND rn <= {last} ORDER BY parent_id, rn",
        parent = parent,
        order = order,
        from = from,
        conditions = where_clause(conditions),
        skip = skip,
        last = last,
    );
    builder.finish(sql)
}

/// `FROM` clause joining the rows behind `edge` (aliased `e`) to the column
/// holding their parent id.
fn related_rows(edge: &NavigationEdge) -> (String, String) {
    let child = table(edge.to);
    match relation(edge) {
        Relation::SourceColumn(column) => (
            format!("{} e JOIN {} p ON p.{} = e.id", child, table(edge.from), column),
            "p.id".to_string(),
        ),
        Relation::TargetColumn(column) => (format!("{} e", child), format!("e.{}", column)),
        Relation::LinkTable {
            table,
            source_column,
            target_column,
        } => (
            format!("{} e JOIN {} p ON p.{} = e.id", child, table, target_column),
            format!("p.{}", source_column),
        ),
    }
}

/// Matching rows behind `edge` per parent, as `parent_id, n`. Parents with
/// nothing related produce no row.
pub fn count_related(edge: &NavigationEdge, parent_ids: &[Id], predicate: &Predicate) -> SqlStatement {
    let mut builder = Builder::default();
    let (from, parent) = related_rows(edge);
    let parents = builder.arg(SqlArg::BigIntArray(parent_ids.to_vec()), "bigint[]");
    let mut conditions = vec![format!("{} = ANY({})", parent, parents)];
    conditions.extend(builder.conditions(predicate, "e"));
    let sql = format!(
        "SELECT {parent} AS parent_id, COUNT(*) AS n FROM {from} WHERE {conditions} GROUP BY {parent}",
        parent = parent,
        from = from,
        conditions = where_clause(conditions),
    );
    builder.finish(sql)
}

/// Drops the links of `id` along the to-many `edge` except those to `keep`.
/// `None` for to-one edges, whose column is simply overwritten.
pub fn release_links(edge: &NavigationEdge, id: Id, keep: &[Id]) -> Option<SqlStatement> {
    let mut builder = Builder::default();
    let owner = builder.arg(SqlArg::BigInt(id), "bigint");
    let keep = builder.arg(SqlArg::BigIntArray(keep.to_vec()), "bigint[]");
    let sql = match relation(edge) {
        Relation::SourceColumn(_) => return None,
        Relation::TargetColumn(column) => format!(
            "UPDATE {} SET {column} = NULL WHERE {column} = {} AND NOT (id = ANY({}))",
            table(edge.to),
            owner,
            keep,
            column = column,
        ),
        Relation::LinkTable {
            table,
            source_column,
            target_column,
        } => format!(
            "DELETE FROM {} WHERE {} = {} AND NOT ({} = ANY({}))",
            table, source_column, owner, target_column, keep
        ),
    };
    Some(builder.finish(sql))
}

pub fn count(entity_type: EntityType, predicate: &Predicate) -> SqlStatement {
    let mut builder = Builder::default();
    let conditions = builder.conditions(predicate, "e");
    let sql = format!(
        "SELECT COUNT(*) FROM {} e WHERE {}",
        table(entity_type),
        where_clause(conditions)
    );
    builder.finish(sql)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::query_parser::{bind, parse_query, QuerySettings};
    use crate::model::NavigationGraph;

    fn bound(entity_type: EntityType, query: &str) -> crate::model::QueryOptions {
        let graph = NavigationGraph::sensorthings().unwrap();
        bind(parse_query(query, false).unwrap(), entity_type, &graph, &QuerySettings::default()).unwrap()
    }

    fn edge(from: EntityType, segment: &str) -> NavigationEdge {
        *NavigationGraph::sensorthings()
            .unwrap()
            .resolve_segment(from, segment)
            .unwrap()
    }

    #[test]
    fn test_relations_follow_cardinality() {
        assert_eq!(
            relation(&edge(EntityType::Datastream, "Thing")),
            Relation::SourceColumn("thing_id")
        );
        assert_eq!(
            relation(&edge(EntityType::Thing, "Datastreams")),
            Relation::TargetColumn("thing_id")
        );
        assert_eq!(
            relation(&edge(EntityType::Location, "Things")),
            Relation::LinkTable {
                table: "thing_location",
                source_column: "location_id",
                target_column: "thing_id",
            }
        );
    }

    #[test]
    fn test_collection_with_filter_scope_and_page() {
        let options = bound(EntityType::Datastream, "$filter=name eq 'A'&$top=1&$skip=2");
        let predicate = Predicate::by_filter(options.filter.clone())
            .with_related(edge(EntityType::Datastream, "Thing"), vec![5]);
        let statement = select_collection(EntityType::Datastream, &predicate, &[], options.page());

        assert_eq!(
            statement.sql,
            "SELECT e.id, e.data FROM datastreams e WHERE e.thing_id = ANY($1::bigint[]) \
             AND COALESCE((((e.data #> $2::text[]) #>> '{}') = $3::text), FALSE) \
             ORDER BY e.id ASC LIMIT $4::bigint OFFSET $5::bigint"
        );
        assert_eq!(
            statement.args,
            vec![
                SqlArg::BigIntArray(vec![5]),
                SqlArg::TextArray(vec!["name".into()]),
                SqlArg::Text("A".into()),
                SqlArg::BigInt(2),
                SqlArg::BigInt(2),
            ]
        );
    }

    #[test]
    fn test_navigated_filter_becomes_exists() {
        let options = bound(EntityType::Observation, "$filter=Datastream/name eq 'A'");
        let statement = count(EntityType::Observation, &Predicate::by_filter(options.filter));
        assert_eq!(
            statement.sql,
            "SELECT COUNT(*) FROM observations e WHERE EXISTS (SELECT 1 FROM datastreams n1 \
             WHERE n1.id = e.datastream_id AND COALESCE((((n1.data #> $1::text[]) #>> '{}') = $2::text), FALSE))"
        );
    }

    #[test]
    fn test_null_comparison_and_functions() {
        let options = bound(
            EntityType::Thing,
            "$filter=description eq null and startswith(name, 'Wea')",
        );
        let statement = count(EntityType::Thing, &Predicate::by_filter(options.filter));
        assert!(statement
            .sql
            .contains("((e.data #> $1::text[]) IS NULL OR (e.data #> $1::text[]) = 'null'::jsonb)"));
        assert!(statement
            .sql
            .contains("strpos(((e.data #> $2::text[]) #>> '{}'), $3::text) = 1"));
    }

    #[test]
    fn test_time_and_spatial_coercion() {
        let options = bound(
            EntityType::Observation,
            "$filter=phenomenonTime gt 2024-01-01T00:00:00Z",
        );
        let statement = count(EntityType::Observation, &Predicate::by_filter(options.filter));
        assert!(statement
            .sql
            .contains("sta_instant((e.data #> $1::text[]) #>> '{}') > $2::timestamptz"));

        let options = bound(
            EntityType::Location,
            "$filter=st_within(location, geography'POLYGON((0 0, 0 1, 1 1, 1 0, 0 0))')",
        );
        let statement = count(EntityType::Location, &Predicate::by_filter(options.filter));
        assert!(statement
            .sql
            .contains("ST_Within(sta_geometry((e.data #> $1::text[])), ST_GeomFromText($2::text, 4326))"));
    }

    #[test]
    fn test_related_pages_partition_by_parent() {
        let options = bound(EntityType::Thing, "$orderby=name desc&$top=2");
        let statement = select_related(
            &edge(EntityType::Location, "Things"),
            &[1, 2],
            &Predicate::default(),
            &options.order_by,
            options.page(),
        );
        assert_eq!(
            statement.sql,
            "SELECT id, data, parent_id, rn FROM (SELECT e.id, e.data, p.location_id AS parent_id, \
             ROW_NUMBER() OVER (PARTITION BY p.location_id ORDER BY (e.data #> $2::text[]) DESC NULLS LAST, e.id ASC) AS rn \
             FROM things e JOIN thing_location p ON p.thing_id = e.id WHERE p.location_id = ANY($1::bigint[])\
             ) ranked WHERE rn > $3::bigint AND rn <= $4::bigint ORDER BY parent_id, rn"
        );
        assert_eq!(statement.args[2], SqlArg::BigInt(0));
        assert_eq!(statement.args[3], SqlArg::BigInt(3));
    }

    #[test]
    fn test_huge_pages_saturate_instead_of_overflowing() {
        let page = Page {
            top: 100,
            skip: usize::MAX,
        };
        let statement = select_collection(EntityType::Thing, &Predicate::default(), &[], page);
        assert_eq!(statement.args, vec![SqlArg::BigInt(101), SqlArg::BigInt(i64::MAX)]);

        let statement = select_related(
            &edge(EntityType::Thing, "Datastreams"),
            &[1],
            &Predicate::default(),
            &[],
            page,
        );
        assert_eq!(statement.args[1], SqlArg::BigInt(i64::MAX));
        assert_eq!(statement.args[2], SqlArg::BigInt(i64::MAX));
    }

    #[test]
    fn test_related_counts_group_by_parent() {
        let options = bound(EntityType::Datastream, "$filter=name eq 'A'");
        let statement = count_related(
            &edge(EntityType::Thing, "Datastreams"),
            &[1, 2],
            &Predicate::by_filter(options.filter),
        );
        assert_eq!(
            statement.sql,
            "SELECT e.thing_id AS parent_id, COUNT(*) AS n FROM datastreams e \
             WHERE e.thing_id = ANY($1::bigint[]) \
             AND COALESCE((((e.data #> $2::text[]) #>> '{}') = $3::text), FALSE) GROUP BY e.thing_id"
        );

        let statement = count_related(&edge(EntityType::Location, "Things"), &[3], &Predicate::default());
        assert!(statement.sql.starts_with(
            "SELECT p.location_id AS parent_id, COUNT(*) AS n FROM things e JOIN thing_location p ON p.thing_id = e.id"
        ));
    }

    #[test]
    fn test_release_links_keeps_listed_targets() {
        let statement = release_links(&edge(EntityType::Thing, "Locations"), 4, &[7]).unwrap();
        assert_eq!(
            statement.sql,
            "DELETE FROM thing_location WHERE thing_id = $1::bigint AND NOT (location_id = ANY($2::bigint[]))"
        );
        assert_eq!(statement.args, vec![SqlArg::BigInt(4), SqlArg::BigIntArray(vec![7])]);

        let statement = release_links(&edge(EntityType::FeatureOfInterest, "Observations"), 2, &[]).unwrap();
        assert_eq!(
            statement.sql,
            "UPDATE observations SET feature_of_interest_id = NULL \
             WHERE feature_of_interest_id = $1::bigint AND NOT (id = ANY($2::bigint[]))"
        );

        assert!(release_links(&edge(EntityType::Datastream, "Thing"), 2, &[1]).is_none());
    }

    #[test]
    fn test_navigated_orderby_uses_scalar_subquery() {
        let options = bound(EntityType::Datastream, "$orderby=Thing/name");
        let statement = select_collection(
            EntityType::Datastream,
            &Predicate::default(),
            &options.order_by,
            options.page(),
        );
        assert!(statement.sql.contains(
            "ORDER BY (SELECT (n1.data #> $1::text[]) FROM things n1 WHERE n1.id = e.thing_id LIMIT 1) ASC NULLS FIRST, e.id ASC"
        ));
    }
}
