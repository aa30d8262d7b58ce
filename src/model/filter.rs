use chrono::{DateTime, Utc};
use serde_json::{Number, Value};
use std::fmt;

use crate::model::{Id, NavigationEdge};

/// Property path as written in a query option, before binding to a type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyPath(pub Vec<String>);

impl PropertyPath {
    pub fn parse(raw: &str) -> Self {
        Self(raw.split('/').map(|s| s.trim().to_string()).collect())
    }
}

impl fmt::Display for PropertyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("/"))
    }
}

/// A property bound to an entity type: optionally one navigation hop away,
/// optionally descending into a JSON-valued property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyRef {
    pub via: Option<NavigationEdge>,
    pub name: String,
    pub json_path: Vec<String>,
}

impl PropertyRef {
    pub fn local(name: &str) -> Self {
        Self {
            via: None,
            name: name.to_string(),
            json_path: Vec::new(),
        }
    }

    pub fn is_id(&self) -> bool {
        self.name == "id" && self.json_path.is_empty()
    }
}

impl fmt::Display for PropertyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(edge) = &self.via {
            write!(f, "{}/", edge.segment)?;
        }
        f.write_str(&self.name)?;
        for key in &self.json_path {
            write!(f, "/{}", key)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl ComparisonOp {
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword {
            "eq" => Some(ComparisonOp::Eq),
            "ne" => Some(ComparisonOp::Ne),
            "gt" => Some(ComparisonOp::Gt),
            "ge" => Some(ComparisonOp::Ge),
            "lt" => Some(ComparisonOp::Lt),
            "le" => Some(ComparisonOp::Le),
            _ => None,
        }
    }

    pub fn sql(&self) -> &'static str {
        match self {
            ComparisonOp::Eq => "=",
            ComparisonOp::Ne => "<>",
            ComparisonOp::Gt => ">",
            ComparisonOp::Ge => ">=",
            ComparisonOp::Lt => "<",
            ComparisonOp::Le => "<=",
        }
    }

    pub fn holds(&self, ordering: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering::*;
        match self {
            ComparisonOp::Eq => ordering == Equal,
            ComparisonOp::Ne => ordering != Equal,
            ComparisonOp::Gt => ordering == Greater,
            ComparisonOp::Ge => ordering != Less,
            ComparisonOp::Lt => ordering == Less,
            ComparisonOp::Le => ordering != Greater,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Boolean(bool),
    Number(Number),
    String(String),
    DateTime(DateTime<Utc>),
    /// Well-known text
    Geometry(String),
}

impl Literal {
    pub fn to_json(&self) -> Value {
        match self {
            Literal::Null => Value::Null,
            Literal::Boolean(b) => Value::Bool(*b),
            Literal::Number(n) => Value::Number(n.clone()),
            Literal::String(s) => Value::String(s.clone()),
            Literal::DateTime(t) => Value::String(t.to_rfc3339()),
            Literal::Geometry(wkt) => Value::String(wkt.clone()),
        }
    }
}

/// What a function yields, used for arity/type checks and SQL coercion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Boolean,
    Number,
    Text,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterFunction {
    SubstringOf,
    Contains,
    StartsWith,
    EndsWith,
    Length,
    IndexOf,
    Substring,
    ToLower,
    ToUpper,
    Trim,
    Concat,
    Year,
    Month,
    Day,
    Hour,
    Minute,
    Second,
    Round,
    Floor,
    Ceiling,
    GeoDistance,
    GeoLength,
    GeoIntersects,
    StEquals,
    StDisjoint,
    StTouches,
    StWithin,
    StOverlaps,
    StCrosses,
    StIntersects,
    StContains,
}

impl FilterFunction {
    const ALL: [FilterFunction; 31] = [
        FilterFunction::SubstringOf,
        FilterFunction::Contains,
        FilterFunction::StartsWith,
        FilterFunction::EndsWith,
        FilterFunction::Length,
        FilterFunction::IndexOf,
        FilterFunction::Substring,
        FilterFunction::ToLower,
        FilterFunction::ToUpper,
        FilterFunction::Trim,
        FilterFunction::Concat,
        FilterFunction::Year,
        FilterFunction::Month,
        FilterFunction::Day,
        FilterFunction::Hour,
        FilterFunction::Minute,
        FilterFunction::Second,
        FilterFunction::Round,
        FilterFunction::Floor,
        FilterFunction::Ceiling,
        FilterFunction::GeoDistance,
        FilterFunction::GeoLength,
        FilterFunction::GeoIntersects,
        FilterFunction::StEquals,
        FilterFunction::StDisjoint,
        FilterFunction::StTouches,
        FilterFunction::StWithin,
        FilterFunction::StOverlaps,
        FilterFunction::StCrosses,
        FilterFunction::StIntersects,
        FilterFunction::StContains,
    ];

    pub fn name(&self) -> &'static str {
        use FilterFunction::*;
        match self {
            SubstringOf => "substringof",
            Contains => "contains",
            StartsWith => "startswith",
            EndsWith => "endswith",
            Length => "length",
            IndexOf => "indexof",
            Substring => "substring",
            ToLower => "tolower",
            ToUpper => "toupper",
            Trim => "trim",
            Concat => "concat",
            Year => "year",
            Month => "month",
            Day => "day",
            Hour => "hour",
            Minute => "minute",
            Second => "second",
            Round => "round",
            Floor => "floor",
            Ceiling => "ceiling",
            GeoDistance => "geo.distance",
            GeoLength => "geo.length",
            GeoIntersects => "geo.intersects",
            StEquals => "st_equals",
            StDisjoint => "st_disjoint",
            StTouches => "st_touches",
            StWithin => "st_within",
            StOverlaps => "st_overlaps",
            StCrosses => "st_crosses",
            StIntersects => "st_intersects",
            StContains => "st_contains",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let lowered = name.to_ascii_lowercase();
        Self::ALL.into_iter().find(|f| f.name() == lowered)
    }

    /// Inclusive (min, max) argument count.
    pub fn arity(&self) -> (usize, usize) {
        use FilterFunction::*;
        match self {
            SubstringOf | Contains | StartsWith | EndsWith | IndexOf | Concat => (2, 2),
            Substring => (2, 3),
            Length | ToLower | ToUpper | Trim | Year | Month | Day | Hour | Minute | Second
            | Round | Floor | Ceiling | GeoLength => (1, 1),
            GeoDistance | GeoIntersects | StEquals | StDisjoint | StTouches | StWithin
            | StOverlaps | StCrosses | StIntersects | StContains => (2, 2),
        }
    }

    pub fn result_kind(&self) -> ValueKind {
        use FilterFunction::*;
        match self {
            SubstringOf | Contains | StartsWith | EndsWith | GeoIntersects | StEquals
            | StDisjoint | StTouches | StWithin | StOverlaps | StCrosses | StIntersects
            | StContains => ValueKind::Boolean,
            Length | IndexOf | Year | Month | Day | Hour | Minute | Second | Round | Floor
            | Ceiling | GeoDistance | GeoLength => ValueKind::Number,
            Substring | ToLower | ToUpper | Trim | Concat => ValueKind::Text,
        }
    }

    pub fn is_spatial(&self) -> bool {
        self.name().starts_with("geo.") || self.name().starts_with("st_")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCall<P> {
    pub function: FilterFunction,
    pub args: Vec<Operand<P>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand<P> {
    Property(P),
    Literal(Literal),
    Call(FunctionCall<P>),
}

/// `$filter` predicate tree, generic over how properties are referenced.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterExpr<P> {
    And(Box<FilterExpr<P>>, Box<FilterExpr<P>>),
    Or(Box<FilterExpr<P>>, Box<FilterExpr<P>>),
    Not(Box<FilterExpr<P>>),
    Compare {
        op: ComparisonOp,
        left: Operand<P>,
        right: Operand<P>,
    },
    /// A boolean-valued function used as a condition.
    Call(FunctionCall<P>),
}

impl<P> Operand<P> {
    pub fn try_map<Q, E>(self, f: &mut impl FnMut(P) -> Result<Q, E>) -> Result<Operand<Q>, E> {
        Ok(match self {
            Operand::Property(p) => Operand::Property(f(p)?),
            Operand::Literal(l) => Operand::Literal(l),
            Operand::Call(call) => Operand::Call(call.try_map(f)?),
        })
    }

    pub fn visit_properties<'a>(&'a self, visit: &mut impl FnMut(&'a P)) {
        match self {
            Operand::Property(p) => visit(p),
            Operand::Literal(_) => {}
            Operand::Call(call) => call.args.iter().for_each(|a| a.visit_properties(visit)),
        }
    }
}

impl<P> FunctionCall<P> {
    pub fn try_map<Q, E>(self, f: &mut impl FnMut(P) -> Result<Q, E>) -> Result<FunctionCall<Q>, E> {
        let args = self
            .args
            .into_iter()
            .map(|arg| arg.try_map(f))
            .collect::<Result<Vec<_>, E>>()?;
        Ok(FunctionCall {
            function: self.function,
            args,
        })
    }
}

impl<P> FilterExpr<P> {
    pub fn and(left: FilterExpr<P>, right: FilterExpr<P>) -> Self {
        FilterExpr::And(Box::new(left), Box::new(right))
    }

    pub fn try_map<Q, E>(self, f: &mut impl FnMut(P) -> Result<Q, E>) -> Result<FilterExpr<Q>, E> {
        Ok(match self {
            FilterExpr::And(l, r) => FilterExpr::And(Box::new(l.try_map(f)?), Box::new(r.try_map(f)?)),
            FilterExpr::Or(l, r) => FilterExpr::Or(Box::new(l.try_map(f)?), Box::new(r.try_map(f)?)),
            FilterExpr::Not(inner) => FilterExpr::Not(Box::new(inner.try_map(f)?)),
            FilterExpr::Compare { op, left, right } => FilterExpr::Compare {
                op,
                left: left.try_map(f)?,
                right: right.try_map(f)?,
            },
            FilterExpr::Call(call) => FilterExpr::Call(call.try_map(f)?),
        })
    }

    /// Visits every property operand, left to right.
    pub fn visit_properties<'a>(&'a self, visit: &mut impl FnMut(&'a P)) {
        match self {
            FilterExpr::And(l, r) | FilterExpr::Or(l, r) => {
                l.visit_properties(visit);
                r.visit_properties(visit);
            }
            FilterExpr::Not(inner) => inner.visit_properties(visit),
            FilterExpr::Compare { left, right, .. } => {
                left.visit_properties(visit);
                right.visit_properties(visit);
            }
            FilterExpr::Call(call) => call.args.iter().for_each(|a| a.visit_properties(visit)),
        }
    }
}

impl FilterExpr<PropertyRef> {
    /// Navigation hops referenced directly by this leaf (not by sub-expressions).
    pub fn leaf_hops(&self) -> Vec<NavigationEdge> {
        let mut hops = Vec::new();
        let mut visit = |p: &PropertyRef| {
            if let Some(edge) = p.via {
                if !hops.contains(&edge) {
                    hops.push(edge);
                }
            }
        };
        match self {
            FilterExpr::Compare { left, right, .. } => {
                left.visit_properties(&mut visit);
                right.visit_properties(&mut visit);
            }
            FilterExpr::Call(call) => call.args.iter().for_each(|a| a.visit_properties(&mut visit)),
            _ => {}
        }
        hops
    }
}

/// Bound ordering key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy<P> {
    pub property: P,
    pub descending: bool,
}

/// Restriction to entities related, through `via`, to one of `ids`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelatedScope {
    pub via: NavigationEdge,
    pub ids: Vec<Id>,
}

/// Conjunctive predicate handed to the storage collaborator: an optional id
/// match, an optional one-hop scope and an optional `$filter` tree.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Predicate {
    pub id: Option<Id>,
    pub related: Option<RelatedScope>,
    pub filter: Option<FilterExpr<PropertyRef>>,
}

impl Predicate {
    pub fn by_filter(filter: Option<FilterExpr<PropertyRef>>) -> Self {
        Self {
            filter,
            ..Default::default()
        }
    }

    pub fn with_related(mut self, via: NavigationEdge, ids: Vec<Id>) -> Self {
        self.related = Some(RelatedScope { via, ids });
        self
    }

    pub fn with_id(mut self, id: Option<Id>) -> Self {
        self.id = id;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Cardinality, EntityType};

    #[test]
    fn test_function_lookup_and_arity() {
        assert_eq!(FilterFunction::from_name("geo.distance"), Some(FilterFunction::GeoDistance));
        assert_eq!(FilterFunction::from_name("StartsWith"), Some(FilterFunction::StartsWith));
        assert_eq!(FilterFunction::from_name("nope"), None);
        assert_eq!(FilterFunction::Substring.arity(), (2, 3));
        assert_eq!(FilterFunction::Length.result_kind(), ValueKind::Number);
        assert!(FilterFunction::StWithin.is_spatial());
        assert!(!FilterFunction::Trim.is_spatial());
    }

    #[test]
    fn test_try_map_binds_every_property() {
        let expr: FilterExpr<PropertyPath> = FilterExpr::and(
            FilterExpr::Compare {
                op: ComparisonOp::Eq,
                left: Operand::Property(PropertyPath::parse("name")),
                right: Operand::Literal(Literal::String("a".into())),
            },
            FilterExpr::Call(FunctionCall {
                function: FilterFunction::StartsWith,
                args: vec![
                    Operand::Property(PropertyPath::parse("Thing/name")),
                    Operand::Literal(Literal::String("x".into())),
                ],
            }),
        );
        let mut seen = Vec::new();
        let bound = expr
            .try_map(&mut |path: PropertyPath| -> Result<String, ()> {
                seen.push(path.to_string());
                Ok(path.to_string())
            })
            .unwrap();
        assert_eq!(seen, vec!["name", "Thing/name"]);
        assert!(matches!(bound, FilterExpr::And(_, _)));
    }

    #[test]
    fn test_leaf_hops() {
        let edge = NavigationEdge::new(EntityType::Datastream, EntityType::Thing, Cardinality::ManyToOne, "Thing");
        let leaf = FilterExpr::Compare {
            op: ComparisonOp::Eq,
            left: Operand::Property(PropertyRef {
                via: Some(edge),
                name: "name".into(),
                json_path: vec![],
            }),
            right: Operand::Literal(Literal::String("a".into())),
        };
        assert_eq!(leaf.leaf_hops(), vec![edge]);
        assert!(FilterExpr::Not(Box::new(leaf)).leaf_hops().is_empty());
    }
}
