use chrono::{Datelike, Timelike};
use serde_json::{Number, Value};
use std::cmp::Ordering;

use crate::error::StorageError;
use crate::model::{
    parse_time, ComparisonOp, Entity, FilterExpr, FilterFunction, FunctionCall, Literal,
    NavigationEdge, Operand, PropertyRef,
};

/// Entities related to the one being filtered, looked up on demand.
pub trait RelatedLookup {
    fn related(&self, entity: &Entity, edge: &NavigationEdge) -> Vec<Entity>;
}

/// In-process evaluation of bound `$filter` trees.
///
/// A leaf that references a navigated property holds when it holds for any
/// related entity, matching the correlated `EXISTS` the SQL store emits.
pub struct EntityFilterEvaluator<'a, L: RelatedLookup + ?Sized> {
    lookup: &'a L,
}

impl<'a, L: RelatedLookup + ?Sized> EntityFilterEvaluator<'a, L> {
    pub fn new(lookup: &'a L) -> Self {
        Self { lookup }
    }

    pub fn evaluate(&self, entity: &Entity, filter: &FilterExpr<PropertyRef>) -> Result<bool, StorageError> {
        match filter {
            FilterExpr::And(left, right) => Ok(self.evaluate(entity, left)? && self.evaluate(entity, right)?),
            FilterExpr::Or(left, right) => Ok(self.evaluate(entity, left)? || self.evaluate(entity, right)?),
            FilterExpr::Not(inner) => Ok(!self.evaluate(entity, inner)?),
            leaf => {
                let hops = leaf.leaf_hops();
                let mut bound = Vec::with_capacity(hops.len());
                self.evaluate_leaf(entity, leaf, &hops, &mut bound)
            }
        }
    }

    /// Tries every combination of related entities for the hops in `hops`.
    fn evaluate_leaf(
        &self,
        entity: &Entity,
        leaf: &FilterExpr<PropertyRef>,
        hops: &[NavigationEdge],
        bound: &mut Vec<(NavigationEdge, Entity)>,
    ) -> Result<bool, StorageError> {
        let Some((edge, rest)) = hops.split_first() else {
            let context = Context {
                entity,
                bound: bound.as_slice(),
            };
            return match leaf {
                FilterExpr::Compare { op, left, right } => {
                    let left = context.operand(left)?;
                    let right = context.operand(right)?;
                    Ok(compare(*op, &left, &right))
                }
                FilterExpr::Call(call) => Ok(context.call(call)? == Value::Bool(true)),
                _ => Ok(false),
            };
        };
        for related in self.lookup.related(entity, edge) {
            bound.push((*edge, related));
            let holds = self.evaluate_leaf(entity, leaf, rest, bound)?;
            bound.pop();
            if holds {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

struct Context<'a> {
    entity: &'a Entity,
    bound: &'a [(NavigationEdge, Entity)],
}

impl Context<'_> {
    fn property(&self, property: &PropertyRef) -> Value {
        let owner = match &property.via {
            None => Some(self.entity),
            Some(edge) => self.bound.iter().find(|(e, _)| e == edge).map(|(_, r)| r),
        };
        extract_property(owner, property)
    }

    fn operand(&self, operand: &Operand<PropertyRef>) -> Result<Value, StorageError> {
        match operand {
            Operand::Property(p) => Ok(self.property(p)),
            Operand::Literal(Literal::Geometry(wkt)) => Ok(wkt_point(wkt)
                .map(|(x, y)| serde_json::json!({"type": "Point", "coordinates": [x, y]}))
                .unwrap_or_else(|| Value::String(wkt.clone()))),
            Operand::Literal(literal) => Ok(literal.to_json()),
            Operand::Call(call) => self.call(call),
        }
    }

    fn call(&self, call: &FunctionCall<PropertyRef>) -> Result<Value, StorageError> {
        use FilterFunction::*;
        let args = call
            .args
            .iter()
            .map(|a| self.operand(a))
            .collect::<Result<Vec<_>, _>>()?;
        let text = |i: usize| args.get(i).and_then(Value::as_str).map(str::to_string);
        let number = |i: usize| args.get(i).and_then(as_number);
        let time = |i: usize| args.get(i).and_then(Value::as_str).and_then(parse_time);

        let value = match call.function {
            SubstringOf => bool_of(text(1).zip(text(0)).map(|(h, n)| h.contains(&n))),
            Contains => bool_of(text(0).zip(text(1)).map(|(h, n)| h.contains(&n))),
            StartsWith => bool_of(text(0).zip(text(1)).map(|(h, n)| h.starts_with(&n))),
            EndsWith => bool_of(text(0).zip(text(1)).map(|(h, n)| h.ends_with(&n))),
            Length => text(0).map(|s| Value::from(s.chars().count())).unwrap_or(Value::Null),
            IndexOf => text(0)
                .zip(text(1))
                .map(|(h, n)| match h.find(&n) {
                    Some(byte) => Value::from(h[..byte].chars().count() as i64),
                    None => Value::from(-1),
                })
                .unwrap_or(Value::Null),
            Substring => match (text(0), number(1)) {
                (Some(s), Some(start)) => {
                    let rest = s.chars().skip(start.max(0.0) as usize);
                    let taken: String = match number(2) {
                        Some(len) => rest.take(len.max(0.0) as usize).collect(),
                        None => rest.collect(),
                    };
                    Value::String(taken)
                }
                _ => Value::Null,
            },
            ToLower => text(0).map(|s| Value::String(s.to_lowercase())).unwrap_or(Value::Null),
            ToUpper => text(0).map(|s| Value::String(s.to_uppercase())).unwrap_or(Value::Null),
            Trim => text(0).map(|s| Value::String(s.trim().to_string())).unwrap_or(Value::Null),
            Concat => text(0)
                .zip(text(1))
                .map(|(a, b)| Value::String(a + &b))
                .unwrap_or(Value::Null),
            Year => time(0).map(|t| Value::from(t.year())).unwrap_or(Value::Null),
            Month => time(0).map(|t| Value::from(t.month())).unwrap_or(Value::Null),
            Day => time(0).map(|t| Value::from(t.day())).unwrap_or(Value::Null),
            Hour => time(0).map(|t| Value::from(t.hour())).unwrap_or(Value::Null),
            Minute => time(0).map(|t| Value::from(t.minute())).unwrap_or(Value::Null),
            Second => time(0).map(|t| Value::from(t.second())).unwrap_or(Value::Null),
            Round => float_of(number(0).map(f64::round)),
            Floor => float_of(number(0).map(f64::floor)),
            Ceiling => float_of(number(0).map(f64::ceil)),
            GeoDistance => match (args.first().and_then(geo_point), args.get(1).and_then(geo_point)) {
                (Some((x1, y1)), Some((x2, y2))) => float_of(Some(((x1 - x2).powi(2) + (y1 - y2).powi(2)).sqrt())),
                _ => {
                    return Err(StorageError::Unsupported(
                        "geo.distance is only evaluated between points in memory".to_string(),
                    ))
                }
            },
            other => {
                return Err(StorageError::Unsupported(format!(
                    "{} is not evaluated in memory",
                    other.name()
                )))
            }
        };
        Ok(value)
    }
}

/// Value of `property` on `owner` (already resolved through any hop),
/// descending into JSON members. Missing values are `Null`.
pub fn extract_property(owner: Option<&Entity>, property: &PropertyRef) -> Value {
    let Some(mut value) = owner.and_then(|o| o.property(&property.name)) else {
        return Value::Null;
    };
    for key in &property.json_path {
        value = match value {
            Value::Object(mut map) => map.remove(key).unwrap_or(Value::Null),
            Value::Array(mut items) => match key.parse::<usize>() {
                Ok(i) if i < items.len() => items.swap_remove(i),
                _ => Value::Null,
            },
            _ => Value::Null,
        };
    }
    value
}

fn bool_of(value: Option<bool>) -> Value {
    value.map(Value::Bool).unwrap_or(Value::Null)
}

fn float_of(value: Option<f64>) -> Value {
    value
        .and_then(Number::from_f64)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn geo_point(value: &Value) -> Option<(f64, f64)> {
    if value.get("type").and_then(Value::as_str) != Some("Point") {
        return None;
    }
    let coordinates = value.get("coordinates")?.as_array()?;
    Some((coordinates.first()?.as_f64()?, coordinates.get(1)?.as_f64()?))
}

/// `POINT(x y)`, optionally with an `SRID=n;` prefix.
fn wkt_point(wkt: &str) -> Option<(f64, f64)> {
    let body = wkt.rsplit(';').next()?.trim();
    let inner = body
        .strip_prefix("POINT")
        .or_else(|| body.strip_prefix("point"))?
        .trim()
        .strip_prefix('(')?
        .strip_suffix(')')?;
    let mut parts = inner.split_whitespace();
    let x = parts.next()?.parse().ok()?;
    let y = parts.next()?.parse().ok()?;
    Some((x, y))
}

/// Orders two JSON values, coercing between numeric strings and numbers and
/// comparing ISO-8601 strings as instants. `None` when incomparable.
pub fn compare_values(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::Null, _) | (_, Value::Null) => None,
        (Value::Number(l), Value::Number(r)) => l.as_f64()?.partial_cmp(&r.as_f64()?),
        (Value::String(l), Value::String(r)) => match (parse_time(l), parse_time(r)) {
            (Some(lt), Some(rt)) => Some(lt.cmp(&rt)),
            _ => match (l.parse::<f64>(), r.parse::<f64>()) {
                (Ok(lf), Ok(rf)) => lf.partial_cmp(&rf),
                _ => Some(l.cmp(r)),
            },
        },
        (Value::Number(l), Value::String(r)) => l.as_f64()?.partial_cmp(&r.parse::<f64>().ok()?),
        (Value::String(l), Value::Number(r)) => l.parse::<f64>().ok()?.partial_cmp(&r.as_f64()?),
        (Value::Bool(l), Value::Bool(r)) => Some(l.cmp(r)),
        (l, r) if l == r => Some(Ordering::Equal),
        _ => None,
    }
}

fn compare(op: ComparisonOp, left: &Value, right: &Value) -> bool {
    match (op, left, right) {
        (ComparisonOp::Eq, Value::Null, _) | (ComparisonOp::Eq, _, Value::Null) => left == right,
        (ComparisonOp::Ne, Value::Null, _) | (ComparisonOp::Ne, _, Value::Null) => left != right,
        _ => match compare_values(left, right) {
            Some(ordering) => op.holds(ordering),
            None => op == ComparisonOp::Ne,
        },
    }
}

/// Total order used for `$orderby`; nulls sort first.
pub fn sort_order(left: &Value, right: &Value) -> Ordering {
    match (left, right) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        _ => compare_values(left, right).unwrap_or(Ordering::Equal),
    }
}
