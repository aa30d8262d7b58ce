//! Query-string parsing in two phases: `parse_query` is purely syntactic,
//! `bind` resolves every property path and expand segment against an entity
//! type and the navigation graph.

use crate::error::ParseError;
use crate::logic::filter_parser::parse_filter;
use crate::model::{
    property_defs, EntityType, Expand, NavigationGraph, OrderBy, ParsedExpand, ParsedOptions,
    PropertyPath, PropertyRef, QueryOptions, Selection,
};

const MAX_EXPAND_NESTING: usize = 32;

/// Paging and strictness knobs applied while binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuerySettings {
    pub default_top: usize,
    pub max_top: usize,
    /// Ignore unknown option keys instead of rejecting them.
    pub permissive: bool,
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self {
            default_top: 100,
            max_top: 1000,
            permissive: false,
        }
    }
}

fn decode(raw: &str) -> Result<String, ParseError> {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|s| s.into_owned())
        .map_err(|e| ParseError::option(raw, format!("invalid percent-encoding: {}", e)))
}

/// Parses a raw (still percent-encoded) query string. Every malformed
/// option is reported, not only the first.
pub fn parse_query(raw: &str, permissive: bool) -> Result<ParsedOptions, Vec<ParseError>> {
    let mut pairs = Vec::new();
    let mut errors = Vec::new();
    for part in raw.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = part.split_once('=').unwrap_or((part, ""));
        match (decode(key), decode(value)) {
            (Ok(key), Ok(value)) => pairs.push((key, value)),
            (key, value) => errors.extend(key.err().into_iter().chain(value.err())),
        }
    }
    match parse_pairs(pairs, permissive, 0) {
        Ok(options) if errors.is_empty() => Ok(options),
        Ok(_) => Err(errors),
        Err(more) => {
            errors.extend(more);
            Err(errors)
        }
    }
}

fn parse_pairs(
    pairs: Vec<(String, String)>,
    permissive: bool,
    depth: usize,
) -> Result<ParsedOptions, Vec<ParseError>> {
    let mut options = ParsedOptions::default();
    let mut errors = Vec::new();
    let mut seen: Vec<String> = Vec::new();
    for (key, value) in pairs {
        let key = key.trim().to_string();
        if seen.contains(&key) {
            errors.push(ParseError::option(&key, "specified more than once"));
            continue;
        }
        seen.push(key.clone());
        match apply_option(&mut options, &key, value.trim(), permissive, depth) {
            Ok(()) => options.source.push((key, value.trim().to_string())),
            Err(failed) => errors.extend(failed),
        }
    }
    if errors.is_empty() {
        Ok(options)
    } else {
        Err(errors)
    }
}

fn apply_option(
    options: &mut ParsedOptions,
    key: &str,
    value: &str,
    permissive: bool,
    depth: usize,
) -> Result<(), Vec<ParseError>> {
    match key {
        "$select" => options.select = Some(parse_select(value).map_err(|e| vec![e])?),
        "$filter" => options.filter = Some(parse_filter(value).map_err(|e| vec![e])?),
        "$orderby" => options.order_by = parse_order_by(value).map_err(|e| vec![e])?,
        "$expand" => options.expand = parse_expand(value, permissive, depth)?,
        "$top" => options.top = Some(parse_page_value(key, value).map_err(|e| vec![e])?),
        "$skip" => options.skip = Some(parse_page_value(key, value).map_err(|e| vec![e])?),
        "$count" => {
            options.count = Some(match value {
                "true" => true,
                "false" => false,
                _ => {
                    return Err(vec![ParseError::option(
                        key,
                        format!("expected true or false, got '{}'", value),
                    )])
                }
            })
        }
        _ if permissive => {
            log::debug!("ignoring unknown query option {}", key);
        }
        _ => return Err(vec![ParseError::option(key, "unknown query option")]),
    }
    Ok(())
}

/// A non-negative integer that still fits a signed 64-bit SQL bound.
fn parse_page_value(key: &str, value: &str) -> Result<usize, ParseError> {
    let parsed = value
        .parse::<usize>()
        .map_err(|_| ParseError::option(key, format!("'{}' is not a non-negative integer", value)))?;
    if i64::try_from(parsed).is_err() {
        return Err(ParseError::option(key, format!("{} exceeds {}", value, i64::MAX)));
    }
    Ok(parsed)
}

fn parse_select(value: &str) -> Result<Vec<PropertyPath>, ParseError> {
    let paths: Vec<PropertyPath> = value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(PropertyPath::parse)
        .collect();
    if paths.is_empty() {
        return Err(ParseError::option("$select", "no properties given"));
    }
    Ok(paths)
}

fn parse_order_by(value: &str) -> Result<Vec<OrderBy<PropertyPath>>, ParseError> {
    let mut keys = Vec::new();
    for item in value.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let mut words = item.split_whitespace();
        let property = words.next().unwrap_or_default();
        let descending = match words.next().map(str::to_ascii_lowercase).as_deref() {
            None | Some("asc") => false,
            Some("desc") => true,
            Some(other) => {
                return Err(ParseError::option(
                    "$orderby",
                    format!("unknown direction '{}' for {}", other, property),
                ))
            }
        };
        if words.next().is_some() {
            return Err(ParseError::option("$orderby", format!("malformed key '{}'", item)));
        }
        keys.push(OrderBy {
            property: PropertyPath::parse(property),
            descending,
        });
    }
    if keys.is_empty() {
        return Err(ParseError::option("$orderby", "no keys given"));
    }
    Ok(keys)
}

/// Splits on `separator` outside parentheses and quotes.
fn split_top_level(value: &str, separator: char) -> Result<Vec<&str>, ParseError> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quoted = false;
    let mut start = 0;
    for (i, c) in value.char_indices() {
        match c {
            '\'' => quoted = !quoted,
            '(' if !quoted => depth += 1,
            ')' if !quoted => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| ParseError::option("$expand", "unbalanced parentheses"))?;
            }
            c if c == separator && depth == 0 && !quoted => {
                parts.push(&value[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(ParseError::option("$expand", "unbalanced parentheses"));
    }
    parts.push(&value[start..]);
    Ok(parts)
}

fn parse_expand(value: &str, permissive: bool, depth: usize) -> Result<Vec<ParsedExpand>, Vec<ParseError>> {
    if depth >= MAX_EXPAND_NESTING {
        return Err(vec![ParseError::option(
            "$expand",
            format!("nested deeper than {}", MAX_EXPAND_NESTING),
        )]);
    }
    let mut expands: Vec<ParsedExpand> = Vec::new();
    let mut errors = Vec::new();
    for item in split_top_level(value, ',').map_err(|e| vec![e])?.into_iter().map(str::trim) {
        match parse_expand_item(item, permissive, depth) {
            Ok((segments, options)) => merge_expand(&mut expands, &segments, options),
            Err(failed) => errors.extend(failed),
        }
    }
    if errors.is_empty() {
        Ok(expands)
    } else {
        Err(errors)
    }
}

fn parse_expand_item(
    item: &str,
    permissive: bool,
    depth: usize,
) -> Result<(Vec<&str>, ParsedOptions), Vec<ParseError>> {
    if item.is_empty() {
        return Err(vec![ParseError::option("$expand", "empty item")]);
    }
    let (path, nested) = match item.find('(') {
        Some(open) => {
            let inner = item[open + 1..].strip_suffix(')').ok_or_else(|| {
                vec![ParseError::option("$expand", format!("malformed item '{}'", item))]
            })?;
            (&item[..open], Some(inner))
        }
        None => (item, None),
    };

    let segments: Vec<&str> = path.split('/').map(str::trim).collect();
    let mut errors = Vec::new();
    if segments.iter().any(|s| s.is_empty()) {
        errors.push(ParseError::option("$expand", format!("malformed path '{}'", path)));
    }

    let mut options = ParsedOptions::default();
    if let Some(nested) = nested {
        let mut pairs = Vec::new();
        for part in split_top_level(nested, ';').map_err(|e| vec![e])?.into_iter().map(str::trim) {
            if part.is_empty() {
                continue;
            }
            let (key, value) = part.split_once('=').unwrap_or((part, ""));
            pairs.push((key.to_string(), value.to_string()));
        }
        match parse_pairs(pairs, permissive, depth + 1) {
            Ok(parsed) => options = parsed,
            Err(failed) => errors.extend(failed),
        }
    }

    if errors.is_empty() {
        Ok((segments, options))
    } else {
        Err(errors)
    }
}

/// Inserts `A/B/C` as nested expands, sharing levels already present.
fn merge_expand(expands: &mut Vec<ParsedExpand>, segments: &[&str], options: ParsedOptions) {
    let Some((first, rest)) = segments.split_first() else {
        return;
    };
    let position = match expands.iter().position(|e| e.segment == *first) {
        Some(position) => position,
        None => {
            expands.push(ParsedExpand {
                segment: first.to_string(),
                options: ParsedOptions::default(),
            });
            expands.len() - 1
        }
    };
    let target = &mut expands[position].options;
    if rest.is_empty() {
        merge_options(target, options);
    } else {
        merge_expand(&mut target.expand, rest, options);
    }
}

fn merge_options(target: &mut ParsedOptions, other: ParsedOptions) {
    if other.select.is_some() {
        target.select = other.select;
    }
    if other.filter.is_some() {
        target.filter = other.filter;
    }
    if !other.order_by.is_empty() {
        target.order_by = other.order_by;
    }
    target.top = other.top.or(target.top);
    target.skip = other.skip.or(target.skip);
    target.count = other.count.or(target.count);
    target.source.extend(other.source);
    for expand in other.expand {
        merge_expand(&mut target.expand, &[expand.segment.as_str()], expand.options);
    }
}

/// Resolves `parsed` against `entity_type`. Unknown properties and segments
/// are reported by name, all of them across every option and nested expand;
/// `top` is defaulted and silently clamped.
pub fn bind(
    parsed: ParsedOptions,
    entity_type: EntityType,
    graph: &NavigationGraph,
    settings: &QuerySettings,
) -> Result<QueryOptions, Vec<ParseError>> {
    let binder = Binder { graph, entity_type };
    let mut errors = Vec::new();

    let select = match parsed.select {
        Some(paths) => binder.bind_select(paths, &mut errors),
        None => None,
    };

    let filter = match parsed.filter {
        Some(filter) => {
            let mut unbound = Vec::new();
            filter.visit_properties(&mut |path: &PropertyPath| {
                if let Err(e) = binder.bind_property(path.clone(), "$filter") {
                    unbound.push(e);
                }
            });
            if unbound.is_empty() {
                filter
                    .try_map(&mut |path| binder.bind_property(path, "$filter"))
                    .map_err(|e| errors.push(e))
                    .ok()
            } else {
                errors.extend(unbound);
                None
            }
        }
        None => None,
    };

    let mut order_by = Vec::new();
    for key in parsed.order_by {
        let property = match binder.bind_property(key.property, "$orderby") {
            Ok(property) => property,
            Err(e) => {
                errors.push(e);
                continue;
            }
        };
        if let Some(edge) = property.via.filter(|edge| edge.is_to_many()) {
            errors.push(ParseError::option(
                "$orderby",
                format!("cannot order by to-many relation {}", edge.segment),
            ));
            continue;
        }
        order_by.push(OrderBy {
            property,
            descending: key.descending,
        });
    }

    let mut expand = Vec::new();
    for item in parsed.expand {
        let Some(edge) = graph.resolve_segment(entity_type, &item.segment).copied() else {
            errors.push(ParseError::PropertyNotFound {
                option: "$expand".to_string(),
                property: item.segment.clone(),
                entity_type,
            });
            continue;
        };
        match bind(item.options, edge.to, graph, settings) {
            Ok(options) => expand.push(Expand { edge, options }),
            Err(nested) => errors.extend(nested),
        }
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    let requested = parsed.top.unwrap_or(settings.default_top);
    if requested > settings.max_top {
        log::debug!("clamping $top={} to {}", requested, settings.max_top);
    }

    Ok(QueryOptions {
        entity_type,
        select,
        filter,
        order_by,
        expand,
        top: requested.min(settings.max_top),
        skip: parsed.skip.unwrap_or(0),
        count: parsed.count.unwrap_or(false),
        source: parsed.source,
    })
}

struct Binder<'a> {
    graph: &'a NavigationGraph,
    entity_type: EntityType,
}

impl Binder<'_> {
    fn not_found(&self, option: &str, property: &PropertyPath) -> ParseError {
        ParseError::PropertyNotFound {
            option: option.to_string(),
            property: property.to_string(),
            entity_type: self.entity_type,
        }
    }

    /// `None` when any path failed; each failure lands in `errors`.
    fn bind_select(&self, paths: Vec<PropertyPath>, errors: &mut Vec<ParseError>) -> Option<Selection> {
        let mut selection = Selection::default();
        let mut complete = true;
        for path in paths {
            let [name] = path.0.as_slice() else {
                errors.push(self.not_found("$select", &path));
                complete = false;
                continue;
            };
            let name = if name == "@iot.id" { "id" } else { name.as_str() };
            if is_property(self.entity_type, name) {
                selection.properties.insert(name.to_string());
            } else if let Some(edge) = self.graph.resolve_segment(self.entity_type, name) {
                selection.navigation.insert(edge.segment);
            } else {
                errors.push(self.not_found("$select", &path));
                complete = false;
            }
        }
        complete.then_some(selection)
    }

    fn bind_property(&self, path: PropertyPath, option: &str) -> Result<PropertyRef, ParseError> {
        let segments = &path.0;
        let first = match segments.first().map(String::as_str) {
            Some("@iot.id") => "id",
            Some(first) => first,
            None => return Err(self.not_found(option, &path)),
        };

        let (via, owner, rest) = if is_property(self.entity_type, first) {
            (None, self.entity_type, &segments[..])
        } else if let Some(edge) = self.graph.resolve_segment(self.entity_type, first) {
            (Some(*edge), edge.to, &segments[1..])
        } else {
            return Err(self.not_found(option, &path));
        };

        let Some((name, json_path)) = rest.split_first() else {
            return Err(ParseError::option(
                option,
                format!("navigation {} must be followed by a property", first),
            ));
        };
        let name = if name == "@iot.id" { "id" } else { name.as_str() };
        if !is_property(owner, name) {
            return Err(ParseError::PropertyNotFound {
                option: option.to_string(),
                property: path.to_string(),
                entity_type: owner,
            });
        }
        if !json_path.is_empty() && !is_structured(owner, name) {
            return Err(ParseError::option(
                option,
                format!("property {} of {} has no members", name, owner),
            ));
        }
        Ok(PropertyRef {
            via,
            name: name.to_string(),
            json_path: json_path.to_vec(),
        })
    }
}

fn is_property(entity_type: EntityType, name: &str) -> bool {
    name == "id" || property_defs(entity_type).iter().any(|def| def.name == name)
}

fn is_structured(entity_type: EntityType, name: &str) -> bool {
    property_defs(entity_type)
        .iter()
        .any(|def| def.name == name && def.kind.is_structured())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FilterExpr, Operand};

    fn graph() -> NavigationGraph {
        NavigationGraph::sensorthings().unwrap()
    }

    fn parse_and_bind(raw: &str, entity_type: EntityType) -> Result<QueryOptions, Vec<ParseError>> {
        let settings = QuerySettings::default();
        let parsed = parse_query(raw, settings.permissive)?;
        bind(parsed, entity_type, &graph(), &settings)
    }

    /// The single error `raw` is rejected with.
    fn rejection(raw: &str, entity_type: EntityType) -> ParseError {
        let mut errors = parse_and_bind(raw, entity_type).unwrap_err();
        assert_eq!(errors.len(), 1, "{:?}", errors);
        errors.remove(0)
    }

    #[test]
    fn test_defaults() {
        let options = parse_and_bind("", EntityType::Thing).unwrap();
        assert_eq!(options.top, 100);
        assert_eq!(options.skip, 0);
        assert!(!options.count);
        assert!(options.select.is_none());
        assert!(options.expand.is_empty());
    }

    #[test]
    fn test_select_top_skip_count() {
        let options = parse_and_bind("$select=name,id,Thing&$top=1&$skip=3&$count=true", EntityType::Datastream).unwrap();
        let select = options.select.unwrap();
        assert!(select.properties.contains("name"));
        assert!(select.properties.contains("id"));
        assert!(select.navigation.contains("Thing"));
        assert_eq!(options.top, 1);
        assert_eq!(options.skip, 3);
        assert!(options.count);
    }

    #[test]
    fn test_top_is_clamped_silently() {
        let options = parse_and_bind("$top=50000", EntityType::Thing).unwrap();
        assert_eq!(options.top, 1000);
    }

    #[test]
    fn test_invalid_paging_values() {
        for raw in ["$top=-1", "$top=ten", "$skip=1.5", "$count=yes", "$skip=9223372036854775808"] {
            let err = rejection(raw, EntityType::Thing);
            assert!(matches!(err, ParseError::QueryOption { .. }), "{}", raw);
        }
    }

    #[test]
    fn test_unknown_and_duplicate_keys() {
        let err = rejection("$frobnicate=1", EntityType::Thing);
        assert!(err.to_string().contains("$frobnicate"));

        let err = rejection("$top=1&$top=2", EntityType::Thing);
        assert!(err.to_string().contains("more than once"));

        let settings = QuerySettings {
            permissive: true,
            ..Default::default()
        };
        let parsed = parse_query("$frobnicate=1&$top=2", true).unwrap();
        let options = bind(parsed, EntityType::Thing, &graph(), &settings).unwrap();
        assert_eq!(options.top, 2);
    }

    #[test]
    fn test_filter_unknown_property_is_named() {
        let err = rejection("$filter=colour%20eq%20'blue'", EntityType::Thing);
        assert_eq!(
            err,
            ParseError::PropertyNotFound {
                option: "$filter".to_string(),
                property: "colour".to_string(),
                entity_type: EntityType::Thing,
            }
        );
    }

    #[test]
    fn test_filter_binds_navigated_and_json_properties() {
        let options = parse_and_bind(
            "$filter=Thing/name+eq+'Station'+and+unitOfMeasurement/symbol+eq+'C'",
            EntityType::Datastream,
        )
        .unwrap();
        let Some(FilterExpr::And(left, right)) = options.filter else {
            panic!("expected a conjunction");
        };
        let FilterExpr::Compare { left: Operand::Property(navigated), .. } = *left else {
            panic!("expected a comparison");
        };
        assert_eq!(navigated.via.map(|e| e.segment), Some("Thing"));
        assert_eq!(navigated.name, "name");
        let FilterExpr::Compare { left: Operand::Property(json), .. } = *right else {
            panic!("expected a comparison");
        };
        assert_eq!(json.name, "unitOfMeasurement");
        assert_eq!(json.json_path, vec!["symbol"]);

        let err = rejection("$filter=Thing/colour eq 'x'", EntityType::Datastream);
        assert!(matches!(err, ParseError::PropertyNotFound { entity_type: EntityType::Thing, .. }));

        let err = rejection("$filter=name/first eq 'x'", EntityType::Thing);
        assert!(err.to_string().contains("has no members"));
    }

    #[test]
    fn test_order_by() {
        let options = parse_and_bind("$orderby=Thing/name desc,id", EntityType::Datastream).unwrap();
        assert_eq!(options.order_by.len(), 2);
        assert!(options.order_by[0].descending);
        assert!(!options.order_by[1].descending);
        assert!(options.order_by[1].property.is_id());

        let err = rejection("$orderby=Observations/result", EntityType::Datastream);
        assert!(err.to_string().contains("to-many"));

        let err = rejection("$orderby=name sideways", EntityType::Thing);
        assert!(err.to_string().contains("sideways"));
    }

    #[test]
    fn test_expand_nesting_and_shorthand() {
        let options = parse_and_bind(
            "$expand=Datastreams($select=name;$top=2;$expand=Sensor),Datastreams/Observations,Locations",
            EntityType::Thing,
        )
        .unwrap();
        assert_eq!(options.expand.len(), 2);
        let datastreams = &options.expand[0];
        assert_eq!(datastreams.edge.segment, "Datastreams");
        assert_eq!(datastreams.options.top, 2);
        let nested: Vec<&str> = datastreams.options.expand.iter().map(|e| e.edge.segment).collect();
        assert_eq!(nested, vec!["Sensor", "Observations"]);
        assert_eq!(options.expand[1].edge.segment, "Locations");
        assert_eq!(options.expand_depth(), 2);
    }

    #[test]
    fn test_expand_nested_filter_with_semicolons_in_quotes() {
        let options = parse_and_bind(
            "$expand=Datastreams($filter=name eq 'a;b')",
            EntityType::Thing,
        )
        .unwrap();
        assert!(options.expand[0].options.filter.is_some());
    }

    #[test]
    fn test_expand_unknown_segment() {
        let err = rejection("$expand=Sensors", EntityType::Thing);
        assert!(matches!(err, ParseError::PropertyNotFound { ref property, .. } if property == "Sensors"));

        let err = rejection("$expand=Datastreams(", EntityType::Thing);
        assert!(err.to_string().contains("unbalanced"));
    }

    #[test]
    fn test_largest_signed_skip_is_accepted() {
        let options = parse_and_bind("$skip=9223372036854775807", EntityType::Thing).unwrap();
        assert_eq!(options.skip, i64::MAX as usize);
    }

    #[test]
    fn test_every_unbound_property_is_reported() {
        let errors = parse_and_bind(
            "$filter=colour eq 'x' and shade eq 'y'&$orderby=weight&$select=name,size&$expand=Datastreams($select=hue),Sensors",
            EntityType::Thing,
        )
        .unwrap_err();
        let named: Vec<String> = errors
            .iter()
            .map(|e| match e {
                ParseError::PropertyNotFound { property, .. } => property.clone(),
                other => panic!("unexpected {:?}", other),
            })
            .collect();
        assert_eq!(named, vec!["size", "colour", "shade", "weight", "hue", "Sensors"]);
    }

    #[test]
    fn test_every_malformed_option_is_reported() {
        let errors = parse_query("$top=ten&$count=maybe&$expand=Datastreams($top=x),Locations($skip=-2)", false).unwrap_err();
        assert_eq!(errors.len(), 4);
        assert!(errors[0].to_string().contains("ten"));
    }

    #[test]
    fn test_syntax_phase_needs_no_entity_type() {
        let parsed = parse_query("$filter=whatever eq 1&$expand=Anything", false).unwrap();
        assert!(parsed.filter.is_some());
        assert_eq!(parsed.expand[0].segment, "Anything");
    }
}
