use crate::error::PathError;
use crate::model::{property_names, ChainStep, EntityType, Id, NavigationGraph, ResolutionChain, Terminal};

/// Splits `Name(id)` into its name and optional id.
fn split_segment(segment: &str) -> Result<(&str, Option<Id>), PathError> {
    let Some(open) = segment.find('(') else {
        return Ok((segment, None));
    };
    let name = &segment[..open];
    let raw = segment[open + 1..]
        .strip_suffix(')')
        .ok_or_else(|| PathError::Malformed(format!("unclosed id in segment {}", segment)))?;
    let unquoted = raw
        .strip_prefix('\'')
        .and_then(|r| r.strip_suffix('\''))
        .unwrap_or(raw);
    let id = unquoted.parse::<Id>().map_err(|_| PathError::InvalidId {
        segment: name.to_string(),
        id: raw.to_string(),
    })?;
    Ok((name, Some(id)))
}

/// Walks `path` (the part after the service root, e.g.
/// `Things(5)/Datastreams`) against the navigation graph.
pub fn resolve_path(graph: &NavigationGraph, path: &str) -> Result<ResolutionChain, PathError> {
    let mut segments = path
        .trim_matches('/')
        .split('/')
        .filter(|s| !s.is_empty());

    let first = segments
        .next()
        .ok_or_else(|| PathError::Malformed("empty path".to_string()))?;
    let (name, id) = split_segment(first)?;
    let entity_type = EntityType::from_entity_set(name)
        .ok_or_else(|| PathError::UnknownEntitySet(name.to_string()))?;

    let mut steps = vec![ChainStep {
        entity_type,
        id,
        edge: None,
    }];
    let mut terminal = Terminal::Resource;

    while let Some(segment) = segments.next() {
        // resolver never empties `steps`
        let current = steps[steps.len() - 1];
        if segment == "$ref" {
            terminal = Terminal::Reference;
            break;
        }

        let (name, id) = split_segment(segment)?;
        if let Some(edge) = graph.resolve_segment(current.entity_type, name) {
            steps.push(ChainStep {
                entity_type: edge.to,
                id,
                edge: Some(*edge),
            });
            continue;
        }

        if id.is_none() && property_names(current.entity_type).contains(name) {
            if !current.is_single() {
                return Err(PathError::Malformed(format!(
                    "property {} requires a single {}",
                    name, current.entity_type
                )));
            }
            let raw_value = match segments.next() {
                None => false,
                Some("$value") => true,
                Some(other) => {
                    return Err(PathError::Malformed(format!(
                        "unexpected segment {} after property {}",
                        other, name
                    )))
                }
            };
            terminal = Terminal::Property {
                name: name.to_string(),
                raw_value,
            };
            break;
        }

        return Err(PathError::UnknownSegment {
            entity_type: current.entity_type,
            segment: name.to_string(),
        });
    }

    if let Some(extra) = segments.next() {
        return Err(PathError::Malformed(format!("unexpected segment {}", extra)));
    }

    Ok(ResolutionChain { steps, terminal })
}
