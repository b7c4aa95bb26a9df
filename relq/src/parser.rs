//! Parsers for field paths, sort strings and `where` objects
//!
//! Paths and sorts are small text grammars handled with nom. A `where`
//! object arrives already decoded as JSON, so it is walked directly.

use nom::{
    IResult,
    branch::alt,
    bytes::complete::take_while,
    character::complete::{char, digit1, multispace0, satisfy},
    combinator::{map, map_res, opt, recognize},
    multi::{many0, separated_list1},
    sequence::{delimited, pair, preceded},
};
use serde_json::Value;

use crate::ast::*;
use crate::error::ParseError;

/// Parse a dotted field path such as `meta.tags[0].label`
pub fn parse_path(input: &str) -> Result<FieldPath, ParseError> {
    let input = input.trim();
    let (remaining, path) = field_path(input)?;
    if !remaining.is_empty() {
        return Err(ParseError::new(format!("Unexpected trailing content in path: {}", remaining))
            .with_position(input.len() - remaining.len()));
    }
    Ok(path)
}

/// Parse a sort string: comma separated paths, `-` prefix for descending
pub fn parse_sort(input: &str) -> Result<Sort, ParseError> {
    let input = input.trim();
    if input.is_empty() {
        return Ok(Sort::default());
    }
    let (remaining, keys) = sort_keys(input)?;
    let remaining = remaining.trim();
    if !remaining.is_empty() {
        return Err(ParseError::new(format!("Unexpected trailing content in sort: {}", remaining))
            .with_position(input.len() - remaining.len()));
    }
    Ok(Sort { keys })
}

/// Parse a `where` object into a flat conjunction
pub fn parse_where(value: &Value) -> Result<Where, ParseError> {
    let mut conditions = Vec::new();
    collect_conditions(value, &mut conditions)?;
    Ok(Where { conditions })
}

// ============================================================================
// Path Parsers
// ============================================================================

fn key(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        satisfy(|c| c.is_ascii_alphanumeric() || c == '_'),
        take_while(|c: char| c.is_ascii_alphanumeric() || c == '_' || c == '-'),
    ))(input)
}

fn index(input: &str) -> IResult<&str, usize> {
    map_res(digit1, str::parse::<usize>)(input)
}

fn key_segment(raw: &str) -> PathSegment {
    match raw.parse::<usize>() {
        Ok(i) if raw.chars().all(|c| c.is_ascii_digit()) => PathSegment::Index(i),
        _ => PathSegment::Key(raw.to_string()),
    }
}

fn segment(input: &str) -> IResult<&str, PathSegment> {
    alt((
        map(delimited(char('['), index, char(']')), PathSegment::Index),
        map(preceded(char('.'), key), key_segment),
    ))(input)
}

fn field_path(input: &str) -> IResult<&str, FieldPath> {
    let (input, head) = key(input)?;
    let (input, tail) = many0(segment)(input)?;

    let mut segments = Vec::with_capacity(tail.len() + 1);
    segments.push(PathSegment::Key(head.to_string()));
    segments.extend(tail);
    Ok((input, FieldPath { segments }))
}

// ============================================================================
// Sort Parsers
// ============================================================================

fn sort_key(input: &str) -> IResult<&str, SortKey> {
    let (input, desc) = opt(char('-'))(input)?;
    let (input, path) = field_path(input)?;
    let direction = if desc.is_some() {
        SortDirection::Desc
    } else {
        SortDirection::Asc
    };
    Ok((input, SortKey { path, direction }))
}

fn sort_keys(input: &str) -> IResult<&str, Vec<SortKey>> {
    separated_list1(delimited(multispace0, char(','), multispace0), sort_key)(input)
}

// ============================================================================
// Where Objects
// ============================================================================

fn collect_conditions(value: &Value, out: &mut Vec<Condition>) -> Result<(), ParseError> {
    let map = match value {
        Value::Null => return Ok(()),
        Value::Object(map) => map,
        _ => return Err(ParseError::shape("where clause must be an object")),
    };

    for (key, constraint) in map {
        match key.as_str() {
            "and" => {
                let Value::Array(items) = constraint else {
                    return Err(ParseError::shape("'and' must be a list of where objects"));
                };
                for item in items {
                    collect_conditions(item, out)?;
                }
            }
            "or" => return Err(ParseError::unsupported_operator("or")),
            _ => {
                let path = parse_path(key).map_err(|e| e.with_field(key.as_str()))?;
                field_conditions(path, constraint, out).map_err(|e| e.with_field(key.as_str()))?;
            }
        }
    }
    Ok(())
}

fn field_conditions(
    path: FieldPath,
    constraint: &Value,
    out: &mut Vec<Condition>,
) -> Result<(), ParseError> {
    let ops = match constraint {
        Value::Object(ops) => ops,
        // `{ title: "x" }` is shorthand for `{ title: { equals: "x" } }`
        Value::Array(_) => return Err(ParseError::shape("use the 'in' operator to match a list")),
        scalar => {
            out.push(Condition {
                path,
                operator: Operator::Equals,
                value: scalar.clone(),
            });
            return Ok(());
        }
    };

    if ops.is_empty() {
        return Err(ParseError::shape("no operator given"));
    }

    for (name, value) in ops {
        let operator =
            Operator::from_name(name).ok_or_else(|| ParseError::unsupported_operator(name.as_str()))?;
        let value = normalize_value(operator, value)?;
        out.push(Condition {
            path: path.clone(),
            operator,
            value,
        });
    }
    Ok(())
}

fn normalize_value(operator: Operator, value: &Value) -> Result<Value, ParseError> {
    match operator {
        Operator::In | Operator::NotIn => Ok(match value {
            Value::Array(_) => value.clone(),
            Value::String(s) => Value::Array(
                s.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(|s| Value::String(s.to_string()))
                    .collect(),
            ),
            Value::Null => Value::Array(Vec::new()),
            other => Value::Array(vec![other.clone()]),
        }),
        Operator::Exists => match value {
            Value::Bool(_) => Ok(value.clone()),
            Value::String(s) if s == "true" || s == "false" => Ok(Value::Bool(s == "true")),
            _ => Err(ParseError::shape("'exists' expects true or false")),
        },
        Operator::Like | Operator::Contains => match value {
            Value::String(_) | Value::Number(_) => Ok(value.clone()),
            _ => Err(ParseError::shape(format!("'{}' expects a string", operator))),
        },
        _ => Ok(value.clone()),
    }
}
