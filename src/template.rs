//! Placeholder templates used by mount specs and zfs dataset paths
//!
//! Supported syntax:
//! - `{name}` - on-host name of the jail being provisioned
//! - `{zfs[key]}` - mountpoint of the zfs dataset configured as `[zfs.key]`
//! - `{{` and `}}` - literal braces

use crate::error::{Error, Result};
use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{tag, take_while1},
    combinator::{all_consuming, map, value},
    multi::many0,
    sequence::delimited,
};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Piece<'a> {
    Literal(&'a str),
    Name,
    Zfs(&'a str),
}

fn literal(input: &str) -> IResult<&str, Piece<'_>> {
    map(take_while1(|c| c != '{' && c != '}'), Piece::Literal).parse(input)
}

fn escaped(input: &str) -> IResult<&str, Piece<'_>> {
    alt((
        value(Piece::Literal("{"), tag("{{")),
        value(Piece::Literal("}"), tag("}}")),
    ))
    .parse(input)
}

fn name_field(input: &str) -> IResult<&str, Piece<'_>> {
    value(Piece::Name, tag("{name}")).parse(input)
}

fn zfs_field(input: &str) -> IResult<&str, Piece<'_>> {
    map(
        delimited(
            tag("{zfs["),
            take_while1(|c: char| c.is_ascii_alphanumeric() || c == '_' || c == '-'),
            tag("]}"),
        ),
        Piece::Zfs,
    )
    .parse(input)
}

fn pieces(input: &str) -> IResult<&str, Vec<Piece<'_>>> {
    all_consuming(many0(alt((escaped, name_field, zfs_field, literal)))).parse(input)
}

/// Names of the zfs datasets a template refers to
pub fn zfs_references(template: &str) -> Result<Vec<String>> {
    let (_, parsed) = pieces(template).map_err(|_| invalid(template))?;
    Ok(parsed
        .into_iter()
        .filter_map(|piece| match piece {
            Piece::Zfs(key) => Some(key.to_string()),
            _ => None,
        })
        .collect())
}

/// Render `template`, resolving zfs references through `zfs`
pub fn render<F>(template: &str, name: Option<&str>, mut zfs: F) -> Result<String>
where
    F: FnMut(&str) -> Result<String>,
{
    let (_, parsed) = pieces(template).map_err(|_| invalid(template))?;

    let mut out = String::with_capacity(template.len());
    for piece in parsed {
        match piece {
            Piece::Literal(text) => out.push_str(text),
            Piece::Name => match name {
                Some(name) => out.push_str(name),
                None => {
                    return Err(Error::Validation(format!(
                        "Template '{}' uses {{name}} outside of a jail",
                        template
                    )));
                }
            },
            Piece::Zfs(key) => out.push_str(&zfs(key)?),
        }
    }
    Ok(out)
}

fn invalid(template: &str) -> Error {
    Error::Validation(format!("Invalid template '{}'", template))
}
