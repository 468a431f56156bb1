//! Query Parser
//!
//! Parses the text form of a query into a [`Subquery`] tree.
//!
//! # Supported Syntax
//!
//! ```text
//! expr     := and ("OR" and)*
//! and      := unary ("AND" unary)*
//! unary    := "(" expr ")" | level | property
//! property := field op value
//! op       := "~" | "=" | "!~" | "!="
//! value    := "double quoted" | 'single quoted' | bare-word
//! level    := "level" ":" name ("," name)*
//! ```
//!
//! # Examples
//!
//! ```text
//! subsystem = com.example.app
//! message ~ "connection reset" AND level:error,fault
//! (process ~ Safari OR process ~ WebKit) AND category != "Networking"
//! ```

use nom::{
    branch::alt,
    bytes::complete::{tag, tag_no_case, take_while1},
    character::complete::{alpha1, char, multispace0, satisfy},
    combinator::{map, map_opt, not, peek},
    error::{Error, ErrorKind},
    multi::separated_list1,
    sequence::{delimited, preceded, terminated, tuple},
    IResult,
};

use crate::model::LogLevel;
use crate::query::ast::{Comparison, Property, Subquery};
use crate::query::error::{QueryError, QueryResult};

/// Parse a query string into a query tree.
///
/// Blank input parses to an empty AND, which matches everything.
pub fn parse_query(input: &str) -> QueryResult<Subquery> {
    let input = input.trim();
    if input.is_empty() {
        return Ok(Subquery::and(Vec::new()));
    }

    match parse_or(input) {
        Ok((remaining, query)) => {
            if remaining.trim().is_empty() {
                Ok(query)
            } else {
                Err(QueryError::Parse(format!(
                    "Unexpected input after query: '{}'",
                    remaining.trim()
                )))
            }
        }
        Err(e) => Err(QueryError::Parse(format!("Parse error: {:?}", e))),
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Case-insensitive keyword that is not the prefix of a longer word
fn keyword<'a>(kw: &'static str) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str> {
    delimited(
        multispace0,
        terminated(tag_no_case(kw), not(peek(satisfy(is_word_char)))),
        multispace0,
    )
}

/// Parse OR-separated conjunctions
fn parse_or(input: &str) -> IResult<&str, Subquery> {
    map(separated_list1(keyword("OR"), parse_and), |mut terms| {
        if terms.len() == 1 {
            terms.remove(0)
        } else {
            Subquery::or(terms)
        }
    })(input)
}

/// Parse AND-separated terms
fn parse_and(input: &str) -> IResult<&str, Subquery> {
    map(separated_list1(keyword("AND"), parse_unary), |mut terms| {
        if terms.len() == 1 {
            terms.remove(0)
        } else {
            Subquery::and(terms)
        }
    })(input)
}

fn parse_unary(input: &str) -> IResult<&str, Subquery> {
    delimited(
        multispace0,
        alt((parse_group, parse_level, parse_property)),
        multispace0,
    )(input)
}

/// Parse a parenthesized sub-expression
fn parse_group(input: &str) -> IResult<&str, Subquery> {
    delimited(
        char('('),
        delimited(multispace0, parse_or, multispace0),
        char(')'),
    )(input)
}

/// Parse `level:error,fault`
fn parse_level(input: &str) -> IResult<&str, Subquery> {
    let (input, _) = tag_no_case("level")(input)?;
    let (input, _) = delimited(multispace0, char(':'), multispace0)(input)?;
    let (input, levels) = separated_list1(
        delimited(multispace0, char(','), multispace0),
        map_opt(alpha1, LogLevel::from_str),
    )(input)?;

    Ok((input, Subquery::levels(levels)))
}

/// Parse `field op value`
fn parse_property(input: &str) -> IResult<&str, Subquery> {
    let (input, (property, _, comparison, _, value)) = tuple((
        map_opt(alpha1, Property::from_str),
        multispace0,
        parse_comparison,
        multispace0,
        parse_value,
    ))(input)?;

    Ok((input, Subquery::property(property, comparison, value)))
}

fn parse_comparison(input: &str) -> IResult<&str, Comparison> {
    map_opt(
        alt((tag("!~"), tag("!="), tag("<>"), tag("=="), tag("~"), tag("="))),
        Comparison::from_symbol,
    )(input)
}

fn parse_value(input: &str) -> IResult<&str, String> {
    alt((
        double_quoted,
        single_quoted,
        map(
            take_while1(|c: char| !c.is_whitespace() && c != '(' && c != ')'),
            |s: &str| s.to_string(),
        ),
    ))(input)
}

fn double_quoted(input: &str) -> IResult<&str, String> {
    quoted(input, '"')
}

fn single_quoted(input: &str) -> IResult<&str, String> {
    quoted(input, '\'')
}

/// Quoted string with backslash escapes
fn quoted(input: &str, quote: char) -> IResult<&str, String> {
    let (mut rest, _) = preceded(multispace0, char(quote))(input)?;
    let mut out = String::new();
    loop {
        let mut chars = rest.chars();
        match chars.next() {
            None => return Err(nom::Err::Error(Error::new(rest, ErrorKind::Char))),
            Some(c) if c == quote => return Ok((chars.as_str(), out)),
            Some('\\') => match chars.next() {
                Some(escaped) => out.push(escaped),
                None => return Err(nom::Err::Error(Error::new(rest, ErrorKind::Escaped))),
            },
            Some(c) => out.push(c),
        }
        rest = chars.as_str();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::ast::{CompoundVariant, SubqueryKind};

    fn property_of(query: &Subquery) -> (Property, Comparison, String) {
        match &query.kind {
            SubqueryKind::Property {
                property,
                comparison,
                value,
            } => (*property, *comparison, value.clone()),
            other => panic!("Expected property, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_simple_property() {
        let query = parse_query("subsystem = com.example.app").unwrap();
        assert_eq!(
            property_of(&query),
            (Property::Subsystem, Comparison::Equals, "com.example.app".to_string())
        );
    }

    #[test]
    fn test_parse_all_operators() {
        let cases = [
            ("message ~ x", Comparison::Contains),
            ("message = x", Comparison::Equals),
            ("message !~ x", Comparison::DoesNotContain),
            ("message != x", Comparison::DoesNotEqual),
        ];
        for (input, expected) in cases {
            let query = parse_query(input).unwrap();
            assert_eq!(property_of(&query).1, expected, "input: {}", input);
        }
    }

    #[test]
    fn test_parse_quoted_values() {
        let query = parse_query(r#"message ~ "hear me roar""#).unwrap();
        assert_eq!(property_of(&query).2, "hear me roar");

        let query = parse_query(r#"message ~ 'it''s'"#);
        assert!(query.is_err());

        let query = parse_query(r#"message ~ "say \"hi\"""#).unwrap();
        assert_eq!(property_of(&query).2, "say \"hi\"");
    }

    #[test]
    fn test_parse_levels() {
        let query = parse_query("level:error, fault").unwrap();
        assert_eq!(query, Subquery::levels([LogLevel::Error, LogLevel::Fault]));
    }

    #[test]
    fn test_and_binds_tighter_than_or() {
        let query = parse_query("process ~ a AND process ~ b OR process ~ c").unwrap();
        match &query.kind {
            SubqueryKind::Compound { variant, children } => {
                assert_eq!(*variant, CompoundVariant::Or);
                assert_eq!(children.len(), 2);
                assert!(matches!(
                    children[0].kind,
                    SubqueryKind::Compound {
                        variant: CompoundVariant::And,
                        ..
                    }
                ));
            }
            other => panic!("Expected compound, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_groups() {
        let query =
            parse_query("(process ~ Safari or process ~ WebKit) and category != Networking")
                .unwrap();
        let expected = Subquery::and(vec![
            Subquery::or(vec![
                Subquery::contains(Property::Process, "Safari"),
                Subquery::contains(Property::Process, "WebKit"),
            ]),
            Subquery::does_not_equal(Property::Category, "Networking"),
        ]);
        assert_eq!(query, expected);
    }

    #[test]
    fn test_keyword_prefix_is_not_keyword() {
        // "ORACLE" is a value, not "OR" followed by "ACLE"
        let query = parse_query("process = ORACLE").unwrap();
        assert_eq!(property_of(&query).2, "ORACLE");
    }

    #[test]
    fn test_display_round_trips() {
        let query = Subquery::and(vec![
            Subquery::or(vec![
                Subquery::contains(Property::Message, "quote \" inside"),
                Subquery::levels([LogLevel::Debug, LogLevel::Info]),
            ]),
            Subquery::does_not_contain(Property::Sender, "libsystem"),
        ]);
        let reparsed = parse_query(&query.to_string()).unwrap();
        assert_eq!(reparsed, query);
    }

    #[test]
    fn test_blank_matches_everything() {
        let query = parse_query("   ").unwrap();
        assert_eq!(query.optimize(), None);
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_query("unknown = x").is_err());
        assert!(parse_query("message ?? x").is_err());
        assert!(parse_query("(message ~ x").is_err());
        assert!(parse_query("level:loud").is_err());
        assert!(parse_query("message ~ x trailing").is_err());
    }
}
