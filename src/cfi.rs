//! Call-frame information rule sets.
//!
//! A rule set is a whitespace-separated sequence of `name:` tokens, each
//! followed by a postfix expression that runs until the next `name:`
//! token or the end of the string. The `.cfa` and `.ra` names describe
//! the canonical frame address and the return address; every other name
//! is a register. Expressions are validated with the same postfix
//! grammar the unwinder evaluates: values, `$register` variables,
//! `.dotted` constants, the binary operators `+ - * / % @`, and the
//! dereference operator `^`.

use std::collections::BTreeMap;
use std::str::FromStr;

use thiserror::Error;

/// An error parsing a CFI rule set.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("malformed CFI rule set: {input}")]
pub struct ParseCfiError {
    input: String,
}

/// Register recovery rules in effect at one instruction address.
///
/// Produced by [`cfi_frame_info`](crate::ModuleSymbols::cfi_frame_info)
/// from a `STACK CFI INIT` record with all applicable `STACK CFI` deltas
/// merged in; a later rule for the same register overrides the earlier
/// one.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CfiFrameInfo {
    /// Expression computing the canonical frame address.
    pub cfa_rule: Option<String>,
    /// Expression recovering the return address.
    pub ra_rule: Option<String>,
    /// Expressions recovering callee-saved registers by name.
    pub register_rules: BTreeMap<String, String>,
}

impl CfiFrameInfo {
    /// Parses `rules` and merges them over the rules already present.
    pub fn apply(&mut self, rules: &str) -> Result<(), ParseCfiError> {
        let fail = || ParseCfiError {
            input: rules.to_string(),
        };

        let mut name: Option<&str> = None;
        let mut expression = String::new();

        for token in rules.split_whitespace() {
            match token.strip_suffix(':') {
                Some(next_name) if !next_name.is_empty() => {
                    match name.take() {
                        Some(name) => self.set_rule(name, &expression).map_err(|_| fail())?,
                        None if !expression.is_empty() => return Err(fail()),
                        None => (),
                    }
                    name = Some(next_name);
                    expression.clear();
                }
                _ => {
                    if !expression.is_empty() {
                        expression.push(' ');
                    }
                    expression.push_str(token);
                }
            }
        }

        match name {
            Some(name) => self.set_rule(name, &expression).map_err(|_| fail()),
            None if !expression.is_empty() => Err(fail()),
            None => Ok(()),
        }
    }

    fn set_rule(&mut self, name: &str, expression: &str) -> Result<(), ()> {
        if !parsing::is_expression(expression) {
            return Err(());
        }

        match name {
            ".cfa" => self.cfa_rule = Some(expression.to_string()),
            ".ra" => self.ra_rule = Some(expression.to_string()),
            _ => {
                self.register_rules
                    .insert(name.to_string(), expression.to_string());
            }
        }
        Ok(())
    }
}

impl FromStr for CfiFrameInfo {
    type Err = ParseCfiError;

    fn from_str(rules: &str) -> Result<Self, Self::Err> {
        let mut info = CfiFrameInfo::default();
        info.apply(rules)?;
        Ok(info)
    }
}

mod parsing {
    //! Postfix expression validation, brought to you by [`nom`].

    use nom::branch::alt;
    use nom::bytes::complete::tag;
    use nom::character::complete::{alpha1, alphanumeric0, alphanumeric1, char, hex_digit1, multispace0};
    use nom::combinator::{opt, recognize};
    use nom::multi::many0;
    use nom::sequence::{delimited, preceded, tuple};
    use nom::IResult;

    /// Parses a `$register` variable of the form `$[a-zA-Z][a-zA-Z0-9]*`.
    fn variable(input: &str) -> IResult<&str, &str> {
        recognize(tuple((char('$'), alpha1, alphanumeric0)))(input)
    }

    /// Parses a constant of the form `[a-zA-Z_.][a-zA-Z0-9_.]*`.
    fn constant(input: &str) -> IResult<&str, &str> {
        recognize(preceded(
            alt((alpha1, tag("_"), tag("."))),
            many0(alt((alphanumeric1, tag("_"), tag(".")))),
        ))(input)
    }

    /// Parses an integer literal with an optional sign.
    fn number(input: &str) -> IResult<&str, &str> {
        recognize(preceded(opt(char('-')), hex_digit1))(input)
    }

    fn operand(input: &str) -> IResult<&str, &str> {
        alt((number, variable, constant))(input)
    }

    fn binary_op(input: &str) -> IResult<&str, &str> {
        alt((tag("+"), tag("-"), tag("*"), tag("/"), tag("%"), tag("@")))(input)
    }

    /// Validates that `input` is one complete postfix expression.
    ///
    /// Operands push onto the evaluation stack, binary operators pop two
    /// and push one, and `^` pops and pushes one; a valid expression
    /// consumes all input and leaves exactly one value.
    pub(super) fn is_expression(mut input: &str) -> bool {
        let mut depth = 0usize;

        while !input.is_empty() {
            if let Ok((rest, _)) = delimited(multispace0, operand, multispace0)(input) {
                depth += 1;
                input = rest;
            } else if let Ok((rest, _)) =
                delimited(multispace0, tag::<_, _, nom::error::Error<&str>>("^"), multispace0)(
                    input,
                )
            {
                if depth < 1 {
                    return false;
                }
                input = rest;
            } else if let Ok((rest, _)) = delimited(multispace0, binary_op, multispace0)(input) {
                if depth < 2 {
                    return false;
                }
                depth -= 1;
                input = rest;
            } else {
                return false;
            }
        }

        depth == 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_init_rules() {
        let info: CfiFrameInfo = ".cfa: $rsp 8 + .ra: .cfa -8 + ^".parse().unwrap();

        assert_eq!(info.cfa_rule.as_deref(), Some("$rsp 8 +"));
        assert_eq!(info.ra_rule.as_deref(), Some(".cfa -8 + ^"));
        assert!(info.register_rules.is_empty());
    }

    #[test]
    fn parse_register_rules() {
        let info: CfiFrameInfo = ".cfa: $esp 8 + $ebp: .cfa 8 - ^".parse().unwrap();

        assert_eq!(info.cfa_rule.as_deref(), Some("$esp 8 +"));
        assert_eq!(info.register_rules["$ebp"], ".cfa 8 - ^");
    }

    #[test]
    fn later_rules_override() {
        let mut info: CfiFrameInfo = ".cfa: $esp 4 +".parse().unwrap();
        info.apply(".cfa: $esp 8 +").unwrap();

        assert_eq!(info.cfa_rule.as_deref(), Some("$esp 8 +"));
    }

    #[test]
    fn apply_merges_new_registers() {
        let mut info: CfiFrameInfo = ".cfa: $esp 4 +".parse().unwrap();
        info.apply("$ebx: .cfa 12 - ^").unwrap();

        assert_eq!(info.cfa_rule.as_deref(), Some("$esp 4 +"));
        assert_eq!(info.register_rules["$ebx"], ".cfa 12 - ^");
    }

    #[test]
    fn empty_rule_set_is_valid() {
        let info: CfiFrameInfo = "".parse().unwrap();
        assert_eq!(info, CfiFrameInfo::default());
    }

    #[test]
    fn reject_expression_without_name() {
        assert!("$esp 8 + .cfa: $esp".parse::<CfiFrameInfo>().is_err());
        assert!("$esp 8 +".parse::<CfiFrameInfo>().is_err());
    }

    #[test]
    fn reject_name_without_expression() {
        assert!(".cfa:".parse::<CfiFrameInfo>().is_err());
        assert!(".cfa: .ra: $esp".parse::<CfiFrameInfo>().is_err());
    }

    #[test]
    fn reject_unbalanced_expressions() {
        // Missing an operand for `+`.
        assert!(".cfa: $esp +".parse::<CfiFrameInfo>().is_err());
        // Two values left on the stack.
        assert!(".cfa: $esp 8".parse::<CfiFrameInfo>().is_err());
        // Dereference of nothing.
        assert!(".cfa: ^".parse::<CfiFrameInfo>().is_err());
    }

    #[test]
    fn negative_literals_are_operands() {
        let info: CfiFrameInfo = ".ra: .cfa -8 + ^".parse().unwrap();
        assert_eq!(info.ra_rule.as_deref(), Some(".cfa -8 + ^"));
    }
}
