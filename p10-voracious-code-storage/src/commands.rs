//! Line parsing for the idle-state command grammar: `HELP`, `GET`, `PUT`,
//! `LIST`. Verbs are case-insensitive; everything else is whitespace
//! delimited.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Put { path: String, length: i64 },
    Get { path: String, revision: Option<String> },
    List { dir: String },
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ParseError {
    /// A verb no well-known command recognizes. The reference server
    /// leaves the connection without a prompt in this case.
    #[error("illegal method: {0}")]
    Illegal(String),
    /// A recognized verb with the wrong shape of arguments.
    #[error("usage: {0}")]
    Usage(&'static str),
}

pub fn parse_line(line: &str) -> Result<Command, ParseError> {
    let mut tokens = line.split_whitespace();
    let verb = tokens.next().unwrap_or_default();
    let rest: Vec<&str> = tokens.collect();

    match verb.to_ascii_lowercase().as_str() {
        "help" => Ok(Command::Help),
        "put" => parse_put(&rest),
        "get" => parse_get(&rest),
        "list" => parse_list(&rest),
        _ => Err(ParseError::Illegal(verb.to_string())),
    }
}

fn parse_put(rest: &[&str]) -> Result<Command, ParseError> {
    let [path, length] = rest else {
        return Err(ParseError::Usage("PUT file length newline data"));
    };
    let length = length
        .parse::<i64>()
        .map_err(|_| ParseError::Usage("PUT file length newline data"))?
        .max(0);
    Ok(Command::Put { path: (*path).to_string(), length })
}

fn parse_get(rest: &[&str]) -> Result<Command, ParseError> {
    match rest {
        [path] => Ok(Command::Get { path: (*path).to_string(), revision: None }),
        [path, revision] => {
            Ok(Command::Get { path: (*path).to_string(), revision: Some((*revision).to_string()) })
        }
        _ => Err(ParseError::Usage("GET file [revision]")),
    }
}

fn parse_list(rest: &[&str]) -> Result<Command, ParseError> {
    let [dir] = rest else {
        return Err(ParseError::Usage("LIST dir"));
    };
    Ok(Command::List { dir: (*dir).to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_help_case_insensitively() {
        assert_eq!(parse_line("HeLp"), Ok(Command::Help));
    }

    #[test]
    fn parses_put_and_clamps_negative_length() {
        assert_eq!(
            parse_line("PUT /a.txt -5"),
            Ok(Command::Put { path: "/a.txt".to_string(), length: 0 })
        );
    }

    #[test]
    fn rejects_put_with_wrong_argument_count() {
        assert_eq!(parse_line("PUT /a.txt"), Err(ParseError::Usage("PUT file length newline data")));
    }

    #[test]
    fn parses_get_with_and_without_revision() {
        assert_eq!(
            parse_line("GET /a.txt"),
            Ok(Command::Get { path: "/a.txt".to_string(), revision: None })
        );
        assert_eq!(
            parse_line("GET /a.txt r3"),
            Ok(Command::Get { path: "/a.txt".to_string(), revision: Some("r3".to_string()) })
        );
    }

    #[test]
    fn rejects_get_with_too_many_arguments() {
        assert_eq!(parse_line("GET /a.txt r3 extra"), Err(ParseError::Usage("GET file [revision]")));
    }

    #[test]
    fn parses_list() {
        assert_eq!(parse_line("LIST /dir"), Ok(Command::List { dir: "/dir".to_string() }));
    }

    #[test]
    fn unknown_verb_is_illegal_not_usage() {
        assert_eq!(parse_line("DANCE"), Err(ParseError::Illegal("DANCE".to_string())));
    }

    #[test]
    fn blank_line_is_illegal_with_an_empty_method() {
        assert_eq!(parse_line("   "), Err(ParseError::Illegal(String::new())));
    }
}
