//! Chat command parsing.
//!
//! A message is a command when it starts with the configured prefix or with a
//! mention of the bot. Arguments are split on whitespace; double quotes group
//! words, so `$punish bob "let me out" 60` has three arguments.

use std::time::Duration;

use crate::error::CommandError;
use crate::platform::CommandContext;
use crate::warden::{PunishRequest, WardenEvent};

const PUNISH_USAGE: &str = "punish <username> [escape phrase] [auto-pardon seconds]";
const ECHO_USAGE: &str = "prisonbot_echo <message>";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Punish {
        target: String,
        escape_phrase: Option<String>,
        auto_pardon: Option<Duration>,
    },
    /// `None` pardons every prisoner of the context.
    Pardon { target: Option<String> },
    Echo(String),
}

/// What to do with a parsed message.
#[derive(Debug)]
pub enum Dispatch {
    Warden(WardenEvent),
    /// Answer directly in the channel the command came from.
    Reply(String),
}

pub fn dispatch(parsed: Result<Command, CommandError>, ctx: CommandContext) -> Dispatch {
    match parsed {
        Ok(Command::Punish {
            target,
            escape_phrase,
            auto_pardon,
        }) => Dispatch::Warden(WardenEvent::Punish {
            ctx,
            request: PunishRequest {
                target,
                escape_phrase,
                auto_pardon,
            },
        }),
        Ok(Command::Pardon { target }) => Dispatch::Warden(WardenEvent::Pardon { ctx, target }),
        Ok(Command::Echo(msg)) => Dispatch::Reply(format!("PrisonBot echo: {}", msg)),
        Err(e) => Dispatch::Reply(e.to_string()),
    }
}

/// Parse a chat message. Returns `None` for messages that are not addressed to
/// the bot or name an unknown command.
pub fn parse_command(content: &str, prefix: &str, bot_id: Option<u64>) -> Option<Result<Command, CommandError>> {
    let body = strip_invocation(content.trim_start(), prefix, bot_id)?;
    let body = body.trim_start();

    let (name, rest) = match body.find(char::is_whitespace) {
        Some(pos) => (&body[..pos], body[pos..].trim()),
        None => (body, ""),
    };

    let command = match name {
        "punish" => parse_punish(rest),
        "pardon" => Ok(Command::Pardon {
            target: Some(unquote(rest)).filter(|t| !t.is_empty()).map(str::to_string),
        }),
        "prisonbot_echo" => tokenize(rest).and_then(|args| {
            args.into_iter()
                .next()
                .map(Command::Echo)
                .ok_or(CommandError::MissingArgument(ECHO_USAGE))
        }),
        _ => return None,
    };
    Some(command)
}

fn strip_invocation<'a>(content: &'a str, prefix: &str, bot_id: Option<u64>) -> Option<&'a str> {
    if let Some(id) = bot_id {
        for mention in [format!("<@{}>", id), format!("<@!{}>", id)] {
            if let Some(rest) = content.strip_prefix(mention.as_str()) {
                return Some(rest);
            }
        }
    }
    if prefix.is_empty() {
        return None;
    }
    content.strip_prefix(prefix)
}

fn parse_punish(rest: &str) -> Result<Command, CommandError> {
    let mut args = tokenize(rest)?.into_iter();

    let target = args
        .next()
        .filter(|t| !t.is_empty())
        .ok_or(CommandError::MissingArgument(PUNISH_USAGE))?;
    let escape_phrase = args.next().map(|p| p.trim().to_string()).filter(|p| !p.is_empty());
    let auto_pardon = match args.next() {
        Some(secs) => parse_seconds(&secs)?,
        None => None,
    };

    Ok(Command::Punish {
        target,
        escape_phrase,
        auto_pardon,
    })
}

/// `0` means no auto-pardon.
fn parse_seconds(raw: &str) -> Result<Option<Duration>, CommandError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    let secs: f64 = raw
        .parse()
        .map_err(|_| CommandError::InvalidSeconds(raw.to_string()))?;
    if !secs.is_finite() || secs < 0.0 {
        return Err(CommandError::InvalidSeconds(raw.to_string()));
    }
    if secs == 0.0 {
        return Ok(None);
    }
    Duration::try_from_secs_f64(secs)
        .map(Some)
        .map_err(|_| CommandError::InvalidSeconds(raw.to_string()))
}

/// Split on whitespace outside double quotes. `""` yields an empty argument.
fn tokenize(input: &str) -> Result<Vec<String>, CommandError> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut has_token = false;

    for c in input.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                has_token = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if has_token {
                    args.push(std::mem::take(&mut current));
                    has_token = false;
                }
            }
            c => {
                current.push(c);
                has_token = true;
            }
        }
    }

    if in_quotes {
        return Err(CommandError::UnterminatedQuote);
    }
    if has_token {
        args.push(current);
    }
    Ok(args)
}

fn unquote(s: &str) -> &str {
    let s = s.trim();
    s.strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(s)
        .trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(content: &str) -> Option<Result<Command, CommandError>> {
        parse_command(content, "$", Some(42))
    }

    #[test]
    fn test_punish_with_quoted_phrase_and_timer() {
        assert_eq!(
            parse(r#"$punish bob "let me out" 60"#),
            Some(Ok(Command::Punish {
                target: "bob".to_string(),
                escape_phrase: Some("let me out".to_string()),
                auto_pardon: Some(Duration::from_secs(60)),
            }))
        );
    }

    #[test]
    fn test_punish_optional_arguments() {
        let none = Command::Punish {
            target: "bob".to_string(),
            escape_phrase: None,
            auto_pardon: None,
        };
        assert_eq!(parse("$punish bob"), Some(Ok(none.clone())));
        assert_eq!(parse(r#"$punish bob "" 0"#), Some(Ok(none)));
        assert_eq!(
            parse(r#"$punish "Bob Smith" "" 1.5"#),
            Some(Ok(Command::Punish {
                target: "Bob Smith".to_string(),
                escape_phrase: None,
                auto_pardon: Some(Duration::from_millis(1500)),
            }))
        );
    }

    #[test]
    fn test_punish_errors() {
        assert_eq!(
            parse("$punish"),
            Some(Err(CommandError::MissingArgument(PUNISH_USAGE)))
        );
        assert_eq!(
            parse("$punish bob out soon"),
            Some(Err(CommandError::InvalidSeconds("soon".to_string())))
        );
        assert_eq!(
            parse("$punish bob out -5"),
            Some(Err(CommandError::InvalidSeconds("-5".to_string())))
        );
        assert_eq!(
            parse("$punish bob out 1e30"),
            Some(Err(CommandError::InvalidSeconds("1e30".to_string())))
        );
        assert_eq!(
            parse(r#"$punish bob "let me"#),
            Some(Err(CommandError::UnterminatedQuote))
        );
    }

    #[test]
    fn test_pardon_takes_rest_of_line() {
        assert_eq!(parse("$pardon"), Some(Ok(Command::Pardon { target: None })));
        assert_eq!(
            parse("$pardon   Bob Smith  "),
            Some(Ok(Command::Pardon {
                target: Some("Bob Smith".to_string())
            }))
        );
        assert_eq!(
            parse(r#"$pardon "bob""#),
            Some(Ok(Command::Pardon {
                target: Some("bob".to_string())
            }))
        );
    }

    #[test]
    fn test_mention_prefix() {
        assert_eq!(parse("<@42> pardon"), Some(Ok(Command::Pardon { target: None })));
        assert_eq!(parse("<@!42>pardon bob").unwrap().unwrap(), Command::Pardon {
            target: Some("bob".to_string())
        });
        assert_eq!(parse("<@7> pardon"), None);
        assert_eq!(parse_command("<@42> pardon", "$", None), None);
    }

    #[test]
    fn test_non_commands_are_ignored() {
        assert_eq!(parse("hello there"), None);
        assert_eq!(parse("$unknown bob"), None);
        assert_eq!(parse("$"), None);
        assert_eq!(parse_command("!pardon", "!", None), Some(Ok(Command::Pardon { target: None })));
    }

    #[test]
    fn test_dispatch() {
        let ctx = crate::testing::context(1);
        match dispatch(parse(r#"$punish bob "let me out" 0"#).unwrap(), ctx.clone()) {
            Dispatch::Warden(WardenEvent::Punish { ctx: c, request }) => {
                assert_eq!(c, ctx);
                assert_eq!(request.escape_phrase.as_deref(), Some("let me out"));
                assert_eq!(request.auto_pardon, None);
            }
            other => panic!("unexpected dispatch {:?}", other),
        }
        assert!(matches!(
            dispatch(parse("$pardon").unwrap(), ctx.clone()),
            Dispatch::Warden(WardenEvent::Pardon { target: None, .. })
        ));
        assert!(matches!(
            dispatch(parse("$prisonbot_echo hi").unwrap(), ctx.clone()),
            Dispatch::Reply(ref r) if r == "PrisonBot echo: hi"
        ));
        assert!(matches!(
            dispatch(parse("$punish").unwrap(), ctx),
            Dispatch::Reply(ref r) if r.starts_with("Usage: punish")
        ));
    }

    #[test]
    fn test_echo() {
        assert_eq!(parse("$prisonbot_echo hi"), Some(Ok(Command::Echo("hi".to_string()))));
        assert_eq!(
            parse(r#"$prisonbot_echo "hello world""#),
            Some(Ok(Command::Echo("hello world".to_string())))
        );
        assert_eq!(
            parse("$prisonbot_echo"),
            Some(Err(CommandError::MissingArgument(ECHO_USAGE)))
        );
    }
}
