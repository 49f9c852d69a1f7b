//! Turns an [`IncomingCommand`] into a typed [`Command`].

use crate::channels::IncomingCommand;
use crate::error::ValidationError;
use crate::rules::ResetMode;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `/add [clean|clean-i|clean-e] w1 [w2..] [+inc..] [-exc..]`
    Add {
        words: Vec<String>,
        include: Vec<String>,
        exclude: Vec<String>,
        reset: ResetMode,
    },
    Delete(Vec<String>),
    List,
    DefaultIncludes(Vec<String>),
    DefaultExcludes(Vec<String>),
    Block(Vec<String>),
    Unblock(Vec<String>),
    BlockList,
    SetSummary(bool),
    SetFullWord(bool),
    SetRegex(bool),
    SetInterval { min: i64, max: i64 },
    SetNotifyLimit(i64),
    Status,
    Help,
    Unknown(String),
}

impl Command {
    /// Parse the command name and arguments. Malformed arguments are a
    /// validation error; unknown names become [`Command::Unknown`].
    pub fn parse(cmd: &IncomingCommand) -> Result<Self, ValidationError> {
        let args = &cmd.args;
        let command = match cmd.name.as_str() {
            "add" => parse_add(args)?,
            "del" | "delete" => Command::Delete(required(args, "keyword")?),
            "list" => Command::List,
            "include" => Command::DefaultIncludes(args.clone()),
            "exclude" => Command::DefaultExcludes(args.clone()),
            "block" => Command::Block(required(args, "keyword")?),
            "unblock" => Command::Unblock(required(args, "keyword")?),
            "blocklist" => Command::BlockList,
            "setsummary" => Command::SetSummary(bool_arg(args, "match_summary")?),
            "setfullword" => Command::SetFullWord(bool_arg(args, "full_word_match")?),
            "setregex" => Command::SetRegex(bool_arg(args, "regex_match")?),
            "setinterval" => parse_interval(args)?,
            "setnotifylimit" => Command::SetNotifyLimit(int_arg(args.first(), "max_notified_entries")?),
            "status" => Command::Status,
            "help" | "start" => Command::Help,
            other => Command::Unknown(other.to_string()),
        };
        Ok(command)
    }
}

fn parse_add(args: &[String]) -> Result<Command, ValidationError> {
    let mut words = Vec::new();
    let mut include = Vec::new();
    let mut exclude = Vec::new();
    let mut flags = Vec::new();

    for token in args {
        match token.to_lowercase().as_str() {
            flag @ ("clean" | "clean-i" | "clean-e") => flags.push(flag.to_string()),
            _ => {
                if let Some(term) = token.strip_prefix('+').filter(|t| !t.is_empty()) {
                    include.push(term.to_string());
                } else if let Some(term) = token.strip_prefix('-').filter(|t| !t.is_empty()) {
                    exclude.push(term.to_string());
                } else {
                    words.push(token.clone());
                }
            }
        }
    }

    if words.is_empty() {
        return Err(ValidationError::MissingArgument("keyword".into()));
    }

    let has = |flag: &str| flags.iter().any(|f| f == flag);
    let reset = if has("clean") || (has("clean-i") && has("clean-e")) {
        ResetMode::ClearAll
    } else if has("clean-i") {
        ResetMode::ClearInclude
    } else if has("clean-e") {
        ResetMode::ClearExclude
    } else {
        ResetMode::None
    };

    Ok(Command::Add {
        words,
        include,
        exclude,
        reset,
    })
}

fn parse_interval(args: &[String]) -> Result<Command, ValidationError> {
    let min = int_arg(args.first(), "min_interval")?;
    // A single value sets a fixed interval.
    let max = match args.get(1) {
        Some(_) => int_arg(args.get(1), "max_interval")?,
        None => min,
    };
    Ok(Command::SetInterval { min, max })
}

fn required(args: &[String], what: &str) -> Result<Vec<String>, ValidationError> {
    if args.is_empty() {
        return Err(ValidationError::MissingArgument(what.into()));
    }
    Ok(args.to_vec())
}

fn bool_arg(args: &[String], setting: &str) -> Result<bool, ValidationError> {
    let Some(raw) = args.first() else {
        return Err(ValidationError::MissingArgument("on|off".into()));
    };
    parse_bool(raw).ok_or_else(|| ValidationError::InvalidSetting {
        setting: setting.into(),
        reason: format!("'{raw}' is not on/off"),
    })
}

fn int_arg(raw: Option<&String>, setting: &str) -> Result<i64, ValidationError> {
    let Some(raw) = raw else {
        return Err(ValidationError::MissingArgument(setting.into()));
    };
    raw.parse().map_err(|_| ValidationError::InvalidSetting {
        setting: setting.into(),
        reason: format!("'{raw}' is not a whole number"),
    })
}

/// Accepts on/off, true/false, 1/0, yes/no, y/n.
pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "on" | "true" | "1" | "yes" | "y" => Some(true),
        "off" | "false" | "0" | "no" | "n" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Result<Command, ValidationError> {
        let cmd = IncomingCommand::parse("1".into(), text, None).unwrap();
        Command::parse(&cmd)
    }

    #[test]
    fn add_collects_words_and_terms() {
        let cmd = parse("/add mk vps +出 +卖 -吗").unwrap();
        assert_eq!(
            cmd,
            Command::Add {
                words: vec!["mk".into(), "vps".into()],
                include: vec!["出".into(), "卖".into()],
                exclude: vec!["吗".into()],
                reset: ResetMode::None,
            }
        );
    }

    #[test]
    fn add_reset_flags() {
        let reset = |text| match parse(text).unwrap() {
            Command::Add { reset, .. } => reset,
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(reset("/add mk clean +收"), ResetMode::ClearAll);
        assert_eq!(reset("/add CLEAN-I mk"), ResetMode::ClearInclude);
        assert_eq!(reset("/add mk clean-e"), ResetMode::ClearExclude);
        assert_eq!(reset("/add mk clean-i clean-e"), ResetMode::ClearAll);
    }

    #[test]
    fn add_without_word_is_rejected() {
        assert_eq!(
            parse("/add +出 clean"),
            Err(ValidationError::MissingArgument("keyword".into()))
        );
    }

    #[test]
    fn lone_sign_is_a_word() {
        match parse("/add - +").unwrap() {
            Command::Add { words, include, exclude, .. } => {
                assert_eq!(words, vec!["-", "+"]);
                assert!(include.is_empty() && exclude.is_empty());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn bool_settings() {
        assert_eq!(parse("/setsummary off").unwrap(), Command::SetSummary(false));
        assert_eq!(parse("/setregex Y").unwrap(), Command::SetRegex(true));
        assert_eq!(parse("/setfullword 1").unwrap(), Command::SetFullWord(true));
        assert!(matches!(
            parse("/setregex maybe"),
            Err(ValidationError::InvalidSetting { .. })
        ));
        assert!(matches!(
            parse("/setsummary"),
            Err(ValidationError::MissingArgument(_))
        ));
    }

    #[test]
    fn interval_forms() {
        assert_eq!(
            parse("/setinterval 30 90").unwrap(),
            Command::SetInterval { min: 30, max: 90 }
        );
        assert_eq!(
            parse("/setinterval 45").unwrap(),
            Command::SetInterval { min: 45, max: 45 }
        );
        assert!(parse("/setinterval fast").is_err());
    }

    #[test]
    fn notify_limit_keeps_sign_for_validation() {
        assert_eq!(parse("/setnotifylimit -1").unwrap(), Command::SetNotifyLimit(-1));
    }

    #[test]
    fn block_requires_argument() {
        assert!(parse("/block").is_err());
        assert_eq!(
            parse("/block 骗子 scam").unwrap(),
            Command::Block(vec!["骗子".into(), "scam".into()])
        );
    }

    #[test]
    fn defaults_may_be_empty() {
        assert_eq!(parse("/include").unwrap(), Command::DefaultIncludes(vec![]));
    }

    #[test]
    fn aliases_and_unknown() {
        assert_eq!(parse("/start").unwrap(), Command::Help);
        assert_eq!(parse("/frobnicate").unwrap(), Command::Unknown("frobnicate".into()));
    }
}
