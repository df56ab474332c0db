use std::str::FromStr;

use wave_protocol::Priority;

/// One line typed on stdin during `run`.
///
/// Per-channel commands take an optional channel name and fall back to
/// the current channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Talk { channel: Option<String>, priority: Priority },
    Release(Option<String>),
    Cancel(Option<String>),
    Arbiter(Option<String>),
    Resign(Option<String>),
    Elect(Option<String>),
    Status(Option<String>),
    Use(String),
    Join(String),
    Leave(String),
    Delete(String),
    Channels,
    Discovered,
    Help,
    Quit,
}

pub const HELP: &str = "\
commands:
  talk [channel] [priority]   request the floor (priority: low|normal|high|emergency)
  release [channel]           release the floor
  cancel [channel]            withdraw a pending request
  arbiter [channel]           become the channel arbiter
  resign [channel]            step down as arbiter
  elect [channel]             start an arbiter election
  status [channel]            floor and arbitration state
  use <channel>               switch the current channel
  join <channel>              join and announce a channel
  leave <channel>             leave a channel
  delete <channel>            delete a channel for everyone
  channels                    list joined channels
  discovered                  list channels announced by peers
  quit";

impl FromStr for Command {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let verb = words.next().ok_or("empty command")?.to_ascii_lowercase();
        let args: Vec<&str> = words.collect();
        let optional = |args: &[&str]| -> Result<Option<String>, String> {
            match args {
                [] => Ok(None),
                [one] => Ok(Some(one.to_string())),
                _ => Err(format!("{verb}: too many arguments")),
            }
        };
        let required = |args: &[&str]| -> Result<String, String> {
            match args {
                [one] => Ok(one.to_string()),
                _ => Err(format!("{verb}: expected one channel name")),
            }
        };

        Ok(match verb.as_str() {
            "talk" | "t" => match args.as_slice() {
                [] => Command::Talk {
                    channel: None,
                    priority: Priority::Normal,
                },
                [one] => match one.parse::<Priority>() {
                    Ok(priority) => Command::Talk { channel: None, priority },
                    Err(_) => Command::Talk {
                        channel: Some(one.to_string()),
                        priority: Priority::Normal,
                    },
                },
                [channel, priority] => Command::Talk {
                    channel: Some(channel.to_string()),
                    priority: priority.parse()?,
                },
                _ => return Err("talk: too many arguments".into()),
            },
            "release" | "r" => Command::Release(optional(&args)?),
            "cancel" => Command::Cancel(optional(&args)?),
            "arbiter" => Command::Arbiter(optional(&args)?),
            "resign" => Command::Resign(optional(&args)?),
            "elect" => Command::Elect(optional(&args)?),
            "status" | "s" => Command::Status(optional(&args)?),
            "use" => Command::Use(required(&args)?),
            "join" => Command::Join(required(&args)?),
            "leave" => Command::Leave(required(&args)?),
            "delete" => Command::Delete(required(&args)?),
            "channels" => Command::Channels,
            "discovered" => Command::Discovered,
            "help" | "?" => Command::Help,
            "quit" | "exit" | "q" => Command::Quit,
            other => return Err(format!("unknown command '{other}', try 'help'")),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> Command {
        line.parse().unwrap()
    }

    #[test]
    fn talk_variants() {
        assert_eq!(
            parse("talk"),
            Command::Talk {
                channel: None,
                priority: Priority::Normal
            }
        );
        assert_eq!(
            parse("talk emergency"),
            Command::Talk {
                channel: None,
                priority: Priority::Emergency
            }
        );
        assert_eq!(
            parse("TALK rescue"),
            Command::Talk {
                channel: Some("rescue".into()),
                priority: Priority::Normal
            }
        );
        assert_eq!(
            parse("t rescue high"),
            Command::Talk {
                channel: Some("rescue".into()),
                priority: Priority::High
            }
        );
        assert!("talk rescue loud".parse::<Command>().is_err());
    }

    #[test]
    fn channel_arguments() {
        assert_eq!(parse("release"), Command::Release(None));
        assert_eq!(parse("status ops"), Command::Status(Some("ops".into())));
        assert_eq!(parse("delete ops"), Command::Delete("ops".into()));
        assert!("delete".parse::<Command>().is_err());
        assert!("release a b".parse::<Command>().is_err());
    }

    #[test]
    fn unknown_and_empty() {
        assert!("".parse::<Command>().is_err());
        assert!("shout".parse::<Command>().is_err());
        assert_eq!(parse("  quit  "), Command::Quit);
    }
}
