//! Keyboard line commands for the console shell.

/// One parsed input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Next,
    Previous,
    /// 1-based channel number as shown by `list`.
    Select(usize),
    Play,
    Pause,
    /// Play when paused or buffering, pause otherwise.
    Toggle,
    Stop,
    Mute,
    VolumeUp,
    VolumeDown,
    Volume(u8),
    Status,
    List,
    Help,
    Quit,
}

const VOLUME_STEP: u8 = 5;

pub const HELP: &str = "\
commands:
  n / p          next / previous channel
  <number>       select channel (1-based)
  play, pause    resume / pause
  <space>, t     toggle play/pause
  s              stop
  m              mute / unmute
  + / -          volume up / down
  v <0-100>      set volume
  i              status
  l              list channels
  h              this help
  q              quit";

impl Command {
    pub fn parse(line: &str) -> Result<Command, String> {
        if line == " " {
            return Ok(Command::Toggle);
        }
        let line = line.trim();
        let mut parts = line.split_whitespace();
        let head = parts.next().unwrap_or_default().to_lowercase();
        let arg = parts.next();

        let cmd = match head.as_str() {
            "n" | "next" => Command::Next,
            "p" | "prev" | "previous" => Command::Previous,
            "play" | "r" | "resume" => Command::Play,
            "pause" => Command::Pause,
            "t" | "toggle" => Command::Toggle,
            "s" | "stop" => Command::Stop,
            "m" | "mute" => Command::Mute,
            "+" => Command::VolumeUp,
            "-" => Command::VolumeDown,
            "v" | "vol" | "volume" => {
                let raw = arg.ok_or_else(|| "usage: v <0-100>".to_string())?;
                let value: u8 = raw
                    .parse()
                    .map_err(|_| format!("invalid volume: {raw}"))?;
                if value > 100 {
                    return Err(format!("volume out of range: {value}"));
                }
                Command::Volume(value)
            }
            "i" | "info" | "status" => Command::Status,
            "l" | "list" => Command::List,
            "h" | "help" | "?" => Command::Help,
            "q" | "quit" | "exit" => Command::Quit,
            "" => return Err(String::new()),
            other => match other.parse::<usize>() {
                Ok(n) if n >= 1 => Command::Select(n),
                _ => return Err(format!("unknown command: {other} (h for help)")),
            },
        };
        Ok(cmd)
    }
}

/// Volume after one `+`/`-` step.
pub fn step_volume(current: u8, up: bool) -> u8 {
    if up {
        current.saturating_add(VOLUME_STEP).min(100)
    } else {
        current.saturating_sub(VOLUME_STEP)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_short_and_long_forms() {
        assert_eq!(Command::parse("n"), Ok(Command::Next));
        assert_eq!(Command::parse(" previous "), Ok(Command::Previous));
        assert_eq!(Command::parse("PLAY"), Ok(Command::Play));
        assert_eq!(Command::parse(" "), Ok(Command::Toggle));
        assert_eq!(Command::parse("q"), Ok(Command::Quit));
    }

    #[test]
    fn numbers_select_channels() {
        assert_eq!(Command::parse("3"), Ok(Command::Select(3)));
        assert!(Command::parse("0").is_err());
    }

    #[test]
    fn volume_requires_valid_argument() {
        assert_eq!(Command::parse("v 40"), Ok(Command::Volume(40)));
        assert!(Command::parse("v").is_err());
        assert!(Command::parse("v 101").is_err());
        assert!(Command::parse("v loud").is_err());
    }

    #[test]
    fn empty_line_is_ignored() {
        assert_eq!(Command::parse(""), Err(String::new()));
    }

    #[test]
    fn volume_steps_saturate() {
        assert_eq!(step_volume(98, true), 100);
        assert_eq!(step_volume(3, false), 0);
        assert_eq!(step_volume(20, true), 25);
    }
}
