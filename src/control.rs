//! Monitoring control.
//!
//! Commands arrive from outside the frame loop (stdin, tests, other threads)
//! over an mpsc channel and are applied by the loop between frames, so the
//! tracker keeps a single writer.
//!
//! Text syntax, one command per line:
//!
//! ```text
//! watch 1 2 3     # replace the monitored set (commas also accepted)
//! watch all       # monitor every spot
//! watch none      # stop monitoring and forget remembered state
//! status          # log the current counts and monitored set
//! ```

use anyhow::{anyhow, Result};
use std::io::BufRead;
use std::sync::mpsc::Sender;
use std::thread::JoinHandle;

use crate::SpotId;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MonitorCommand {
    Watch(Vec<SpotId>),
    WatchAll,
    WatchNone,
    Status,
}

/// Parse one line. Blank lines and `#` comments yield `None`.
pub fn parse_command(line: &str) -> Result<Option<MonitorCommand>> {
    let line = line.split('#').next().unwrap_or("").trim();
    if line.is_empty() {
        return Ok(None);
    }
    let mut words = line.split_whitespace();
    let verb = words.next().unwrap_or("").to_ascii_lowercase();
    let rest: Vec<&str> = words.collect();
    match verb.as_str() {
        "status" if rest.is_empty() => Ok(Some(MonitorCommand::Status)),
        "watch" => match rest.as_slice() {
            [] => Err(anyhow!("watch needs spot ids, 'all' or 'none'")),
            [arg] if arg.eq_ignore_ascii_case("all") => Ok(Some(MonitorCommand::WatchAll)),
            [arg] if arg.eq_ignore_ascii_case("none") => Ok(Some(MonitorCommand::WatchNone)),
            args => Ok(Some(MonitorCommand::Watch(parse_ids(&args.join(" "))?))),
        },
        other => Err(anyhow!("unknown command: {}", other)),
    }
}

/// Parse spot ids separated by commas and/or whitespace. Ids are 1-based.
pub fn parse_ids(raw: &str) -> Result<Vec<SpotId>> {
    raw.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(|s| {
            let id: u32 = s
                .parse()
                .map_err(|_| anyhow!("invalid spot id: {}", s))?;
            if id == 0 {
                return Err(anyhow!("spot ids start at 1"));
            }
            Ok(SpotId(id))
        })
        .collect()
}

/// Read commands from `reader` on a helper thread until EOF or the receiver goes away.
/// Unparseable lines are logged and skipped.
pub fn spawn_reader<R>(reader: R, tx: Sender<MonitorCommand>) -> JoinHandle<()>
where
    R: BufRead + Send + 'static,
{
    std::thread::spawn(move || {
        for line in reader.lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    log::warn!("control input read failed: {}", e);
                    break;
                }
            };
            match parse_command(&line) {
                Ok(Some(cmd)) => {
                    if tx.send(cmd).is_err() {
                        break;
                    }
                }
                Ok(None) => {}
                Err(e) => log::warn!("ignoring control input {:?}: {}", line, e),
            }
        }
    })
}

pub fn spawn_stdin_control(tx: Sender<MonitorCommand>) -> JoinHandle<()> {
    spawn_reader(std::io::BufReader::new(std::io::stdin()), tx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::mpsc;

    #[test]
    fn parses_watch_forms() -> Result<()> {
        assert_eq!(
            parse_command("watch 1 2 3")?,
            Some(MonitorCommand::Watch(vec![SpotId(1), SpotId(2), SpotId(3)]))
        );
        assert_eq!(
            parse_command("  WATCH 4,5 ")?,
            Some(MonitorCommand::Watch(vec![SpotId(4), SpotId(5)]))
        );
        assert_eq!(parse_command("watch all")?, Some(MonitorCommand::WatchAll));
        assert_eq!(parse_command("watch None")?, Some(MonitorCommand::WatchNone));
        assert_eq!(parse_command("status")?, Some(MonitorCommand::Status));
        assert_eq!(parse_command("   # comment")?, None);
        Ok(())
    }

    #[test]
    fn rejects_bad_input() {
        assert!(parse_command("watch").is_err());
        assert!(parse_command("watch 0").is_err());
        assert!(parse_command("watch two").is_err());
        assert!(parse_command("park 1").is_err());
    }

    #[test]
    fn reader_thread_forwards_valid_commands() {
        let input = Cursor::new("watch 2\nbogus\n\nwatch none\n");
        let (tx, rx) = mpsc::channel();
        let handle = spawn_reader(input, tx);
        handle.join().unwrap();
        let got: Vec<MonitorCommand> = rx.try_iter().collect();
        assert_eq!(
            got,
            vec![MonitorCommand::Watch(vec![SpotId(2)]), MonitorCommand::WatchNone]
        );
    }
}
