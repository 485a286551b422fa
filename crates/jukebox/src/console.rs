//! Line-oriented control console: one producer standing in for buttons and menus.

use std::io::{BufRead, Write};

use anyhow::{Context, Result, bail};

use jukebox_player::PlaybackController;

const HELP: &str = "\
commands:
  add <item>   enqueue a local path or URL
  play         start or resume playback
  pause        toggle pause
  skip         abandon the current item
  stop         stop and clear the queue
  status       print the controller status as JSON
  release      free pooled stream buffers
  help         show this text
  quit         stop and exit";

#[derive(Debug, PartialEq, Eq)]
pub enum ConsoleCommand {
    Add(String),
    Play,
    Pause,
    Skip,
    Stop,
    Status,
    Release,
    Help,
    Quit,
}

impl ConsoleCommand {
    /// Parse one input line. `Ok(None)` for blank lines and comments.
    pub fn parse(line: &str) -> Result<Option<Self>> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return Ok(None);
        }
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };
        let cmd = match word.to_ascii_lowercase().as_str() {
            "add" | "a" => {
                if rest.is_empty() {
                    bail!("add needs an item");
                }
                ConsoleCommand::Add(rest.to_string())
            }
            "play" | "p" => ConsoleCommand::Play,
            "pause" => ConsoleCommand::Pause,
            "skip" | "next" | "n" => ConsoleCommand::Skip,
            "stop" => ConsoleCommand::Stop,
            "status" | "s" => ConsoleCommand::Status,
            "release" => ConsoleCommand::Release,
            "help" | "?" => ConsoleCommand::Help,
            "quit" | "exit" | "q" => ConsoleCommand::Quit,
            other => bail!("unknown command: {other}"),
        };
        Ok(Some(cmd))
    }
}

/// Read commands from `input` until `quit` or end of input.
pub fn run<R: BufRead, W: Write>(
    controller: &PlaybackController,
    input: R,
    mut out: W,
) -> Result<()> {
    for line in input.lines() {
        let line = line.context("read console input")?;
        let cmd = match ConsoleCommand::parse(&line) {
            Ok(Some(cmd)) => cmd,
            Ok(None) => continue,
            Err(e) => {
                writeln!(out, "error: {e}")?;
                continue;
            }
        };
        if cmd == ConsoleCommand::Quit {
            break;
        }
        if let Err(e) = apply(controller, cmd, &mut out) {
            writeln!(out, "error: {e:#}")?;
        }
    }
    Ok(())
}

fn apply<W: Write>(
    controller: &PlaybackController,
    cmd: ConsoleCommand,
    out: &mut W,
) -> Result<()> {
    match cmd {
        ConsoleCommand::Add(item) => {
            controller
                .try_enqueue(&item)
                .with_context(|| format!("enqueue {item}"))?;
            writeln!(out, "queued ({} waiting)", controller.queued())?;
        }
        ConsoleCommand::Play => controller.play()?,
        ConsoleCommand::Pause => controller.pause()?,
        ConsoleCommand::Skip => controller.skip()?,
        ConsoleCommand::Stop => controller.stop_and_clear()?,
        ConsoleCommand::Release => controller.release_buffers()?,
        ConsoleCommand::Status => {
            let json = serde_json::to_string_pretty(&controller.status())?;
            writeln!(out, "{json}")?;
        }
        ConsoleCommand::Help => writeln!(out, "{HELP}")?,
        ConsoleCommand::Quit => {}
    }
    Ok(())
}
