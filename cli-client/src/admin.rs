use syncify_core::config::SyncConfig;
use syncify_core::media::VirtualPlayer;
use syncify_core::messages::ControlCommand;
use syncify_core::room::RoomCode;
use syncify_core::session::{AdminHandle, AdminSession};
use syncify_core::track::{TrackReference, TrackResolver, YtDlpResolver};
use syncify_core::ws::WsRoomChannel;
use syncify_core::SystemClock;
use tokio::io::{AsyncBufReadExt, BufReader};
use url::Url;

#[derive(Debug, PartialEq)]
enum Input {
    Control(ControlCommand),
    Status,
    Quit,
    Empty,
}

const HELP: &str = "Commands: play | pause | +N / -N (seconds) | seek N | reload | status | quit";

fn parse_input(line: &str) -> Result<Input, String> {
    let line = line.trim();
    let mut words = line.split_whitespace();
    let Some(first) = words.next() else {
        return Ok(Input::Empty);
    };
    let input = match first {
        "play" | "p" => Input::Control(ControlCommand::Play),
        "pause" | "stop" => Input::Control(ControlCommand::Pause),
        "reload" | "r" => Input::Control(ControlCommand::Reload),
        "status" | "s" => Input::Status,
        "quit" | "exit" | "q" => Input::Quit,
        "seek" => {
            let delta = words.next().ok_or_else(|| "usage: seek <seconds>".to_string())?;
            Input::Control(ControlCommand::Seek {
                delta_secs: parse_seconds(delta)?,
            })
        }
        jump if jump.starts_with('+') || jump.starts_with('-') => Input::Control(ControlCommand::Seek {
            delta_secs: parse_seconds(jump)?,
        }),
        other => return Err(format!("unknown command `{other}`. {HELP}")),
    };
    Ok(input)
}

fn parse_seconds(raw: &str) -> Result<f64, String> {
    raw.parse::<f64>()
        .ok()
        .filter(|s| s.is_finite())
        .ok_or_else(|| format!("`{raw}` is not a number of seconds"))
}

fn print_status(admin: &AdminHandle) {
    let snap = admin.snapshot().borrow().clone();
    println!(
        "{} at {:.1}s, {} listener(s)",
        if snap.playing { "Playing" } else { "Paused" },
        snap.position,
        snap.listeners
    );
    if let Some(notice) = snap.notice {
        println!("Note: {notice}");
    }
}

pub async fn run(relay: &Url, track: &str, config: SyncConfig) -> anyhow::Result<()> {
    let reference: TrackReference = track.parse()?;
    println!("Resolving {}...", reference.watch_url());
    let track = YtDlpResolver::default().resolve(&reference).await?;

    let room = RoomCode::generate();
    // Self-delivery on: the admin sees its own broadcasts and ignores them.
    let link = WsRoomChannel::connect(relay, &room, true).await?;
    let clock = SystemClock::shared();
    let media = VirtualPlayer::new(clock.clone());
    let admin = AdminSession::new(room.clone(), track.clone(), media, clock, config).spawn(link);

    println!("Hosting \"{}\" in room {}", track.title, admin.room());
    println!("Listeners join with: syncify listen {room}");
    println!("{HELP}");

    let mut listeners = admin.listeners();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match parse_input(&line) {
                    Ok(Input::Control(cmd)) => admin.send(cmd).await?,
                    Ok(Input::Status) => print_status(&admin),
                    Ok(Input::Quit) => break,
                    Ok(Input::Empty) => {}
                    Err(msg) => println!("{msg}"),
                }
            }

            changed = listeners.changed() => {
                if changed.is_err() {
                    break;
                }
                let count = *listeners.borrow_and_update();
                println!("Listeners: {count}");
            }

            _ = tokio::signal::ctrl_c() => break,
        }
    }

    admin.close().await?;
    println!("Room {room} closed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_console_commands() {
        assert_eq!(parse_input("play"), Ok(Input::Control(ControlCommand::Play)));
        assert_eq!(parse_input(" pause "), Ok(Input::Control(ControlCommand::Pause)));
        assert_eq!(
            parse_input("+10"),
            Ok(Input::Control(ControlCommand::Seek { delta_secs: 10.0 }))
        );
        assert_eq!(
            parse_input("-2.5"),
            Ok(Input::Control(ControlCommand::Seek { delta_secs: -2.5 }))
        );
        assert_eq!(
            parse_input("seek 30"),
            Ok(Input::Control(ControlCommand::Seek { delta_secs: 30.0 }))
        );
        assert_eq!(parse_input(""), Ok(Input::Empty));
        assert_eq!(parse_input("reload"), Ok(Input::Control(ControlCommand::Reload)));
        assert_eq!(parse_input("q"), Ok(Input::Quit));
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_input("dance").is_err());
        assert!(parse_input("+ten").is_err());
        assert!(parse_input("seek").is_err());
        assert!(parse_input("+inf").is_err());
    }
}
