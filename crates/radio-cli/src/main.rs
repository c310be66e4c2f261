//! `radio`: a console internet-radio player.
//!
//! Loads a channel list, wires the HTTP MP3 source, the Symphonia decoder and the CPAL
//! output into a [`PlaybackController`], then maps keyboard lines to the control surface
//! and prints the controller's notifications.
//!
//! ## Threads
//! - main: owns the controller, reads parsed commands and Ctrl-C
//! - `radio-stdin`: blocking line reader feeding the main loop
//! - `radio-events`: prints [`PlayerEvent`]s as they arrive

mod cli;
mod commands;
mod config;

use std::io::BufRead;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::Receiver;
use radio_player::{
    Collaborators, CpalSinkFactory, DEFAULT_VOLUME, HttpStreamOpener, Mp3DecoderFactory,
    PlaybackController, PlaybackState, PlayerError, PlayerEvent,
};
use tracing_subscriber::EnvFilter;

use commands::Command;
use config::RadioConfig;

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,radio_player=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if args.list_devices {
        for (i, name) in radio_player::sink::list_devices()?.iter().enumerate() {
            println!("#{i}: {name}");
        }
        return Ok(());
    }

    let cfg = match &args.config {
        Some(path) => RadioConfig::load(path)?,
        None => RadioConfig::default(),
    };
    let channels = cfg.channel_list()?;
    if args.list_channels {
        for (i, channel) in channels.iter().enumerate() {
            println!("{:>2}. {}  {}", i + 1, channel.title(), channel.stream_url());
        }
        return Ok(());
    }

    let mut playback = cfg.playback_config();
    if let Some(secs) = args.buffer_seconds {
        playback.buffer_seconds = secs;
    }
    let device = args.device.clone().or_else(|| cfg.device.clone());
    let collaborators = Collaborators {
        opener: Arc::new(HttpStreamOpener::new(cfg.http_config())),
        decoders: Arc::new(Mp3DecoderFactory),
        sinks: Arc::new(CpalSinkFactory::new(device, playback.clone())),
    };
    let channel_count = channels.len();
    let mut controller = PlaybackController::new(channels, playback, collaborators)?;
    controller.set_volume(args.volume.or(cfg.volume).unwrap_or(DEFAULT_VOLUME))?;

    let events = controller.subscribe();
    std::thread::Builder::new()
        .name("radio-events".to_string())
        .spawn(move || print_events(events, channel_count))
        .context("spawn event printer")?;

    let (quit_tx, quit_rx) = crossbeam_channel::bounded(1);
    ctrlc::set_handler(move || {
        let _ = quit_tx.try_send(());
    })
    .context("install Ctrl-C handler")?;

    let lines = spawn_stdin_reader()?;

    println!("{}", commands::HELP);
    if !args.no_autoplay {
        let start = args.channel.or(cfg.start_channel).unwrap_or(1);
        report(controller.select_channel(start.saturating_sub(1)));
    }

    let mut stdin_closed = false;
    loop {
        crossbeam_channel::select! {
            recv(quit_rx) -> _ => break,
            recv(lines) -> line => match line {
                Ok(line) => match Command::parse(&line) {
                    Ok(Command::Quit) => break,
                    Ok(cmd) => report(apply(&mut controller, cmd)),
                    Err(msg) if msg.is_empty() => {}
                    Err(msg) => println!("! {msg}"),
                },
                Err(_) => {
                    stdin_closed = true;
                    break;
                }
            },
        }
    }
    if stdin_closed {
        tracing::info!("stdin closed; Ctrl-C to quit");
        let _ = quit_rx.recv();
    }

    controller.close();
    Ok(())
}

fn apply(controller: &mut PlaybackController, cmd: Command) -> Result<(), PlayerError> {
    match cmd {
        Command::Next => controller.next_channel(),
        Command::Previous => controller.previous_channel(),
        Command::Select(n) => controller.select_channel(n - 1),
        Command::Play => controller.play(),
        Command::Pause => controller.pause(),
        Command::Toggle => match controller.state() {
            PlaybackState::Playing | PlaybackState::Buffering => controller.pause(),
            PlaybackState::Paused | PlaybackState::Stopped => controller.play(),
        },
        Command::Stop => controller.stop(),
        Command::Mute => controller.toggle_mute(),
        Command::VolumeUp => {
            controller.set_volume(commands::step_volume(controller.volume(), true))
        }
        Command::VolumeDown => {
            controller.set_volume(commands::step_volume(controller.volume(), false))
        }
        Command::Volume(v) => controller.set_volume(v),
        Command::Status => {
            print_status(controller);
            Ok(())
        }
        Command::List => {
            let current = controller.channel_index();
            for (i, channel) in controller.channels().iter().enumerate() {
                let marker = if i == current { '*' } else { ' ' };
                println!("{marker}{:>2}. {}", i + 1, channel.title());
            }
            Ok(())
        }
        Command::Help => {
            println!("{}", commands::HELP);
            Ok(())
        }
        Command::Quit => Ok(()),
    }
}

fn report(result: Result<(), PlayerError>) {
    if let Err(e) = result {
        println!("! {e}");
    }
}

fn print_status(controller: &PlaybackController) {
    let s = controller.status();
    let mut line = format!(
        "{} {} [{}] volume {}{}",
        s.position_label(),
        s.channel_title.as_deref().unwrap_or("-"),
        s.state.label(),
        s.volume,
        if s.muted { " (muted)" } else { "" },
    );
    if let (Some(buffered), Some(capacity)) = (s.buffered_ms, s.buffer_capacity_ms) {
        line.push_str(&format!(
            " buffer {:.1}/{:.0}s",
            buffered as f64 / 1000.0,
            capacity as f64 / 1000.0
        ));
    }
    if let (Some(rate), Some(ch)) = (s.sample_rate, s.channels) {
        line.push_str(&format!(" {rate} Hz/{ch} ch"));
    }
    if let Some(fault) = &s.last_fault {
        line.push_str(&format!(" last error: {fault}"));
    }
    println!("{line}");
}

fn print_events(events: Receiver<PlayerEvent>, channel_count: usize) {
    for event in events {
        match event {
            PlayerEvent::StateChanged { state } => println!("[{}]", state.label()),
            PlayerEvent::ChannelChanged { index, title } => {
                println!("> {}/{channel_count} {title}", index + 1)
            }
            PlayerEvent::VolumeChanged { volume, muted } => {
                println!("volume {volume}{}", if muted { " (muted)" } else { "" })
            }
            PlayerEvent::BufferLevel { buffered, capacity } => tracing::trace!(
                buffered_ms = buffered.as_millis() as u64,
                capacity_ms = capacity.as_millis() as u64,
                "buffer level"
            ),
            PlayerEvent::Fault { kind, message } => println!("! {kind:?}: {message}"),
            PlayerEvent::Ended { reason } => println!("stream ended ({reason:?})"),
        }
    }
}

fn spawn_stdin_reader() -> Result<Receiver<String>> {
    let (tx, rx) = crossbeam_channel::unbounded();
    std::thread::Builder::new()
        .name("radio-stdin".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        })
        .context("spawn stdin reader")?;
    Ok(rx)
}
