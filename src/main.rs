use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use crossterm::{
    cursor,
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{self, ClearType},
};
use log::info;
use std::{
    env,
    io::stdout,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use roomverb::{
    dsp::rms, draw_frame, utils::scopeguard, Config, ControlSurface, DisplayFrame, DuplexDevice,
    ImageSourceRir, ParamStore, RoomParams, StreamHandle, TickStatus,
};

const REDRAW: Duration = Duration::from_millis(50);

fn main() -> Result<()> {
    let headless = env::args().skip(1).any(|a| a == "--headless");
    let default_filter = if headless { "info" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    let cfg = Config::from_env().context("invalid configuration")?;
    let store = ParamStore::new(RoomParams::from_config(&cfg));

    // a slow display drops frames instead of stalling the audio thread
    let (tx, rx) = crossbeam_channel::bounded::<DisplayFrame>(4);
    let handle = roomverb::spawn(
        cfg,
        store.clone(),
        ImageSourceRir::default(),
        DuplexDevice::open,
        tx,
    )
    .context("failed to start audio thread")?;

    if headless {
        run_headless(handle, rx)
    } else {
        run_terminal(handle, rx, store)
    }
}

/// q, Esc, or Ctrl-C (raw mode delivers it as a key, not a signal).
fn is_quit(k: &KeyEvent) -> bool {
    match k.code {
        KeyCode::Char('q') | KeyCode::Esc => true,
        KeyCode::Char('c') => k.modifiers.contains(KeyModifiers::CONTROL),
        _ => false,
    }
}

fn run_headless(handle: StreamHandle, rx: Receiver<DisplayFrame>) -> Result<()> {
    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let interrupted = interrupted.clone();
        ctrlc::set_handler(move || interrupted.store(true, Ordering::Release))
            .context("failed to install Ctrl-C handler")?;
    }

    let mut last_report = Instant::now();
    let mut held = 0u64;
    while !interrupted.load(Ordering::Acquire) {
        match rx.recv_timeout(Duration::from_millis(200)) {
            Ok(frame) => {
                if matches!(frame.status, TickStatus::Reused(_)) {
                    held += 1;
                }
                if last_report.elapsed() >= Duration::from_secs(1) {
                    info!(
                        "tick {}: input rms {:.4}, output rms {:.4}, {} held ticks",
                        frame.tick,
                        rms(&frame.captured_time),
                        rms(&frame.processed_time),
                        held
                    );
                    held = 0;
                    last_report = Instant::now();
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    if interrupted.load(Ordering::Acquire) {
        info!("interrupted, closing the stream");
    }
    handle.join().context("audio stream failed")?;
    Ok(())
}

fn run_terminal(handle: StreamHandle, rx: Receiver<DisplayFrame>, store: ParamStore) -> Result<()> {
    let mut out = stdout();
    terminal::enable_raw_mode()?;
    execute!(
        out,
        terminal::EnterAlternateScreen,
        cursor::Hide,
        terminal::Clear(ClearType::All),
    )?;
    let cleanup = scopeguard::guard((), |_| {
        let mut out = stdout();
        let _ = execute!(out, cursor::Show, terminal::LeaveAlternateScreen);
        let _ = terminal::disable_raw_mode();
    });

    let mut controls = ControlSurface::new(store);
    let mut latest: Option<DisplayFrame> = None;
    let mut stopped: Option<String> = None;
    let mut failure = None;
    let mut handle = Some(handle);
    let mut last_draw: Option<Instant> = None;

    loop {
        if event::poll(Duration::from_millis(5))? {
            if let Event::Key(k) = event::read()? {
                if k.kind != KeyEventKind::Release {
                    if is_quit(&k) {
                        break;
                    }
                    match k.code {
                        KeyCode::Up | KeyCode::BackTab => controls.select_prev(),
                        KeyCode::Down | KeyCode::Tab => controls.select_next(),
                        KeyCode::Left => {
                            controls.nudge(-1);
                        }
                        KeyCode::Right => {
                            controls.nudge(1);
                        }
                        KeyCode::Char('r') => controls.reset(),
                        _ => {}
                    }
                }
            }
        }

        while let Ok(frame) = rx.try_recv() {
            latest = Some(frame);
        }

        // device errors end the stream; show it once and keep the UI up
        if handle.as_ref().map_or(false, |h| h.is_finished()) {
            if let Some(h) = handle.take() {
                match h.join() {
                    Ok(()) => stopped = Some("stream ended".to_string()),
                    Err(e) => {
                        stopped = Some(e.to_string());
                        failure = Some(e);
                    }
                }
            }
        }

        if last_draw.map_or(true, |t| t.elapsed() >= REDRAW) {
            let (w, h) = terminal::size()?;
            draw_frame(&mut out, latest.as_ref(), &controls, stopped.as_deref(), w, h)?;
            last_draw = Some(Instant::now());
        }
    }

    // release the device before restoring the terminal
    if let Some(h) = handle.take() {
        if let Err(e) = h.join() {
            failure = Some(e);
        }
    }
    drop(cleanup);

    match failure {
        Some(e) => Err(e).context("audio stream failed"),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ctrl_c_quits_in_raw_mode() {
        let ctrl_c = KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL);
        assert!(is_quit(&ctrl_c));
        assert!(is_quit(&KeyEvent::new(KeyCode::Char('q'), KeyModifiers::NONE)));
        assert!(is_quit(&KeyEvent::new(KeyCode::Esc, KeyModifiers::NONE)));
        assert!(!is_quit(&KeyEvent::new(KeyCode::Char('c'), KeyModifiers::NONE)));
        assert!(!is_quit(&KeyEvent::new(KeyCode::Char('r'), KeyModifiers::NONE)));
    }
}
