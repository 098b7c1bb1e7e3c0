use crossbeam_channel::Sender;
use evdev::{Device, InputEventKind, Key};
use std::fs;
use std::path::Path;
use std::thread;
use tracing::{debug, info, warn};

use crate::hid::VIRTUAL_DEVICE_NAME;

/// Why the gesture loop was asked to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shutdown {
    QuitKey,
    Interrupt,
}

/// Sends `Shutdown::Interrupt` on Ctrl-C.
pub fn install_interrupt(tx: Sender<Shutdown>) -> Result<(), ctrlc::Error> {
    ctrlc::set_handler(move || {
        let _ = tx.send(Shutdown::Interrupt);
    })
}

/// Physical keyboards only; our own uinput device is skipped.
fn is_keyboard_name(name: &str) -> bool {
    if name == VIRTUAL_DEVICE_NAME {
        return false;
    }
    let lc = name.to_lowercase();
    lc.contains("keyboard") || lc.contains("at translated")
}

/// First `/dev/input/event*` device that looks like a keyboard.
pub fn find_keyboard(dir: &Path) -> Option<Device> {
    let entries = fs::read_dir(dir).ok()?;
    for entry in entries.flatten() {
        let path = entry.path();
        let is_event = path
            .file_name()
            .map(|n| n.to_string_lossy().starts_with("event"))
            .unwrap_or(false);
        if !is_event {
            continue;
        }
        if let Ok(device) = Device::open(&path) {
            if device.name().map(is_keyboard_name).unwrap_or(false) {
                info!(
                    "keyboard found: {} ({})",
                    device.name().unwrap_or_default(),
                    path.display()
                );
                return Some(device);
            }
        }
    }
    None
}

/// Watches a physical keyboard for `Q` on a background thread. Returns
/// `false` when no readable keyboard exists (e.g. missing `input` group).
pub fn spawn_quit_key_watcher(tx: Sender<Shutdown>) -> bool {
    let Some(mut device) = find_keyboard(Path::new("/dev/input")) else {
        warn!("no keyboard device readable in /dev/input, quit key disabled");
        return false;
    };

    thread::spawn(move || loop {
        let events = match device.fetch_events() {
            Ok(events) => events,
            Err(e) => {
                debug!("keyboard watcher stopped: {}", e);
                return;
            }
        };
        for ev in events {
            if let InputEventKind::Key(key) = ev.kind() {
                if key == Key::KEY_Q && ev.value() == 1 {
                    let _ = tx.send(Shutdown::QuitKey);
                    return;
                }
            }
        }
    });
    true
}
