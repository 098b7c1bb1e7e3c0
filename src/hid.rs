use std::collections::BTreeSet;
use thiserror::Error;
use tracing::{debug, info};
use uinput::device::Device;
use uinput::event::keyboard;

#[derive(Error, Debug)]
pub enum HidError {
    #[error("uinput error: {0}")]
    Uinput(#[from] uinput::Error),
}

/// Keys the driving game listens to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DriveKey {
    Forward,
    Left,
    Right,
    Back,
    Brake,
}

impl DriveKey {
    pub const ALL: [DriveKey; 5] = [
        DriveKey::Forward,
        DriveKey::Left,
        DriveKey::Right,
        DriveKey::Back,
        DriveKey::Brake,
    ];

    fn keycode(self) -> keyboard::Key {
        match self {
            DriveKey::Forward => keyboard::Key::W,
            DriveKey::Left => keyboard::Key::A,
            DriveKey::Right => keyboard::Key::D,
            DriveKey::Back => keyboard::Key::S,
            DriveKey::Brake => keyboard::Key::Space,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            DriveKey::Forward => "W",
            DriveKey::Left => "A",
            DriveKey::Right => "D",
            DriveKey::Back => "S",
            DriveKey::Brake => "Space",
        }
    }
}

/// Something that can hold keys down.
pub trait KeySink {
    fn press(&mut self, key: DriveKey) -> Result<(), HidError>;
    fn release(&mut self, key: DriveKey) -> Result<(), HidError>;
}

/// Name the virtual device registers under. It must not look like a
/// physical keyboard to [`crate::shutdown::find_keyboard`].
pub const VIRTUAL_DEVICE_NAME: &str = "drive-mimic-hid";

/// Virtual keyboard on `/dev/uinput`.
pub struct UinputKeyboard {
    dev: Device,
}

impl UinputKeyboard {
    pub fn new() -> Result<Self, HidError> {
        let dev = uinput::default()?
            .name(VIRTUAL_DEVICE_NAME)?
            .event(uinput::event::Keyboard::All)?
            .create()?;

        info!("virtual keyboard created on /dev/uinput");
        Ok(UinputKeyboard { dev })
    }
}

impl KeySink for UinputKeyboard {
    fn press(&mut self, key: DriveKey) -> Result<(), HidError> {
        self.dev.press(&keyboard::Keyboard::Key(key.keycode()))?;
        self.dev.synchronize()?;
        Ok(())
    }

    fn release(&mut self, key: DriveKey) -> Result<(), HidError> {
        self.dev.release(&keyboard::Keyboard::Key(key.keycode()))?;
        self.dev.synchronize()?;
        Ok(())
    }
}

/// Dry-run sink: logs key transitions instead of emitting them.
#[derive(Default)]
pub struct LogSink;

impl KeySink for LogSink {
    fn press(&mut self, key: DriveKey) -> Result<(), HidError> {
        info!(key = key.label(), "press");
        Ok(())
    }

    fn release(&mut self, key: DriveKey) -> Result<(), HidError> {
        info!(key = key.label(), "release");
        Ok(())
    }
}

impl<S: KeySink + ?Sized> KeySink for Box<S> {
    fn press(&mut self, key: DriveKey) -> Result<(), HidError> {
        (**self).press(key)
    }

    fn release(&mut self, key: DriveKey) -> Result<(), HidError> {
        (**self).release(key)
    }
}

/// Tracks which keys are down so only transitions reach the sink.
pub struct HeldKeys<S: KeySink> {
    sink: S,
    held: BTreeSet<DriveKey>,
}

impl<S: KeySink> HeldKeys<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            held: BTreeSet::new(),
        }
    }

    pub fn held(&self) -> &BTreeSet<DriveKey> {
        &self.held
    }

    /// Presses keys that became active and releases every held key that is
    /// no longer active.
    pub fn apply(&mut self, active: &BTreeSet<DriveKey>) -> Result<(), HidError> {
        for &key in active {
            if !self.held.contains(&key) {
                self.sink.press(key)?;
                self.held.insert(key);
            }
        }

        let stale: Vec<DriveKey> = self.held.difference(active).copied().collect();
        for key in stale {
            self.sink.release(key)?;
            self.held.remove(&key);
        }
        Ok(())
    }

    /// Releases all driving keys, held or not.
    pub fn release_all(&mut self) -> Result<(), HidError> {
        debug!("releasing all keys");
        self.held.clear();
        let mut first_err = None;
        for key in DriveKey::ALL {
            if let Err(e) = self.sink.release(key) {
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
