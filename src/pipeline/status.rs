use super::Rgb;

/// Color convention of on-device status messages.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StatusKind {
    Error,
    Connecting,
    Success,
    Info,
}

impl StatusKind {
    pub const fn color(self) -> Rgb {
        match self {
            StatusKind::Error => Rgb::RED,
            StatusKind::Connecting => Rgb::YELLOW,
            StatusKind::Success => Rgb::GREEN,
            StatusKind::Info => Rgb::BLUE,
        }
    }
}

/// Short text shown full-screen instead of a frame.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Status {
    pub text: String,
    pub kind: StatusKind,
}

impl Status {
    pub fn new(text: impl Into<String>, kind: StatusKind) -> Self {
        Self {
            text: text.into(),
            kind,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::new(text, StatusKind::Error)
    }

    pub fn connecting(text: impl Into<String>) -> Self {
        Self::new(text, StatusKind::Connecting)
    }

    pub fn success(text: impl Into<String>) -> Self {
        Self::new(text, StatusKind::Success)
    }

    pub fn info(text: impl Into<String>) -> Self {
        Self::new(text, StatusKind::Info)
    }
}
