//! Terminal modes applied to the slave side before exec
//!
//! A [`TerminalModes`] value is carried through the allocator untouched and
//! written onto the slave's termios in the child.

use nix::sys::termios::{
    ControlFlags, InputFlags, LocalFlags, OutputFlags, SpecialCharacterIndices, Termios,
};

/// Semantic role of a control character
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlChar {
    Interrupt,
    Quit,
    Erase,
    Kill,
    Suspend,
    Reprint,
    WordErase,
    EndOfFile,
    Start,
    Stop,
}

impl ControlChar {
    pub const COUNT: usize = 10;

    pub const ALL: [ControlChar; Self::COUNT] = [
        ControlChar::Interrupt,
        ControlChar::Quit,
        ControlChar::Erase,
        ControlChar::Kill,
        ControlChar::Suspend,
        ControlChar::Reprint,
        ControlChar::WordErase,
        ControlChar::EndOfFile,
        ControlChar::Start,
        ControlChar::Stop,
    ];

    fn slot(self) -> usize {
        self as usize
    }

    /// Index of this role in the host's `c_cc` array
    pub fn index(self) -> SpecialCharacterIndices {
        match self {
            ControlChar::Interrupt => SpecialCharacterIndices::VINTR,
            ControlChar::Quit => SpecialCharacterIndices::VQUIT,
            ControlChar::Erase => SpecialCharacterIndices::VERASE,
            ControlChar::Kill => SpecialCharacterIndices::VKILL,
            ControlChar::Suspend => SpecialCharacterIndices::VSUSP,
            ControlChar::Reprint => SpecialCharacterIndices::VREPRINT,
            ControlChar::WordErase => SpecialCharacterIndices::VWERASE,
            ControlChar::EndOfFile => SpecialCharacterIndices::VEOF,
            ControlChar::Start => SpecialCharacterIndices::VSTART,
            ControlChar::Stop => SpecialCharacterIndices::VSTOP,
        }
    }
}

/// Flag sets and control characters for a terminal
///
/// Control characters left unset keep whatever value the slave already has.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalModes {
    pub input_flags: InputFlags,
    pub output_flags: OutputFlags,
    pub control_flags: ControlFlags,
    pub local_flags: LocalFlags,
    control_chars: [Option<u8>; ControlChar::COUNT],
}

impl TerminalModes {
    /// Modes with every flag cleared and no control characters set
    pub fn empty() -> Self {
        Self {
            input_flags: InputFlags::empty(),
            output_flags: OutputFlags::empty(),
            control_flags: ControlFlags::empty(),
            local_flags: LocalFlags::empty(),
            control_chars: [None; ControlChar::COUNT],
        }
    }

    /// Cooked, echoing modes roughly matching a fresh xterm
    pub fn sane() -> Self {
        let mut input_flags = InputFlags::BRKINT
            | InputFlags::ICRNL
            | InputFlags::IXON
            | InputFlags::IXANY
            | InputFlags::IMAXBEL;
        #[cfg(any(target_os = "linux", target_os = "android", target_os = "macos"))]
        {
            input_flags |= InputFlags::IUTF8;
        }

        let mut modes = Self {
            input_flags,
            output_flags: OutputFlags::OPOST | OutputFlags::ONLCR,
            control_flags: ControlFlags::CREAD | ControlFlags::CS8 | ControlFlags::HUPCL,
            local_flags: LocalFlags::ICANON
                | LocalFlags::ISIG
                | LocalFlags::IEXTEN
                | LocalFlags::ECHO
                | LocalFlags::ECHOE
                | LocalFlags::ECHOK
                | LocalFlags::ECHOKE
                | LocalFlags::ECHOCTL,
            control_chars: [None; ControlChar::COUNT],
        };

        modes
            .set_control_char(ControlChar::Interrupt, 0x03)
            .set_control_char(ControlChar::Quit, 0x1c)
            .set_control_char(ControlChar::Erase, 0x7f)
            .set_control_char(ControlChar::Kill, 0x15)
            .set_control_char(ControlChar::Suspend, 0x1a)
            .set_control_char(ControlChar::Reprint, 0x12)
            .set_control_char(ControlChar::WordErase, 0x17)
            .set_control_char(ControlChar::EndOfFile, 0x04)
            .set_control_char(ControlChar::Start, 0x11)
            .set_control_char(ControlChar::Stop, 0x13);
        modes
    }

    /// Byte-transparent modes: no echo, no signals, no output processing
    pub fn raw() -> Self {
        Self {
            control_flags: ControlFlags::CREAD | ControlFlags::CS8,
            ..Self::empty()
        }
    }

    pub fn set_control_char(&mut self, role: ControlChar, value: u8) -> &mut Self {
        self.control_chars[role.slot()] = Some(value);
        self
    }

    pub fn control_char(&self, role: ControlChar) -> Option<u8> {
        self.control_chars[role.slot()]
    }

    /// Write these modes over `termios`, keeping its line speed
    pub(crate) fn apply_to(&self, termios: &mut Termios) {
        termios.input_flags = self.input_flags;
        termios.output_flags = self.output_flags;
        // Linux keeps the line speed inside c_cflag.
        #[cfg(any(target_os = "linux", target_os = "android"))]
        let speed = termios.control_flags & ControlFlags::CBAUD;
        #[cfg(not(any(target_os = "linux", target_os = "android")))]
        let speed = ControlFlags::empty();
        termios.control_flags = self.control_flags | speed;
        termios.local_flags = self.local_flags;
        for role in ControlChar::ALL {
            if let Some(value) = self.control_char(role) {
                termios.control_chars[role.index() as usize] = value;
            }
        }
    }
}

impl Default for TerminalModes {
    fn default() -> Self {
        Self::sane()
    }
}
