//! Protocol command ids.

/// Commands carried in the first field of every control packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Command {
    /// Failure reply carrying a u32 error code.
    Error,
    /// Synthesized locally when a registered reply deadline expires; never
    /// sent on the wire.
    Timeout,
    /// Success reply; body depends on the request.
    Reply,

    // Client-originated requests
    Auth,
    SetName,
    Exit,
    Stat,
    Subscribe,
    CreatePlaybackStream,
    DeletePlaybackStream,
    CreateRecordStream,
    DeleteRecordStream,

    // Daemon-originated events
    Request,
    PlaybackStreamKilled,
    RecordStreamKilled,
    SubscribeEvent,
}

impl Command {
    pub fn to_wire(self) -> u32 {
        match self {
            Command::Error => 0,
            Command::Timeout => 1,
            Command::Reply => 2,
            Command::Auth => 3,
            Command::SetName => 4,
            Command::Exit => 5,
            Command::Stat => 6,
            Command::Subscribe => 7,
            Command::CreatePlaybackStream => 8,
            Command::DeletePlaybackStream => 9,
            Command::CreateRecordStream => 10,
            Command::DeleteRecordStream => 11,
            Command::Request => 64,
            Command::PlaybackStreamKilled => 65,
            Command::RecordStreamKilled => 66,
            Command::SubscribeEvent => 67,
        }
    }

    pub fn from_wire(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Command::Error),
            1 => Some(Command::Timeout),
            2 => Some(Command::Reply),
            3 => Some(Command::Auth),
            4 => Some(Command::SetName),
            5 => Some(Command::Exit),
            6 => Some(Command::Stat),
            7 => Some(Command::Subscribe),
            8 => Some(Command::CreatePlaybackStream),
            9 => Some(Command::DeletePlaybackStream),
            10 => Some(Command::CreateRecordStream),
            11 => Some(Command::DeleteRecordStream),
            64 => Some(Command::Request),
            65 => Some(Command::PlaybackStreamKilled),
            66 => Some(Command::RecordStreamKilled),
            67 => Some(Command::SubscribeEvent),
            _ => None,
        }
    }

    /// True for commands that answer a client-assigned tag.
    pub fn is_reply(self) -> bool {
        matches!(self, Command::Reply | Command::Error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_wire_roundtrip() {
        for cmd in [
            Command::Error,
            Command::Timeout,
            Command::Reply,
            Command::Auth,
            Command::SetName,
            Command::Exit,
            Command::Stat,
            Command::Subscribe,
            Command::CreatePlaybackStream,
            Command::DeletePlaybackStream,
            Command::CreateRecordStream,
            Command::DeleteRecordStream,
            Command::Request,
            Command::PlaybackStreamKilled,
            Command::RecordStreamKilled,
            Command::SubscribeEvent,
        ] {
            assert_eq!(Command::from_wire(cmd.to_wire()), Some(cmd));
        }
        assert_eq!(Command::from_wire(999), None);
    }

    #[test]
    fn only_reply_and_error_answer_tags() {
        assert!(Command::Reply.is_reply());
        assert!(Command::Error.is_reply());
        assert!(!Command::Request.is_reply());
        assert!(!Command::Auth.is_reply());
    }
}
