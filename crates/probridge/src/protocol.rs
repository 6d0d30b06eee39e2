//! USB wire protocol of the Switch Pro controller.
//!
//! All traffic is 64-byte HID reports. The first byte selects the packet
//! type; the remaining 63 bytes are type-specific. A single USB read may
//! return up to two back-to-back reports, so transfer buffers are scanned
//! report-by-report with [`packets`].
//!
//! Values decoded from USB captures of the controller in USB mode.

// ── Sizes ──

/// Every report on the wire is exactly this long.
pub const PACKET_LEN: usize = 64;

/// Read transfers may carry up to two reports.
pub const READ_TRANSFER_LEN: usize = 128;

/// Write transfers carry exactly one report.
pub const WRITE_TRANSFER_LEN: usize = 64;

// ── Discriminants ──

/// Packet type discriminant (byte 0 of every report).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    /// Host → device: rumble values plus one subcommand.
    RumbleAndSubcommand = 0x01,
    /// Host → device: rumble values only. Defined but unused by the bridge.
    Rumble = 0x10,
    /// Host → device: bare USB command.
    Command = 0x80,
    /// Device → host: reply to [`PacketType::RumbleAndSubcommand`].
    SubcommandReply = 0x21,
    /// Device → host: complete controller state.
    FullStates = 0x30,
    /// Device → host: reply to [`PacketType::Command`].
    CommandReply = 0x81,
}

impl PacketType {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(PacketType::RumbleAndSubcommand),
            0x10 => Some(PacketType::Rumble),
            0x80 => Some(PacketType::Command),
            0x21 => Some(PacketType::SubcommandReply),
            0x30 => Some(PacketType::FullStates),
            0x81 => Some(PacketType::CommandReply),
            _ => None,
        }
    }
}

/// Command codes carried by [`PacketType::Command`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandCode {
    Handshake = 0x02,
    SetHighSpeed = 0x03,
    /// Keeps the controller on the USB transport. The device never replies
    /// to this one.
    ForceUsb = 0x04,
}

/// Subcommand codes carried by [`PacketType::RumbleAndSubcommand`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SubcommandCode {
    SetPlayerLights = 0x30,
    SetImuSensitivity = 0x41,
}

// ── Buttons ──

/// Bit positions within the 24-bit key field of a state report.
///
/// `StickL` / `StickR` are the stick click buttons; `Zl` / `Zr` are the
/// digital triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ProButton {
    Y = 0,
    X = 1,
    B = 2,
    A = 3,
    R = 6,
    Zr = 7,
    Minus = 8,
    Plus = 9,
    StickR = 10,
    StickL = 11,
    Home = 12,
    Share = 13,
    Down = 16,
    Up = 17,
    Right = 18,
    Left = 19,
    L = 22,
    Zl = 23,
}

// ── Rumble ──

/// One channel of the four-byte rumble encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RumbleParam {
    pub high_freq: u8,
    pub high_freq_amp: u8,
    pub low_freq: u8,
    pub low_freq_amp: u8,
}

impl RumbleParam {
    /// The encoding for "no vibration". Sent alongside every subcommand.
    pub const NEUTRAL: RumbleParam = RumbleParam {
        high_freq: 0x00,
        high_freq_amp: 0x01,
        low_freq: 0x40,
        low_freq_amp: 0x40,
    };

    fn write_to(&self, out: &mut [u8]) {
        out[0] = self.high_freq;
        out[1] = self.high_freq_amp;
        out[2] = self.low_freq;
        out[3] = self.low_freq_amp;
    }
}

// ── Field decoding ──

/// Splits a packed 24-bit little-endian stick field into its two 12-bit axes.
pub fn split_stick(bytes: [u8; 3]) -> (u16, u16) {
    let x = u16::from(bytes[0]) | (u16::from(bytes[1] & 0x0F) << 8);
    let y = (u16::from(bytes[2]) << 4) | u16::from(bytes[1] >> 4);
    (x, y)
}

/// Decoded state block shared by [`PacketType::FullStates`] and
/// [`PacketType::SubcommandReply`] reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FullStates {
    /// 8-bit report counter; wraps freely.
    pub timestamp: u8,
    /// Battery charge in the high nibble, wired flag in the low nibble.
    pub battery_and_wired: u8,
    /// 24 button bits, see [`ProButton`].
    pub keys: u32,
    /// Raw 12-bit (x, y) of the left stick.
    pub left_stick: (u16, u16),
    /// Raw 12-bit (x, y) of the right stick.
    pub right_stick: (u16, u16),
    pub vibration: u8,
}

impl FullStates {
    fn parse(body: &[u8]) -> FullStates {
        FullStates {
            timestamp: body[0],
            battery_and_wired: body[1],
            keys: u32::from(body[2]) | (u32::from(body[3]) << 8) | (u32::from(body[4]) << 16),
            left_stick: split_stick([body[5], body[6], body[7]]),
            right_stick: split_stick([body[8], body[9], body[10]]),
            vibration: body[11],
        }
    }

    /// Battery charge level, 0 (empty) to 8 (full).
    pub fn battery_raw(&self) -> u8 {
        self.battery_and_wired >> 4
    }

    /// Whether the given button bit is set.
    pub fn pressed(&self, button: ProButton) -> bool {
        (self.keys >> button as u8) & 1 == 1
    }
}

/// Decoded [`PacketType::SubcommandReply`] report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubcommandReply {
    pub states: FullStates,
    /// Ack byte; bit 7 set on success.
    pub ack: u8,
    /// Echo of the subcommand code this reply answers.
    pub subcmd: u8,
    pub data: u32,
}

impl SubcommandReply {
    pub fn acknowledged(&self) -> bool {
        self.ack & 0x80 != 0
    }
}

/// Decoded [`PacketType::CommandReply`] report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandReply {
    /// Echo of the command code this reply answers.
    pub cmd: u8,
}

// ── Packet ──

/// One raw 64-byte report.
///
/// Typed views are gated on the discriminant: a view accessor returns `None`
/// unless byte 0 matches the view's packet type, so a mismatched variant can
/// never be read.
#[derive(Clone, Copy)]
pub struct Packet {
    bytes: [u8; PACKET_LEN],
}

impl Packet {
    pub fn from_bytes(bytes: [u8; PACKET_LEN]) -> Packet {
        Packet { bytes }
    }

    /// Wraps the first [`PACKET_LEN`] bytes of `slice`; `None` if too short.
    pub fn from_slice(slice: &[u8]) -> Option<Packet> {
        let bytes: [u8; PACKET_LEN] = slice.get(..PACKET_LEN)?.try_into().ok()?;
        Some(Packet { bytes })
    }

    pub fn as_bytes(&self) -> &[u8; PACKET_LEN] {
        &self.bytes
    }

    /// The discriminant, or `None` for an unknown first byte (zeroed tail
    /// slots of a 128-byte transfer decode as no packet).
    pub fn packet_type(&self) -> Option<PacketType> {
        PacketType::from_byte(self.bytes[0])
    }

    // ── Builders (host → device) ──

    /// Builds a bare command report.
    pub fn host_command(cmd: CommandCode) -> Packet {
        let mut bytes = [0u8; PACKET_LEN];
        bytes[0] = PacketType::Command as u8;
        bytes[1] = cmd as u8;
        Packet { bytes }
    }

    /// Builds a rumble-and-subcommand report with neutral rumble on both
    /// channels.
    pub fn rumble_with_subcommand(serial_id: u8, subcmd: SubcommandCode, data: u32) -> Packet {
        let mut bytes = [0u8; PACKET_LEN];
        bytes[0] = PacketType::RumbleAndSubcommand as u8;
        bytes[1] = serial_id;
        RumbleParam::NEUTRAL.write_to(&mut bytes[2..6]);
        RumbleParam::NEUTRAL.write_to(&mut bytes[6..10]);
        bytes[10] = subcmd as u8;
        bytes[11..15].copy_from_slice(&data.to_le_bytes());
        Packet { bytes }
    }

    // ── Views (device → host) ──

    pub fn full_states(&self) -> Option<FullStates> {
        if self.packet_type()? != PacketType::FullStates {
            return None;
        }
        Some(FullStates::parse(&self.bytes[1..]))
    }

    pub fn command_reply(&self) -> Option<CommandReply> {
        if self.packet_type()? != PacketType::CommandReply {
            return None;
        }
        Some(CommandReply { cmd: self.bytes[1] })
    }

    pub fn subcommand_reply(&self) -> Option<SubcommandReply> {
        if self.packet_type()? != PacketType::SubcommandReply {
            return None;
        }
        Some(SubcommandReply {
            states: FullStates::parse(&self.bytes[1..]),
            ack: self.bytes[13],
            subcmd: self.bytes[14],
            data: u32::from_le_bytes(self.bytes[15..19].try_into().unwrap()),
        })
    }
}

impl std::fmt::Debug for Packet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Packet")
            .field("type", &self.packet_type())
            .finish()
    }
}

/// Iterates the complete 64-byte reports contained in a transfer buffer.
/// A trailing partial report is ignored.
pub fn packets(buf: &[u8]) -> impl Iterator<Item = Packet> + '_ {
    buf.chunks_exact(PACKET_LEN).map(|chunk| {
        let bytes: [u8; PACKET_LEN] = chunk.try_into().expect("chunks_exact yields exact chunks");
        Packet::from_bytes(bytes)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_packet(body: &[u8]) -> Packet {
        let mut bytes = [0u8; PACKET_LEN];
        bytes[0] = 0x30;
        bytes[1..1 + body.len()].copy_from_slice(body);
        Packet::from_bytes(bytes)
    }

    #[test]
    fn split_stick_reference_vector() {
        assert_eq!(split_stick([0xAB, 0xCD, 0xEF]), (0xDAB, 0xEFC));
    }

    #[test]
    fn split_stick_nibble_boundaries() {
        assert_eq!(split_stick([0x00, 0x00, 0x00]), (0x000, 0x000));
        assert_eq!(split_stick([0xFF, 0xFF, 0xFF]), (0xFFF, 0xFFF));
        assert_eq!(split_stick([0x00, 0xF0, 0x00]), (0x000, 0x00F));
        assert_eq!(split_stick([0x00, 0x0F, 0x00]), (0xF00, 0x000));
    }

    #[test]
    fn unknown_discriminant_has_no_type() {
        let p = Packet::from_bytes([0u8; PACKET_LEN]);
        assert_eq!(p.packet_type(), None);
        assert!(p.full_states().is_none());
        assert!(p.command_reply().is_none());
    }

    #[test]
    fn views_require_matching_discriminant() {
        let cmd = Packet::host_command(CommandCode::Handshake);
        assert_eq!(cmd.packet_type(), Some(PacketType::Command));
        assert!(cmd.full_states().is_none());
        assert!(cmd.subcommand_reply().is_none());
    }

    #[test]
    fn host_command_layout() {
        let p = Packet::host_command(CommandCode::SetHighSpeed);
        assert_eq!(p.as_bytes()[0], 0x80);
        assert_eq!(p.as_bytes()[1], 0x03);
        assert!(p.as_bytes()[2..].iter().all(|&b| b == 0));
    }

    #[test]
    fn rumble_subcommand_layout() {
        let p = Packet::rumble_with_subcommand(1, SubcommandCode::SetPlayerLights, 0x01);
        let b = p.as_bytes();
        assert_eq!(b[0], 0x01);
        assert_eq!(b[1], 1, "serial id");
        assert_eq!(&b[2..6], &[0x00, 0x01, 0x40, 0x40], "left neutral rumble");
        assert_eq!(&b[6..10], &[0x00, 0x01, 0x40, 0x40], "right neutral rumble");
        assert_eq!(b[10], 0x30, "subcommand code");
        assert_eq!(&b[11..15], &[0x01, 0x00, 0x00, 0x00], "data, little endian");
    }

    #[test]
    fn full_states_field_offsets() {
        // timestamp, battery, keys (3 B), left stick, right stick, vibration
        let body = [
            0x42, 0x91, 0x08, 0x00, 0x00, 0xE0, 0x07, 0x7A, 0x00, 0x08, 0x77, 0x01,
        ];
        let states = state_packet(&body).full_states().expect("full states");
        assert_eq!(states.timestamp, 0x42);
        assert_eq!(states.battery_and_wired, 0x91);
        assert_eq!(states.battery_raw(), 9);
        assert_eq!(states.keys, 0x000008);
        assert!(states.pressed(ProButton::A));
        assert!(!states.pressed(ProButton::B));
        assert_eq!(states.left_stick, (0x7E0, 0x7A0));
        assert_eq!(states.right_stick, (0x800, 0x770));
        assert_eq!(states.vibration, 0x01);
    }

    #[test]
    fn keys_are_little_endian() {
        let mut body = [0u8; 12];
        body[2] = 0x00;
        body[3] = 0x00;
        body[4] = 0x80; // bit 23 = ZL
        let states = state_packet(&body).full_states().expect("full states");
        assert_eq!(states.keys, 0x800000);
        assert!(states.pressed(ProButton::Zl));
    }

    #[test]
    fn subcommand_reply_fields() {
        let mut bytes = [0u8; PACKET_LEN];
        bytes[0] = 0x21;
        bytes[13] = 0x80; // ack
        bytes[14] = 0x30; // echoed subcommand
        bytes[15..19].copy_from_slice(&0xDEAD_BEEFu32.to_le_bytes());
        let reply = Packet::from_bytes(bytes).subcommand_reply().expect("reply");
        assert!(reply.acknowledged());
        assert_eq!(reply.subcmd, 0x30);
        assert_eq!(reply.data, 0xDEAD_BEEF);
    }

    #[test]
    fn subcommand_reply_nak() {
        let mut bytes = [0u8; PACKET_LEN];
        bytes[0] = 0x21;
        bytes[13] = 0x01;
        let reply = Packet::from_bytes(bytes).subcommand_reply().expect("reply");
        assert!(!reply.acknowledged());
    }

    #[test]
    fn command_reply_echo() {
        let mut bytes = [0u8; PACKET_LEN];
        bytes[0] = 0x81;
        bytes[1] = 0x02;
        let reply = Packet::from_bytes(bytes).command_reply().expect("reply");
        assert_eq!(reply.cmd, CommandCode::Handshake as u8);
    }

    #[test]
    fn packets_scans_both_slots_of_a_transfer() {
        let mut buf = [0u8; READ_TRANSFER_LEN];
        buf[0] = 0x81;
        buf[64] = 0x30;
        let types: Vec<_> = packets(&buf).map(|p| p.packet_type()).collect();
        assert_eq!(
            types,
            vec![Some(PacketType::CommandReply), Some(PacketType::FullStates)]
        );
    }

    #[test]
    fn packets_ignores_partial_tail() {
        let buf = [0u8; PACKET_LEN + 10];
        assert_eq!(packets(&buf).count(), 1);
    }

    #[test]
    fn from_slice_rejects_short_input() {
        assert!(Packet::from_slice(&[0u8; 10]).is_none());
        assert!(Packet::from_slice(&[0u8; PACKET_LEN]).is_some());
    }
}
