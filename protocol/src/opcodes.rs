//! Opcode tables for the game, CSP extension, plugin and RCON protocols.

macro_rules! opcode_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident : $repr:ident {
            $($(#[$vmeta:meta])* $variant:ident = $value:literal,)+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr($repr)]
        pub enum $name {
            $($(#[$vmeta])* $variant = $value,)+
        }

        impl $name {
            pub fn from_repr(value: $repr) -> Option<Self> {
                match value {
                    $($value => Some(Self::$variant),)+
                    _ => None,
                }
            }

            pub fn repr(self) -> $repr {
                self as $repr
            }
        }
    };
}

opcode_enum! {
    /// First payload byte of every game TCP frame and UDP datagram.
    pub enum ACServerProtocol: u8 {
        BlacklistedOnServer = 0x3B,
        WrongPassword = 0x3C,
        RequestNewConnection = 0x3D,
        NewCarConnection = 0x3E,
        UnsupportedProtocol = 0x42,
        CleanExitDrive = 0x43,
        Checksum = 0x44,
        NoSlotsAvailable = 0x45,
        PositionUpdate = 0x46,
        Chat = 0x47,
        MegaPacket = 0x48,
        LapCompleted = 0x49,
        CarDisconnected = 0x4D,
        /// UDP endpoint association, echoed by the server.
        CarConnect = 0x4E,
        CarConnected = 0x5A,
        KickCar = 0x68,
        AuthFailed = 0x6F,
        /// Custom Shaders Patch extension envelope.
        Extended = 0xAB,
        Ping = 0xF8,
        Pong = 0xF9,
    }
}

opcode_enum! {
    /// Second-level opcode inside a TCP [`ACServerProtocol::Extended`] packet.
    pub enum CSPMessageTypeTcp: u8 {
        SpectateCar = 0x00,
        CarVisibilityUpdate = 0x02,
        ClientMessage = 0x03,
        SystemMessage = 0x04,
        KickBanMessage = 0x05,
    }
}

opcode_enum! {
    /// Second-level opcode inside a UDP [`ACServerProtocol::Extended`] packet.
    pub enum CSPMessageTypeUdp: u8 {
        WeatherUpdate = 0x01,
        CustomUpdate = 0x02,
        ClientMessage = 0x03,
    }
}

opcode_enum! {
    /// Message type of a CSP client message. Lua messages carry a further
    /// 32-bit type tag.
    pub enum CSPClientMessageType: u16 {
        HandshakeIn = 0x0000,
        HandshakeOut = 0x0001,
        AdminPenalty = 0x0002,
        LuaMessage = 0xFFFF,
    }
}

opcode_enum! {
    /// Reason byte of a [`ACServerProtocol::KickCar`] packet.
    pub enum KickReason: u8 {
        None = 0,
        Kicked = 1,
        VoteKicked = 2,
        VoteBanned = 3,
        ChecksumFailed = 4,
        Timeout = 5,
    }
}

opcode_enum! {
    /// Session kind advertised to clients and plugins.
    pub enum SessionType: u8 {
        Booking = 0,
        Practice = 1,
        Qualifying = 2,
        Race = 3,
    }
}

opcode_enum! {
    /// Opcodes of the UDP telemetry plugin protocol.
    pub enum UdpPluginProtocol: u8 {
        NewSession = 50,
        NewConnection = 51,
        ConnectionClosed = 52,
        CarUpdate = 53,
        CarInfo = 54,
        EndSession = 55,
        Version = 56,
        Chat = 57,
        ClientLoaded = 58,
        SessionInfo = 59,
        Error = 60,
        LapCompleted = 73,
        ClientEvent = 130,
        RealtimePosInterval = 200,
        GetCarInfo = 201,
        SendChat = 202,
        BroadcastChat = 203,
        GetSessionInfo = 204,
        SetSessionInfo = 205,
        KickUser = 206,
        NextSession = 207,
        RestartSession = 208,
        AdminCommand = 209,
    }
}

/// Version byte sent in the plugin `Version` message.
pub const UDP_PLUGIN_PROTOCOL_VERSION: u8 = 4;

opcode_enum! {
    /// RCON packet types. `ExecCommand` and `AuthResponse` share value 2;
    /// the direction decides which one applies.
    pub enum RconRequestType: i32 {
        ExecCommand = 2,
        Auth = 3,
    }
}

opcode_enum! {
    pub enum RconResponseType: i32 {
        ResponseValue = 0,
        AuthResponse = 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_values_match_wire() {
        assert_eq!(ACServerProtocol::NewCarConnection.repr(), 0x3E);
        assert_eq!(ACServerProtocol::PositionUpdate.repr(), 0x46);
        assert_eq!(ACServerProtocol::Chat.repr(), 0x47);
        assert_eq!(ACServerProtocol::AuthFailed.repr(), 0x6F);
        assert_eq!(ACServerProtocol::Extended.repr(), 0xAB);
    }

    #[test]
    fn test_from_repr() {
        assert_eq!(
            ACServerProtocol::from_repr(0x3D),
            Some(ACServerProtocol::RequestNewConnection)
        );
        assert_eq!(ACServerProtocol::from_repr(0x00), None);
        assert_eq!(
            CSPClientMessageType::from_repr(0xFFFF),
            Some(CSPClientMessageType::LuaMessage)
        );
        assert_eq!(RconRequestType::from_repr(3), Some(RconRequestType::Auth));
        assert_eq!(RconRequestType::from_repr(0), None);
        assert_eq!(
            UdpPluginProtocol::from_repr(209),
            Some(UdpPluginProtocol::AdminCommand)
        );
    }
}
