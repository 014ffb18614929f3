//! the handshake TLV element types, and the message type built from them

use crate::tlv::{ElementType, Tlv};

/// element types carried in a handshake message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Type {
    ProtocolType = 0,
    CipherMessage = 1,
    KeyIndex = 2,
}

impl From<Type> for u8 {
    fn from(t: Type) -> u8 {
        t as u8
    }
}

impl ElementType for Type {
    const MAX: u8 = Type::KeyIndex as u8;

    fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Type::ProtocolType),
            1 => Some(Type::CipherMessage),
            2 => Some(Type::KeyIndex),
            _ => None,
        }
    }
}

/// the protocol a client selects on its first handshake flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolType {
    Password,
    Psk,
}

impl ProtocolType {
    pub fn to_byte(self) -> u8 {
        match self {
            ProtocolType::Password => 0,
            ProtocolType::Psk => 1,
        }
    }

    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(ProtocolType::Password),
            1 => Some(ProtocolType::Psk),
            _ => None,
        }
    }
}

pub type HandshakeMessage = Tlv<Type>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_type_roundtrip() {
        assert_eq!(ProtocolType::from_byte(0), Some(ProtocolType::Password));
        assert_eq!(ProtocolType::from_byte(1), Some(ProtocolType::Psk));
        assert_eq!(ProtocolType::from_byte(2), None);
    }

    #[test]
    fn handshake_message_roundtrip() {
        let mut msg = HandshakeMessage::new();
        msg.set(Type::KeyIndex, b"alice".to_vec());
        msg.set(Type::CipherMessage, vec![1, 2, 3]);
        let bytes = msg.serialize();
        let parsed = HandshakeMessage::parse(&bytes).unwrap();
        assert_eq!(parsed.get(Type::KeyIndex), Some(b"alice".as_slice()));
    }
}
