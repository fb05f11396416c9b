use crate::AvError;
use crate::constants::BD_ADDR_LENGTH;

/// Remote device address (`BD_ADDR`) of an A2DP peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BluetoothAddress(pub [u8; BD_ADDR_LENGTH]);

impl BluetoothAddress {
    /// The all-zero address used while no peer is bound
    pub const EMPTY: Self = Self([0; BD_ADDR_LENGTH]);

    /// Create a new Bluetooth address from bytes
    #[must_use]
    pub const fn new(addr: [u8; BD_ADDR_LENGTH]) -> Self {
        Self(addr)
    }

    /// Get the raw address bytes
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; BD_ADDR_LENGTH] {
        &self.0
    }

    /// Whether this is the all-zero address
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }

    /// Format the address as a colon-separated hex string
    #[must_use]
    pub fn format_hex(&self) -> heapless::String<17> {
        const HEX: &[u8; 16] = b"0123456789ABCDEF";
        let mut result = heapless::String::new();
        for (i, byte) in self.0.iter().enumerate() {
            if i > 0 {
                result.push(':').ok();
            }
            result.push(HEX[(byte >> 4) as usize] as char).ok();
            result.push(HEX[(byte & 0x0F) as usize] as char).ok();
        }
        result
    }

    /// Parse a colon-separated hex address such as `00:1B:DC:0F:20:11`
    ///
    /// # Errors
    ///
    /// Returns [`AvError::InvalidParameter`] if the string is not exactly 17
    /// characters of six colon-separated hex octets.
    pub fn from_hex(hex: &str) -> Result<Self, AvError> {
        if hex.len() != 17 {
            return Err(AvError::InvalidParameter);
        }

        let mut bytes = [0u8; BD_ADDR_LENGTH];
        let mut parts = hex.split(':');
        for byte in &mut bytes {
            let part = parts.next().ok_or(AvError::InvalidParameter)?;
            if part.len() != 2 {
                return Err(AvError::InvalidParameter);
            }
            *byte = u8::from_str_radix(part, 16).map_err(|_| AvError::InvalidParameter)?;
        }
        if parts.next().is_some() {
            return Err(AvError::InvalidParameter);
        }
        Ok(Self(bytes))
    }
}

impl From<[u8; BD_ADDR_LENGTH]> for BluetoothAddress {
    fn from(addr: [u8; BD_ADDR_LENGTH]) -> Self {
        Self(addr)
    }
}

impl From<BluetoothAddress> for bt_hci::param::BdAddr {
    fn from(addr: BluetoothAddress) -> Self {
        bt_hci::param::BdAddr::new(addr.0)
    }
}

impl TryFrom<bt_hci::param::BdAddr> for BluetoothAddress {
    type Error = AvError;

    fn try_from(bd_addr: bt_hci::param::BdAddr) -> Result<Self, Self::Error> {
        BluetoothAddress::try_from(&bd_addr.raw()[..])
    }
}

impl TryFrom<&str> for BluetoothAddress {
    type Error = AvError;

    fn try_from(hex: &str) -> Result<Self, Self::Error> {
        BluetoothAddress::from_hex(hex)
    }
}

impl TryFrom<&[u8]> for BluetoothAddress {
    type Error = AvError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let addr: [u8; BD_ADDR_LENGTH] = bytes.try_into().map_err(|_| AvError::InvalidParameter)?;
        Ok(Self(addr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_hex() {
        let addr = BluetoothAddress::new([0x00, 0x1B, 0xDC, 0x0F, 0x20, 0x11]);
        assert_eq!(addr.format_hex().as_str(), "00:1B:DC:0F:20:11");
        assert_eq!(BluetoothAddress::EMPTY.format_hex().as_str(), "00:00:00:00:00:00");
    }

    #[test]
    fn test_from_hex() {
        let addr = BluetoothAddress::from_hex("0A:b1:2C:D3:4E:F5").unwrap();
        assert_eq!(addr.as_bytes(), &[0x0A, 0xB1, 0x2C, 0xD3, 0x4E, 0xF5]);

        assert!(BluetoothAddress::from_hex("0A:B1:2C:D3:4E").is_err());
        assert!(BluetoothAddress::from_hex("0A-B1-2C-D3-4E-F5").is_err());
        assert!(BluetoothAddress::from_hex("0A:B1:2C:D3:4E:GG").is_err());
        assert!(BluetoothAddress::from_hex("0AB:1:2C:D3:4E:F5").is_err());
    }

    #[test]
    fn test_empty_address() {
        assert!(BluetoothAddress::EMPTY.is_empty());
        assert!(BluetoothAddress::default().is_empty());
        assert!(!BluetoothAddress::new([0, 0, 0, 0, 0, 1]).is_empty());
    }

    #[test]
    fn test_bd_addr_round_trip() {
        let addr = BluetoothAddress::new([0x12, 0x34, 0x56, 0x78, 0x9A, 0xBC]);
        let bd_addr: bt_hci::param::BdAddr = addr.into();
        assert_eq!(&bd_addr.raw()[..], &[0x12, 0x34, 0x56, 0x78, 0x9A, 0xBC][..]);
        assert_eq!(BluetoothAddress::try_from(bd_addr).unwrap(), addr);
    }

    #[test]
    fn test_try_from_slice() {
        let ok = &[1u8, 2, 3, 4, 5, 6][..];
        assert_eq!(
            BluetoothAddress::try_from(ok).unwrap(),
            BluetoothAddress::new([1, 2, 3, 4, 5, 6])
        );
        assert!(BluetoothAddress::try_from(&[1u8, 2, 3][..]).is_err());
    }
}
